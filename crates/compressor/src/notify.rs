use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::events::CompressorEvent;

/// Level attached to every user-facing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Success => "success",
        };
        f.write_str(label)
    }
}

/// A message as delivered to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub at: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

/// Receiver of `(message, severity)` pairs for every log-worthy event
pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str, severity: Severity);
}

/// Default sink: forwards to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!("{}", message),
            Severity::Success => info!("✅ {}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }
    }
}

/// Fans each message out to the host's sink and to event subscribers
#[derive(Clone)]
pub(crate) struct Notifier {
    sink: Arc<dyn NotificationSink>,
    events: broadcast::Sender<CompressorEvent>,
}

impl Notifier {
    pub(crate) fn new(
        sink: Arc<dyn NotificationSink>,
        events: broadcast::Sender<CompressorEvent>,
    ) -> Self {
        Notifier { sink, events }
    }

    pub(crate) fn send(&self, message: impl Into<String>, severity: Severity) {
        let message = message.into();
        self.sink.notify(&message, severity);
        self.publish(CompressorEvent::Notification(Notification {
            at: Utc::now(),
            severity,
            message,
        }));
    }

    pub(crate) fn info(&self, message: impl Into<String>) {
        self.send(message, Severity::Info);
    }

    pub(crate) fn warning(&self, message: impl Into<String>) {
        self.send(message, Severity::Warning);
    }

    pub(crate) fn error(&self, message: impl Into<String>) {
        self.send(message, Severity::Error);
    }

    pub(crate) fn success(&self, message: impl Into<String>) {
        self.send(message, Severity::Success);
    }

    /// Publish an event; having no subscribers is not an error
    pub(crate) fn publish(&self, event: CompressorEvent) {
        let _ = self.events.send(event);
    }
}
