use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::Capabilities;
use crate::item::Item;
use crate::notify::Notification;

/// Aggregate counters for the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    /// Completed plus already-optimal items of the current or last run
    pub completed: usize,
    pub total: usize,
    pub active: bool,
}

/// Broadcast to every subscriber of a [`crate::CompressorHandle`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CompressorEvent {
    ItemUpdated { index: usize, item: Item },
    CountsChanged(BatchCounts),
    BatchStarted { run_id: Uuid, total: usize },
    BatchFinished { run_id: Uuid, completed: usize, total: usize },
    CapabilitiesChanged(Capabilities),
    Notification(Notification),
}
