use std::time::Duration;

/// Fire-once deferred callbacks
///
/// The controller never sleeps on its own task; every delay in the item
/// lifecycle goes through this trait so the wait happens elsewhere and the
/// continuation arrives as an ordinary event.
pub trait Scheduler: Send + Sync {
    fn defer(&self, delay: Duration, task: Box<dyn FnOnce() + Send + 'static>);
}

/// [`Scheduler`] backed by the ambient tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn defer(&self, delay: Duration, task: Box<dyn FnOnce() + Send + 'static>) {
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task();
        });
    }
}
