//! Fire-and-forget sink for task mutation notifications.

use tokio::sync::broadcast;

use crate::domain::TaskEvent;

/// Default number of notifications buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Publishes task notifications after a mutation commits.
///
/// Publishing never fails the mutation: having no subscribers, or
/// subscribers that lag behind, is not an error.
pub trait TaskEventPublisher: Send + Sync {
    /// Publishes `event` to current subscribers.
    fn publish(&self, event: TaskEvent);

    /// Opens a new subscription receiving events published from now on.
    fn subscribe(&self) -> broadcast::Receiver<TaskEvent>;
}

/// [`TaskEventPublisher`] over a `tokio::sync::broadcast` channel.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<TaskEvent>,
}

impl BroadcastPublisher {
    /// Creates a publisher buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl TaskEventPublisher for BroadcastPublisher {
    fn publish(&self, event: TaskEvent) {
        match self.sender.send(event) {
            Ok(receivers) => tracing::trace!(receivers, "Published task event"),
            Err(_) => tracing::trace!("No subscribers for task event"),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }
}
