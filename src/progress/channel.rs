use super::{ProgressEvent, ProgressHandler};
use tokio::sync::broadcast;

/// Fans events out to any number of subscribers.
///
/// Sending never blocks the pipeline; slow subscribers see
/// `RecvError::Lagged` instead of stalling a job.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ChannelHandler {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelHandler {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressHandler for ChannelHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event.clone());
    }
}
