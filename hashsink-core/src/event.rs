use crate::error::{BackendError, SinkError};
use crate::hasher::ContentHash;
use tokio::sync::broadcast;

/// Named events published by the pipelines and the readiness gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// The object was finalized under its content-derived key.
    FileSaved { hash: ContentHash, key: String },
    /// Content was stored under `temp_key` but the finalizing rename failed.
    FileNotSaved { temp_key: String, error: SinkError },
    FileFound { key: String },
    FileNotFound { key: String, cause: BackendError },
    Error { key: String, error: SinkError },
    /// Published once, when the storage container is ready.
    StorageInfo(String),
}

impl SinkEvent {
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::FileSaved { key, .. }
            | Self::FileFound { key }
            | Self::FileNotFound { key, .. }
            | Self::Error { key, .. } => Some(key),
            Self::FileNotSaved { temp_key, .. } => Some(temp_key),
            Self::StorageInfo(_) => None,
        }
    }
}

/// Store-wide broadcast of [`SinkEvent`]s.
///
/// Publishing never blocks and never fails; events sent while nobody is
/// subscribed are dropped, and slow subscribers observe `Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SinkEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: SinkEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(SinkEvent::FileFound {
            key: "a.json".to_string(),
        });

        for rx in [&mut first, &mut second] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.key(), Some("a.json"));
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(0);
        bus.publish(SinkEvent::StorageInfo("ready".to_string()));
        assert_eq!(SinkEvent::StorageInfo("ready".to_string()).key(), None);
    }
}
