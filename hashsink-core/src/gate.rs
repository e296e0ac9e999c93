use crate::backend::Backend;
use crate::error::{BackendError, SinkError, SinkResult};
use crate::event::{EventBus, SinkEvent};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::OnceCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadinessState {
    Unresolved = 0,
    Resolving = 1,
    Resolved = 2,
    Rejected = 3,
}

impl ReadinessState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Resolving,
            2 => Self::Resolved,
            3 => Self::Rejected,
            _ => Self::Unresolved,
        }
    }
}

/// One-time container bootstrap shared by every storage operation.
///
/// The first caller runs `create_container`; concurrent callers wait on the
/// same attempt, and later callers get the memoized result. A container that
/// already exists counts as ready. Any other failure rejects the gate for the
/// lifetime of the store.
pub struct ReadinessGate {
    backend: Arc<dyn Backend>,
    events: EventBus,
    cell: OnceCell<SinkResult<()>>,
    state: AtomicU8,
}

impl ReadinessGate {
    pub fn new(backend: Arc<dyn Backend>, events: EventBus) -> Self {
        Self {
            backend,
            events,
            cell: OnceCell::new(),
            state: AtomicU8::new(ReadinessState::Unresolved as u8),
        }
    }

    pub fn state(&self) -> ReadinessState {
        ReadinessState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub async fn ready(&self) -> SinkResult<()> {
        self.cell.get_or_init(|| self.bootstrap()).await.clone()
    }

    async fn bootstrap(&self) -> SinkResult<()> {
        self.set_state(ReadinessState::Resolving);
        let name = self.backend.name().to_string();

        let message = match self.backend.create_container().await {
            Ok(()) => format!("container {} created", name),
            Err(BackendError::AlreadyExists { .. }) => format!("container {} already exists", name),
            Err(err) => {
                tracing::error!("Failed to bootstrap container {}: {}", name, err);
                self.set_state(ReadinessState::Rejected);
                return Err(SinkError::Bootstrap(format!("{}: {}", name, err)));
            }
        };

        tracing::info!("Storage ready: {}", message);
        self.set_state(ReadinessState::Resolved);
        self.events.publish(SinkEvent::StorageInfo(message));
        Ok(())
    }

    fn set_state(&self, state: ReadinessState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("backend", &self.backend.name())
            .field("state", &self.state())
            .finish()
    }
}
