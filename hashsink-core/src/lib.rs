//! Hashsink Core - content-addressed write/read pipelines over object storage
//!
//! Bytes written through a [`Sink`] are streamed to a temporary object while
//! being hashed, then renamed to `<sha256>.<type>` once storage confirms the
//! write:
//! - raw SHA-256 for opaque types, canonical element hashing for JSON arrays
//! - one-time container bootstrap shared by every operation
//! - bounded retry for whole-value `get`/`set`
//! - `object_store` adapters for local disk, memory, GCS and S3

pub mod backend;
pub mod config;
pub mod declared_type;
pub mod error;
pub mod event;
pub mod gate;
pub mod hasher;
pub mod naming;
pub mod operations;
pub mod retry;
pub mod sink;

pub use backend::{
    Backend, BackendWriter, ListEntry, MemoryBackend, ObjectAttributes, ObjectStoreBackend,
    WriteOptions,
};
pub use config::{BackendConfig, PipelineConfig, RetryConfig, SinkConfig};
pub use declared_type::{DeclaredType, HashStrategy};
pub use error::{BackendError, BackendResult, SinkError, SinkResult};
pub use event::{EventBus, SinkEvent};
pub use gate::{ReadinessGate, ReadinessState};
pub use hasher::{ContentHash, ContentHasher, JsonElementHasher, RawHasher, compute_hash};
pub use naming::{TEMP_KEY_PREFIX, finalized_key, is_temp_key, temp_key};
pub use operations::{DirectoryEntry, ReadStatus, SinkReader, SinkWriter, WriteOutcome, WriteState};
pub use retry::RetryPolicy;
pub use sink::{Sink, SinkOptions};
