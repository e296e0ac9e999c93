//! Storage backends.
//!
//! The pipelines only talk to storage through [`Backend`]. Two
//! implementations ship with the crate:
//!
//! - [`ObjectStoreBackend`] - adapter over the `object_store` crate (local
//!   filesystem, in-memory, GCS, S3)
//! - [`MemoryBackend`] - in-process double with scripted failures, used by
//!   the test suites

pub mod memory;
pub mod store;

pub use memory::{CallCounts, MemoryBackend, StoredObject};
pub use store::ObjectStoreBackend;

use crate::declared_type::DeclaredType;
use crate::error::BackendResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use std::collections::BTreeMap;

pub type ByteStream = BoxStream<'static, BackendResult<Bytes>>;

/// Caller options for a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Extra metadata merged next to the content type.
    pub metadata: BTreeMap<String, String>,
    /// Object visibility; public unless set to `false`.
    pub public: Option<bool>,
    /// Resumable (multipart) upload; on unless set to `false`.
    pub resumable: Option<bool>,
}

impl WriteOptions {
    pub fn private() -> Self {
        Self {
            public: Some(false),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_resumable(mut self, resumable: bool) -> Self {
        self.resumable = Some(resumable);
        self
    }
}

/// Attributes recorded with a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAttributes {
    pub content_type: String,
    pub public: bool,
    pub resumable: bool,
    pub metadata: BTreeMap<String, String>,
}

impl ObjectAttributes {
    pub fn new(declared: &DeclaredType, options: &WriteOptions) -> Self {
        Self {
            content_type: declared.content_type().to_string(),
            public: options.public.unwrap_or(true),
            resumable: options.resumable.unwrap_or(true),
            metadata: options.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub key: String,
}

/// Sink side of a streaming upload.
#[async_trait]
pub trait BackendWriter: Send {
    async fn write(&mut self, chunk: Bytes) -> BackendResult<()>;

    /// Completes the upload. Returns once the object is durable.
    async fn finish(self: Box<Self>) -> BackendResult<()>;

    async fn abort(self: Box<Self>) -> BackendResult<()>;
}

/// Abstract object store the pipelines run against.
///
/// Implementations must be safe for concurrent use; every pipeline shares the
/// same backend handle.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Name of the storage container (bucket).
    fn name(&self) -> &str;

    /// Creates the container. Fails with `BackendError::AlreadyExists` when it
    /// is already there.
    async fn create_container(&self) -> BackendResult<()>;

    async fn open_write_stream(
        &self,
        key: &str,
        attributes: ObjectAttributes,
    ) -> BackendResult<Box<dyn BackendWriter>>;

    /// Opens a read stream. Returning `Ok` means the backend has responded.
    async fn open_read_stream(&self, key: &str) -> BackendResult<ByteStream>;

    /// Existence check; `None` when the backend gave no usable answer.
    async fn exists(&self, key: &str) -> BackendResult<Option<bool>>;

    async fn download(&self, key: &str) -> BackendResult<Bytes>;

    async fn save(&self, key: &str, content: Bytes, attributes: ObjectAttributes)
    -> BackendResult<()>;

    /// Moves an object to a new key.
    async fn rename(&self, from: &str, to: &str) -> BackendResult<()>;

    /// Lists keys starting with `prefix`; `None` when the backend returned
    /// nothing at all.
    async fn list_with_prefix(&self, prefix: &str) -> BackendResult<Option<Vec<ListEntry>>>;
}
