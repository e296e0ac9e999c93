use crate::backend::{Backend, WriteOptions};
use crate::config::SinkConfig;
use crate::declared_type::DeclaredType;
use crate::error::SinkResult;
use crate::event::{EventBus, SinkEvent};
use crate::gate::{ReadinessGate, ReadinessState};
use crate::operations::{
    DirectoryEntry, GetObjectOperation, GetObjectOperationRequest, HasObjectOperation,
    HasObjectOperationRequest, ListDirectoryOperation, ListDirectoryOperationRequest,
    ReadObjectOperation, ReadObjectOperationRequest, SetObjectOperation,
    SetObjectOperationRequest, SinkReader, SinkWriter, WriteObjectOperation,
    WriteObjectOperationRequest,
};
use crate::retry::RetryPolicy;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkOptions {
    pub retry: RetryPolicy,
    /// Capacity of each bounded channel between pipeline stages.
    pub channel_capacity: usize,
    pub event_capacity: usize,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            channel_capacity: 16,
            event_capacity: 64,
        }
    }
}

/// Content-addressed object store front-end.
///
/// Cloning is cheap; clones share the backend, the readiness gate and the
/// event bus.
#[derive(Clone)]
pub struct Sink {
    backend: Arc<dyn Backend>,
    gate: Arc<ReadinessGate>,
    events: EventBus,
    write_object: WriteObjectOperation,
    read_object: ReadObjectOperation,
    get_object: GetObjectOperation,
    set_object: SetObjectOperation,
    has_object: HasObjectOperation,
    list_directory: ListDirectoryOperation,
}

impl Sink {
    pub fn new(backend: Arc<dyn Backend>, options: SinkOptions) -> Self {
        let events = EventBus::new(options.event_capacity);
        let gate = Arc::new(ReadinessGate::new(Arc::clone(&backend), events.clone()));

        Self {
            write_object: WriteObjectOperation::new(
                Arc::clone(&backend),
                Arc::clone(&gate),
                events.clone(),
                options.channel_capacity,
            ),
            read_object: ReadObjectOperation::new(
                Arc::clone(&backend),
                Arc::clone(&gate),
                events.clone(),
                options.channel_capacity,
            ),
            get_object: GetObjectOperation::new(Arc::clone(&backend), Arc::clone(&gate), options.retry),
            set_object: SetObjectOperation::new(Arc::clone(&backend), Arc::clone(&gate), options.retry),
            has_object: HasObjectOperation::new(Arc::clone(&backend), Arc::clone(&gate)),
            list_directory: ListDirectoryOperation::new(Arc::clone(&backend), Arc::clone(&gate)),
            backend,
            gate,
            events,
        }
    }

    pub fn from_config(config: &SinkConfig) -> SinkResult<Self> {
        let backend = config.build_backend()?;
        tracing::info!("Opening sink on bucket {}", backend.name());
        Ok(Self::new(backend, config.options()))
    }

    pub fn bucket(&self) -> &str {
        self.backend.name()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
        self.events.subscribe()
    }

    pub fn readiness(&self) -> ReadinessState {
        self.gate.state()
    }

    /// Waits for the storage container; bootstraps it on first use.
    pub async fn ready(&self) -> SinkResult<()> {
        self.gate.ready().await
    }

    /// Opens a content-addressed writer. Fails before any I/O when the type
    /// is unknown.
    pub fn writer(&self, declared_type: &str) -> SinkResult<SinkWriter> {
        self.writer_with_options(declared_type, WriteOptions::default())
    }

    pub fn writer_with_options(
        &self,
        declared_type: &str,
        options: WriteOptions,
    ) -> SinkResult<SinkWriter> {
        let declared = DeclaredType::resolve(declared_type)?;
        Ok(self
            .write_object
            .run(WriteObjectOperationRequest { declared, options }))
    }

    pub fn reader(&self, key: &str) -> SinkReader {
        self.read_object.run(ReadObjectOperationRequest {
            key: key.to_string(),
        })
    }

    pub async fn get(&self, key: &str) -> SinkResult<Bytes> {
        self.get_object
            .run(GetObjectOperationRequest {
                key: key.to_string(),
            })
            .await
    }

    pub async fn set(
        &self,
        key: &str,
        content: impl Into<Bytes>,
        options: Option<WriteOptions>,
    ) -> SinkResult<()> {
        self.set_object
            .run(SetObjectOperationRequest {
                key: key.to_string(),
                content: content.into(),
                options: options.unwrap_or_default(),
            })
            .await
    }

    pub async fn has(&self, key: &str) -> SinkResult<bool> {
        self.has_object
            .run(HasObjectOperationRequest {
                key: key.to_string(),
            })
            .await
    }

    /// Lists the objects directly under `prefix` with their contents.
    pub async fn dir(&self, prefix: &str) -> SinkResult<Vec<DirectoryEntry>> {
        self.list_directory
            .run(ListDirectoryOperationRequest {
                prefix: Some(prefix.to_string()),
            })
            .await
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("bucket", &self.backend.name())
            .field("readiness", &self.gate.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, ObjectStoreBackend};
    use crate::config::BackendConfig;
    use crate::error::SinkError;
    use crate::hasher::compute_hash;
    use crate::operations::{ReadStatus, WriteOutcome};
    use std::time::Duration;

    fn sink(backend: &MemoryBackend) -> Sink {
        let options = SinkOptions {
            retry: RetryPolicy::new(3, Duration::ZERO),
            ..SinkOptions::default()
        };
        Sink::new(Arc::new(backend.clone()), options)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let backend = MemoryBackend::new("assets");
        let sink = sink(&backend);

        sink.set("a.json", "[1,2]", None).await.unwrap();
        assert_eq!(sink.get("a.json").await.unwrap(), Bytes::from_static(b"[1,2]"));
        assert!(sink.has("a.json").await.unwrap());
        assert_eq!(sink.readiness(), ReadinessState::Resolved);
    }

    #[tokio::test]
    async fn test_unknown_type_makes_no_backend_calls() {
        let backend = MemoryBackend::new("assets");
        let sink = sink(&backend);

        let err = sink.set("a.fake", "x", None).await.unwrap_err();
        assert!(matches!(err, SinkError::InvalidArgument(_)));
        assert!(matches!(sink.writer("fake"), Err(SinkError::InvalidArgument(_))));
        assert!(matches!(sink.writer(""), Err(SinkError::InvalidArgument(_))));

        tokio::task::yield_now().await;
        assert_eq!(backend.calls(), Default::default());
        assert_eq!(sink.readiness(), ReadinessState::Unresolved);
    }

    #[tokio::test]
    async fn test_written_object_reads_back() {
        let backend = MemoryBackend::new("assets");
        let sink = sink(&backend);

        let mut writer = sink.writer("css").unwrap();
        writer.write("body{}").await.unwrap();
        let (hash, key) = writer.finish().await.into_result().unwrap();
        assert_eq!(hash, compute_hash(b"body{}"));

        let mut reader = sink.reader(&key);
        assert_eq!(reader.status().await, ReadStatus::Found { key: key.clone() });
        assert_eq!(reader.read_to_end().await.unwrap(), Bytes::from_static(b"body{}"));
        assert_eq!(sink.get(&key).await.unwrap(), Bytes::from_static(b"body{}"));
    }

    #[tokio::test]
    async fn test_same_content_same_key() {
        let backend = MemoryBackend::new("assets");
        let sink = sink(&backend);

        let mut keys = Vec::new();
        for chunks in [vec!["[1,", "2]"], vec!["[ 1, 2 ]"]] {
            let mut writer = sink.writer("json").unwrap();
            for chunk in chunks {
                writer.write(chunk).await.unwrap();
            }
            match writer.finish().await {
                WriteOutcome::Saved { key, .. } => keys.push(key),
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(keys[0], keys[1]);
        assert_eq!(backend.keys(), vec![keys[0].clone()]);
    }

    #[tokio::test]
    async fn test_storage_info_published_once() {
        let backend = MemoryBackend::new("assets").with_existing_container();
        let sink = sink(&backend);
        let mut events = sink.subscribe();

        sink.set("a.txt", "a", None).await.unwrap();
        sink.clone().set("b.txt", "b", None).await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            SinkEvent::StorageInfo("container assets already exists".to_string())
        );
        assert!(events.try_recv().is_err());
        assert_eq!(backend.calls().create_container, 1);
    }

    #[tokio::test]
    async fn test_dir_over_object_store() {
        let sink = Sink::new(
            Arc::new(ObjectStoreBackend::memory("assets")),
            SinkOptions::default(),
        );
        sink.set("some-path/file.json", "[1]", None).await.unwrap();
        sink.set("some-path/nested/file.json", "[2]", None).await.unwrap();

        let entries = sink.dir("/some-path").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "some-path/file.json");
        assert_eq!(entries[0].content, Bytes::from_static(b"[1]"));

        assert!(matches!(
            sink.dir("/other").await,
            Err(SinkError::EmptyListing { .. })
        ));
    }

    #[tokio::test]
    async fn test_dir_returns_reserved_character_keys() {
        let sink = Sink::new(
            Arc::new(ObjectStoreBackend::memory("assets")),
            SinkOptions::default(),
        );
        sink.set("some-path/a#1.json", "[1]", None).await.unwrap();

        let entries = sink.dir("/some-path").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "some-path/a#1.json");
        assert_eq!(entries[0].content, Bytes::from_static(b"[1]"));
        assert_eq!(
            sink.get("some-path/a#1.json").await.unwrap(),
            Bytes::from_static(b"[1]")
        );
    }

    #[tokio::test]
    async fn test_non_canonical_keys_make_no_backend_calls() {
        let backend = MemoryBackend::new("assets");
        let sink = sink(&backend);

        for key in ["/a.json", "a//b.json", "some-path/../a.json"] {
            assert!(matches!(
                sink.set(key, "[1]", None).await,
                Err(SinkError::InvalidArgument(_))
            ));
            assert!(matches!(sink.get(key).await, Err(SinkError::InvalidArgument(_))));
            assert!(matches!(sink.has(key).await, Err(SinkError::InvalidArgument(_))));
        }

        tokio::task::yield_now().await;
        assert_eq!(backend.calls(), Default::default());
        assert!(backend.keys().is_empty());
    }

    #[tokio::test]
    async fn test_from_config_local() {
        let root = tempfile::tempdir().unwrap();
        let config = SinkConfig::new(
            "assets",
            BackendConfig::Local {
                root: root.path().to_path_buf(),
            },
        );
        let sink = Sink::from_config(&config).unwrap();

        let mut writer = sink.writer("txt").unwrap();
        writer.write("hello world").await.unwrap();
        let (_, key) = writer.finish().await.into_result().unwrap();

        assert!(root.path().join("assets").join(&key).is_file());
        assert_eq!(sink.get(&key).await.unwrap(), Bytes::from_static(b"hello world"));
        assert_eq!(sink.bucket(), "assets");
    }
}
