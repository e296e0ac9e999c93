use crate::backend::{Backend, ObjectAttributes, WriteOptions};
use crate::declared_type::DeclaredType;
use crate::error::SinkResult;
use crate::gate::ReadinessGate;
use crate::naming;
use crate::retry::RetryPolicy;
use bytes::Bytes;
use std::sync::Arc;

#[derive(Clone)]
pub struct SetObjectOperation {
    backend: Arc<dyn Backend>,
    gate: Arc<ReadinessGate>,
    retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct SetObjectOperationRequest {
    pub key: String,
    pub content: Bytes,
    pub options: WriteOptions,
}

impl SetObjectOperation {
    pub fn new(backend: Arc<dyn Backend>, gate: Arc<ReadinessGate>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            gate,
            retry,
        }
    }

    /// Stores a whole value under a caller-chosen key.
    ///
    /// The key's extension must name a known type; this is checked before the
    /// store is touched.
    pub async fn run(&self, request: SetObjectOperationRequest) -> SinkResult<()> {
        let SetObjectOperationRequest {
            key,
            content,
            options,
        } = request;

        let key = naming::require_key(&key)?;
        let declared = DeclaredType::from_key(key)?;
        self.gate.ready().await?;

        let attributes = ObjectAttributes::new(&declared, &options);
        let size = content.len();
        self.retry
            .run(key, "save", || {
                self.backend
                    .save(key, content.clone(), attributes.clone())
            })
            .await?;

        tracing::debug!("Saved {} ({} bytes, {})", key, size, declared.content_type());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::SinkError;
    use crate::event::EventBus;
    use std::time::Duration;

    fn operation(backend: &MemoryBackend) -> SetObjectOperation {
        let backend: Arc<dyn Backend> = Arc::new(backend.clone());
        let gate = Arc::new(ReadinessGate::new(Arc::clone(&backend), EventBus::new(8)));
        SetObjectOperation::new(backend, gate, RetryPolicy::new(3, Duration::ZERO))
    }

    fn request(key: &str, content: &'static str) -> SetObjectOperationRequest {
        SetObjectOperationRequest {
            key: key.to_string(),
            content: Bytes::from_static(content.as_bytes()),
            options: WriteOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_set_stores_public_object() {
        let backend = MemoryBackend::new("assets");
        operation(&backend).run(request("a.json", "[1,2]")).await.unwrap();

        let stored = backend.object("a.json").unwrap();
        assert_eq!(stored.content, Bytes::from_static(b"[1,2]"));
        let attributes = stored.attributes.unwrap();
        assert_eq!(attributes.content_type, "application/json");
        assert!(attributes.public);
    }

    #[tokio::test]
    async fn test_set_honours_options() {
        let backend = MemoryBackend::new("assets");
        let mut req = request("styles/site.css", "body{}");
        req.options = WriteOptions::private().with_metadata("owner", "web");
        operation(&backend).run(req).await.unwrap();

        let attributes = backend.object("styles/site.css").unwrap().attributes.unwrap();
        assert!(!attributes.public);
        assert_eq!(attributes.metadata.get("owner").map(String::as_str), Some("web"));
    }

    #[tokio::test]
    async fn test_unknown_extension_touches_nothing() {
        let backend = MemoryBackend::new("assets");

        let err = operation(&backend).run(request("a.fake", "x")).await.unwrap_err();
        assert!(matches!(err, SinkError::InvalidArgument(_)));
        assert_eq!(backend.calls(), Default::default());
    }

    #[tokio::test]
    async fn test_save_retries_transient_failures() {
        let backend = MemoryBackend::new("assets");
        backend.fail_saves(2);

        operation(&backend).run(request("a.txt", "hi")).await.unwrap();
        assert_eq!(backend.calls().save, 3);
        assert!(backend.object("a.txt").is_some());
    }

    #[tokio::test]
    async fn test_save_gives_up_after_attempts() {
        let backend = MemoryBackend::new("assets");
        backend.fail_saves(4);

        let err = operation(&backend).run(request("a.txt", "hi")).await.unwrap_err();
        assert!(matches!(
            err,
            SinkError::ServiceUnavailable { attempts: 3, .. }
        ));
        assert_eq!(backend.calls().save, 3);
        assert!(backend.object("a.txt").is_none());
    }
}
