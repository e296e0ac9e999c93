use crate::backend::Backend;
use crate::error::{SinkError, SinkResult};
use crate::gate::ReadinessGate;
use crate::naming;
use crate::retry::RetryPolicy;
use bytes::Bytes;
use std::sync::Arc;

#[derive(Clone)]
pub struct GetObjectOperation {
    backend: Arc<dyn Backend>,
    gate: Arc<ReadinessGate>,
    retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct GetObjectOperationRequest {
    pub key: String,
}

impl GetObjectOperation {
    pub fn new(backend: Arc<dyn Backend>, gate: Arc<ReadinessGate>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            gate,
            retry,
        }
    }

    /// Downloads a whole object.
    ///
    /// Existence is checked once up front; only the download is retried.
    pub async fn run(&self, request: GetObjectOperationRequest) -> SinkResult<Bytes> {
        let key = naming::require_key(&request.key)?;
        self.gate.ready().await?;

        if self.backend.exists(key).await? != Some(true) {
            return Err(SinkError::NotFound {
                key: key.to_string(),
            });
        }

        let content = self
            .retry
            .run(key, "download", || self.backend.download(key))
            .await?;
        tracing::debug!("Downloaded {} ({} bytes)", key, content.len());
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::event::EventBus;
    use std::time::Duration;

    fn operation(backend: &MemoryBackend) -> GetObjectOperation {
        let backend: Arc<dyn Backend> = Arc::new(backend.clone());
        let gate = Arc::new(ReadinessGate::new(Arc::clone(&backend), EventBus::new(8)));
        GetObjectOperation::new(backend, gate, RetryPolicy::new(3, Duration::ZERO))
    }

    fn request(key: &str) -> GetObjectOperationRequest {
        GetObjectOperationRequest {
            key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_get_existing_object() {
        let backend = MemoryBackend::new("assets");
        backend.insert("a.json", "[1,2]");

        let content = operation(&backend).run(request("a.json")).await.unwrap();
        assert_eq!(content, Bytes::from_static(b"[1,2]"));
        assert_eq!(backend.calls().exists, 1);
        assert_eq!(backend.calls().download, 1);
    }

    #[tokio::test]
    async fn test_missing_object_skips_download() {
        let backend = MemoryBackend::new("assets");

        let err = operation(&backend).run(request("a.json")).await.unwrap_err();
        assert_eq!(
            err,
            SinkError::NotFound {
                key: "a.json".to_string()
            }
        );
        assert_eq!(backend.calls().download, 0);
    }

    #[tokio::test]
    async fn test_unknown_existence_is_not_found() {
        let backend = MemoryBackend::new("assets");
        backend.insert("a.json", "[]");
        backend.answer_exists(None);

        let err = operation(&backend).run(request("a.json")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_download_retries_transient_failures() {
        let backend = MemoryBackend::new("assets");
        backend.insert("a.txt", "hi");
        backend.fail_downloads(2);

        let content = operation(&backend).run(request("a.txt")).await.unwrap();
        assert_eq!(content, Bytes::from_static(b"hi"));
        assert_eq!(backend.calls().download, 3);
    }

    #[tokio::test]
    async fn test_download_gives_up_after_attempts() {
        let backend = MemoryBackend::new("assets");
        backend.insert("a.txt", "hi");
        backend.fail_downloads(4);

        let err = operation(&backend).run(request("a.txt")).await.unwrap_err();
        assert!(matches!(
            err,
            SinkError::ServiceUnavailable { ref key, attempts: 3, .. } if key == "a.txt"
        ));
        assert_eq!(backend.calls().download, 3);
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected() {
        let backend = MemoryBackend::new("assets");

        let err = operation(&backend).run(request("")).await.unwrap_err();
        assert!(matches!(err, SinkError::InvalidArgument(_)));
        assert_eq!(backend.calls().create_container, 0);
    }
}
