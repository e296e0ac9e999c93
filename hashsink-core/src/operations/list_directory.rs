use crate::backend::{Backend, ListEntry};
use crate::error::{SinkError, SinkResult};
use crate::gate::ReadinessGate;
use crate::naming;
use bytes::Bytes;
use futures_util::future::try_join_all;
use std::sync::Arc;

/// An object directly inside the listed directory, with its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub key: String,
    pub content: Bytes,
}

#[derive(Clone)]
pub struct ListDirectoryOperation {
    backend: Arc<dyn Backend>,
    gate: Arc<ReadinessGate>,
}

#[derive(Debug, Clone, Default)]
pub struct ListDirectoryOperationRequest {
    /// `None`, `""` and `"/"` all list the root.
    pub prefix: Option<String>,
}

impl ListDirectoryOperation {
    pub fn new(backend: Arc<dyn Backend>, gate: Arc<ReadinessGate>) -> Self {
        Self { backend, gate }
    }

    /// Lists one directory level and downloads every entry in it.
    ///
    /// Keys in nested directories are filtered out. An absent, empty or fully
    /// filtered listing is an error.
    pub async fn run(&self, request: ListDirectoryOperationRequest) -> SinkResult<Vec<DirectoryEntry>> {
        let directory = naming::normalize_directory(request.prefix.as_deref());
        self.gate.ready().await?;

        let query = if directory.is_empty() {
            String::new()
        } else {
            format!("{}/", directory)
        };
        let empty = || SinkError::EmptyListing {
            prefix: format!("/{}", directory),
        };

        let listed = self
            .backend
            .list_with_prefix(&query)
            .await?
            .filter(|entries| !entries.is_empty())
            .ok_or_else(empty)?;

        let keys: Vec<String> = listed
            .into_iter()
            .map(|ListEntry { key }| key)
            .filter(|key| naming::parent_segment(key) == directory)
            .collect();
        if keys.is_empty() {
            return Err(empty());
        }

        let entries = try_join_all(keys.into_iter().map(|key| async move {
            let content = self.backend.download(&key).await?;
            Ok::<_, SinkError>(DirectoryEntry { key, content })
        }))
        .await?;

        tracing::debug!("Listed {} entries under /{}", entries.len(), directory);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::event::EventBus;

    fn operation(backend: &MemoryBackend) -> ListDirectoryOperation {
        let backend: Arc<dyn Backend> = Arc::new(backend.clone());
        let gate = Arc::new(ReadinessGate::new(Arc::clone(&backend), EventBus::new(8)));
        ListDirectoryOperation::new(backend, gate)
    }

    fn request(prefix: Option<&str>) -> ListDirectoryOperationRequest {
        ListDirectoryOperationRequest {
            prefix: prefix.map(str::to_string),
        }
    }

    fn keys(entries: &[DirectoryEntry]) -> Vec<&str> {
        entries.iter().map(|entry| entry.key.as_str()).collect()
    }

    fn seeded() -> MemoryBackend {
        let backend = MemoryBackend::new("assets");
        backend.insert("top.json", "[0]");
        backend.insert("some-path/file.json", "[1]");
        backend.insert("some-path/nested/file.json", "[2]");
        backend.insert("some-pathology/file.json", "[3]");
        backend
    }

    #[tokio::test]
    async fn test_lists_single_level() {
        let backend = seeded();

        let entries = operation(&backend).run(request(Some("/some-path"))).await.unwrap();
        assert_eq!(keys(&entries), vec!["some-path/file.json"]);
        assert_eq!(entries[0].content, Bytes::from_static(b"[1]"));
    }

    #[tokio::test]
    async fn test_root_forms_are_equivalent() {
        let backend = seeded();
        let operation = operation(&backend);

        for prefix in [None, Some(""), Some("/")] {
            let entries = operation.run(request(prefix)).await.unwrap();
            assert_eq!(keys(&entries), vec!["top.json"]);
        }
    }

    #[tokio::test]
    async fn test_nested_directory() {
        let backend = seeded();

        let entries = operation(&backend)
            .run(request(Some("some-path/nested/")))
            .await
            .unwrap();
        assert_eq!(keys(&entries), vec!["some-path/nested/file.json"]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty_listing() {
        let backend = seeded();

        let err = operation(&backend).run(request(Some("/nowhere"))).await.unwrap_err();
        assert_eq!(
            err,
            SinkError::EmptyListing {
                prefix: "/nowhere".to_string()
            }
        );
        assert_eq!(backend.calls().download, 0);
    }

    #[tokio::test]
    async fn test_absent_answer_is_empty_listing() {
        let backend = seeded();
        backend.answer_list(None);

        let err = operation(&backend).run(request(Some("/some-path"))).await.unwrap_err();
        assert!(matches!(err, SinkError::EmptyListing { .. }));
    }

    #[tokio::test]
    async fn test_only_nested_entries_is_empty_listing() {
        let backend = seeded();
        backend.answer_list(Some(vec!["some-path/nested/file.json"]));

        let err = operation(&backend).run(request(Some("/some-path"))).await.unwrap_err();
        assert!(matches!(err, SinkError::EmptyListing { .. }));
        assert_eq!(backend.calls().download, 0);
    }

    #[tokio::test]
    async fn test_download_failure_fails_listing() {
        let backend = seeded();
        backend.fail_downloads(1);

        let err = operation(&backend).run(request(Some("/some-path"))).await.unwrap_err();
        assert!(matches!(err, SinkError::Backend { .. }));
    }
}
