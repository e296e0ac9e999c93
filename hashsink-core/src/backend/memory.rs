use super::{Backend, BackendWriter, ByteStream, ListEntry, ObjectAttributes};
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content: Bytes,
    pub attributes: Option<ObjectAttributes>,
}

/// Number of calls made against a [`MemoryBackend`], per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create_container: u32,
    pub open_write_stream: u32,
    pub open_read_stream: u32,
    pub exists: u32,
    pub download: u32,
    pub save: u32,
    pub rename: u32,
    pub list: u32,
}

#[derive(Debug, Default)]
struct Faults {
    container: Option<BackendError>,
    write: Option<BackendError>,
    rename: Option<BackendError>,
    save_failures: u32,
    download_failures: u32,
    exists_answer: Option<Option<bool>>,
    list_answer: Option<Option<Vec<ListEntry>>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, StoredObject>,
    container_created: bool,
    faults: Faults,
    calls: CallCounts,
}

/// HashMap-style backend held in process memory.
///
/// Failures can be scripted per operation, and every call is counted, so tests
/// can assert both what a pipeline did and what it did not do.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    name: String,
    state: Arc<Mutex<MemoryState>>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Stores an object directly, bypassing call counting.
    pub fn insert(&self, key: impl Into<String>, content: impl Into<Bytes>) {
        lock(&self.state).objects.insert(
            key.into(),
            StoredObject {
                content: content.into(),
                attributes: None,
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        lock(&self.state).objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.state).objects.keys().cloned().collect()
    }

    pub fn calls(&self) -> CallCounts {
        lock(&self.state).calls
    }

    /// Marks the container as already present.
    pub fn with_existing_container(self) -> Self {
        lock(&self.state).container_created = true;
        self
    }

    pub fn fail_container(&self, error: BackendError) {
        lock(&self.state).faults.container = Some(error);
    }

    pub fn fail_writes(&self, error: BackendError) {
        lock(&self.state).faults.write = Some(error);
    }

    pub fn fail_renames(&self, error: BackendError) {
        lock(&self.state).faults.rename = Some(error);
    }

    /// Fails the next `count` saves.
    pub fn fail_saves(&self, count: u32) {
        lock(&self.state).faults.save_failures = count;
    }

    /// Fails the next `count` downloads.
    pub fn fail_downloads(&self, count: u32) {
        lock(&self.state).faults.download_failures = count;
    }

    /// Overrides the answer of every existence check.
    pub fn answer_exists(&self, answer: Option<bool>) {
        lock(&self.state).faults.exists_answer = Some(answer);
    }

    /// Overrides the answer of every listing.
    pub fn answer_list(&self, answer: Option<Vec<&str>>) {
        let answer = answer.map(|keys| {
            keys.into_iter()
                .map(|key| ListEntry {
                    key: key.to_string(),
                })
                .collect()
        });
        lock(&self.state).faults.list_answer = Some(answer);
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_container(&self) -> BackendResult<()> {
        let mut state = lock(&self.state);
        state.calls.create_container += 1;
        if let Some(error) = state.faults.container.clone() {
            return Err(error);
        }
        if state.container_created {
            return Err(BackendError::AlreadyExists {
                name: self.name.clone(),
            });
        }
        state.container_created = true;
        Ok(())
    }

    async fn open_write_stream(
        &self,
        key: &str,
        attributes: ObjectAttributes,
    ) -> BackendResult<Box<dyn BackendWriter>> {
        let mut guard = lock(&self.state);
        guard.calls.open_write_stream += 1;
        Ok(Box::new(MemoryWriter {
            state: Arc::clone(&self.state),
            key: key.to_string(),
            attributes,
            buf: BytesMut::new(),
            fault: guard.faults.write.clone(),
        }))
    }

    async fn open_read_stream(&self, key: &str) -> BackendResult<ByteStream> {
        let mut state = lock(&self.state);
        state.calls.open_read_stream += 1;
        let object = state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| BackendError::not_found(key))?;

        let content = object.content;
        let chunks: Vec<BackendResult<Bytes>> = (0..content.len())
            .step_by(READ_CHUNK_SIZE)
            .map(|start| Ok(content.slice(start..(start + READ_CHUNK_SIZE).min(content.len()))))
            .collect();
        Ok(futures_util::stream::iter(chunks).boxed())
    }

    async fn exists(&self, key: &str) -> BackendResult<Option<bool>> {
        let mut state = lock(&self.state);
        state.calls.exists += 1;
        if let Some(answer) = state.faults.exists_answer {
            return Ok(answer);
        }
        Ok(Some(state.objects.contains_key(key)))
    }

    async fn download(&self, key: &str) -> BackendResult<Bytes> {
        let mut state = lock(&self.state);
        state.calls.download += 1;
        if state.faults.download_failures > 0 {
            state.faults.download_failures -= 1;
            return Err(BackendError::protocol("injected download failure"));
        }
        state
            .objects
            .get(key)
            .map(|object| object.content.clone())
            .ok_or_else(|| BackendError::not_found(key))
    }

    async fn save(
        &self,
        key: &str,
        content: Bytes,
        attributes: ObjectAttributes,
    ) -> BackendResult<()> {
        let mut state = lock(&self.state);
        state.calls.save += 1;
        if state.faults.save_failures > 0 {
            state.faults.save_failures -= 1;
            return Err(BackendError::protocol("injected save failure"));
        }
        state.objects.insert(
            key.to_string(),
            StoredObject {
                content,
                attributes: Some(attributes),
            },
        );
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        let mut state = lock(&self.state);
        state.calls.rename += 1;
        if let Some(error) = state.faults.rename.clone() {
            return Err(error);
        }
        let object = state
            .objects
            .remove(from)
            .ok_or_else(|| BackendError::not_found(from))?;
        state.objects.insert(to.to_string(), object);
        Ok(())
    }

    async fn list_with_prefix(&self, prefix: &str) -> BackendResult<Option<Vec<ListEntry>>> {
        let mut state = lock(&self.state);
        state.calls.list += 1;
        if let Some(answer) = state.faults.list_answer.clone() {
            return Ok(answer);
        }
        let entries = state
            .objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .map(|key| ListEntry { key: key.clone() })
            .collect();
        Ok(Some(entries))
    }
}

struct MemoryWriter {
    state: Arc<Mutex<MemoryState>>,
    key: String,
    attributes: ObjectAttributes,
    buf: BytesMut,
    fault: Option<BackendError>,
}

#[async_trait]
impl BackendWriter for MemoryWriter {
    async fn write(&mut self, chunk: Bytes) -> BackendResult<()> {
        if let Some(error) = self.fault.clone() {
            return Err(error);
        }
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> BackendResult<()> {
        let Self {
            state,
            key,
            attributes,
            buf,
            ..
        } = *self;
        lock(&state).objects.insert(
            key,
            StoredObject {
                content: buf.freeze(),
                attributes: Some(attributes),
            },
        );
        Ok(())
    }

    async fn abort(self: Box<Self>) -> BackendResult<()> {
        Ok(())
    }
}
