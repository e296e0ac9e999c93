use crate::backend::{Backend, BackendWriter, ObjectAttributes, WriteOptions};
use crate::declared_type::DeclaredType;
use crate::error::{SinkError, SinkResult};
use crate::event::{EventBus, SinkEvent};
use crate::gate::ReadinessGate;
use crate::hasher::{ContentHash, ContentHasher};
use crate::naming;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Lifecycle of a write pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Open,
    Streaming,
    Finalizing,
    Saved,
    Failed,
}

/// Terminal result of a write pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Content is stored under its finalized key.
    Saved { hash: ContentHash, key: String },
    /// Content is durable under `temp_key`, but the rename to the finalized
    /// key failed. The temporary object is left in place.
    NotSaved { temp_key: String, error: SinkError },
    Failed(SinkError),
}

impl WriteOutcome {
    pub fn into_result(self) -> SinkResult<(ContentHash, String)> {
        match self {
            Self::Saved { hash, key } => Ok((hash, key)),
            Self::NotSaved { error, .. } | Self::Failed(error) => Err(error),
        }
    }
}

#[derive(Debug)]
enum Frame {
    Data(Bytes),
    End,
}

#[derive(Clone)]
pub struct WriteObjectOperation {
    backend: Arc<dyn Backend>,
    gate: Arc<ReadinessGate>,
    events: EventBus,
    channel_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct WriteObjectOperationRequest {
    pub declared: DeclaredType,
    pub options: WriteOptions,
}

impl WriteObjectOperation {
    pub fn new(
        backend: Arc<dyn Backend>,
        gate: Arc<ReadinessGate>,
        events: EventBus,
        channel_capacity: usize,
    ) -> Self {
        Self {
            backend,
            gate,
            events,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Starts a write pipeline. No I/O happens until the pipeline task runs;
    /// the returned writer feeds it.
    pub fn run(&self, request: WriteObjectOperationRequest) -> SinkWriter {
        let WriteObjectOperationRequest { declared, options } = request;
        let temp_key = naming::temp_key(&declared);

        let (input_tx, input_rx) = mpsc::channel(self.channel_capacity);
        let (state_tx, state_rx) = watch::channel(WriteState::Open);

        let pipeline = WritePipeline {
            operation: self.clone(),
            temp_key: temp_key.clone(),
            declared: declared.clone(),
            state: state_tx,
        };
        let task = tokio::spawn(pipeline.run(options, input_rx));

        SinkWriter {
            input: input_tx,
            state: state_rx,
            task,
            temp_key,
            declared,
        }
    }
}

/// Caller side of a write pipeline.
///
/// Bytes are accepted until [`SinkWriter::finish`]. Dropping the writer
/// without finishing aborts the upload.
pub struct SinkWriter {
    input: mpsc::Sender<Frame>,
    state: watch::Receiver<WriteState>,
    task: JoinHandle<WriteOutcome>,
    temp_key: String,
    declared: DeclaredType,
}

impl SinkWriter {
    /// Sends a chunk into the pipeline, waiting while the stages are full.
    ///
    /// Fails with [`SinkError::Closed`] once the pipeline has terminated; the
    /// reason is reported by `finish`.
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> SinkResult<()> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        self.input
            .send(Frame::Data(chunk))
            .await
            .map_err(|_| SinkError::Closed)
    }

    /// Streams `reader` to its end into the pipeline. Returns the number of
    /// bytes copied.
    pub async fn copy_from<R>(&mut self, reader: &mut R) -> SinkResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut copied = 0u64;
        loop {
            let mut buf = BytesMut::with_capacity(COPY_CHUNK_SIZE);
            let read = reader
                .read_buf(&mut buf)
                .await
                .map_err(|err| SinkError::Io(err.to_string()))?;
            if read == 0 {
                return Ok(copied);
            }
            copied += read as u64;
            self.write(buf.freeze()).await?;
        }
    }

    /// Ends the input and waits for the pipeline's terminal outcome.
    pub async fn finish(self) -> WriteOutcome {
        let Self { input, task, .. } = self;
        let _ = input.send(Frame::End).await;
        drop(input);
        join(task).await
    }

    /// Cancels the write. The backend upload is aborted and the outcome is
    /// `Failed(Aborted)` unless the pipeline had already failed.
    pub async fn abort(self) -> WriteOutcome {
        let Self { input, task, .. } = self;
        drop(input);
        join(task).await
    }

    pub fn state(&self) -> WriteState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<WriteState> {
        self.state.clone()
    }

    pub fn temp_key(&self) -> &str {
        &self.temp_key
    }

    pub fn declared_type(&self) -> &DeclaredType {
        &self.declared
    }
}

impl std::fmt::Debug for SinkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkWriter")
            .field("temp_key", &self.temp_key)
            .field("state", &self.state())
            .finish()
    }
}

async fn join(task: JoinHandle<WriteOutcome>) -> WriteOutcome {
    match task.await {
        Ok(outcome) => outcome,
        Err(err) => WriteOutcome::Failed(SinkError::Internal(format!(
            "write pipeline task failed: {}",
            err
        ))),
    }
}

struct WritePipeline {
    operation: WriteObjectOperation,
    temp_key: String,
    declared: DeclaredType,
    state: watch::Sender<WriteState>,
}

impl WritePipeline {
    async fn run(self, options: WriteOptions, input: mpsc::Receiver<Frame>) -> WriteOutcome {
        match self.drive(options, input).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!("Write pipeline for {} failed: {}", self.temp_key, error);
                self.state.send_replace(WriteState::Failed);
                self.operation.events.publish(SinkEvent::Error {
                    key: self.temp_key.clone(),
                    error: error.clone(),
                });
                WriteOutcome::Failed(error)
            }
        }
    }

    async fn drive(
        &self,
        options: WriteOptions,
        mut input: mpsc::Receiver<Frame>,
    ) -> SinkResult<WriteOutcome> {
        self.operation.gate.ready().await?;

        let attributes = ObjectAttributes::new(&self.declared, &options);
        let writer = self
            .operation
            .backend
            .open_write_stream(&self.temp_key, attributes)
            .await?;
        tracing::debug!("Streaming {} to {}", self.declared.extension(), self.temp_key);

        let capacity = self.operation.channel_capacity;
        let (hash_tx, hash_rx) = mpsc::channel(capacity);
        let (store_tx, store_rx) = mpsc::channel(capacity);
        let hash_task = tokio::spawn(hash_branch(self.declared.hasher(), hash_rx));
        let store_task = tokio::spawn(store_branch(writer, store_rx));

        let mut ended = false;
        while let Some(frame) = input.recv().await {
            match frame {
                Frame::Data(chunk) => {
                    self.state.send_if_modified(|state| {
                        let opened = *state == WriteState::Open;
                        if opened {
                            *state = WriteState::Streaming;
                        }
                        opened
                    });
                    if hash_tx.send(Frame::Data(chunk.clone())).await.is_err()
                        || store_tx.send(Frame::Data(chunk)).await.is_err()
                    {
                        break;
                    }
                }
                Frame::End => {
                    ended = true;
                    break;
                }
            }
        }
        drop(input);

        if !ended {
            drop(hash_tx);
            drop(store_tx);
            return Err(branch_failure(hash_task, store_task).await);
        }

        // The upload is only committed once the content hashed cleanly.
        let _ = hash_tx.send(Frame::End).await;
        drop(hash_tx);
        let hash = match flatten(hash_task.await) {
            Ok(hash) => hash,
            Err(hash_error) => {
                drop(store_tx);
                let _ = flatten(store_task.await);
                return Err(hash_error);
            }
        };

        let _ = store_tx.send(Frame::End).await;
        drop(store_tx);
        flatten(store_task.await)?;

        self.state.send_replace(WriteState::Finalizing);
        Ok(self.finalize(hash).await)
    }

    async fn finalize(&self, hash: ContentHash) -> WriteOutcome {
        let key = naming::finalized_key(&hash, &self.declared);

        match self.operation.backend.rename(&self.temp_key, &key).await {
            Ok(()) => {
                tracing::debug!("Finalized {} as {}", self.temp_key, key);
                self.state.send_replace(WriteState::Saved);
                self.operation.events.publish(SinkEvent::FileSaved {
                    hash: hash.clone(),
                    key: key.clone(),
                });
                WriteOutcome::Saved { hash, key }
            }
            Err(err) => {
                let error = SinkError::from(err);
                tracing::warn!(
                    "Failed to finalize {} as {}, temporary object kept: {}",
                    self.temp_key,
                    key,
                    error
                );
                self.state.send_replace(WriteState::Failed);
                self.operation.events.publish(SinkEvent::FileNotSaved {
                    temp_key: self.temp_key.clone(),
                    error: error.clone(),
                });
                WriteOutcome::NotSaved {
                    temp_key: self.temp_key.clone(),
                    error,
                }
            }
        }
    }
}

fn flatten<T>(joined: Result<SinkResult<T>, tokio::task::JoinError>) -> SinkResult<T> {
    joined.map_err(|err| SinkError::Internal(format!("pipeline branch failed: {}", err)))?
}

/// Picks the error to report when the input stopped before its end. A branch
/// that only saw its input vanish reports `Aborted`; the other branch's
/// error wins over that.
async fn branch_failure(
    hash_task: JoinHandle<SinkResult<ContentHash>>,
    store_task: JoinHandle<SinkResult<()>>,
) -> SinkError {
    let store_error = flatten(store_task.await).err();
    let hash_error = flatten(hash_task.await).err();

    match (store_error, hash_error) {
        (Some(SinkError::Aborted) | None, Some(hash_error)) if hash_error != SinkError::Aborted => {
            hash_error
        }
        (Some(store_error), _) => store_error,
        (None, _) => SinkError::Aborted,
    }
}

async fn hash_branch(
    mut hasher: Box<dyn ContentHasher>,
    mut rx: mpsc::Receiver<Frame>,
) -> SinkResult<ContentHash> {
    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::Data(chunk) => hasher.update(&chunk)?,
            Frame::End => return hasher.finish(),
        }
    }
    Err(SinkError::Aborted)
}

async fn store_branch(
    mut writer: Box<dyn BackendWriter>,
    mut rx: mpsc::Receiver<Frame>,
) -> SinkResult<()> {
    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::Data(chunk) => {
                if let Err(err) = writer.write(chunk).await {
                    if let Err(abort_err) = writer.abort().await {
                        tracing::warn!("Failed to abort upload after write error: {}", abort_err);
                    }
                    return Err(err.into());
                }
            }
            Frame::End => return writer.finish().await.map_err(SinkError::from),
        }
    }

    if let Err(err) = writer.abort().await {
        tracing::warn!("Failed to abort upload: {}", err);
    }
    Err(SinkError::Aborted)
}
