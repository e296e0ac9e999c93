use crate::backend::Backend;
use crate::error::{BackendError, SinkError, SinkResult};
use crate::event::{EventBus, SinkEvent};
use crate::gate::ReadinessGate;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// What the backend answered when the read stream was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    Found { key: String },
    NotFound { key: String, cause: BackendError },
    Failed(SinkError),
}

#[derive(Clone)]
pub struct ReadObjectOperation {
    backend: Arc<dyn Backend>,
    gate: Arc<ReadinessGate>,
    events: EventBus,
    channel_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct ReadObjectOperationRequest {
    pub key: String,
}

impl ReadObjectOperation {
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

    pub fn run(&self, request: ReadObjectOperationRequest) -> SinkReader {
        let ReadObjectOperationRequest { key } = request;
        let (status_tx, status_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(self.channel_capacity);

        tokio::spawn(self.clone().pump(key.clone(), status_tx, body_tx));

        SinkReader {
            key,
            status_rx: Some(status_rx),
            status: None,
            body: body_rx,
        }
    }

    async fn pump(
        self,
        key: String,
        status_tx: oneshot::Sender<ReadStatus>,
        body: mpsc::Sender<SinkResult<Bytes>>,
    ) {
        let opened = match self.gate.ready().await {
            Ok(()) => self.backend.open_read_stream(&key).await,
            Err(error) => {
                self.fail(&key, error, status_tx, &body).await;
                return;
            }
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(cause @ BackendError::NotFound { .. }) => {
                tracing::debug!("Read of {} found nothing", key);
                self.events.publish(SinkEvent::FileNotFound {
                    key: key.clone(),
                    cause: cause.clone(),
                });
                let _ = status_tx.send(ReadStatus::NotFound {
                    key: key.clone(),
                    cause,
                });
                let _ = body.send(Err(SinkError::NotFound { key })).await;
                return;
            }
            Err(err) => {
                self.fail(&key, err.into(), status_tx, &body).await;
                return;
            }
        };

        self.events.publish(SinkEvent::FileFound { key: key.clone() });
        let _ = status_tx.send(ReadStatus::Found { key: key.clone() });

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    if body.send(Ok(chunk)).await.is_err() {
                        tracing::debug!("Reader of {} dropped before the end", key);
                        return;
                    }
                }
                Err(err) => {
                    let error = SinkError::from(err);
                    tracing::error!("Read of {} failed mid-stream: {}", key, error);
                    self.events.publish(SinkEvent::Error {
                        key: key.clone(),
                        error: error.clone(),
                    });
                    let _ = body.send(Err(error)).await;
                    return;
                }
            }
        }
    }

    async fn fail(
        &self,
        key: &str,
        error: SinkError,
        status_tx: oneshot::Sender<ReadStatus>,
        body: &mpsc::Sender<SinkResult<Bytes>>,
    ) {
        tracing::error!("Failed to open {} for reading: {}", key, error);
        self.events.publish(SinkEvent::Error {
            key: key.to_string(),
            error: error.clone(),
        });
        let _ = status_tx.send(ReadStatus::Failed(error.clone()));
        let _ = body.send(Err(error)).await;
    }
}

/// Byte stream of a stored object.
///
/// Chunks are relayed unchanged. A failure to open the object is yielded as
/// the single item of the stream and is also available through `status`.
pub struct SinkReader {
    key: String,
    status_rx: Option<oneshot::Receiver<ReadStatus>>,
    status: Option<ReadStatus>,
    body: mpsc::Receiver<SinkResult<Bytes>>,
}

impl SinkReader {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Waits until the backend has answered the open request.
    pub async fn status(&mut self) -> ReadStatus {
        if let Some(status) = &self.status {
            return status.clone();
        }

        let status = match self.status_rx.take() {
            Some(rx) => rx.await.unwrap_or_else(|_| {
                ReadStatus::Failed(SinkError::Internal("read pipeline stopped".to_string()))
            }),
            None => ReadStatus::Failed(SinkError::Internal("read status unavailable".to_string())),
        };
        self.status = Some(status.clone());
        status
    }

    pub async fn read_to_end(mut self) -> SinkResult<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.recv().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for SinkReader {
    type Item = SinkResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.body.poll_recv(cx)
    }
}

impl std::fmt::Debug for SinkReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkReader")
            .field("key", &self.key)
            .field("status", &self.status)
            .finish()
    }
}
