//! Duplex JSON-RPC connection
//!
//! [`Connection::serve`] reads newline-delimited frames, runs each request
//! on its own task, handles notifications inline, and routes responses to
//! the outbound request that is waiting for them. [`ConnectionHandle`] is
//! the cloneable sending side.
//!
//! Frames take effect in arrival order: the next frame is not read until
//! the current request has been admitted (see [`Admission`]).

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::batcher::{BatchPolicy, run_writer};
use super::message::{Id, Incoming, Outgoing, RpcError, parse_frame};
use crate::types::{AgentError, Result, TransportConfig};

/// Held by a request handler until the request has taken its place
///
/// The reader does not look at the next frame until the admission is
/// released, either by [`Admission::admit`] or by dropping it. Handlers
/// must admit before awaiting anything that needs later inbound frames.
#[derive(Debug, Default)]
pub struct Admission(Option<oneshot::Sender<()>>);

impl Admission {
    fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), rx)
    }

    /// Let the reader move on; later calls are no-ops
    pub fn admit(&mut self) {
        if let Some(tx) = self.0.take() {
            tx.send(()).ok();
        }
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.admit();
    }
}

/// Receives inbound calls
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle a request; the return value becomes the response
    async fn handle_request(
        &self,
        method: &str,
        params: Value,
        admission: Admission,
    ) -> std::result::Result<Value, RpcError>;

    /// Handle a notification on the reader task; there is no response
    async fn handle_notification(&self, method: &str, params: Value);
}

type PendingTable = DashMap<Id, oneshot::Sender<std::result::Result<Value, RpcError>>>;

#[derive(Debug)]
struct Shared {
    outbound: mpsc::Sender<Outgoing>,
    pending: PendingTable,
    next_id: AtomicI64,
    closed: CancellationToken,
}

/// Sending side of a connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Send a request and wait for its response
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        if self.is_closed() {
            return Err(AgentError::ConnectionClosed);
        }

        let id = Id::Number(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id.clone(), tx);

        // close() may have drained the table between the check and the insert
        if self.is_closed() {
            self.shared.pending.remove(&id);
            return Err(AgentError::ConnectionClosed);
        }

        tracing::trace!(%id, method, "Sending request");
        let msg = Outgoing::Request {
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        if self.shared.outbound.send(msg).await.is_err() {
            self.shared.pending.remove(&id);
            return Err(AgentError::ConnectionClosed);
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(remote)) => Err(AgentError::Remote(remote)),
            Err(_) => Err(AgentError::ConnectionClosed),
        }
    }

    /// Typed wrapper over [`ConnectionHandle::request`]
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let value = self.request(method, serde_json::to_value(params)?).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Queue a notification
    pub async fn notify<P>(&self, method: &str, params: &P) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        if self.is_closed() {
            return Err(AgentError::ConnectionClosed);
        }
        let msg = Outgoing::Notification {
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        };
        self.shared
            .outbound
            .send(msg)
            .await
            .map_err(|_| AgentError::ConnectionClosed)
    }

    async fn respond(&self, id: Id, result: std::result::Result<Value, RpcError>) {
        if self
            .shared
            .outbound
            .send(Outgoing::Response { id: id.clone(), result })
            .await
            .is_err()
        {
            tracing::debug!(%id, "Connection closed before response was written");
        }
    }

    /// Reject every outstanding request and stop the writer
    pub fn close(&self) {
        if self.shared.closed.is_cancelled() {
            return;
        }
        self.shared.closed.cancel();
        let outstanding = self.shared.pending.len();
        // Dropping the senders resolves each waiter with ConnectionClosed.
        self.shared.pending.clear();
        if outstanding > 0 {
            tracing::info!(outstanding, "Rejected outstanding requests on close");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Resolves once the connection is closed
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    fn complete(&self, id: &Id, result: std::result::Result<Value, RpcError>) {
        match self.shared.pending.remove(id) {
            Some((_, tx)) => {
                if tx.send(result).is_err() {
                    tracing::debug!(%id, "Requester dropped before response arrived");
                }
            }
            None => {
                tracing::warn!(%id, "Discarding response for unknown request id");
            }
        }
    }
}

/// A connection that has not started serving yet
#[derive(Debug)]
pub struct Connection {
    handle: ConnectionHandle,
    outbound_rx: mpsc::Receiver<Outgoing>,
    policy: BatchPolicy,
}

impl Connection {
    pub fn new(config: &TransportConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.outbound_queue.max(1));
        Self {
            handle: ConnectionHandle {
                shared: Arc::new(Shared {
                    outbound: tx,
                    pending: DashMap::new(),
                    next_id: AtomicI64::new(0),
                    closed: CancellationToken::new(),
                }),
            },
            outbound_rx: rx,
            policy: BatchPolicy {
                batch_size: config.batch_size.max(1),
                batch_delay: config.batch_delay(),
            },
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Serve until the inbound stream ends or the connection is closed
    pub async fn serve<R, W, H>(self, reader: R, writer: W, handler: Arc<H>) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
        H: MessageHandler + ?Sized,
    {
        let Connection {
            handle,
            outbound_rx,
            policy,
        } = self;

        let writer_task = tokio::spawn({
            let shutdown = handle.shared.closed.clone();
            let handle = handle.clone();
            async move {
                let result = run_writer(outbound_rx, writer, policy, shutdown).await;
                if let Err(ref e) = result {
                    tracing::error!(error = %e, "Outbound stream failed");
                    handle.close();
                }
                result
            }
        });

        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = tokio::select! {
                () = handle.closed() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    dispatch(&handle, &handler, &line).await;
                }
                Ok(None) => {
                    tracing::info!("Inbound stream closed");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read inbound stream");
                    break;
                }
            }
        }

        handle.close();
        match writer_task.await {
            Ok(result) => result.map_err(Into::into),
            Err(e) => Err(anyhow::anyhow!("writer task failed: {}", e)),
        }
    }
}

async fn dispatch<H>(handle: &ConnectionHandle, handler: &Arc<H>, line: &str)
where
    H: MessageHandler + ?Sized,
{
    match parse_frame(line) {
        Ok(Incoming::Request { id, method, params }) => {
            let handle = handle.clone();
            let handler = Arc::clone(handler);
            let span = tracing::info_span!("request", %id, method = %method);
            let (admission, admitted) = Admission::new();
            tokio::spawn(
                async move {
                    let start = std::time::Instant::now();
                    let result = handler.handle_request(&method, params, admission).await;
                    if let Err(ref e) = result {
                        tracing::debug!(code = e.code, message = %e.message, "Request failed");
                    }
                    tracing::debug!(elapsed_ms = start.elapsed().as_millis(), "Request handled");
                    handle.respond(id, result).await;
                }
                .instrument(span),
            );
            // Sender dropped means admitted too
            admitted.await.ok();
        }
        Ok(Incoming::Notification { method, params }) => {
            let span = tracing::info_span!("notification", method = %method);
            handler
                .handle_notification(&method, params)
                .instrument(span)
                .await;
        }
        Ok(Incoming::Response { id, result }) => handle.complete(&id, result),
        Err(frame_error) => match frame_error.id().cloned() {
            Some(id) => {
                tracing::warn!(%id, ?frame_error, "Rejecting malformed frame");
                handle.respond(id, Err(frame_error.to_rpc_error())).await;
            }
            None => {
                tracing::warn!(?frame_error, "Dropping malformed frame without id");
            }
        },
    }
}
