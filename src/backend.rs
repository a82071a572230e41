//! AI backend interface
//!
//! The backend is opaque: it takes a prompt and a cancellation token and
//! yields a lazy stream of typed events. Tool calls carry a reply channel
//! so the backend learns whether the tool ran.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::session::HistoryEntry;
use crate::types::ToolCall;
use crate::types::protocol::{PlanEntry, StopReason};

/// One prompt turn handed to the backend
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub session_id: String,
    pub cwd: PathBuf,
    /// Prompt text with referenced files inlined
    pub prompt: String,
    /// Conversation so far, oldest first, excluding this prompt
    pub history: Vec<HistoryEntry>,
}

/// How a tool call ended, reported back to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Completed,
    Failed,
    Denied,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub status: ToolStatus,
    pub output: String,
}

impl ToolOutcome {
    pub fn new(status: ToolStatus, output: impl Into<String>) -> Self {
        Self {
            status,
            output: output.into(),
        }
    }
}

#[derive(Debug)]
pub enum BackendEvent {
    MessageChunk(String),
    ThoughtChunk(String),
    Plan(Vec<PlanEntry>),
    /// The backend wants to run a tool and waits on `reply`
    ToolCall {
        call: ToolCall,
        reply: oneshot::Sender<ToolOutcome>,
    },
    /// The turn is over; the stream may end after this
    TurnEnd(StopReason),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Rate limited by backend")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Backend unreachable: {0}")]
    Network(String),

    #[error("Backend authentication failed: {0}")]
    Auth(String),

    #[error("Backend error: {0}")]
    Other(String),
}

pub type EventStream = BoxStream<'static, Result<BackendEvent, BackendError>>;

/// The AI backend collaborator
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Start a turn; the stream must stop promptly once `cancel` fires
    async fn submit(
        &self,
        request: BackendRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, BackendError>;
}
