//! ACP bridge
//!
//! Multiplexes editor sessions over one JSON-RPC connection and relays each
//! session's prompts to an AI backend. Tool calls proposed by the backend
//! are authorized through the editor before they run, and file references in
//! prompts are resolved against the session's working directory.
//!
//! ## Features
//!
//! - Newline-delimited JSON-RPC 2.0 over stdio with batched writes
//! - Bounded session table with idle reaping
//! - Permission decisions cached per tool and parameter
//! - File reference resolution with an ignore-aware fallback search
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use acp_bridge::backend::{Backend, BackendError, BackendRequest, EventStream};
//! use acp_bridge::{BridgeConfig, LogOptions, init_logging, serve_stdio};
//! use tokio_util::sync::CancellationToken;
//!
//! struct MyBackend;
//!
//! #[async_trait::async_trait]
//! impl Backend for MyBackend {
//!     async fn submit(
//!         &self,
//!         _request: BackendRequest,
//!         _cancel: CancellationToken,
//!     ) -> Result<EventStream, BackendError> {
//!         Ok(Box::pin(futures::stream::empty()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     init_logging(&LogOptions::default())?;
//!     let config = BridgeConfig::load(std::env::current_dir().ok().as_deref());
//!     serve_stdio(Arc::new(MyBackend), config).await
//! }
//! ```
//!
//! ## Configuration Loading Priority
//!
//! Highest to lowest:
//!
//! 1. `<project>/.acp-bridge/settings.json`
//! 2. `~/.acp-bridge/settings.json`
//! 3. Defaults
//!
//! ```json
//! {
//!   "sessions": { "maxSessions": 8, "idleTimeoutSecs": 900 },
//!   "permissions": { "cacheTtlSecs": 300 }
//! }
//! ```

pub mod agent;
pub mod backend;
pub mod cache;
pub mod client;
pub mod converter;
pub mod files;
pub mod permissions;
pub mod resolver;
pub mod session;
pub mod telemetry;
pub mod tools;
pub mod transport;
pub mod types;

pub use agent::{BridgeAgent, serve, serve_stdio};
pub use backend::{Backend, BackendError, BackendEvent, BackendRequest, ToolOutcome, ToolStatus};
pub use client::{ConnectionClient, EditorClient};
pub use files::FileAccess;
pub use permissions::{PermissionDecision, PermissionEngine, PermissionScope};
pub use resolver::{FileResolver, ResolvedContent};
pub use session::{Session, SessionManager};
pub use telemetry::{LogOptions, init_logging, shutdown_otel};
pub use tools::{ToolExecutor, WorkspaceTools};
pub use types::{AgentError, BridgeConfig, Result};
