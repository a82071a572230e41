//! Error types for the ACP bridge

use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;
use crate::resolver::ResolveError;
use crate::transport::RpcError;

/// JSON-RPC error codes
///
/// Standard JSON-RPC codes plus the bridge's domain codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Standard JSON-RPC errors (-32xxx)
    /// Parse error: Invalid JSON
    ParseError = -32700,
    /// Invalid request: Not a valid request object
    InvalidRequest = -32600,
    /// Method not found
    MethodNotFound = -32601,
    /// Invalid params
    InvalidParams = -32602,
    /// Internal error
    InternalError = -32603,

    // Domain errors (-32000 to -32099)
    /// Backend rejected the credentials
    AuthRequired = -32000,
    /// Session not found, destroyed or reaped
    SessionNotFound = -32001,
    /// Request arrived before `initialize`
    NotInitialized = -32002,
    /// Session capacity reached
    LimitExceeded = -32003,
    /// Backend rate limit, see `retryAfterMs`
    RateLimited = -32004,
    /// Backend unreachable
    BackendUnavailable = -32005,
    /// Path escapes the session root
    PathRejected = -32006,
}

impl ErrorCode {
    /// Get the error code value
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Main error type for the bridge
#[derive(Debug, Error)]
pub enum AgentError {
    // === Session errors ===
    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session capacity reached
    #[error("Session limit exceeded: {active} active, max {max}")]
    LimitExceeded { active: usize, max: usize },

    // === Protocol errors ===
    /// `initialize` has not completed yet
    #[error("Connection not initialized")]
    NotInitialized,

    /// Method is unknown or disabled by capability negotiation
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Params did not match the method's schema
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Transport closed while a request was outstanding
    #[error("Connection closed")]
    ConnectionClosed,

    /// The editor answered an outbound request with an error
    #[error("Client error {}: {}", .0.code, .0.message)]
    Remote(RpcError),

    // === Collaborator errors ===
    /// Backend failure
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// File reference resolution failure
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    // === Configuration errors ===
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // === External errors ===
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic errors ===
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Cancelled
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type for the bridge
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Get the JSON-RPC error code for this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AgentError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            AgentError::LimitExceeded { .. } => ErrorCode::LimitExceeded,
            AgentError::NotInitialized => ErrorCode::NotInitialized,
            AgentError::MethodNotFound(_) => ErrorCode::MethodNotFound,
            AgentError::InvalidParams(_) => ErrorCode::InvalidParams,
            AgentError::ConnectionClosed => ErrorCode::InternalError,
            AgentError::Remote(_) => ErrorCode::InternalError,
            AgentError::Backend(BackendError::RateLimited { .. }) => ErrorCode::RateLimited,
            AgentError::Backend(BackendError::Network(_)) => ErrorCode::BackendUnavailable,
            AgentError::Backend(BackendError::Auth(_)) => ErrorCode::AuthRequired,
            AgentError::Backend(BackendError::Other(_)) => ErrorCode::InternalError,
            AgentError::Resolve(ResolveError::Traversal { .. }) => ErrorCode::PathRejected,
            AgentError::Resolve(ResolveError::Io(_)) => ErrorCode::InternalError,
            AgentError::ConfigError(_) => ErrorCode::InternalError,
            AgentError::Io(_) => ErrorCode::InternalError,
            AgentError::Json(_) => ErrorCode::InvalidParams,
            AgentError::Internal(_) => ErrorCode::InternalError,
            AgentError::Cancelled => ErrorCode::InternalError,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Backend(BackendError::RateLimited { .. } | BackendError::Network(_))
        )
    }

    /// Check if this error is a client error (caused by invalid input)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AgentError::SessionNotFound(_)
                | AgentError::NotInitialized
                | AgentError::MethodNotFound(_)
                | AgentError::InvalidParams(_)
                | AgentError::Json(_)
                | AgentError::Resolve(ResolveError::Traversal { .. })
        )
    }

    /// Retry hint carried by rate-limit failures
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AgentError::Backend(BackendError::RateLimited { retry_after }) => *retry_after,
            _ => None,
        }
    }

    // === Constructor helpers ===

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        AgentError::Internal(msg.into())
    }

    /// Create a session not found error
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        AgentError::SessionNotFound(session_id.into())
    }

    /// Create an invalid params error
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        AgentError::InvalidParams(msg.into())
    }

    /// Create a method not found error
    pub fn method_not_found(method: impl Into<String>) -> Self {
        AgentError::MethodNotFound(method.into())
    }

    /// Create a configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        AgentError::ConfigError(msg.into())
    }
}
