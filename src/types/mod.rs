//! Public types for the ACP bridge
//!
//! This module contains all the shared types used across the crate.

mod config;
mod error;
pub mod protocol;
mod tool;

pub use config::{
    BridgeConfig, PermissionConfig, ResolverConfig, SETTINGS_DIR, SessionConfig, TransportConfig,
};
pub use error::{AgentError, ErrorCode, Result};
pub use tool::{ToolCall, ToolCallKind, ToolKind, ToolType, truncate_chars};
