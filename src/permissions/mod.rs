//! Tool permission decisions

mod engine;
pub mod options;

pub use engine::{CacheKey, PermissionDecision, PermissionEngine, PermissionScope};
