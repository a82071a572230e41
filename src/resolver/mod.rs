//! File reference resolution
//!
//! References are resolved directly against the session root first, then by
//! a basename search that skips ignored paths. Every path that comes out of
//! this module is contained in the root.

mod ignore_rules;
mod path;
#[allow(clippy::module_inception)]
mod resolver;

use std::path::PathBuf;

use thiserror::Error;

pub use ignore_rules::{IgnoreCache, IgnoreRules};
pub use path::{ensure_contained, normalize, strip_file_scheme};
pub use resolver::{FileResolver, ResolvedContent};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Path escapes the session root: {}", path.display())]
    Traversal { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
