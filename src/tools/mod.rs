//! Tool execution after a permission grant
//!
//! Every path a tool touches is checked for containment in the session
//! root. Long-running tools stop when the turn's cancellation token fires.

mod edit;
mod execute;
mod search;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::backend::ToolStatus;
use crate::files::FileAccess;
use crate::resolver::{IgnoreCache, ensure_contained};
use crate::types::protocol::Diff;
use crate::types::{ToolCall, ToolCallKind};

pub use edit::{apply_edit, make_diff};
pub use execute::{DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS, run_command};
pub use search::search_files;

/// Maximum characters of tool output reported back
pub const MAX_OUTPUT_CHARS: usize = 30_000;

/// Where a tool runs
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub cwd: PathBuf,
    pub files: FileAccess,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub status: ToolStatus,
    pub text: String,
    pub diff: Option<Diff>,
}

impl ToolOutput {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Completed,
            text: text.into(),
            diff: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Failed,
            text: text.into(),
            diff: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: ToolStatus::Cancelled,
            text: "Cancelled".to_string(),
            diff: None,
        }
    }

    pub fn with_diff(mut self, diff: Diff) -> Self {
        self.diff = Some(diff);
        self
    }
}

#[async_trait]
pub trait ToolExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        context: &ToolContext,
        call: &ToolCall,
        cancel: CancellationToken,
    ) -> ToolOutput;
}

/// Built-in tools operating on the session's workspace
#[derive(Debug)]
pub struct WorkspaceTools {
    ignores: Arc<IgnoreCache>,
    max_walk_entries: usize,
}

impl WorkspaceTools {
    pub fn new(ignores: Arc<IgnoreCache>, max_walk_entries: usize) -> Self {
        Self {
            ignores,
            max_walk_entries,
        }
    }

    async fn read(&self, context: &ToolContext, path: &str) -> ToolOutput {
        let path = match contained(&context.cwd, path) {
            Ok(p) => p,
            Err(output) => return output,
        };
        match context.files.read_text(&context.session_id, &path).await {
            Ok(text) => ToolOutput::success(truncate_output(text)),
            Err(e) => ToolOutput::error(format!("Failed to read {}: {}", path.display(), e)),
        }
    }
}

#[async_trait]
impl ToolExecutor for WorkspaceTools {
    #[tracing::instrument(
        name = "tool_execute",
        skip_all,
        fields(session_id = %context.session_id, tool_call_id = %call.id, tool_type = %call.tool_type())
    )]
    async fn execute(
        &self,
        context: &ToolContext,
        call: &ToolCall,
        cancel: CancellationToken,
    ) -> ToolOutput {
        if cancel.is_cancelled() {
            return ToolOutput::cancelled();
        }
        let start = std::time::Instant::now();

        let output = match &call.kind {
            ToolCallKind::Read { path } => self.read(context, path).await,
            ToolCallKind::FileEdit {
                path,
                old_text,
                new_text,
            } => match contained(&context.cwd, path) {
                Ok(path) => apply_edit(context, &path, old_text.as_deref(), new_text).await,
                Err(output) => output,
            },
            ToolCallKind::Execute {
                command,
                timeout_ms,
            } => run_command(command, &context.cwd, *timeout_ms, cancel).await,
            ToolCallKind::Search { pattern } => {
                search_files(
                    &context.cwd,
                    pattern,
                    Arc::clone(&self.ignores),
                    self.max_walk_entries,
                )
                .await
            }
            ToolCallKind::Other { .. } => {
                ToolOutput::error(format!("Tool '{}' is not supported", call.name))
            }
        };

        tracing::debug!(
            status = ?output.status,
            elapsed_ms = start.elapsed().as_millis(),
            "Tool finished"
        );
        output
    }
}

fn contained(root: &Path, path: &str) -> Result<PathBuf, ToolOutput> {
    ensure_contained(root, Path::new(path)).map_err(|e| ToolOutput::error(e.to_string()))
}

/// Cap output length on a character boundary
pub fn truncate_output(mut text: String) -> String {
    if text.len() <= MAX_OUTPUT_CHARS {
        return text;
    }
    let mut cut = MAX_OUTPUT_CHARS;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str("\n... (output truncated)");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn tools() -> WorkspaceTools {
        WorkspaceTools::new(Arc::new(IgnoreCache::new(4, Duration::from_secs(60))), 10_000)
    }

    fn context(dir: &TempDir) -> ToolContext {
        ToolContext {
            session_id: "s1".into(),
            cwd: dir.path().to_path_buf(),
            files: FileAccess::local(),
        }
    }

    #[tokio::test]
    async fn test_read_inside_root() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let call = ToolCall::new("t1", "read", ToolCallKind::Read { path: "a.txt".into() });

        let output = tools()
            .execute(&context(&dir), &call, CancellationToken::new())
            .await;
        assert_eq!(output, ToolOutput::success("alpha"));
    }

    #[tokio::test]
    async fn test_read_outside_root_fails() {
        let dir = TempDir::new().unwrap();
        let call = ToolCall::new(
            "t1",
            "read",
            ToolCallKind::Read {
                path: "../../etc/passwd".into(),
            },
        );
        let output = tools()
            .execute(&context(&dir), &call, CancellationToken::new())
            .await;
        assert_eq!(output.status, ToolStatus::Failed);
        assert!(output.text.contains("escapes"));
    }

    #[tokio::test]
    async fn test_other_is_unsupported_and_cancel_short_circuits() {
        let dir = TempDir::new().unwrap();
        let call = ToolCall::new(
            "t1",
            "web_fetch",
            ToolCallKind::Other {
                input: serde_json::Value::Null,
            },
        );
        let output = tools()
            .execute(&context(&dir), &call, CancellationToken::new())
            .await;
        assert_eq!(output.status, ToolStatus::Failed);

        let token = CancellationToken::new();
        token.cancel();
        let output = tools().execute(&context(&dir), &call, token).await;
        assert_eq!(output.status, ToolStatus::Cancelled);
    }

    #[test]
    fn test_truncate_output_respects_char_boundary() {
        let text = "é".repeat(MAX_OUTPUT_CHARS);
        let truncated = truncate_output(text);
        assert!(truncated.ends_with("(output truncated)"));
        assert!(truncated.len() < MAX_OUTPUT_CHARS + 30);
    }
}
