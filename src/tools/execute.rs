//! Shell command execution

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{ToolOutput, truncate_output};

pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;
pub const MAX_TIMEOUT_MS: u64 = 600_000;

/// Run `command` through `sh -c` in `cwd`
///
/// The child is killed when the timeout elapses or `cancel` fires.
pub async fn run_command(
    command: &str,
    cwd: &Path,
    timeout_ms: Option<u64>,
    cancel: CancellationToken,
) -> ToolOutput {
    let timeout_ms = timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS).min(MAX_TIMEOUT_MS);
    tracing::debug!(command, cwd = %cwd.display(), timeout_ms, "Running command");

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let child = match child {
        Ok(c) => c,
        Err(e) => return ToolOutput::error(format!("Failed to execute command: {}", e)),
    };

    let output = tokio::select! {
        result = tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait_with_output()) => {
            match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => return ToolOutput::error(format!("Failed to execute command: {}", e)),
                Err(_) => {
                    tracing::warn!(command, timeout_ms, "Command timed out");
                    return ToolOutput::error(format!("Command timed out after {}ms", timeout_ms));
                }
            }
        }
        () = cancel.cancelled() => {
            tracing::debug!(command, "Command cancelled");
            return ToolOutput::cancelled();
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut combined = stdout.into_owned();
    if !stderr.is_empty() {
        if !combined.is_empty() {
            combined.push_str("\n--- stderr ---\n");
        }
        combined.push_str(&stderr);
    }
    if combined.is_empty() {
        combined = "(no output)".to_string();
    }
    let combined = truncate_output(combined);

    if output.status.success() {
        ToolOutput::success(combined)
    } else {
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        ToolOutput::error(format!("Command failed with exit code {}\n{}", code, combined))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backend::ToolStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_runs_in_cwd() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();

        let output = run_command("ls", dir.path(), None, CancellationToken::new()).await;
        assert_eq!(output.status, ToolStatus::Completed);
        assert!(output.text.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_stderr_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let output = run_command(
            "echo out; echo err >&2; exit 3",
            dir.path(),
            None,
            CancellationToken::new(),
        )
        .await;
        assert_eq!(output.status, ToolStatus::Failed);
        assert!(output.text.starts_with("Command failed with exit code 3"));
        assert!(output.text.contains("out\n\n--- stderr ---\nerr"));
    }

    #[tokio::test]
    async fn test_empty_output() {
        let dir = TempDir::new().unwrap();
        let output = run_command("true", dir.path(), None, CancellationToken::new()).await;
        assert_eq!(output.text, "(no output)");
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let dir = TempDir::new().unwrap();
        let output = run_command("sleep 5", dir.path(), Some(50), CancellationToken::new()).await;
        assert_eq!(output.status, ToolStatus::Failed);
        assert!(output.text.contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancel_stops_command() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let output = run_command("sleep 5", dir.path(), None, token).await;
        assert_eq!(output.status, ToolStatus::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
