//! File edits with unified diff output

use std::path::Path;

use similar::TextDiff;

use super::{ToolContext, ToolOutput};
use crate::types::protocol::Diff;

/// Replace the first occurrence of `old_text` with `new_text`, or write
/// `new_text` as the whole file when `old_text` is `None`
pub async fn apply_edit(
    context: &ToolContext,
    path: &Path,
    old_text: Option<&str>,
    new_text: &str,
) -> ToolOutput {
    let current = context.files.read_text(&context.session_id, path).await;

    let (before, after) = match (old_text, current) {
        (None, Ok(existing)) => (Some(existing), new_text.to_string()),
        (None, Err(_)) => (None, new_text.to_string()),
        (Some(old), Ok(existing)) => {
            if old.is_empty() || !existing.contains(old) {
                return ToolOutput::error(format!(
                    "Text to replace was not found in {}",
                    path.display()
                ));
            }
            let updated = existing.replacen(old, new_text, 1);
            (Some(existing), updated)
        }
        (Some(_), Err(e)) => {
            return ToolOutput::error(format!("Failed to read {}: {}", path.display(), e));
        }
    };

    if let Err(e) = context
        .files
        .write_text(&context.session_id, path, &after)
        .await
    {
        return ToolOutput::error(format!("Failed to write {}: {}", path.display(), e));
    }

    let display = path
        .strip_prefix(&context.cwd)
        .unwrap_or(path)
        .display()
        .to_string();
    let patch = make_diff(before.as_deref().unwrap_or(""), &after, &display);
    let summary = if patch.is_empty() {
        format!("No changes to {}", display)
    } else {
        patch
    };

    ToolOutput::success(summary).with_diff(Diff {
        path: path.to_path_buf(),
        old_text: before,
        new_text: after,
    })
}

/// Unified diff with three lines of context
pub fn make_diff(old: &str, new: &str, display_path: &str) -> String {
    if old == new {
        return String::new();
    }
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{}", display_path), &format!("b/{}", display_path))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ToolStatus;
    use crate::files::FileAccess;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> ToolContext {
        ToolContext {
            session_id: "s1".into(),
            cwd: dir.path().to_path_buf(),
            files: FileAccess::local(),
        }
    }

    #[tokio::test]
    async fn test_replace_first_occurrence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lib.rs");
        std::fs::write(&path, "let a = 1;\nlet a = 1;\n").unwrap();

        let output = apply_edit(&context(&dir), &path, Some("a = 1"), "b = 2").await;
        assert_eq!(output.status, ToolStatus::Completed);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "let b = 2;\nlet a = 1;\n"
        );
        assert!(output.text.contains("--- a/lib.rs"));
        assert!(output.text.contains("+let b = 2;"));
        let diff = output.diff.unwrap();
        assert_eq!(diff.old_text.as_deref(), Some("let a = 1;\nlet a = 1;\n"));
    }

    #[tokio::test]
    async fn test_create_new_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new/file.txt");

        let output = apply_edit(&context(&dir), &path, None, "hello\n").await;
        assert_eq!(output.status, ToolStatus::Completed);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
        assert_eq!(output.diff.unwrap().old_text, None);
    }

    #[tokio::test]
    async fn test_missing_old_text_fails_without_writing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "content").unwrap();

        let output = apply_edit(&context(&dir), &path, Some("absent"), "x").await;
        assert_eq!(output.status, ToolStatus::Failed);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "content");
    }

    #[test]
    fn test_make_diff_identical_is_empty() {
        assert_eq!(make_diff("a\n", "a\n", "x"), "");
    }
}
