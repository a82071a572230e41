//! Glob search over the session root

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{GlobBuilder, GlobSetBuilder};
use walkdir::WalkDir;

use super::ToolOutput;
use crate::resolver::IgnoreCache;

const MAX_RESULTS: usize = 1000;

/// Find files under `root` matching `pattern`, skipping ignored paths
///
/// Results are relative to the root and sorted by path.
pub async fn search_files(
    root: &Path,
    pattern: &str,
    ignores: Arc<IgnoreCache>,
    max_walk_entries: usize,
) -> ToolOutput {
    let glob = match GlobBuilder::new(pattern).literal_separator(true).build() {
        Ok(g) => g,
        Err(e) => return ToolOutput::error(format!("Invalid glob pattern: {}", e)),
    };
    let mut builder = GlobSetBuilder::new();
    builder.add(glob);
    let globset = match builder.build() {
        Ok(g) => g,
        Err(e) => return ToolOutput::error(format!("Failed to build glob set: {}", e)),
    };

    let rules = ignores.rules_for(root);
    let root_owned = root.to_path_buf();
    let walked = tokio::task::spawn_blocking(move || {
        let mut matches: Vec<PathBuf> = WalkDir::new(&root_owned)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0 || !rules.is_ignored(e.path(), e.file_type().is_dir())
            })
            .take(max_walk_entries)
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.path().strip_prefix(&root_owned).ok().map(Path::to_path_buf))
            .filter(|relative| globset.is_match(relative))
            .collect();
        matches.sort();
        matches
    })
    .await;

    let matches = match walked {
        Ok(m) => m,
        Err(e) => return ToolOutput::error(format!("Search failed: {}", e)),
    };

    if matches.is_empty() {
        return ToolOutput::success(format!("No files matching pattern '{}' found.", pattern));
    }

    let total = matches.len();
    let mut text = matches
        .iter()
        .take(MAX_RESULTS)
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    if total > MAX_RESULTS {
        text.push_str(&format!("\n... ({} more results)", total - MAX_RESULTS));
    }
    ToolOutput::success(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ToolStatus;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    fn ignores() -> Arc<IgnoreCache> {
        Arc::new(IgnoreCache::new(4, Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn test_search_respects_gitignore() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target/\n").unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("target/gen.rs"), "").unwrap();

        let output = search_files(dir.path(), "**/*.rs", ignores(), 10_000).await;
        assert_eq!(output.status, ToolStatus::Completed);
        assert_eq!(output.text, "src/lib.rs\nsrc/main.rs");
    }

    #[tokio::test]
    async fn test_no_matches() {
        let dir = TempDir::new().unwrap();
        let output = search_files(dir.path(), "*.py", ignores(), 10_000).await;
        assert_eq!(output.text, "No files matching pattern '*.py' found.");
    }

    #[tokio::test]
    async fn test_invalid_pattern() {
        let dir = TempDir::new().unwrap();
        let output = search_files(dir.path(), "a[", ignores(), 10_000).await;
        assert_eq!(output.status, ToolStatus::Failed);
    }
}
