//! Compiled ignore rules per project root
//!
//! Rules come from the root's `.gitignore`, any `.gitignore` in a directory
//! below it, and a fixed set of directories that are never worth searching.
//! Nested files are loaded the first time a path under their directory is
//! checked; deeper files take precedence, as in git. Compiled matchers are
//! cached per root and recompiled when any loaded `.gitignore` changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use ignore::Match;
use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::cache::TtlCache;

const GITIGNORE: &str = ".gitignore";
const ALWAYS_IGNORED: &[&str] = &[".git/", "node_modules/"];

#[derive(Debug)]
pub struct IgnoreRules {
    root: PathBuf,
    matcher: Gitignore,
    stamp: Option<SystemTime>,
    /// Directory below the root -> its `.gitignore`, if it had one when loaded
    nested: DashMap<PathBuf, Option<Arc<NestedRules>>>,
}

#[derive(Debug)]
struct NestedRules {
    matcher: Gitignore,
    stamp: Option<SystemTime>,
}

impl IgnoreRules {
    pub fn compile(root: &Path) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        for line in ALWAYS_IGNORED {
            if let Err(e) = builder.add_line(None, line) {
                tracing::warn!(error = %e, line, "Invalid built-in ignore rule");
            }
        }

        let gitignore = root.join(GITIGNORE);
        if gitignore.is_file() {
            if let Some(e) = builder.add(&gitignore) {
                tracing::warn!(path = %gitignore.display(), error = %e, "Partially invalid .gitignore");
            }
        }

        let matcher = builder.build().unwrap_or_else(|e| {
            tracing::warn!(root = %root.display(), error = %e, "Failed to compile ignore rules");
            Gitignore::empty()
        });

        Self {
            root: root.to_path_buf(),
            matcher,
            stamp: gitignore_stamp(root),
            nested: DashMap::new(),
        }
    }

    /// Whether `path` (absolute, or relative to the root) is ignored
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let relative = match path.strip_prefix(&self.root) {
            Ok(rel) => rel,
            Err(_) if path.is_relative() => path,
            Err(_) => return false,
        };
        if relative.as_os_str().is_empty() {
            return false;
        }

        for dir in relative.ancestors().skip(1) {
            if dir.as_os_str().is_empty() {
                break;
            }
            let Some(nested) = self.nested_for(dir) else {
                continue;
            };
            let Ok(below) = relative.strip_prefix(dir) else {
                continue;
            };
            match nested.matcher.matched_path_or_any_parents(below, is_dir) {
                Match::Ignore(_) => return true,
                Match::Whitelist(_) => return false,
                Match::None => {}
            }
        }

        self.matcher
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }

    /// Rules of the `.gitignore` in `dir` (relative to the root), loaded once
    fn nested_for(&self, dir: &Path) -> Option<Arc<NestedRules>> {
        if let Some(loaded) = self.nested.get(dir) {
            return loaded.clone();
        }
        let loaded = NestedRules::load(&self.root.join(dir)).map(Arc::new);
        self.nested.insert(dir.to_path_buf(), loaded.clone());
        loaded
    }

    fn is_current(&self) -> bool {
        if gitignore_stamp(&self.root) != self.stamp {
            return false;
        }
        self.nested.iter().all(|entry| {
            let stamp = entry.value().as_ref().and_then(|n| n.stamp);
            gitignore_stamp(&self.root.join(entry.key())) == stamp
        })
    }
}

impl NestedRules {
    fn load(dir: &Path) -> Option<Self> {
        let gitignore = dir.join(GITIGNORE);
        if !gitignore.is_file() {
            return None;
        }
        let mut builder = GitignoreBuilder::new(dir);
        if let Some(e) = builder.add(&gitignore) {
            tracing::warn!(path = %gitignore.display(), error = %e, "Partially invalid .gitignore");
        }
        match builder.build() {
            Ok(matcher) => Some(Self {
                matcher,
                stamp: gitignore_stamp(dir),
            }),
            Err(e) => {
                tracing::warn!(path = %gitignore.display(), error = %e, "Failed to compile ignore rules");
                None
            }
        }
    }
}

fn gitignore_stamp(root: &Path) -> Option<SystemTime> {
    std::fs::metadata(root.join(GITIGNORE))
        .and_then(|m| m.modified())
        .ok()
}

/// Per-root cache of compiled rules
#[derive(Debug)]
pub struct IgnoreCache {
    rules: TtlCache<PathBuf, Arc<IgnoreRules>>,
}

impl IgnoreCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            rules: TtlCache::new(capacity, ttl),
        }
    }

    pub fn rules_for(&self, root: &Path) -> Arc<IgnoreRules> {
        if let Some(rules) = self.rules.get(&root.to_path_buf()) {
            if rules.is_current() {
                return rules;
            }
            tracing::debug!(root = %root.display(), ".gitignore changed, recompiling");
        }
        let rules = Arc::new(IgnoreRules::compile(root));
        self.rules.insert(root.to_path_buf(), Arc::clone(&rules));
        rules
    }

    pub fn sweep(&self) -> usize {
        self.rules.sweep()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_gitignore_and_builtin_rules() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(GITIGNORE), "*.log\nbuild/\n").unwrap();
        let rules = IgnoreRules::compile(dir.path());

        assert!(rules.is_ignored(&dir.path().join("debug.log"), false));
        assert!(rules.is_ignored(&dir.path().join("build/out.txt"), false));
        assert!(rules.is_ignored(&dir.path().join(".git/config"), false));
        assert!(rules.is_ignored(Path::new("node_modules/x/index.js"), false));
        assert!(!rules.is_ignored(&dir.path().join("src/main.rs"), false));
        assert!(!rules.is_ignored(Path::new("/elsewhere/debug.txt"), false));
    }

    #[test]
    fn test_cache_recompiles_when_gitignore_changes() {
        let dir = TempDir::new().unwrap();
        let cache = IgnoreCache::new(4, Duration::from_secs(60));

        let first = cache.rules_for(dir.path());
        assert!(!first.is_ignored(Path::new("notes.md"), false));
        assert!(Arc::ptr_eq(&first, &cache.rules_for(dir.path())));

        std::fs::write(dir.path().join(GITIGNORE), "notes.md\n").unwrap();
        let second = cache.rules_for(dir.path());
        assert!(second.is_ignored(Path::new("notes.md"), false));
    }

    #[test]
    fn test_nested_gitignore_applies_below_its_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg/src")).unwrap();
        std::fs::write(dir.path().join("pkg").join(GITIGNORE), "*.tmp\n").unwrap();
        let rules = IgnoreRules::compile(dir.path());

        assert!(rules.is_ignored(&dir.path().join("pkg/scratch.tmp"), false));
        assert!(rules.is_ignored(&dir.path().join("pkg/src/deep.tmp"), false));
        assert!(!rules.is_ignored(&dir.path().join("top.tmp"), false));
        assert!(!rules.is_ignored(&dir.path().join("pkg/src/lib.rs"), false));
    }

    #[test]
    fn test_nested_whitelist_overrides_root_rule() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        std::fs::write(dir.path().join(GITIGNORE), "*.log\n").unwrap();
        std::fs::write(dir.path().join("logs").join(GITIGNORE), "!keep.log\n").unwrap();
        let rules = IgnoreRules::compile(dir.path());

        assert!(!rules.is_ignored(&dir.path().join("logs/keep.log"), false));
        assert!(rules.is_ignored(&dir.path().join("logs/other.log"), false));
        assert!(rules.is_ignored(&dir.path().join("debug.log"), false));
    }

    #[test]
    fn test_cache_recompiles_when_nested_gitignore_appears() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
        let cache = IgnoreCache::new(4, Duration::from_secs(60));

        let first = cache.rules_for(dir.path());
        assert!(!first.is_ignored(Path::new("pkg/a.tmp"), false));

        std::fs::write(dir.path().join("pkg").join(GITIGNORE), "*.tmp\n").unwrap();
        let second = cache.rules_for(dir.path());
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_ignored(Path::new("pkg/a.tmp"), false));
    }
}
