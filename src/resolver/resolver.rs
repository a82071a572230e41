use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use walkdir::WalkDir;

use super::ResolveError;
use super::ignore_rules::{IgnoreCache, IgnoreRules};
use super::path::{ensure_contained, strip_file_scheme};
use crate::cache::TtlCache;
use crate::files::FileAccess;
use crate::types::ResolverConfig;

/// Text of a referenced file and the path it was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContent {
    pub path: PathBuf,
    pub text: String,
    /// True when the direct path did not exist and a search found this file
    pub via_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PathKey {
    root: PathBuf,
    reference: String,
}

/// Resolves editor file references against a session root
///
/// The path cache only remembers where a fallback search found a file.
/// Cached paths are checked on disk before use, and misses are never
/// cached, so a stale entry costs a search rather than a wrong answer.
#[derive(Debug)]
pub struct FileResolver {
    content: TtlCache<PathBuf, String>,
    paths: TtlCache<PathKey, PathBuf>,
    ignores: Arc<IgnoreCache>,
    max_walk_entries: usize,
}

impl FileResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            content: TtlCache::new(config.content_cache_capacity, config.content_cache_ttl()),
            paths: TtlCache::new(config.path_cache_capacity, config.path_cache_ttl()),
            ignores: Arc::new(IgnoreCache::new(
                config.ignore_cache_capacity,
                config.ignore_cache_ttl(),
            )),
            max_walk_entries: config.max_walk_entries,
        }
    }

    /// Shared ignore-rule cache, also used by the search tool
    pub fn ignores(&self) -> Arc<IgnoreCache> {
        Arc::clone(&self.ignores)
    }

    /// Resolve `reference` under `root`
    ///
    /// `Ok(None)` means nothing matched or the file could not be read;
    /// a reference that escapes the root is always an error.
    #[tracing::instrument(name = "resolve_reference", skip(self, root, files), fields(root = %root.display()))]
    pub async fn resolve(
        &self,
        session_id: &str,
        root: &Path,
        reference: &str,
        files: &FileAccess,
    ) -> Result<Option<ResolvedContent>, ResolveError> {
        let candidate = Path::new(strip_file_scheme(reference));
        let direct = ensure_contained(root, candidate)?;
        let key = PathKey {
            root: root.to_path_buf(),
            reference: reference.to_string(),
        };

        let Some((path, via_fallback)) = self.locate(&key, &direct).await? else {
            tracing::debug!("Reference did not resolve");
            return Ok(None);
        };
        if let Some(text) = self.read(session_id, &path, files).await {
            return Ok(Some(ResolvedContent {
                path,
                text,
                via_fallback,
            }));
        }

        // The located file could not be read; forget it and look again once
        self.paths.remove(&key);
        self.content.remove(&path);
        match self.locate(&key, &direct).await? {
            Some((retry, via_fallback)) if retry != path => Ok(self
                .read(session_id, &retry, files)
                .await
                .map(|text| ResolvedContent {
                    path: retry,
                    text,
                    via_fallback,
                })),
            _ => Ok(None),
        }
    }

    async fn read(&self, session_id: &str, path: &Path, files: &FileAccess) -> Option<String> {
        if let Some(text) = self.content.get(&path.to_path_buf()) {
            return Some(text);
        }
        match files.read_text(session_id, path).await {
            Ok(text) => {
                self.content.insert(path.to_path_buf(), text.clone());
                Some(text)
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Resolved file unreadable");
                None
            }
        }
    }

    /// Where `key` points right now, and whether a search was needed
    async fn locate(
        &self,
        key: &PathKey,
        direct: &Path,
    ) -> Result<Option<(PathBuf, bool)>, ResolveError> {
        if is_file(direct).await {
            return Ok(Some((direct.to_path_buf(), false)));
        }

        if let Some(cached) = self.paths.get(key) {
            if is_file(&cached).await {
                return Ok(Some((cached, true)));
            }
            tracing::debug!(stale = %cached.display(), "Cached resolution no longer exists");
            self.paths.remove(key);
        }

        let Some(name) = direct.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        let Some(found) = self.fallback_search(&key.root, name).await? else {
            return Ok(None);
        };
        tracing::info!(
            reference = %key.reference,
            resolved = %found.display(),
            "Resolved reference by fallback search"
        );
        self.paths.insert(key.clone(), found.clone());
        Ok(Some((found, true)))
    }

    /// Search the root for a non-ignored file named `basename`
    async fn fallback_search(
        &self,
        root: &Path,
        basename: &str,
    ) -> Result<Option<PathBuf>, ResolveError> {
        let Some(matcher) = basename_matcher(basename) else {
            return Ok(None);
        };
        let rules = self.ignores.rules_for(root);
        let root_owned = root.to_path_buf();
        let limit = self.max_walk_entries;

        let found = tokio::task::spawn_blocking(move || {
            find_first_match(&root_owned, &matcher, &rules, limit)
        })
        .await
        .map_err(|e| ResolveError::Io(std::io::Error::other(e.to_string())))?;

        match found {
            Some(path) => ensure_contained(root, &path).map(Some),
            None => Ok(None),
        }
    }

    /// Drop expired entries from every cache
    pub fn sweep(&self) -> usize {
        self.content.sweep() + self.paths.sweep() + self.ignores.sweep()
    }

    pub fn invalidate_content(&self, path: &Path) {
        self.content.remove(&path.to_path_buf());
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// `**/<basename>` with glob metacharacters in the name taken literally
fn basename_matcher(basename: &str) -> Option<GlobMatcher> {
    let mut pattern = String::from("**/");
    for c in basename.chars() {
        match c {
            '*' | '?' | '[' | ']' | '{' | '}' => {
                pattern.push('[');
                pattern.push(c);
                pattern.push(']');
            }
            _ => pattern.push(c),
        }
    }
    GlobBuilder::new(&pattern)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| tracing::debug!(basename, error = %e, "Unusable basename for search"))
        .ok()
}

/// Shallowest match wins; ties break on path order
fn find_first_match(
    root: &Path,
    matcher: &GlobMatcher,
    rules: &IgnoreRules,
    limit: usize,
) -> Option<PathBuf> {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !rules.is_ignored(e.path(), e.file_type().is_dir()));

    let mut best: Option<(usize, PathBuf)> = None;
    for entry in walker.take(limit).filter_map(std::result::Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if !matcher.is_match(relative) {
            continue;
        }
        let candidate = (entry.depth(), entry.path().to_path_buf());
        if best.as_ref().is_none_or(|b| candidate < *b) {
            best = Some(candidate);
        }
    }
    best.map(|(_, path)| path)
}
