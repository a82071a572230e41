//! Path containment
//!
//! A candidate is first normalized lexically against the root, then, when
//! it exists on disk, canonicalized so symlinks cannot point outside.

use std::path::{Component, Path, PathBuf};

use super::ResolveError;

/// Resolve `.` and `..` without touching the filesystem
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays at the root
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Strip a `file://` scheme from an editor reference
pub fn strip_file_scheme(reference: &str) -> &str {
    reference.strip_prefix("file://").unwrap_or(reference)
}

/// Join `candidate` onto `root` and ensure the result stays inside it
///
/// Returns the normalized path (not the canonical one) so callers see the
/// path in the same form as the root they passed.
pub fn ensure_contained(root: &Path, candidate: &Path) -> Result<PathBuf, ResolveError> {
    let root = normalize(root);
    let joined = if candidate.is_absolute() {
        normalize(candidate)
    } else {
        normalize(&root.join(candidate))
    };

    if !joined.starts_with(&root) {
        return Err(ResolveError::Traversal {
            path: candidate.to_path_buf(),
        });
    }

    if let (Ok(real_root), Ok(real)) = (std::fs::canonicalize(&root), std::fs::canonicalize(&joined))
    {
        if !real.starts_with(&real_root) {
            return Err(ResolveError::Traversal {
                path: candidate.to_path_buf(),
            });
        }
    }

    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("/../x")), PathBuf::from("/x"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_relative_and_absolute_inside_root() {
        let root = Path::new("/proj");
        assert_eq!(
            ensure_contained(root, Path::new("docs/notes.md")).unwrap(),
            PathBuf::from("/proj/docs/notes.md")
        );
        assert_eq!(
            ensure_contained(root, Path::new("/proj/src/../README.md")).unwrap(),
            PathBuf::from("/proj/README.md")
        );
    }

    #[test]
    fn test_escapes_are_rejected() {
        let root = Path::new("/proj");
        for candidate in ["../etc/passwd", "/etc/passwd", "docs/../../secret", "/projector/x"] {
            assert!(
                matches!(
                    ensure_contained(root, Path::new(candidate)),
                    Err(ResolveError::Traversal { .. })
                ),
                "{candidate}"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s").unwrap();
        let root = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        let result = ensure_contained(root.path(), Path::new("link/secret.txt"));
        assert!(matches!(result, Err(ResolveError::Traversal { .. })));
    }

    #[test]
    fn test_strip_file_scheme() {
        assert_eq!(strip_file_scheme("file:///proj/a.md"), "/proj/a.md");
        assert_eq!(strip_file_scheme("a.md"), "a.md");
    }
}
