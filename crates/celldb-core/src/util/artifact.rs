use std::path::{Path, PathBuf};

/// Resolves an artifact URL (`file://path` or a bare path) to a filesystem path.
///
/// `file://tmp/x.csv` is relative, while
/// `file:///tmp/x.csv` is absolute. Relative paths are joined onto `root` when set.
pub fn resolve_artifact_path(url: &str, root: Option<&Path>) -> PathBuf {
    let raw = url.strip_prefix("file://").unwrap_or(url);
    let path = PathBuf::from(raw);
    match root {
        Some(root) if path.is_relative() => root.join(path),
        _ => path,
    }
}
