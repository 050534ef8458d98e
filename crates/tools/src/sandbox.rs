//! Workspace path scoping.
//!
//! Any path argument resolves relative to the workspace directory, is
//! canonicalized (symlinks resolved where they exist), and must stay
//! inside the workspace. Mutating operations additionally require the
//! resolved path to land inside one of the configured mutable roots.
//! Absolute paths that escape the workspace are rejected.

use std::path::{Component, Path, PathBuf};

/// Resolve a requested path against the workspace root.
///
/// Canonicalizes the longest existing ancestor and re-appends the
/// non-existing tail, so new files validate the same way as existing
/// ones.
pub fn resolve_path(workspace_dir: &Path, requested: &str) -> Result<PathBuf, String> {
    let canonical_root = workspace_dir
        .canonicalize()
        .map_err(|e| format!("cannot resolve workspace '{}': {e}", workspace_dir.display()))?;

    let requested_path = Path::new(requested);
    let candidate = if requested_path.is_absolute() {
        requested_path.to_path_buf()
    } else {
        // Reject raw `..` components before any resolution.
        for component in requested_path.components() {
            if matches!(component, Component::ParentDir) {
                return Err("path must not contain '..' components".to_owned());
            }
        }
        canonical_root.join(requested_path)
    };

    let resolved = canonicalize_with_tail(&candidate)?;

    if !resolved.starts_with(&canonical_root) {
        return Err(format!(
            "path '{requested}' resolves outside the workspace '{}'",
            canonical_root.display()
        ));
    }
    Ok(resolved)
}

/// Require the resolved path to be inside a mutable root.
pub fn ensure_mutable(resolved: &Path, mutable_roots: &[PathBuf]) -> Result<(), String> {
    if mutable_roots.iter().any(|root| resolved.starts_with(root)) {
        Ok(())
    } else {
        Err(format!(
            "path '{}' is outside the mutable roots",
            resolved.display()
        ))
    }
}

/// Canonicalize the mutable-root list relative to a workspace.
pub fn canonical_mutable_roots(workspace_dir: &Path, roots: &[String]) -> Vec<PathBuf> {
    let canonical_ws = workspace_dir
        .canonicalize()
        .unwrap_or_else(|_| workspace_dir.to_path_buf());
    roots
        .iter()
        .filter_map(|r| {
            let joined = if r == "." {
                canonical_ws.clone()
            } else {
                canonical_ws.join(r)
            };
            joined.canonicalize().ok().or(Some(joined))
        })
        .collect()
}

fn canonicalize_with_tail(candidate: &Path) -> Result<PathBuf, String> {
    if candidate.exists() {
        return candidate
            .canonicalize()
            .map_err(|e| format!("cannot resolve '{}': {e}", candidate.display()));
    }

    // Walk up to the nearest existing ancestor, then re-append.
    let mut existing = candidate;
    let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        if existing.exists() {
            break;
        }
        match existing.parent() {
            Some(parent) => {
                if let Some(file_name) = existing.file_name() {
                    tail.push(file_name);
                }
                existing = parent;
            }
            None => break,
        }
    }
    let mut resolved = existing
        .canonicalize()
        .map_err(|e| format!("cannot resolve ancestor of '{}': {e}", candidate.display()))?;
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn relative_path_inside_workspace() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("a.txt"), "x").unwrap();
        let p = resolve_path(ws.path(), "a.txt").unwrap();
        assert!(p.ends_with("a.txt"));
    }

    #[test]
    fn parent_traversal_rejected() {
        let ws = TempDir::new().unwrap();
        let err = resolve_path(ws.path(), "../outside.txt").unwrap_err();
        assert!(err.contains(".."));
    }

    #[test]
    fn absolute_path_inside_workspace_allowed() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("a.txt"), "x").unwrap();
        let abs = ws.path().canonicalize().unwrap().join("a.txt");
        let p = resolve_path(ws.path(), abs.to_str().unwrap()).unwrap();
        assert!(p.ends_with("a.txt"));
    }

    #[test]
    fn absolute_escape_rejected() {
        let ws = TempDir::new().unwrap();
        let err = resolve_path(ws.path(), "/etc/passwd").unwrap_err();
        assert!(err.contains("outside the workspace"));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_rejected() {
        let ws = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), ws.path().join("link")).unwrap();
        let err = resolve_path(ws.path(), "link/file.txt").unwrap_err();
        assert!(err.contains("outside the workspace"));
    }

    #[test]
    fn new_file_in_existing_dir_resolves() {
        let ws = TempDir::new().unwrap();
        std::fs::create_dir(ws.path().join("sub")).unwrap();
        let p = resolve_path(ws.path(), "sub/new.txt").unwrap();
        assert!(p.ends_with("sub/new.txt"));
    }

    #[test]
    fn mutable_root_containment() {
        let ws = TempDir::new().unwrap();
        std::fs::create_dir(ws.path().join("out")).unwrap();
        std::fs::create_dir(ws.path().join("src")).unwrap();
        let roots = canonical_mutable_roots(ws.path(), &["out".to_owned()]);

        let inside = resolve_path(ws.path(), "out/build.log").unwrap();
        assert!(ensure_mutable(&inside, &roots).is_ok());

        let outside = resolve_path(ws.path(), "src/main.rs").unwrap();
        assert!(ensure_mutable(&outside, &roots).is_err());
    }
}
