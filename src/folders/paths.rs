//! Canonical folder path resolution

use std::io;
use std::path::{Component, Path, PathBuf};

/// Resolve `path` to the canonical absolute form used as a registry key
///
/// Relative paths are taken against the current directory. Existing paths
/// are canonicalized (symlinks resolved). For paths that no longer exist,
/// `.` and `..` are removed lexically and the longest existing ancestor is
/// canonicalized, so a deleted folder still maps to the key it was indexed
/// under.
pub fn normalize_folder_path(path: impl AsRef<Path>) -> io::Result<String> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "folder path is empty",
        ));
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let resolved = match std::fs::canonicalize(&absolute) {
        Ok(canonical) => canonical,
        Err(_) => resolve_missing(&absolute),
    };

    Ok(resolved.to_string_lossy().into_owned())
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn resolve_missing(absolute: &Path) -> PathBuf {
    let lexical = lexical_normalize(absolute);

    let mut existing = lexical.as_path();
    let mut missing = Vec::new();

    loop {
        if let Ok(canonical) = std::fs::canonicalize(existing) {
            let mut resolved = canonical;
            for name in missing.iter().rev() {
                resolved.push(name);
            }
            return resolved;
        }

        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return lexical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_existing_path_is_canonical() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let canonical = std::fs::canonicalize(&nested).unwrap();
        let dotted = dir.path().join("a").join("..").join("a").join(".").join("b");

        assert_eq!(
            normalize_folder_path(&dotted).unwrap(),
            canonical.to_string_lossy()
        );
    }

    #[test]
    fn test_missing_path_keeps_canonical_ancestor() {
        let dir = TempDir::new().unwrap();
        let canonical_root = std::fs::canonicalize(dir.path()).unwrap();

        let missing = dir.path().join("gone").join("..").join("gone").join("docs");
        let expected = canonical_root.join("gone").join("docs");

        assert_eq!(
            normalize_folder_path(&missing).unwrap(),
            expected.to_string_lossy()
        );
    }

    #[test]
    fn test_relative_path_resolves_against_cwd() {
        // cargo runs unit tests from the package root
        let expected = std::fs::canonicalize("src/folders").unwrap();

        assert_eq!(
            normalize_folder_path("./src/../src/folders").unwrap(),
            expected.to_string_lossy()
        );
        assert_eq!(
            normalize_folder_path("src/folders").unwrap(),
            expected.to_string_lossy()
        );
    }

    #[test]
    fn test_lexical_normalize() {
        assert_eq!(
            lexical_normalize(Path::new("/x/./y/../z")),
            PathBuf::from("/x/z")
        );
        assert_eq!(lexical_normalize(Path::new("/../a")), PathBuf::from("/a"));
    }

    #[test]
    fn test_empty_path_rejected() {
        assert!(normalize_folder_path("").is_err());
    }
}
