//! Path normalization.

use std::path::{Component, Path, PathBuf};

/// Resolve `path` to an absolute, traversal-free form.
///
/// Relative paths are joined onto `root`. `.` and `..` are resolved
/// lexically (`..` at the filesystem root stays there), then symlinks are
/// resolved on the longest prefix that exists on disk. The result never
/// contains `..`, so a later `starts_with` comparison cannot be escaped.
pub(crate) fn resolve(root: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    canonicalize_existing_prefix(&lexical_normalize(&joined))
}

/// Resolve `.` and `..` without touching the filesystem.
pub(crate) fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {},
            Component::ParentDir => {
                // `pop` refuses to remove the root, which is what we want.
                out.pop();
            },
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Canonicalize the deepest existing ancestor and re-append the rest.
fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut suffix: Vec<&std::ffi::OsStr> = Vec::new();
    let mut current = path;
    loop {
        if let Ok(canonical) = current.canonicalize() {
            let mut resolved = canonical;
            for part in suffix.iter().rev() {
                resolved.push(part);
            }
            return resolved;
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                suffix.push(name);
                current = parent;
            },
            _ => return path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexical_normalize() {
        assert_eq!(
            lexical_normalize(Path::new("/w/a/./b/../c")),
            PathBuf::from("/w/a/c")
        );
        assert_eq!(
            lexical_normalize(Path::new("/w/../../../etc/passwd")),
            PathBuf::from("/etc/passwd")
        );
    }

    #[test]
    fn test_resolve_relative_against_root() {
        let resolved = resolve(Path::new("/nonexistent-root"), Path::new("src/../lib.rs"));
        assert_eq!(resolved, PathBuf::from("/nonexistent-root/lib.rs"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_follows_symlinks_on_existing_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let resolved = resolve(dir.path(), Path::new("link/new-file.txt"));
        assert_eq!(
            resolved,
            real.canonicalize().unwrap().join("new-file.txt")
        );
    }
}
