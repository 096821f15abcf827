//! Sandboxing of caller-supplied paths.
//!
//! Every path a client sends is interpreted relative to the storage root. Resolution is pure
//! path arithmetic: the raw path is joined onto the root, `.` and `..` segments are collapsed
//! lexically, and the result is refused if it leaves the root, denotes the root itself, or
//! names a file with characters the platform cannot store. Nothing here touches the filesystem;
//! existence checks belong to the callers that need them.

use crate::constants::INVALID_NAME_CHARS;
use crate::error::PathError;
use std::path::{Component, Path, PathBuf};

/// A path that has been resolved beneath the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoragePath {
    absolute: PathBuf,
    relative: PathBuf,
}

impl StoragePath {
    /// Absolute location on disk.
    pub fn absolute(&self) -> &Path {
        &self.absolute
    }

    /// Location relative to the storage root. Empty only for the root itself.
    pub fn relative(&self) -> &Path {
        &self.relative
    }

    pub fn is_root(&self) -> bool {
        self.relative.as_os_str().is_empty()
    }
}

impl std::fmt::Display for StoragePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.relative.display())
    }
}

/// Resolves raw client paths against a fixed storage root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// `root` must already be absolute and normalised; see [`crate::CoreConfig::new`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `raw` to a path strictly beneath the storage root.
    ///
    /// # Errors
    ///
    /// - [`PathError::Empty`] if the path collapses to the root itself
    /// - [`PathError::Traversal`] if the path climbs above the root
    /// - [`PathError::InvalidCharacter`] if the final segment contains a disallowed character
    pub fn resolve(&self, raw: &str) -> Result<StoragePath, PathError> {
        let resolved = self.resolve_inner(raw)?;
        if resolved.is_root() {
            return Err(PathError::Empty);
        }
        Ok(resolved)
    }

    /// Like [`Self::resolve`] but accepts the storage root itself.
    ///
    /// Only directory listings use this; an empty string still counts as missing input.
    pub fn resolve_directory(&self, raw: &str) -> Result<StoragePath, PathError> {
        if raw.trim().is_empty() {
            return Err(PathError::Empty);
        }
        self.resolve_inner(raw)
    }

    fn resolve_inner(&self, raw: &str) -> Result<StoragePath, PathError> {
        // Leading separators and drive prefixes are dropped so that "/etc" means "<root>/etc".
        let joined = Path::new(raw)
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .fold(self.root.clone(), |acc, c| acc.join(c.as_os_str()));
        let absolute = clean(&joined);

        let relative = match absolute.strip_prefix(&self.root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => return Err(PathError::Traversal(raw.to_string())),
        };

        if let Some(name) = relative.file_name().and_then(|n| n.to_str()) {
            if let Some(character) = name.chars().find(|c| INVALID_NAME_CHARS.contains(c)) {
                return Err(PathError::InvalidCharacter {
                    path: raw.to_string(),
                    character,
                });
            }
        }

        Ok(StoragePath { absolute, relative })
    }
}

/// Lexically collapses `.` and `..` segments. `..` at the filesystem root stays at the root.
fn clean(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().map(|c| c.as_os_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PathResolver {
        PathResolver::new("/srv/storage")
    }

    #[test]
    fn test_resolve_valid_paths() {
        let r = resolver();
        for raw in [
            "coolDir/das",
            "dir/subdir/file.txt",
            "asd  asda",
            "./a/./b.txt",
            "a/b/../c.txt",
        ] {
            let resolved = r.resolve(raw).unwrap();
            assert!(resolved.absolute().starts_with(r.root()), "{raw}");
            assert_ne!(resolved.absolute(), r.root());
        }
    }

    #[test]
    fn test_resolve_collapses_segments() {
        let resolved = resolver().resolve("a/b/../c.txt").unwrap();
        assert_eq!(resolved.absolute(), Path::new("/srv/storage/a/c.txt"));
        assert_eq!(resolved.relative(), Path::new("a/c.txt"));
    }

    #[test]
    fn test_resolve_absolute_input_stays_inside_root() {
        let resolved = resolver().resolve("/etc/passwd").unwrap();
        assert_eq!(resolved.absolute(), Path::new("/srv/storage/etc/passwd"));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let r = resolver();
        for raw in ["../../etc/passwd", "../asdas", "/asdas/../../..", "a/../../b"] {
            assert!(
                matches!(r.resolve(raw), Err(PathError::Traversal(_))),
                "{raw}"
            );
        }
    }

    #[test]
    fn test_resolve_rejects_sibling_with_shared_prefix() {
        assert!(matches!(
            resolver().resolve("../storage2/file"),
            Err(PathError::Traversal(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_root() {
        let r = resolver();
        for raw in ["", ".", "/", "a/..", "./"] {
            assert_eq!(r.resolve(raw), Err(PathError::Empty), "{raw:?}");
        }
    }

    #[test]
    fn test_resolve_rejects_invalid_characters() {
        let r = resolver();
        for raw in ["dir/ad|adawd", "what?.txt", "star*", "<tag>", "quote\"d"] {
            assert!(
                matches!(r.resolve(raw), Err(PathError::InvalidCharacter { .. })),
                "{raw}"
            );
        }
    }

    #[test]
    fn test_resolve_only_checks_final_segment() {
        assert!(resolver().resolve("we|ird/plain.txt").is_ok());
    }

    #[test]
    fn test_resolve_directory_accepts_root() {
        let r = resolver();
        let root = r.resolve_directory(".").unwrap();
        assert!(root.is_root());
        assert_eq!(root.absolute(), r.root());
        assert_eq!(r.resolve_directory(""), Err(PathError::Empty));
        assert!(matches!(
            r.resolve_directory(".."),
            Err(PathError::Traversal(_))
        ));
    }
}
