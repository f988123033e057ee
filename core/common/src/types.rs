//! Common types used throughout VaultGate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

/// Unique identifier for a configured vault.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VaultId(String);

impl VaultId {
    /// Create a new VaultId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty or contains a path separator
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "VaultId cannot be empty".to_string(),
            ));
        }
        if id.contains('/') || id.contains('\\') {
            return Err(crate::Error::InvalidInput(
                "VaultId cannot contain separators".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VaultId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<VaultId> for String {
    fn from(id: VaultId) -> Self {
        id.0
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A vault from the static allowlist: its id and where its ciphertext lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultDescriptor {
    pub id: VaultId,
    pub path: PathBuf,
}

impl VaultDescriptor {
    pub fn new(id: VaultId, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }
}

/// A normalized absolute path within a vault.
///
/// Parsing resolves `.` and `..` lexically. A `..` that would climb above the
/// vault root is rejected, so a `VaultPath` can always be joined under a root
/// directory without escaping it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VaultPath {
    components: Vec<String>,
}

impl VaultPath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Parse a user-supplied path into a normalized VaultPath.
    ///
    /// Uses '/' as separator; a leading '/' is optional.
    ///
    /// # Errors
    /// - `PathTraversal` if the path climbs above the root or contains a
    ///   backslash or NUL byte
    pub fn parse(path: &str) -> crate::Result<Self> {
        let mut components: Vec<String> = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    if components.pop().is_none() {
                        return Err(crate::Error::PathTraversal(path.to_string()));
                    }
                }
                other => {
                    if other.contains('\\') || other.contains('\0') {
                        return Err(crate::Error::PathTraversal(path.to_string()));
                    }
                    components.push(other.to_string());
                }
            }
        }
        Ok(Self { components })
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the file/directory name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a single child name.
    ///
    /// # Errors
    /// - `InvalidInput` if `child` is empty, `.`/`..`, or contains a separator
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        validate_name(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Resolve this path under a filesystem root.
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut fs_path = root.to_path_buf();
        for component in &self.components {
            fs_path.push(component);
        }
        fs_path
    }

    /// Convert to a string representation.
    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("/{}", self.components.join("/"))
        }
    }
}

impl fmt::Display for VaultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}

/// Check that `name` is usable as a single directory entry name.
pub fn validate_name(name: &str) -> crate::Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(crate::Error::InvalidInput(format!(
            "'{}' is not a valid entry name",
            name
        )));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(crate::Error::InvalidInput(
            "Entry name cannot contain separators".to_string(),
        ));
    }
    Ok(())
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    /// Normalized absolute vault path of the entry.
    pub path: String,
    pub is_dir: bool,
    /// Plaintext size in bytes; `None` for directories.
    pub size: Option<u64>,
}

impl DirEntry {
    pub fn file(parent: &VaultPath, name: impl Into<String>, size: u64) -> Self {
        let name = name.into();
        Self {
            path: child_path_string(parent, &name),
            name,
            is_dir: false,
            size: Some(size),
        }
    }

    pub fn directory(parent: &VaultPath, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: child_path_string(parent, &name),
            name,
            is_dir: true,
            size: None,
        }
    }

    /// Sort a listing lexicographically by name, directories and files
    /// interleaved.
    pub fn sort_listing(entries: &mut [DirEntry]) {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

fn child_path_string(parent: &VaultPath, name: &str) -> String {
    if parent.is_root() {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent.to_string_path(), name)
    }
}

/// Passphrase wrapper that zeroizes on drop and never prints its contents.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Passphrase([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_vault_id_creation() {
        let id = VaultId::new("personal").unwrap();
        assert_eq!(id.as_str(), "personal");
    }

    #[test]
    fn test_vault_id_rejects_empty_and_separators() {
        assert!(VaultId::new("").is_err());
        assert!(VaultId::new("  ").is_err());
        assert!(VaultId::new("a/b").is_err());
    }

    #[test]
    fn test_vault_id_deserialize_validates() {
        let ok: VaultId = serde_json::from_str("\"work\"").unwrap();
        assert_eq!(ok.as_str(), "work");
        assert!(serde_json::from_str::<VaultId>("\"\"").is_err());
    }

    #[test]
    fn test_vault_path_root() {
        for raw in ["", "/", "//", "/./", "."] {
            let path = VaultPath::parse(raw).unwrap();
            assert!(path.is_root(), "{raw:?} should be root");
            assert_eq!(path.to_string_path(), "/");
        }
    }

    #[test]
    fn test_vault_path_parse_normalizes() {
        let path = VaultPath::parse("foo//bar/./baz/").unwrap();
        assert_eq!(path.components(), &["foo", "bar", "baz"]);
        assert_eq!(path.to_string_path(), "/foo/bar/baz");

        let path = VaultPath::parse("/foo/bar/../qux").unwrap();
        assert_eq!(path.to_string_path(), "/foo/qux");
    }

    #[test]
    fn test_vault_path_rejects_escape() {
        for raw in ["..", "../../etc/passwd", "/a/../../b", "/a/..\\..", "a\0b"] {
            let err = VaultPath::parse(raw).unwrap_err();
            assert!(
                matches!(err, crate::Error::PathTraversal(_)),
                "{raw:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_vault_path_join() {
        let path = VaultPath::root().join("foo").unwrap().join("bar").unwrap();
        assert_eq!(path.to_string_path(), "/foo/bar");
        assert!(path.join("..").is_err());
        assert!(path.join("a/b").is_err());
        assert!(path.join("").is_err());
    }

    #[test]
    fn test_vault_path_parent_and_name() {
        let path = VaultPath::parse("/foo/bar").unwrap();
        assert_eq!(path.name(), Some("bar"));
        assert_eq!(path.parent().unwrap().to_string_path(), "/foo");
        assert!(VaultPath::root().parent().is_none());
    }

    #[test]
    fn test_to_fs_path_stays_under_root() {
        let root = Path::new("/srv/mnt");
        let path = VaultPath::parse("/docs/../notes/a.txt").unwrap();
        assert_eq!(path.to_fs_path(root), Path::new("/srv/mnt/notes/a.txt"));
    }

    #[test]
    fn test_dir_entry_paths_and_sorting() {
        let docs = VaultPath::parse("/docs").unwrap();
        let mut entries = vec![
            DirEntry::file(&docs, "b.txt", 3),
            DirEntry::directory(&docs, "a"),
            DirEntry::file(&docs, "Z.md", 1),
        ];
        DirEntry::sort_listing(&mut entries);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Z.md", "a", "b.txt"]);
        assert_eq!(entries[1].path, "/docs/a");
        assert_eq!(DirEntry::file(&VaultPath::root(), "x", 0).path, "/x");
    }

    #[test]
    fn test_passphrase_debug_redacted() {
        let pass = Passphrase::new("correct-horse");
        assert_eq!(format!("{:?}", pass), "Passphrase([REDACTED])");
        assert_eq!(pass.as_bytes(), b"correct-horse");
    }

    proptest! {
        #[test]
        fn prop_parsed_path_never_contains_dot_segments(
            segments in proptest::collection::vec(
                prop_oneof![
                    Just("..".to_string()),
                    Just(".".to_string()),
                    Just(String::new()),
                    "[a-z]{1,6}",
                ],
                0..12,
            )
        ) {
            let raw = segments.join("/");
            if let Ok(path) = VaultPath::parse(&raw) {
                for component in path.components() {
                    prop_assert!(component != ".." && component != "." && !component.is_empty());
                }
            }
        }

        #[test]
        fn prop_leading_parent_segments_always_rejected(
            depth in 1usize..5,
            tail in "[a-z]{1,8}",
        ) {
            let raw = format!("{}{}", "../".repeat(depth), tail);
            prop_assert!(matches!(
                VaultPath::parse(&raw),
                Err(crate::Error::PathTraversal(_))
            ));
        }
    }
}
