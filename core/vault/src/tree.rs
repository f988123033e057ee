//! Cached directory index.
//!
//! A session may snapshot the whole vault once at login and answer browse
//! requests from memory afterwards. The snapshot is authoritative for the
//! session: a path missing from it is `NotFound`, never a live lookup.

use serde::{Deserialize, Serialize};
use tracing::debug;

use vaultgate_common::{DirEntry, Error, Result, VaultPath};

/// One node of the index tree.
///
/// Children are kept sorted by name, which is both the listing order and
/// what makes sibling lookups a binary search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<IndexEntry>,
}

impl IndexEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size: Some(size),
            children: Vec::new(),
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: None,
            children: Vec::new(),
        }
    }

    fn position(&self, name: &str) -> std::result::Result<usize, usize> {
        self.children
            .binary_search_by(|child| child.name.as_str().cmp(name))
    }

    /// Get child by name.
    pub fn child(&self, name: &str) -> Option<&IndexEntry> {
        self.position(name).ok().map(|i| &self.children[i])
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut IndexEntry> {
        match self.position(name) {
            Ok(i) => Some(&mut self.children[i]),
            Err(_) => None,
        }
    }

    /// Insert a child, replacing any sibling with the same name.
    fn upsert_child(&mut self, entry: IndexEntry) {
        match self.position(&entry.name) {
            Ok(i) => self.children[i] = entry,
            Err(i) => self.children.insert(i, entry),
        }
    }

    fn count(&self) -> usize {
        self.children.iter().map(|c| 1 + c.count()).sum()
    }
}

/// Directory-only view of the index, as shown in a navigation sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryNode {
    pub path: String,
    pub children: Vec<DirectoryNode>,
}

/// Index tree rooted at the vault root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultIndex {
    root: IndexEntry,
}

impl VaultIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            root: IndexEntry::directory(""),
        }
    }

    /// Build an index by walking the vault with `list`, starting at the root.
    ///
    /// Every directory is listed exactly once, so the cost is proportional to
    /// the number of entries.
    pub fn build<F>(mut list: F) -> Result<Self>
    where
        F: FnMut(&VaultPath) -> Result<Vec<DirEntry>>,
    {
        let mut index = Self::new();
        let mut pending = vec![VaultPath::root()];

        while let Some(dir) = pending.pop() {
            let node = index.get_mut(&dir)?;
            for entry in list(&dir)? {
                if entry.is_dir {
                    pending.push(dir.join(&entry.name)?);
                    node.upsert_child(IndexEntry::directory(entry.name));
                } else {
                    node.upsert_child(IndexEntry::file(entry.name, entry.size.unwrap_or(0)));
                }
            }
        }

        debug!(entries = index.len(), "Built directory index");
        Ok(index)
    }

    /// Navigate to an entry by path.
    pub fn get(&self, path: &VaultPath) -> Result<&IndexEntry> {
        let mut current = &self.root;
        for component in path.components() {
            current = current
                .child(component)
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
        }
        Ok(current)
    }

    fn get_mut(&mut self, path: &VaultPath) -> Result<&mut IndexEntry> {
        let mut current = &mut self.root;
        for component in path.components() {
            current = current
                .child_mut(component)
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
        }
        Ok(current)
    }

    fn get_dir_mut(&mut self, path: &VaultPath) -> Result<&mut IndexEntry> {
        let entry = self.get_mut(path)?;
        if !entry.is_dir {
            return Err(Error::NotFound(path.to_string()));
        }
        Ok(entry)
    }

    /// List a directory from the index.
    ///
    /// # Errors
    /// - `NotFound` if the path is missing or names a file
    pub fn list(&self, path: &VaultPath) -> Result<Vec<DirEntry>> {
        let node = self.get(path)?;
        if !node.is_dir {
            return Err(Error::NotFound(path.to_string()));
        }

        Ok(node
            .children
            .iter()
            .map(|child| match child.size {
                Some(size) if !child.is_dir => DirEntry::file(path, child.name.clone(), size),
                _ => DirEntry::directory(path, child.name.clone()),
            })
            .collect())
    }

    /// Record a file at `path`, replacing any existing file entry.
    pub fn insert_file(&mut self, path: &VaultPath, size: u64) -> Result<()> {
        let (parent, name) = split(path)?;
        self.get_dir_mut(&parent)?
            .upsert_child(IndexEntry::file(name, size));
        Ok(())
    }

    /// Record an empty directory at `path`.
    pub fn insert_directory(&mut self, path: &VaultPath) -> Result<()> {
        let (parent, name) = split(path)?;
        let parent = self.get_dir_mut(&parent)?;
        if parent.child(&name).is_none() {
            parent.upsert_child(IndexEntry::directory(name));
        }
        Ok(())
    }

    /// Remove the entry at `path` and return it.
    pub fn remove(&mut self, path: &VaultPath) -> Result<IndexEntry> {
        let (parent, name) = split(path)?;
        let parent = self.get_dir_mut(&parent)?;
        match parent.position(&name) {
            Ok(i) => Ok(parent.children.remove(i)),
            Err(_) => Err(Error::NotFound(path.to_string())),
        }
    }

    /// Move the entry at `source` into `destination_dir`, keeping its name.
    pub fn move_entry(&mut self, source: &VaultPath, destination_dir: &VaultPath) -> Result<()> {
        // Check the destination first so a failed move leaves the tree intact.
        self.get_dir_mut(destination_dir)?;
        let entry = self.remove(source)?;
        self.get_dir_mut(destination_dir)?.upsert_child(entry);
        Ok(())
    }

    /// Total number of entries below the root.
    pub fn len(&self) -> usize {
        self.root.count()
    }

    /// Check if the vault is empty.
    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Directory-only tree rooted at `/`.
    pub fn directories(&self) -> DirectoryNode {
        fn walk(entry: &IndexEntry, path: &VaultPath) -> DirectoryNode {
            let children = entry
                .children
                .iter()
                .filter(|child| child.is_dir)
                .filter_map(|child| {
                    let child_path = path.join(&child.name).ok()?;
                    Some(walk(child, &child_path))
                })
                .collect();
            DirectoryNode {
                path: path.to_string(),
                children,
            }
        }
        walk(&self.root, &VaultPath::root())
    }
}

impl Default for VaultIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn split(path: &VaultPath) -> Result<(VaultPath, String)> {
    match (path.parent(), path.name()) {
        (Some(parent), Some(name)) => Ok((parent, name.to_string())),
        _ => Err(Error::InvalidInput("Operation not allowed on the root".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn p(path: &str) -> VaultPath {
        VaultPath::parse(path).unwrap()
    }

    fn fixture() -> HashMap<String, Vec<DirEntry>> {
        let root = VaultPath::root();
        let docs = p("/docs");
        let mut dirs = HashMap::new();
        dirs.insert(
            "/".to_string(),
            vec![
                DirEntry::directory(&root, "docs"),
                DirEntry::file(&root, "secret.txt", 12),
            ],
        );
        dirs.insert(
            "/docs".to_string(),
            vec![
                DirEntry::file(&docs, "b.md", 2),
                DirEntry::file(&docs, "a.md", 1),
                DirEntry::directory(&docs, "empty"),
            ],
        );
        dirs.insert("/docs/empty".to_string(), Vec::new());
        dirs
    }

    fn build() -> VaultIndex {
        let dirs = fixture();
        VaultIndex::build(|path| {
            dirs.get(&path.to_string())
                .cloned()
                .ok_or_else(|| Error::NotFound(path.to_string()))
        })
        .unwrap()
    }

    #[test]
    fn test_build_lists_match_source() {
        let index = build();
        assert_eq!(index.len(), 5);

        let mut expected = fixture().remove("/docs").unwrap();
        DirEntry::sort_listing(&mut expected);
        assert_eq!(index.list(&p("/docs")).unwrap(), expected);
        assert_eq!(index.list(&p("/docs/empty")).unwrap(), Vec::new());
    }

    #[test]
    fn test_missing_and_file_paths_are_not_found() {
        let index = build();
        assert!(matches!(index.list(&p("/nonexistent")), Err(Error::NotFound(_))));
        assert!(matches!(index.list(&p("/secret.txt")), Err(Error::NotFound(_))));
        assert!(matches!(index.get(&p("/docs/zzz")), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_build_propagates_list_errors() {
        let result = VaultIndex::build(|_| Err(Error::Crypto("boom".to_string())));
        assert!(matches!(result, Err(Error::Crypto(_))));
    }

    #[test]
    fn test_insert_file_keeps_order_and_replaces() {
        let mut index = build();
        index.insert_file(&p("/docs/0.md"), 9).unwrap();
        index.insert_file(&p("/docs/a.md"), 100).unwrap();

        let names: Vec<_> = index
            .list(&p("/docs"))
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.size))
            .collect();
        assert_eq!(
            names,
            vec![
                ("0.md".to_string(), Some(9)),
                ("a.md".to_string(), Some(100)),
                ("b.md".to_string(), Some(2)),
                ("empty".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_insert_into_missing_parent_fails() {
        let mut index = build();
        assert!(matches!(
            index.insert_file(&p("/nope/x"), 1),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            index.insert_directory(&p("/secret.txt/x")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_move_entry() {
        let mut index = build();
        index.move_entry(&p("/secret.txt"), &p("/docs/empty")).unwrap();

        assert!(index.get(&p("/secret.txt")).is_err());
        assert_eq!(
            index.get(&p("/docs/empty/secret.txt")).unwrap().size,
            Some(12)
        );

        // Failed move leaves the source in place.
        assert!(index.move_entry(&p("/docs/a.md"), &p("/missing")).is_err());
        assert!(index.get(&p("/docs/a.md")).is_ok());
    }

    #[test]
    fn test_directories_view() {
        let mut index = build();
        index.insert_directory(&p("/docs/empty/deep")).unwrap();

        let tree = index.directories();
        assert_eq!(tree.path, "/");
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].path, "/docs");
        assert_eq!(tree.children[0].children[0].path, "/docs/empty");
        assert_eq!(
            tree.children[0].children[0].children[0].path,
            "/docs/empty/deep"
        );
    }

    #[test]
    fn test_root_operations_rejected() {
        let mut index = VaultIndex::new();
        assert!(index.is_empty());
        assert!(matches!(
            index.remove(&VaultPath::root()),
            Err(Error::InvalidInput(_))
        ));
    }
}
