//! Hierarchical key/value stores: flat string keys plus prefix enumeration.
//!
//! Keys use `/` as the path separator. Listing with a separator collapses
//! everything below the next separator into one `prefix/segment/` entry, the
//! way directory-style KV listings report sub-trees.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use usb_domain::storage::{StorageError, StorageResult};

use crate::errors::from_io_err;

pub const SEPARATOR: char = '/';

#[async_trait]
pub trait KvTree: Send + Sync {
    /// Short label used in logs and metrics.
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Removes every key starting with `prefix` and returns how many went.
    async fn delete_tree(&self, prefix: &str) -> StorageResult<u64>;

    /// Sorted keys starting with `prefix`, collapsed at `separator` when set.
    async fn keys(&self, prefix: &str, separator: Option<char>) -> StorageResult<Vec<String>>;
}

/// Collapses full keys into the entries a separator-aware listing reports.
pub fn collapse_keys<I>(prefix: &str, keys: I, separator: Option<char>) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut listed = BTreeSet::new();
    for key in keys {
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        match separator.and_then(|sep| rest.find(sep).map(|at| (sep, at))) {
            Some((sep, at)) => {
                listed.insert(format!("{prefix}{}{sep}", &rest[..at]));
            }
            None => {
                listed.insert(key);
            }
        }
    }
    listed.into_iter().collect()
}

fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.ends_with(SEPARATOR) {
        return Err(StorageError::Constraint(format!("invalid key `{key}`")));
    }
    Ok(())
}

fn poisoned(err: impl std::fmt::Display) -> StorageError {
    StorageError::Database(format!("tree lock poisoned: {err}"))
}

/// In-process tree kept in an ordered map.
#[derive(Debug, Default)]
pub struct MemoryTree {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvTree for MemoryTree {
    fn backend(&self) -> &'static str {
        "tree-memory"
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        validate_key(key)?;
        let mut data = self.data.write().map_err(poisoned)?;
        data.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut data = self.data.write().map_err(poisoned)?;
        Ok(data.remove(key).is_some())
    }

    async fn delete_tree(&self, prefix: &str) -> StorageResult<u64> {
        let mut data = self.data.write().map_err(poisoned)?;
        let doomed: Vec<String> = data
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            data.remove(key);
        }
        Ok(doomed.len() as u64)
    }

    async fn keys(&self, prefix: &str, separator: Option<char>) -> StorageResult<Vec<String>> {
        let data = self.data.read().map_err(poisoned)?;
        let matching = data
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone());
        Ok(collapse_keys(prefix, matching, separator))
    }
}

/// Tree persisted as a directory hierarchy: every key is a file path below
/// `root` and every sub-tree is a directory.
#[derive(Debug, Clone)]
pub struct FsTree {
    root: PathBuf,
}

impl FsTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let mut path = self.root.clone();
        for segment in key.split(SEPARATOR).filter(|segment| !segment.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(StorageError::Constraint(format!("invalid key `{key}`")));
            }
            path.push(segment);
        }
        Ok(path)
    }

    /// Every stored key below the directory that contains `prefix`.
    async fn walk(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let base = match prefix.rfind(SEPARATOR) {
            Some(at) => &prefix[..at],
            None => "",
        };
        let mut pending = vec![(self.path_for(base)?, base.to_string())];
        let mut keys = Vec::new();

        while let Some((dir, key_prefix)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err)
                    if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) =>
                {
                    continue
                }
                Err(err) => return Err(from_io_err(err)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(from_io_err)? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = if key_prefix.is_empty() {
                    name
                } else {
                    format!("{key_prefix}{SEPARATOR}{name}")
                };
                if entry.file_type().await.map_err(from_io_err)?.is_dir() {
                    pending.push((entry.path(), key));
                } else {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl KvTree for FsTree {
    fn backend(&self) -> &'static str {
        "tree-fs"
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_dir() => Ok(None),
                _ => Err(from_io_err(err)),
            },
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        validate_key(key)?;
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(from_io_err)?;
        }
        tokio::fs::write(&path, value).await.map_err(from_io_err)
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(from_io_err(err)),
        }
    }

    async fn delete_tree(&self, prefix: &str) -> StorageResult<u64> {
        let doomed: Vec<String> = self
            .walk(prefix)
            .await?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect();
        for key in &doomed {
            self.delete(key).await?;
        }
        if prefix.ends_with(SEPARATOR) {
            let dir = self.path_for(prefix)?;
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(from_io_err(err)),
            }
        }
        Ok(doomed.len() as u64)
    }

    async fn keys(&self, prefix: &str, separator: Option<char>) -> StorageResult<Vec<String>> {
        let keys = self.walk(prefix).await?;
        Ok(collapse_keys(prefix, keys, separator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(tree: &dyn KvTree) {
        for key in [
            "usb/api_version",
            "usb/instances/a/name",
            "usb/instances/a/dials/d1",
            "usb/instances/a/dials/d2",
            "usb/instances/b/name",
        ] {
            tree.put(key, key.as_bytes().to_vec()).await.unwrap();
        }
    }

    async fn exercise(tree: &dyn KvTree) {
        seed(tree).await;

        assert_eq!(
            tree.keys("usb/instances/", Some(SEPARATOR)).await.unwrap(),
            vec!["usb/instances/a/", "usb/instances/b/"]
        );
        assert_eq!(
            tree.keys("usb/", Some(SEPARATOR)).await.unwrap(),
            vec!["usb/api_version", "usb/instances/"]
        );
        assert_eq!(tree.keys("usb/instances/a/", None).await.unwrap().len(), 3);
        assert_eq!(
            tree.get("usb/instances/b/name").await.unwrap(),
            Some(b"usb/instances/b/name".to_vec())
        );
        assert_eq!(tree.get("usb/instances/a").await.unwrap(), None);

        assert_eq!(tree.delete_tree("usb/instances/a/").await.unwrap(), 3);
        assert_eq!(
            tree.keys("usb/instances/", Some(SEPARATOR)).await.unwrap(),
            vec!["usb/instances/b/"]
        );
        assert!(tree.delete("usb/instances/b/name").await.unwrap());
        assert!(!tree.delete("usb/instances/b/name").await.unwrap());
        assert!(tree.put("usb/instances/", Vec::new()).await.is_err());
    }

    #[test]
    fn collapse_groups_sub_trees() {
        let keys = vec![
            "p/x".to_string(),
            "p/y/1".to_string(),
            "p/y/2".to_string(),
            "q/z".to_string(),
        ];
        assert_eq!(collapse_keys("p/", keys.clone(), Some('/')), vec!["p/x", "p/y/"]);
        assert_eq!(collapse_keys("p/", keys, None).len(), 3);
    }

    #[tokio::test]
    async fn memory_tree_lists_and_deletes() {
        exercise(&MemoryTree::new()).await;
    }

    #[tokio::test]
    async fn fs_tree_lists_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let tree = FsTree::new(dir.path());
        exercise(&tree).await;
        assert!(!dir.path().join("usb/instances/a").exists());
    }

    #[tokio::test]
    async fn fs_tree_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let tree = FsTree::new(dir.path());
        assert!(tree.put("usb/../escape", b"x".to_vec()).await.is_err());
    }
}
