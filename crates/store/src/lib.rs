//! Durable key-share storage.
//!
//! Backed by a `sled::Db`, opened once at startup. Two named trees are kept
//! open for the lifetime of the store: `keys` holds the root token and the
//! encrypted unseal shares; `users` is reserved, carried over from the
//! original layout, and currently unused by any operation in this crate.

use std::path::Path;

pub const KEYS_TREE: &str = "keys";
pub const USERS_TREE: &str = "users";

pub const ROOT_TOKEN_KEY: &str = "token";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,

    #[error("storage I/O error: {0}")]
    Io(#[from] sled::Error),

    #[error("stored value is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// A durable, namespaced key-value store.
pub trait StoreBackend: Send + Sync {
    fn put(&self, tree: &str, key: &str, value: &str) -> Result<(), StoreError>;
    fn get(&self, tree: &str, key: &str) -> Result<String, StoreError>;
    fn contains(&self, tree: &str, key: &str) -> Result<bool, StoreError>;
}

/// Share index keys, `"0"`..`"N-1"`, matching the original layout's
/// string-encoded integer keys.
pub fn share_key(index: usize) -> String {
    index.to_string()
}

pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open (creating if absent) the store at `path`. Parent directories
    /// are created with mode 0750 on unix.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Io(sled::Error::Io(std::io::Error::new(e.kind(), e.to_string())))
                })?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    if let Ok(metadata) = std::fs::metadata(parent) {
                        let mut perms = metadata.permissions();
                        perms.set_mode(0o750);
                        let _ = std::fs::set_permissions(parent, perms);
                    }
                }
            }
        }

        let db = sled::open(path)?;
        db.open_tree(KEYS_TREE)?;
        db.open_tree(USERS_TREE)?;
        Ok(Self { db })
    }

    fn tree(&self, name: &str) -> Result<sled::Tree, StoreError> {
        Ok(self.db.open_tree(name)?)
    }
}

impl StoreBackend for SledStore {
    fn put(&self, tree: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let tree = self.tree(tree)?;
        tree.insert(key.as_bytes(), value.as_bytes())?;
        tree.flush()?;
        Ok(())
    }

    fn get(&self, tree: &str, key: &str) -> Result<String, StoreError> {
        let tree = self.tree(tree)?;
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(String::from_utf8(bytes.to_vec())?),
            None => Err(StoreError::NotFound),
        }
    }

    fn contains(&self, tree: &str, key: &str) -> Result<bool, StoreError> {
        let tree = self.tree(tree)?;
        Ok(tree.contains_key(key.as_bytes())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (SledStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(&dir.path().join("bolt.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn put_then_get_roundtrips() {
        let (store, _dir) = open_temp();
        store.put(KEYS_TREE, "0", "share-zero").unwrap();
        assert_eq!(store.get(KEYS_TREE, "0").unwrap(), "share-zero");
    }

    #[test]
    fn missing_key_is_not_found() {
        let (store, _dir) = open_temp();
        let err = store.get(KEYS_TREE, "missing").unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn users_tree_is_independent_of_keys_tree() {
        let (store, _dir) = open_temp();
        store.put(KEYS_TREE, "token", "root-token").unwrap();
        assert!(!store.contains(USERS_TREE, "token").unwrap());
    }

    #[test]
    fn share_key_matches_string_encoded_index() {
        assert_eq!(share_key(0), "0");
        assert_eq!(share_key(11), "11");
    }

    #[test]
    fn reopening_store_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bolt.db");
        {
            let store = SledStore::open(&path).unwrap();
            store.put(KEYS_TREE, "token", "persisted").unwrap();
        }
        let store = SledStore::open(&path).unwrap();
        assert_eq!(store.get(KEYS_TREE, "token").unwrap(), "persisted");
    }
}
