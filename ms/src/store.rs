//! Core namespace store implementation

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{LOCK_FILE, STATE_FILE};

/// Errors from namespace operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid namespace id: {0:?}")]
    InvalidId(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state document at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode value for key {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Which family of resources a namespace belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamespaceKind {
    Server,
    Aggregator,
    Device,
}

impl NamespaceKind {
    /// Directory name under the storage root
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Server => "servers",
            Self::Aggregator => "aggregators",
            Self::Device => "devices",
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// On-disk key/value document of a namespace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDocument {
    /// Last write (unix ms)
    #[serde(rename = "updated-at")]
    pub updated_at: i64,
    pub entries: BTreeMap<String, serde_json::Value>,
}

/// Shared root under which all namespaces live
#[derive(Debug, Clone)]
pub struct StorageRoot {
    base_path: PathBuf,
}

impl StorageRoot {
    /// Open or create a storage root at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).map_err(|e| StoreError::io(&base_path, e))?;
        debug!(?base_path, "Opened storage root");
        Ok(Self { base_path })
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    /// Address the namespace owned by `id`
    ///
    /// The directory is not created until the first write.
    pub fn namespace(&self, kind: NamespaceKind, id: &str) -> Result<Namespace, StoreError> {
        validate_id(id)?;
        Ok(Namespace {
            kind,
            id: id.to_string(),
            path: self.base_path.join(kind.dir_name()).join(id),
        })
    }

    /// List the ids that currently have a namespace directory
    pub fn list(&self, kind: NamespaceKind) -> Result<Vec<String>, StoreError> {
        let dir = self.base_path.join(kind.dir_name());
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            if entry.path().is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Ids become single path components; anything that could escape the
/// kind directory is refused.
pub fn validate_id(id: &str) -> Result<(), StoreError> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
        || Path::new(id).is_absolute();
    if invalid {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Storage scoped to exactly one resource
#[derive(Debug, Clone)]
pub struct Namespace {
    kind: NamespaceKind,
    id: String,
    path: PathBuf,
}

impl Namespace {
    pub fn kind(&self) -> NamespaceKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether anything has been persisted for this namespace
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read a single value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let doc = self.load()?;
        match doc.entries.get(key) {
            Some(value) => {
                let typed = serde_json::from_value(value.clone()).map_err(|source| StoreError::Corrupt {
                    path: self.state_path(),
                    source,
                })?;
                Ok(Some(typed))
            }
            None => Ok(None),
        }
    }

    /// Read a value, persisting `init()` first if it is absent
    pub fn get_or_insert_with<T, F>(&self, key: &str, init: F) -> Result<T, StoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        self.update(|doc| {
            if let Some(existing) = doc.entries.get(key)
                && let Ok(value) = serde_json::from_value::<T>(existing.clone())
            {
                return Ok(value);
            }
            let value = init();
            let encoded = serde_json::to_value(&value).map_err(|source| StoreError::Encode {
                key: key.to_string(),
                source,
            })?;
            doc.entries.insert(key.to_string(), encoded);
            Ok(value)
        })
    }

    /// Write a single value
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let encoded = serde_json::to_value(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.update(|doc| {
            doc.entries.insert(key.to_string(), encoded);
            Ok(())
        })
    }

    /// Remove a single value, returning whether it existed
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        if !self.exists() {
            return Ok(false);
        }
        self.update(|doc| Ok(doc.entries.remove(key).is_some()))
    }

    /// Drop every persisted value but keep the namespace itself
    pub fn clear(&self) -> Result<(), StoreError> {
        if !self.exists() {
            return Ok(());
        }
        self.update(|doc| {
            doc.entries.clear();
            Ok(())
        })?;
        info!(kind = %self.kind, id = %self.id, "Cleared namespace");
        Ok(())
    }

    /// Irreversibly erase this namespace and everything under it
    ///
    /// Returns false when there was nothing to erase.
    pub fn destroy(&self) -> Result<bool, StoreError> {
        if !self.exists() {
            debug!(path = ?self.path, "Namespace::destroy: nothing to erase");
            return Ok(false);
        }
        fs::remove_dir_all(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        info!(kind = %self.kind, id = %self.id, "Destroyed namespace");
        Ok(true)
    }

    /// Load the whole document (empty when nothing was written yet)
    pub fn load(&self) -> Result<StateDocument, StoreError> {
        let state_path = self.state_path();
        if !state_path.exists() {
            return Ok(StateDocument::default());
        }
        let content = fs::read_to_string(&state_path).map_err(|e| StoreError::io(&state_path, e))?;
        serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: state_path,
            source,
        })
    }

    fn state_path(&self) -> PathBuf {
        self.path.join(STATE_FILE)
    }

    /// Read-modify-write under the namespace lock; the document is replaced
    /// atomically through a temp file + rename.
    fn update<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut StateDocument) -> Result<T, StoreError>,
    {
        fs::create_dir_all(&self.path).map_err(|e| StoreError::io(&self.path, e))?;

        let lock_path = self.path.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| StoreError::io(&lock_path, e))?;
        lock.lock_exclusive().map_err(|e| StoreError::io(&lock_path, e))?;

        let mut doc = self.load()?;
        let result = f(&mut doc)?;
        doc.updated_at = chrono::Utc::now().timestamp_millis();

        let json = serde_json::to_string_pretty(&doc).map_err(|source| StoreError::Encode {
            key: STATE_FILE.to_string(),
            source,
        })?;
        let tmp_path = self.path.join(format!("{}.tmp", STATE_FILE));
        let mut tmp = File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.sync_all())
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, self.state_path()).map_err(|e| StoreError::io(&tmp_path, e))?;

        debug!(kind = %self.kind, id = %self.id, "Namespace::update: document written");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_and_get() {
        let temp = TempDir::new().unwrap();
        let root = StorageRoot::open(temp.path()).unwrap();
        let ns = root.namespace(NamespaceKind::Server, "server-1").unwrap();

        assert!(!ns.exists());
        assert_eq!(ns.get::<u32>("passcode").unwrap(), None);

        ns.set("passcode", &20202021u32).unwrap();
        assert!(ns.exists());
        assert_eq!(ns.get::<u32>("passcode").unwrap(), Some(20202021));
        assert!(ns.path().join(STATE_FILE).exists());
    }

    #[test]
    fn test_get_or_insert_with_keeps_first_value() {
        let temp = TempDir::new().unwrap();
        let root = StorageRoot::open(temp.path()).unwrap();
        let ns = root.namespace(NamespaceKind::Device, "lamp").unwrap();

        let first: u32 = ns.get_or_insert_with("passcode", || 1234).unwrap();
        let second: u32 = ns.get_or_insert_with("passcode", || 9999).unwrap();
        assert_eq!(first, 1234);
        assert_eq!(second, 1234);
    }

    #[test]
    fn test_clear_keeps_directory() {
        let temp = TempDir::new().unwrap();
        let root = StorageRoot::open(temp.path()).unwrap();
        let ns = root.namespace(NamespaceKind::Aggregator, "bridge").unwrap();

        ns.set("commissioned", &true).unwrap();
        ns.clear().unwrap();

        assert!(ns.exists());
        assert_eq!(ns.get::<bool>("commissioned").unwrap(), None);
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let root = StorageRoot::open(temp.path()).unwrap();
        let ns = root.namespace(NamespaceKind::Device, "lamp").unwrap();

        assert!(!ns.remove("missing").unwrap());
        ns.set("commissioned", &true).unwrap();
        assert!(ns.remove("commissioned").unwrap());
        assert!(!ns.remove("commissioned").unwrap());
    }

    #[test]
    fn test_destroy_leaves_siblings() {
        let temp = TempDir::new().unwrap();
        let root = StorageRoot::open(temp.path()).unwrap();

        let a = root.namespace(NamespaceKind::Server, "server-a").unwrap();
        let b = root.namespace(NamespaceKind::Server, "server-ab").unwrap();
        let other_kind = root.namespace(NamespaceKind::Aggregator, "server-a").unwrap();
        a.set("k", &1).unwrap();
        b.set("k", &2).unwrap();
        other_kind.set("k", &3).unwrap();

        assert!(a.destroy().unwrap());
        assert!(!a.exists());
        assert_eq!(b.get::<i32>("k").unwrap(), Some(2));
        assert_eq!(other_kind.get::<i32>("k").unwrap(), Some(3));

        // second destroy is a no-op
        assert!(!a.destroy().unwrap());
    }

    #[test]
    fn test_list() {
        let temp = TempDir::new().unwrap();
        let root = StorageRoot::open(temp.path()).unwrap();
        assert!(root.list(NamespaceKind::Device).unwrap().is_empty());

        for id in ["b", "a"] {
            root.namespace(NamespaceKind::Device, id).unwrap().set("k", &0).unwrap();
        }
        assert_eq!(root.list(NamespaceKind::Device).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_invalid_ids_rejected() {
        let temp = TempDir::new().unwrap();
        let root = StorageRoot::open(temp.path()).unwrap();

        for id in ["", ".", "..", "a/b", "a\\b", "/abs"] {
            assert!(
                matches!(root.namespace(NamespaceKind::Server, id), Err(StoreError::InvalidId(_))),
                "id {:?} should be rejected",
                id
            );
        }
    }

    #[test]
    fn test_corrupt_document_reported() {
        let temp = TempDir::new().unwrap();
        let root = StorageRoot::open(temp.path()).unwrap();
        let ns = root.namespace(NamespaceKind::Server, "s").unwrap();
        fs::create_dir_all(ns.path()).unwrap();
        fs::write(ns.path().join(STATE_FILE), "not json").unwrap();

        assert!(matches!(ns.get::<bool>("k"), Err(StoreError::Corrupt { .. })));
    }

    proptest! {
        #[test]
        fn prop_destroy_is_scoped(ids in proptest::collection::btree_set("[a-z0-9-]{1,8}", 2..6)) {
            let temp = TempDir::new().unwrap();
            let root = StorageRoot::open(temp.path()).unwrap();
            let namespaces: Vec<Namespace> = ids
                .iter()
                .map(|id| root.namespace(NamespaceKind::Server, id).unwrap())
                .collect();
            for ns in &namespaces {
                ns.set("owner", &ns.id().to_string()).unwrap();
            }

            let (victim, survivors) = namespaces.split_first().unwrap();
            victim.destroy().unwrap();

            prop_assert!(!victim.exists());
            for ns in survivors {
                prop_assert_eq!(ns.get::<String>("owner").unwrap(), Some(ns.id().to_string()));
            }
        }
    }
}
