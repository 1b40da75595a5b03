//! Small metadata store for derived-data bookkeeping
//!
//! Derived structures (secondary indexes) record scalar markers here, next to
//! their own data, so a restart can tell whether they are still current.
//! Entries are addressed by (scope, key); the scope is usually the name of
//! the collection the marker belongs to.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use strata_core::{StrataError, StrataResult};

/// Scalar metadata addressed by (scope, key)
pub trait MetaStore: Send + Sync {
    /// Read a marker, None if never written
    fn get_u64(&self, scope: &str, key: &str) -> StrataResult<Option<u64>>;

    /// Write a marker; durable once this returns for persistent stores
    fn put_u64(&self, scope: &str, key: &str, value: u64) -> StrataResult<()>;
}

/// Process-local metadata, lost on exit
#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    entries: Mutex<HashMap<(String, String), u64>>,
}

impl MemoryMetaStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaStore for MemoryMetaStore {
    fn get_u64(&self, scope: &str, key: &str) -> StrataResult<Option<u64>> {
        Ok(self
            .entries
            .lock()
            .get(&(scope.to_string(), key.to_string()))
            .copied())
    }

    fn put_u64(&self, scope: &str, key: &str, value: u64) -> StrataResult<()> {
        self.entries
            .lock()
            .insert((scope.to_string(), key.to_string()), value);
        Ok(())
    }
}

type Document = BTreeMap<String, BTreeMap<String, u64>>;

/// Metadata persisted as a JSON document
///
/// Every `put_u64` rewrites the document through a temporary file and an
/// atomic rename, so a crash leaves either the old or the new document.
#[derive(Debug)]
pub struct FileMetaStore {
    path: PathBuf,
    entries: Mutex<Document>,
}

impl FileMetaStore {
    /// Open the store at `path`, loading it if it exists
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> StrataResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|e| {
                StrataError::Serialization(format!(
                    "Failed to parse meta store '{}': {}",
                    path.display(),
                    e
                ))
            })?
        } else {
            Document::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &Document) -> StrataResult<()> {
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| StrataError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl MetaStore for FileMetaStore {
    fn get_u64(&self, scope: &str, key: &str) -> StrataResult<Option<u64>> {
        Ok(self
            .entries
            .lock()
            .get(scope)
            .and_then(|scoped| scoped.get(key))
            .copied())
    }

    fn put_u64(&self, scope: &str, key: &str, value: u64) -> StrataResult<()> {
        let mut entries = self.entries.lock();
        let previous = entries
            .entry(scope.to_string())
            .or_default()
            .insert(key.to_string(), value);
        if let Err(e) = self.persist(&entries) {
            // Keep memory and disk in agreement
            let scoped = entries.entry(scope.to_string()).or_default();
            match previous {
                Some(old) => {
                    scoped.insert(key.to_string(), old);
                }
                None => {
                    scoped.remove(key);
                }
            }
            return Err(e);
        }
        Ok(())
    }
}
