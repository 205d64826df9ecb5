//! File-backed primary document store.

use super::{PrimaryStore, Scan};
use crate::error::{IndexError, Result};
use crate::types::{Document, DocumentId, Version};
use crate::wal::WriteAheadLog;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Magic bytes for the document log.
const LOG_MAGIC: &[u8; 4] = b"DOC\0";

const LOG_FILE: &str = "documents.log";
const LOCK_FILE: &str = "LOCK";

/// Document store configuration.
#[derive(Clone, Debug)]
pub struct DocumentStoreConfig {
    /// Directory for the store.
    pub path: PathBuf,

    /// Store name (also names the store's fields map).
    pub name: String,

    /// fsync the log on every write.
    pub sync_on_write: bool,

    /// How long a write waits for the write lock before failing with
    /// `WriteTimeout`.
    pub write_timeout: Duration,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./documents"),
            name: "documents".to_string(),
            sync_on_write: true,
            write_timeout: Duration::from_secs(5),
            create_if_missing: true,
        }
    }
}

/// Operations recorded in the document log.
#[derive(Clone, Debug, Serialize, Deserialize)]
enum DocumentOp {
    Put { id: DocumentId, document: Document },
    Delete { id: DocumentId },
}

/// Primary store keeping documents in an ordered map, made durable by an
/// append-only operation log.
pub struct DocumentStore {
    name: String,

    path: PathBuf,

    write_timeout: Duration,

    /// Lock file for exclusive access.
    _lock_file: File,

    documents: RwLock<BTreeMap<DocumentId, Document>>,

    log: WriteAheadLog<DocumentOp>,

    /// Lock for write operations to keep log order and map order identical.
    write_lock: Mutex<()>,
}

impl DocumentStore {
    /// Open an existing store or create a new one.
    pub fn open(config: DocumentStoreConfig) -> Result<Self> {
        if !config.path.exists() {
            if !config.create_if_missing {
                return Err(IndexError::NotInitialized);
            }
            fs::create_dir_all(&config.path)?;
        }

        let lock_file = Self::acquire_lock(&config.path)?;

        let (log, ops) =
            WriteAheadLog::open(config.path.join(LOG_FILE), LOG_MAGIC, config.sync_on_write)?;

        let mut documents = BTreeMap::new();
        for entry in ops {
            match entry.body {
                DocumentOp::Put { id, document } => {
                    documents.insert(id, document);
                }
                DocumentOp::Delete { id } => {
                    documents.remove(&id);
                }
            }
        }

        tracing::debug!(
            name = %config.name,
            documents = documents.len(),
            "opened document store"
        );

        Ok(Self {
            name: config.name,
            path: config.path,
            write_timeout: config.write_timeout,
            _lock_file: lock_file,
            documents: RwLock::new(documents),
            log,
            write_lock: Mutex::new(()),
        })
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// All ids, in order.
    pub fn ids(&self) -> Vec<DocumentId> {
        self.documents.read().keys().copied().collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join(LOCK_FILE))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| IndexError::Locked)?;

        Ok(lock_file)
    }
}

impl PrimaryStore for DocumentStore {
    fn read(&self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self.documents.read().get(&id).cloned())
    }

    fn write(&self, id: DocumentId, document: &Document) -> Result<Version> {
        let _lock = self
            .write_lock
            .try_lock_for(self.write_timeout)
            .ok_or(IndexError::WriteTimeout(id))?;

        self.log.append(&DocumentOp::Put {
            id,
            document: document.clone(),
        })?;
        self.documents.write().insert(id, document.clone());

        Ok(document.version())
    }

    fn delete(&self, id: DocumentId) -> Result<()> {
        let _lock = self.write_lock.lock();

        if !self.documents.read().contains_key(&id) {
            return Ok(());
        }
        self.log.append(&DocumentOp::Delete { id })?;
        self.documents.write().remove(&id);
        Ok(())
    }

    fn scan(&self, start: DocumentId) -> Result<Scan<'_>> {
        Ok(Scan::new(self, start, self.ids()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldKind;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> DocumentStoreConfig {
        DocumentStoreConfig {
            path: dir.path().join("docs"),
            name: "JobDBTest".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_write_read_delete() {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::open(test_config(&dir)).unwrap();

        let doc = Document::new("Rob", "SDE", "SaaS");
        assert_eq!(store.write(DocumentId(0), &doc).unwrap(), Version(1));
        assert_eq!(store.read(DocumentId(0)).unwrap(), Some(doc));

        store.delete(DocumentId(0)).unwrap();
        assert_eq!(store.read(DocumentId(0)).unwrap(), None);

        // Deleting again is a no-op
        store.delete(DocumentId(0)).unwrap();
    }

    #[test]
    fn test_write_returns_stored_version() {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::open(test_config(&dir)).unwrap();

        let mut doc = Document::new("Rob", "SDE", "SaaS");
        store.write(DocumentId(0), &doc).unwrap();
        doc.set_field(FieldKind::JobTitle, "Coder");

        assert_eq!(store.write(DocumentId(0), &doc).unwrap(), Version(2));
    }

    #[test]
    fn test_reopen_replays_log() {
        let dir = TempDir::new().unwrap();

        {
            let store = DocumentStore::open(test_config(&dir)).unwrap();
            store
                .write(DocumentId(1), &Document::new("Adam", "SDE", "SaaS"))
                .unwrap();
            store
                .write(DocumentId(2), &Document::new("Heather", "Manager", "Aviation"))
                .unwrap();
            store.delete(DocumentId(1)).unwrap();
        }

        let store = DocumentStore::open(test_config(&dir)).unwrap();
        assert_eq!(store.ids(), vec![DocumentId(2)]);
        assert_eq!(
            store.read(DocumentId(2)).unwrap().unwrap().job_title(),
            "Manager"
        );
    }

    #[test]
    fn test_scan_is_circular_and_finite() {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::open(test_config(&dir)).unwrap();

        for id in [2, 5, 9, 12] {
            store
                .write(DocumentId(id), &Document::new("n", "j", "i"))
                .unwrap();
        }

        // Start id doesn't need to exist
        let ids: Vec<u64> = store
            .scan(DocumentId(6))
            .unwrap()
            .map(|r| r.unwrap().0 .0)
            .collect();
        assert_eq!(ids, vec![9, 12, 2, 5]);

        // Past the end wraps to the start
        let ids: Vec<u64> = store
            .scan(DocumentId(100))
            .unwrap()
            .map(|r| r.unwrap().0 .0)
            .collect();
        assert_eq!(ids, vec![2, 5, 9, 12]);
    }

    #[test]
    fn test_scan_ignores_documents_added_during_scan() {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::open(test_config(&dir)).unwrap();

        for id in 0..3 {
            store
                .write(DocumentId(id), &Document::new("n", "j", "i"))
                .unwrap();
        }

        let mut seen = 0;
        for (i, item) in store.scan(DocumentId(0)).unwrap().enumerate() {
            item.unwrap();
            seen += 1;
            store
                .write(DocumentId(100 + i as u64), &Document::new("n", "j", "i"))
                .unwrap();
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_scan_yields_none_for_deleted_documents() {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::open(test_config(&dir)).unwrap();
        store
            .write(DocumentId(0), &Document::new("n", "j", "i"))
            .unwrap();
        store
            .write(DocumentId(1), &Document::new("n", "j", "i"))
            .unwrap();

        let mut scan = store.scan(DocumentId(0)).unwrap();
        store.delete(DocumentId(1)).unwrap();

        assert!(scan.next().unwrap().unwrap().1.is_some());
        assert_eq!(scan.next().unwrap().unwrap(), (DocumentId(1), None));
        assert!(scan.next().is_none());
    }

    #[test]
    fn test_concurrent_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let _store = DocumentStore::open(test_config(&dir)).unwrap();

        let result = DocumentStore::open(test_config(&dir));
        assert!(matches!(result, Err(IndexError::Locked)));
    }
}
