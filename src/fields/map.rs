//! The fields map: persisted `value -> {document ids}` tables, one per indexed field.

use super::snapshot;
use crate::error::{IndexError, Result};
use crate::types::{DocumentId, FieldKind};
use crate::wal::WriteAheadLog;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Ids indexed under each value of one field.
pub type Table = HashMap<String, HashSet<DocumentId>>;

/// All tables, keyed by field kind.
pub type Tables = HashMap<FieldKind, Table>;

/// Magic bytes for the commit journal.
const JOURNAL_MAGIC: &[u8; 4] = b"FMJ\0";

const SNAPSHOT_FILE: &str = "tables.snap";
const JOURNAL_FILE: &str = "journal.wal";
const LOCK_FILE: &str = "LOCK";

/// Prefix of every fields map directory name.
pub const FIELDS_MAP_PREFIX: &str = "FieldsMap4";

/// Directory name of the fields map belonging to the primary store `store_name`.
pub fn fields_map_name(store_name: &str) -> String {
    format!("{}{}", FIELDS_MAP_PREFIX, store_name)
}

/// Fields map configuration.
#[derive(Clone, Debug)]
pub struct IndexConfig {
    /// Directory under which fields map directories are created.
    pub path: PathBuf,

    /// Journal entries after which the tables are checkpointed to the snapshot.
    /// Default: 1000
    pub checkpoint_every: usize,

    /// fsync the journal on every commit.
    pub sync_on_commit: bool,

    /// Whether to create the fields map if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./fieldsmap"),
            checkpoint_every: 1000,
            sync_on_commit: true,
            create_if_missing: true,
        }
    }
}

/// A single staged change to a table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexEdit {
    Add {
        field: FieldKind,
        value: String,
        id: DocumentId,
    },
    Remove {
        field: FieldKind,
        value: String,
        id: DocumentId,
    },
}

impl IndexEdit {
    fn apply(&self, tables: &mut Tables) {
        match self {
            IndexEdit::Add { field, value, id } => {
                tables
                    .entry(*field)
                    .or_default()
                    .entry(value.clone())
                    .or_default()
                    .insert(*id);
            }
            IndexEdit::Remove { field, value, id } => {
                // Emptied sets are kept
                if let Some(ids) = tables.get_mut(field).and_then(|t| t.get_mut(value)) {
                    ids.remove(id);
                }
            }
        }
    }
}

/// Persisted secondary index over one primary store.
///
/// Edits are grouped into [`Transaction`]s. A committed transaction is appended to
/// the journal as a single frame before it becomes visible, so after a crash it is
/// either fully replayed or not at all.
pub struct FieldsMap {
    /// Directory holding snapshot, journal and lock.
    dir: PathBuf,

    config: IndexConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    tables: RwLock<Tables>,

    journal: WriteAheadLog<Vec<IndexEdit>>,

    /// Serializes commits and checkpoints.
    commit_lock: Mutex<()>,
}

impl FieldsMap {
    /// Open (or create) the fields map for the primary store named `store_name`.
    pub fn open(config: IndexConfig, store_name: &str) -> Result<Self> {
        let dir = config.path.join(fields_map_name(store_name));

        if !dir.exists() {
            if !config.create_if_missing {
                return Err(IndexError::NotInitialized);
            }
            fs::create_dir_all(&dir)?;
        }

        let lock_file = Self::acquire_lock(&dir)?;

        let snapshot_path = dir.join(SNAPSHOT_FILE);
        let mut tables = if snapshot_path.exists() {
            snapshot::load(&snapshot_path)?
        } else {
            FieldKind::ALL.iter().map(|k| (*k, Table::new())).collect()
        };

        let (journal, pending): (WriteAheadLog<Vec<IndexEdit>>, _) =
            WriteAheadLog::open(dir.join(JOURNAL_FILE), JOURNAL_MAGIC, config.sync_on_commit)?;

        let replayed = pending.len();
        for entry in pending {
            for edit in &entry.body {
                edit.apply(&mut tables);
            }
        }

        let map = Self {
            dir,
            config,
            _lock_file: lock_file,
            tables: RwLock::new(tables),
            journal,
            commit_lock: Mutex::new(()),
        };

        if replayed > 0 {
            tracing::info!(
                dir = %map.dir.display(),
                batches = replayed,
                "replayed fields map journal"
            );
            map.checkpoint()?;
        }

        Ok(map)
    }

    /// Start a transaction. Nothing is visible or durable until it is committed.
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction {
            map: self,
            edits: Vec::new(),
        }
    }

    /// Add `id` under `value`, creating the entry if needed. Idempotent.
    pub fn add(&self, field: FieldKind, value: &str, id: DocumentId) -> Result<()> {
        let mut txn = self.transaction();
        txn.add(field, value, id);
        txn.commit().map(|_| ())
    }

    /// Remove `id` from `value`'s entry. No-op if either is absent.
    pub fn remove(&self, field: FieldKind, value: &str, id: DocumentId) -> Result<()> {
        let mut txn = self.transaction();
        txn.remove(field, value, id);
        txn.commit().map(|_| ())
    }

    /// All ids indexed under `value` (empty if none).
    pub fn lookup(&self, field: FieldKind, value: &str) -> HashSet<DocumentId> {
        self.tables
            .read()
            .get(&field)
            .and_then(|t| t.get(value))
            .cloned()
            .unwrap_or_default()
    }

    /// Whether `id` is indexed under `value`.
    pub fn contains(&self, field: FieldKind, value: &str, id: DocumentId) -> bool {
        self.tables
            .read()
            .get(&field)
            .and_then(|t| t.get(value))
            .map(|ids| ids.contains(&id))
            .unwrap_or(false)
    }

    /// Every value with an entry (including emptied ones), sorted.
    pub fn values(&self, field: FieldKind) -> Vec<String> {
        let tables = self.tables.read();
        let mut values: Vec<String> = tables
            .get(&field)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        values.sort();
        values
    }

    /// Number of entries in a table.
    pub fn entry_count(&self, field: FieldKind) -> usize {
        self.tables.read().get(&field).map(|t| t.len()).unwrap_or(0)
    }

    /// Ordered copy of a table, for inspection and comparison.
    pub fn snapshot(&self, field: FieldKind) -> BTreeMap<String, BTreeSet<DocumentId>> {
        self.tables
            .read()
            .get(&field)
            .map(|t| {
                t.iter()
                    .map(|(value, ids)| (value.clone(), ids.iter().copied().collect()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Write the tables to the snapshot file and clear the journal.
    pub fn checkpoint(&self) -> Result<()> {
        let _lock = self.commit_lock.lock();
        self.checkpoint_locked()
    }

    /// Flush the journal to disk.
    pub fn sync(&self) -> Result<()> {
        self.journal.sync()
    }

    /// Directory holding this fields map.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn commit_edits(&self, edits: &[IndexEdit]) -> Result<()> {
        let _lock = self.commit_lock.lock();

        let edits_vec = edits.to_vec();
        self.journal.append(&edits_vec)?;

        {
            let mut tables = self.tables.write();
            for edit in edits {
                edit.apply(&mut tables);
            }
        }

        if self.journal.len() >= self.config.checkpoint_every.max(1) {
            // The commit is already durable in the journal
            if let Err(e) = self.checkpoint_locked() {
                tracing::error!(error = %e, dir = %self.dir.display(), "fields map checkpoint failed");
            }
        }

        Ok(())
    }

    fn checkpoint_locked(&self) -> Result<()> {
        {
            let tables = self.tables.read();
            snapshot::save(&self.dir.join(SNAPSHOT_FILE), &tables)?;
        }
        self.journal.clear()?;
        tracing::debug!(dir = %self.dir.display(), "fields map checkpointed");
        Ok(())
    }

    fn acquire_lock(dir: &Path) -> Result<File> {
        let lock_file = File::create(dir.join(LOCK_FILE))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| IndexError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for FieldsMap {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.journal.sync();
    }
}

/// A batch of staged edits against a [`FieldsMap`].
///
/// Dropping a transaction without committing discards its edits.
pub struct Transaction<'a> {
    map: &'a FieldsMap,
    edits: Vec<IndexEdit>,
}

impl<'a> Transaction<'a> {
    /// Stage an insertion of `id` under `value`.
    pub fn add(&mut self, field: FieldKind, value: &str, id: DocumentId) {
        self.edits.push(IndexEdit::Add {
            field,
            value: value.to_string(),
            id,
        });
    }

    /// Stage a removal of `id` from `value`.
    pub fn remove(&mut self, field: FieldKind, value: &str, id: DocumentId) {
        self.edits.push(IndexEdit::Remove {
            field,
            value: value.to_string(),
            id,
        });
    }

    /// Staged edits, in order.
    pub fn edits(&self) -> &[IndexEdit] {
        &self.edits
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Make every staged edit durable and visible. Returns the number of edits.
    pub fn commit(mut self) -> Result<usize> {
        let edits = std::mem::take(&mut self.edits);
        if edits.is_empty() {
            return Ok(0);
        }
        self.map.commit_edits(&edits)?;
        Ok(edits.len())
    }

    /// Discard every staged edit.
    pub fn rollback(mut self) {
        self.edits.clear();
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.edits.is_empty() {
            tracing::debug!(edits = self.edits.len(), "discarding uncommitted fields map transaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> IndexConfig {
        IndexConfig {
            path: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_add_and_lookup() {
        let dir = TempDir::new().unwrap();
        let map = FieldsMap::open(test_config(&dir), "users").unwrap();

        map.add(FieldKind::JobTitle, "SDE", DocumentId(1)).unwrap();
        map.add(FieldKind::JobTitle, "SDE", DocumentId(2)).unwrap();
        map.add(FieldKind::Industry, "SaaS", DocumentId(1)).unwrap();

        assert_eq!(
            map.lookup(FieldKind::JobTitle, "SDE"),
            [DocumentId(1), DocumentId(2)].into()
        );
        assert_eq!(map.lookup(FieldKind::Industry, "SaaS").len(), 1);
        assert!(map.lookup(FieldKind::Industry, "SDE").is_empty());
        assert!(map.lookup(FieldKind::JobTitle, "nothing").is_empty());
    }

    #[test]
    fn test_add_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let map = FieldsMap::open(test_config(&dir), "users").unwrap();

        map.add(FieldKind::JobTitle, "SDE", DocumentId(1)).unwrap();
        map.add(FieldKind::JobTitle, "SDE", DocumentId(1)).unwrap();

        assert_eq!(map.lookup(FieldKind::JobTitle, "SDE").len(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let dir = TempDir::new().unwrap();
        let map = FieldsMap::open(test_config(&dir), "users").unwrap();

        map.remove(FieldKind::JobTitle, "ghost", DocumentId(1)).unwrap();
        assert_eq!(map.entry_count(FieldKind::JobTitle), 0);

        map.add(FieldKind::JobTitle, "SDE", DocumentId(1)).unwrap();
        map.remove(FieldKind::JobTitle, "SDE", DocumentId(9)).unwrap();
        assert_eq!(map.lookup(FieldKind::JobTitle, "SDE").len(), 1);
    }

    #[test]
    fn test_emptied_entries_are_kept() {
        let dir = TempDir::new().unwrap();
        let map = FieldsMap::open(test_config(&dir), "users").unwrap();

        map.add(FieldKind::JobTitle, "SDE", DocumentId(1)).unwrap();
        map.remove(FieldKind::JobTitle, "SDE", DocumentId(1)).unwrap();

        assert!(map.lookup(FieldKind::JobTitle, "SDE").is_empty());
        assert_eq!(map.values(FieldKind::JobTitle), vec!["SDE".to_string()]);
    }

    #[test]
    fn test_uncommitted_transaction_is_discarded() {
        let dir = TempDir::new().unwrap();
        let map = FieldsMap::open(test_config(&dir), "users").unwrap();

        {
            let mut txn = map.transaction();
            txn.add(FieldKind::JobTitle, "SDE", DocumentId(1));
            assert_eq!(txn.len(), 1);
            // Dropped here
        }
        assert!(map.lookup(FieldKind::JobTitle, "SDE").is_empty());

        let mut txn = map.transaction();
        txn.add(FieldKind::JobTitle, "SDE", DocumentId(1));
        txn.rollback();
        assert!(map.lookup(FieldKind::JobTitle, "SDE").is_empty());
    }

    #[test]
    fn test_commit_survives_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let map = FieldsMap::open(test_config(&dir), "users").unwrap();
            let mut txn = map.transaction();
            txn.add(FieldKind::JobTitle, "SDE", DocumentId(1));
            txn.add(FieldKind::Industry, "SaaS", DocumentId(1));
            assert_eq!(txn.commit().unwrap(), 2);
        }

        let map = FieldsMap::open(test_config(&dir), "users").unwrap();
        assert!(map.contains(FieldKind::JobTitle, "SDE", DocumentId(1)));
        assert!(map.contains(FieldKind::Industry, "SaaS", DocumentId(1)));
    }

    #[test]
    fn test_checkpoint_threshold() {
        let dir = TempDir::new().unwrap();
        let config = IndexConfig {
            checkpoint_every: 3,
            ..test_config(&dir)
        };

        {
            let map = FieldsMap::open(config.clone(), "users").unwrap();
            for i in 0..7 {
                map.add(FieldKind::JobTitle, "SDE", DocumentId(i)).unwrap();
            }
            // Two checkpoints taken, one commit left in the journal
            assert_eq!(map.journal.len(), 1);
            assert!(map.path().join(SNAPSHOT_FILE).exists());
        }

        let map = FieldsMap::open(config, "users").unwrap();
        assert_eq!(map.lookup(FieldKind::JobTitle, "SDE").len(), 7);
    }

    #[test]
    fn test_directory_name_derives_from_store_name() {
        let dir = TempDir::new().unwrap();
        let map = FieldsMap::open(test_config(&dir), "JobDB").unwrap();

        assert_eq!(fields_map_name("JobDB"), "FieldsMap4JobDB");
        assert!(map.path().ends_with("FieldsMap4JobDB"));
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let _map = FieldsMap::open(test_config(&dir), "users").unwrap();

        let result = FieldsMap::open(test_config(&dir), "users");
        assert!(matches!(result, Err(IndexError::Locked)));
    }

    #[test]
    fn test_missing_without_create() {
        let dir = TempDir::new().unwrap();
        let config = IndexConfig {
            create_if_missing: false,
            ..test_config(&dir)
        };

        let result = FieldsMap::open(config, "users");
        assert!(matches!(result, Err(IndexError::NotInitialized)));
    }
}
