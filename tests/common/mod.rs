//! Shared fixtures for integration tests.

#![allow(dead_code)]

use fieldsmap::{
    ChannelTransport, Document, DocumentId, DocumentStore, DocumentStoreConfig, IndexConfig,
    IndexError, PrimaryStore, PublishingStore, Result, Scan, SyncConfig, SyncEngine, Version,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const STORE_NAME: &str = "JobDBTest";

pub const SDE_JOB: &str = "Software Developer";
pub const MANAGER_JOB: &str = "Finance Manager";
pub const EP_JOB: &str = "Executive Producer";

pub const SAAS_IND: &str = "SaaS";
pub const AVI_IND: &str = "Aviation";
pub const TR_IND: &str = "Trampoline Robotics";

pub type TestStore = PublishingStore<DocumentStore, Arc<ChannelTransport>>;

/// Route library logs to the test harness output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn store_config(dir: &TempDir) -> DocumentStoreConfig {
    DocumentStoreConfig {
        path: dir.path().join("docs"),
        name: STORE_NAME.to_string(),
        ..Default::default()
    }
}

pub fn sync_config(dir: &TempDir) -> SyncConfig {
    SyncConfig {
        index: IndexConfig {
            path: dir.path().join("index"),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn document_store(dir: &TempDir) -> DocumentStore {
    DocumentStore::open(store_config(dir)).unwrap()
}

/// Engine over a store that publishes every mutation on `transport`.
pub fn publishing_engine(dir: &TempDir, transport: &Arc<ChannelTransport>) -> SyncEngine<TestStore> {
    let store = PublishingStore::new(document_store(dir), Arc::clone(transport));
    SyncEngine::open(sync_config(dir), Arc::new(store)).unwrap()
}

/// The six users every scenario starts from.
pub fn seed_users<P: PrimaryStore + ?Sized>(store: &P) {
    let users = [
        ("Rob", SDE_JOB, SAAS_IND),
        ("Adam", SDE_JOB, SAAS_IND),
        ("Heather", MANAGER_JOB, AVI_IND),
        ("Joe", SDE_JOB, AVI_IND),
        ("Jane", EP_JOB, TR_IND),
        ("Rosaria", MANAGER_JOB, TR_IND),
    ];
    for (id, (name, job_title, industry)) in users.into_iter().enumerate() {
        store
            .write(DocumentId(id as u64), &Document::new(name, job_title, industry))
            .unwrap();
    }
}

/// Primary store that times out a fixed number of writes before letting them
/// through, and tracks how many writes were in flight at once.
pub struct FlakyStore {
    inner: DocumentStore,
    failures_left: AtomicUsize,
    write_delay: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: DocumentStore, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
            write_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn inner(&self) -> &DocumentStore {
        &self.inner
    }

    /// Most writes observed running concurrently.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Write calls made, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl PrimaryStore for FlakyStore {
    fn read(&self, id: DocumentId) -> Result<Option<Document>> {
        self.inner.read(id)
    }

    fn write(&self, id: DocumentId, document: &Document) -> Result<Version> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(IndexError::WriteTimeout(id));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.write_delay.is_zero() {
            std::thread::sleep(self.write_delay);
        }
        let result = self.inner.write(id, document);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn delete(&self, id: DocumentId) -> Result<()> {
        self.inner.delete(id)
    }

    fn scan(&self, start: DocumentId) -> Result<Scan<'_>> {
        self.inner.scan(start)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
