//! Bulk rename of an indexed field value across every matching document.

use crate::delta::Delta;
use crate::error::{IndexError, Result};
use crate::fields::FieldsMap;
use crate::primary::PrimaryStore;
use crate::transport::MessageTransport;
use crate::types::{Document, DocumentId, FieldKind, Version};
use crossbeam_channel::unbounded;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Retry schedule for primary store writes that time out.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts per write, including the first. Minimum 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Factor applied to the delay after each further failure.
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay to wait after `failures` consecutive failed attempts (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(failures.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Bulk renamer configuration.
#[derive(Clone, Debug)]
pub struct RenameConfig {
    /// Concurrent writers. Default: 8
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            retry: RetryPolicy::default(),
        }
    }
}

/// Why a matched document was left alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Deleted since it was indexed.
    Missing,
    /// Its field no longer holds the old value (the index entry was stale).
    ValueChanged,
}

/// A document whose rename could not be completed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenameFailure {
    pub id: DocumentId,
    pub cause: String,
    pub attempts: u32,
}

/// Per-document results of a bulk rename, each list sorted by id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenameReport {
    /// Renamed documents with their new version.
    pub renamed: Vec<(DocumentId, Version)>,
    pub skipped: Vec<(DocumentId, SkipReason)>,
    pub failed: Vec<RenameFailure>,
}

impl RenameReport {
    /// Number of ids the index returned for the old value.
    pub fn matched(&self) -> usize {
        self.renamed.len() + self.skipped.len() + self.failed.len()
    }

    /// True when no document failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turn the first failure into an error.
    pub fn into_result(self) -> Result<Self> {
        match self.failed.first() {
            Some(failure) => Err(IndexError::RenameFailed {
                id: failure.id,
                cause: failure.cause.clone(),
            }),
            None => Ok(self),
        }
    }
}

enum WorkResult {
    Renamed(DocumentId, Version),
    Skipped(DocumentId, SkipReason),
    Failed(RenameFailure),
}

/// Rewrites one field value to another on every document the fields map lists
/// under the old value.
///
/// Writes go straight to the primary store over a bounded pool of worker
/// threads; the fields map is never touched here. It catches up once the delta
/// for each write reaches the delta applier, either from the store's own
/// publisher or from the renamer when built [`with_publisher`](Self::with_publisher).
pub struct BulkRenamer<P: ?Sized> {
    index: Arc<FieldsMap>,
    primary: Arc<P>,
    config: RenameConfig,
    publisher: Option<Arc<dyn MessageTransport>>,
}

impl<P: PrimaryStore + ?Sized> BulkRenamer<P> {
    pub fn new(index: Arc<FieldsMap>, primary: Arc<P>, config: RenameConfig) -> Self {
        Self {
            index,
            primary,
            config,
            publisher: None,
        }
    }

    /// Publish a delta on `transport` after every successful write.
    pub fn with_publisher(mut self, transport: Arc<dyn MessageTransport>) -> Self {
        self.publisher = Some(transport);
        self
    }

    /// Rename `old_value` to `new_value` on every document indexed under it.
    ///
    /// Returns once every matched document has been renamed, skipped or given up
    /// on. Only a failure to start any worker is returned as an error;
    /// per-document failures are in the report.
    pub fn rename_field(
        &self,
        field: FieldKind,
        old_value: &str,
        new_value: &str,
    ) -> Result<RenameReport> {
        self.rename_with(field, old_value, new_value, worker_thread)
    }

    fn rename_with(
        &self,
        field: FieldKind,
        old_value: &str,
        new_value: &str,
        builder: impl Fn(usize) -> thread::Builder,
    ) -> Result<RenameReport> {
        let ids = self.index.lookup(field, old_value);
        if ids.is_empty() || old_value == new_value {
            tracing::info!(%field, old_value, new_value, "nothing to rename");
            return Ok(RenameReport::default());
        }

        let workers = self.config.workers.max(1).min(ids.len());
        let (job_tx, job_rx) = unbounded::<DocumentId>();
        let (result_tx, result_rx) = unbounded::<WorkResult>();
        for id in ids {
            // Receiver is alive
            let _ = job_tx.send(id);
        }
        drop(job_tx);

        // Workers that did start drain the whole queue, so a short pool still
        // renames every document
        let (started, spawn_error) = thread::scope(|scope| {
            for n in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let spawned = builder(n).spawn_scoped(scope, move || {
                    for id in job_rx.iter() {
                        let result = self.rename_one(id, field, old_value, new_value);
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                });
                if let Err(e) = spawned {
                    return (n, Some(e));
                }
            }
            (workers, None)
        });
        drop(result_tx);

        if let Some(e) = spawn_error {
            if started == 0 {
                return Err(e.into());
            }
            tracing::warn!(started, requested = workers, error = %e, "rename worker pool started short");
        }

        let mut report = RenameReport::default();
        for result in result_rx.try_iter() {
            match result {
                WorkResult::Renamed(id, version) => report.renamed.push((id, version)),
                WorkResult::Skipped(id, reason) => report.skipped.push((id, reason)),
                WorkResult::Failed(failure) => report.failed.push(failure),
            }
        }
        report.renamed.sort_by_key(|(id, _)| *id);
        report.skipped.sort_by_key(|(id, _)| *id);
        report.failed.sort_by_key(|f| f.id);

        tracing::info!(
            %field,
            old_value,
            new_value,
            renamed = report.renamed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "bulk rename finished"
        );

        Ok(report)
    }

    /// Rename a job title everywhere.
    pub fn rename_job_title(&self, old_title: &str, new_title: &str) -> Result<RenameReport> {
        self.rename_field(FieldKind::JobTitle, old_title, new_title)
    }

    /// Rename an industry everywhere.
    pub fn rename_industry(&self, old_industry: &str, new_industry: &str) -> Result<RenameReport> {
        self.rename_field(FieldKind::Industry, old_industry, new_industry)
    }

    fn rename_one(
        &self,
        id: DocumentId,
        field: FieldKind,
        old_value: &str,
        new_value: &str,
    ) -> WorkResult {
        let mut document = match self.primary.read(id) {
            Ok(Some(document)) => document,
            Ok(None) => return WorkResult::Skipped(id, SkipReason::Missing),
            Err(e) => {
                return WorkResult::Failed(RenameFailure {
                    id,
                    cause: e.to_string(),
                    attempts: 0,
                })
            }
        };

        if document.field(field) != old_value {
            tracing::debug!(%id, %field, current = document.field(field), "index entry is stale, skipping");
            return WorkResult::Skipped(id, SkipReason::ValueChanged);
        }

        let before = document.clone();
        document.set_field(field, new_value);

        match self.write_with_retry(id, &document) {
            Ok(version) => {
                self.publish(id, &before, &document, version);
                WorkResult::Renamed(id, version)
            }
            Err(failure) => {
                tracing::error!(%id, cause = %failure.cause, attempts = failure.attempts, "giving up on rename");
                WorkResult::Failed(failure)
            }
        }
    }

    fn write_with_retry(
        &self,
        id: DocumentId,
        document: &Document,
    ) -> std::result::Result<Version, RenameFailure> {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.primary.write(id, document) {
                Ok(version) => return Ok(version),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.config.retry.backoff(attempt);
                    tracing::warn!(%id, attempt, ?delay, error = %e, "write failed, retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(RenameFailure {
                        id,
                        cause: e.to_string(),
                        attempts: attempt,
                    })
                }
            }
        }
    }

    fn publish(&self, id: DocumentId, before: &Document, after: &Document, version: Version) {
        let Some(transport) = &self.publisher else {
            return;
        };

        let result = Delta::between(before, after)
            .with_version(version)
            .to_payload()
            .and_then(|payload| transport.publish(id, &payload));
        if let Err(e) = result {
            tracing::warn!(%id, error = %e, "failed to publish rename delta");
        }
    }
}

fn worker_thread(n: usize) -> thread::Builder {
    thread::Builder::new().name(format!("fieldsmap-rename-{}", n))
}
