//! Incremental application of change events to the fields map.

use crate::delta::Delta;
use crate::error::{IndexError, Result};
use crate::fields::FieldsMap;
use crate::primary::PrimaryStore;
use crate::transport::{DropReason, Subscription, TransportEvent};
use crate::types::{DocumentId, Version};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// How a delta's version is compared with the document's current version.
///
/// `RejectEqual` is the reference staleness rule (`current >= delta`). It is
/// not the default: a store publishes each delta after its write, tagged with
/// the version that write produced, so under `RejectEqual` the delta for the
/// latest write always finds the store already at its version and is dropped.
/// `AcceptEqual` corrects for that and only drops deltas the document has moved
/// strictly past.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VersionCheck {
    /// Stale when `current >= delta`. A delta is only applied if the primary
    /// store has not yet reached its version.
    RejectEqual,
    /// Stale when `current > delta`. The delta describing the latest write
    /// (whose version the store already holds) is applied.
    #[default]
    AcceptEqual,
}

impl VersionCheck {
    /// Whether a delta at `delta` is superseded by a document at `current`.
    pub fn is_stale(self, current: Version, delta: Version) -> bool {
        match self {
            VersionCheck::RejectEqual => current >= delta,
            VersionCheck::AcceptEqual => current > delta,
        }
    }
}

/// Delta applier configuration.
#[derive(Clone, Debug, Default)]
pub struct ApplierConfig {
    pub version_check: VersionCheck,
}

/// Result of applying one change event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Edits were committed.
    Applied { removed: usize, added: usize },
    /// The document has moved past this delta; nothing was changed.
    Stale { current: Version, delta: Version },
}

/// Counters for an applier loop.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplierStats {
    pub received: u64,
    pub applied: u64,
    pub stale: u64,
    pub malformed: u64,
    pub failed: u64,
    /// Why the subscription ended, if the transport said.
    pub stop_reason: Option<DropReason>,
}

/// Consumes change events and keeps the fields map in step with the primary store.
///
/// Events are handled one at a time. The transport gives no ordering guarantee,
/// so the only protection against out-of-order delivery is the version check
/// against the document's current state in the primary store.
pub struct DeltaApplier<P: ?Sized> {
    index: Arc<FieldsMap>,
    primary: Arc<P>,
    config: ApplierConfig,
}

impl<P: PrimaryStore + ?Sized> DeltaApplier<P> {
    pub fn new(index: Arc<FieldsMap>, primary: Arc<P>, config: ApplierConfig) -> Self {
        Self {
            index,
            primary,
            config,
        }
    }

    /// Parse and apply the payload received for document `id`.
    pub fn apply(&self, id: DocumentId, payload: &str) -> Result<ApplyOutcome> {
        let delta = Delta::parse(id, payload)?;
        self.apply_delta(id, &delta)
    }

    /// Apply an already parsed delta.
    ///
    /// A stale delta stages nothing. Otherwise all removals are staged before all
    /// insertions and committed as one transaction.
    pub fn apply_delta(&self, id: DocumentId, delta: &Delta) -> Result<ApplyOutcome> {
        if let Some(version) = delta.version() {
            // A deleted document has nothing to compare against
            if let Some(current) = self.primary.read(id)? {
                if self.config.version_check.is_stale(current.version(), version) {
                    return Ok(ApplyOutcome::Stale {
                        current: current.version(),
                        delta: version,
                    });
                }
            }
        }

        let mut txn = self.index.transaction();
        let mut removed = 0;
        for (kind, change) in delta.changes() {
            if let Some(old) = &change.old {
                txn.remove(kind, old, id);
                removed += 1;
            }
        }
        let mut added = 0;
        for (kind, change) in delta.changes() {
            if let Some(new) = &change.new {
                txn.add(kind, new, id);
                added += 1;
            }
        }
        txn.commit()?;

        Ok(ApplyOutcome::Applied { removed, added })
    }

    /// Apply one event, logging instead of failing. Never panics on bad input.
    pub fn handle(&self, id: DocumentId, payload: &str, stats: &mut ApplierStats) {
        stats.received += 1;

        match self.apply(id, payload) {
            Ok(ApplyOutcome::Applied { removed, added }) => {
                stats.applied += 1;
                tracing::debug!(%id, removed, added, "applied change event");
            }
            Ok(ApplyOutcome::Stale { current, delta }) => {
                stats.stale += 1;
                tracing::debug!(%id, %current, %delta, "dropping stale change event");
            }
            Err(e @ IndexError::MalformedEvent { .. }) => {
                stats.malformed += 1;
                tracing::warn!(%id, error = %e, "skipping malformed change event");
            }
            Err(e) => {
                stats.failed += 1;
                tracing::error!(%id, error = %e, "failed to apply change event");
            }
        }
    }

    /// Drain `subscription` until the transport closes or unsubscribes it.
    ///
    /// Losing the subscription any other way means change events were lost and
    /// the fields map has drifted from the primary store; that is logged as an
    /// error and reported in [`ApplierStats::stop_reason`].
    pub fn run(&self, subscription: &Subscription) -> ApplierStats {
        let mut stats = ApplierStats::default();

        loop {
            match subscription.recv() {
                Ok(TransportEvent::Delta { id, payload }) => self.handle(id, &payload, &mut stats),
                Ok(TransportEvent::Dropped { reason }) => {
                    match reason {
                        DropReason::Closed | DropReason::Unsubscribed => {
                            tracing::info!(?reason, "change event subscription ended")
                        }
                        DropReason::BufferOverflow => tracing::error!(
                            received = stats.received,
                            "change event subscription overflowed, fields map needs a rebuild"
                        ),
                    }
                    stats.stop_reason = Some(reason);
                    break;
                }
                Err(_) => {
                    tracing::info!("change event subscription disconnected");
                    break;
                }
            }
        }

        tracing::info!(
            received = stats.received,
            applied = stats.applied,
            stale = stats.stale,
            malformed = stats.malformed,
            failed = stats.failed,
            "delta applier stopped"
        );
        stats
    }
}

impl<P: PrimaryStore + ?Sized + 'static> DeltaApplier<P> {
    /// Run the applier on a dedicated thread.
    pub fn spawn(self, subscription: Subscription) -> Result<JoinHandle<ApplierStats>> {
        let handle = thread::Builder::new()
            .name("fieldsmap-applier".to_string())
            .spawn(move || self.run(&subscription))?;
        Ok(handle)
    }
}
