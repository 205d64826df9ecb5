//! Sync engine tying the fields map to its primary store.

use crate::applier::{ApplierConfig, ApplierStats, DeltaApplier};
use crate::builder::{Discrepancy, IndexBuilder, RebuildStats};
use crate::error::Result;
use crate::fields::{FieldsMap, IndexConfig};
use crate::primary::PrimaryStore;
use crate::renamer::{BulkRenamer, RenameConfig, RenameReport};
use crate::transport::{MessageTransport, Subscription};
use crate::types::{DocumentId, FieldKind};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Engine configuration.
#[derive(Clone, Debug, Default)]
pub struct SyncConfig {
    pub index: IndexConfig,
    pub applier: ApplierConfig,
    pub rename: RenameConfig,
}

/// Owns the long-lived fields map handle for one primary store and hands it to
/// the builder, the delta applier and the bulk renamer.
///
/// Lookups are eventually consistent with the primary store: they reflect
/// whatever change events have been applied so far.
pub struct SyncEngine<P: ?Sized> {
    config: SyncConfig,
    index: Arc<FieldsMap>,
    primary: Arc<P>,
    publisher: Option<Arc<dyn MessageTransport>>,
}

impl<P: PrimaryStore + ?Sized> SyncEngine<P> {
    /// Open (or create) the fields map for `primary`.
    pub fn open(config: SyncConfig, primary: Arc<P>) -> Result<Self> {
        let index = Arc::new(FieldsMap::open(config.index.clone(), primary.name())?);

        Ok(Self {
            config,
            index,
            primary,
            publisher: None,
        })
    }

    /// Have renames publish their own change events on `transport`.
    ///
    /// Only needed when writes to the primary store don't already publish
    /// (e.g. it isn't wrapped in a [`PublishingStore`](crate::PublishingStore)).
    pub fn with_rename_publisher(mut self, transport: Arc<dyn MessageTransport>) -> Self {
        self.publisher = Some(transport);
        self
    }

    pub fn index(&self) -> &Arc<FieldsMap> {
        &self.index
    }

    pub fn primary(&self) -> &Arc<P> {
        &self.primary
    }

    /// Seed the fields map from a full scan of the primary store.
    pub fn rebuild(&self) -> Result<RebuildStats> {
        IndexBuilder::rebuild(&*self.primary, &self.index)
    }

    /// Compare the fields map with the primary store.
    pub fn verify(&self) -> Result<Vec<Discrepancy>> {
        IndexBuilder::verify(&*self.primary, &self.index)
    }

    /// Ids of documents indexed under `value`.
    pub fn lookup(&self, field: FieldKind, value: &str) -> HashSet<DocumentId> {
        self.index.lookup(field, value)
    }

    /// A delta applier sharing this engine's handles.
    pub fn applier(&self) -> DeltaApplier<P> {
        DeltaApplier::new(
            Arc::clone(&self.index),
            Arc::clone(&self.primary),
            self.config.applier.clone(),
        )
    }

    /// A bulk renamer sharing this engine's handles.
    pub fn renamer(&self) -> BulkRenamer<P> {
        let renamer = BulkRenamer::new(
            Arc::clone(&self.index),
            Arc::clone(&self.primary),
            self.config.rename.clone(),
        );
        match &self.publisher {
            Some(transport) => renamer.with_publisher(Arc::clone(transport)),
            None => renamer,
        }
    }

    /// Rename `old_value` to `new_value` on every document indexed under it.
    pub fn rename_field(
        &self,
        field: FieldKind,
        old_value: &str,
        new_value: &str,
    ) -> Result<RenameReport> {
        self.renamer().rename_field(field, old_value, new_value)
    }
}

impl<P: PrimaryStore + ?Sized + 'static> SyncEngine<P> {
    /// Start the delta applier on its own thread, consuming `subscription` until
    /// it is dropped.
    pub fn spawn_applier(&self, subscription: Subscription) -> Result<JoinHandle<ApplierStats>> {
        self.applier().spawn(subscription)
    }
}
