//! # Fields Map
//!
//! A persisted secondary index over a primary document store, so that "all
//! documents whose field F equals V" is a single lookup instead of a full scan.
//!
//! ## Core Concepts
//!
//! - **Fields map**: one `value -> {document ids}` table per indexed field,
//!   journaled and checkpointed to disk
//! - **Builder**: full rebuild from a scan of the primary store
//! - **Delta applier**: applies change events, rejecting stale ones by version
//! - **Bulk renamer**: rewrites a field value on every matching document over a
//!   bounded worker pool with retried writes
//!
//! ## Example
//!
//! ```ignore
//! use fieldsmap::{ChannelTransport, DocumentStore, FieldKind, PublishingStore, SyncEngine};
//!
//! let transport = Arc::new(ChannelTransport::default());
//! let store = PublishingStore::new(DocumentStore::open(store_config)?, transport.clone());
//! let engine = SyncEngine::open(SyncConfig::default(), Arc::new(store))?;
//!
//! // Seed the index, then keep it current from the change stream
//! engine.rebuild()?;
//! let applier = engine.spawn_applier(transport.subscribe())?;
//!
//! let managers = engine.lookup(FieldKind::JobTitle, "Manager");
//! engine.rename_field(FieldKind::JobTitle, "SDE", "Software Engineer")?;
//! ```

pub mod applier;
pub mod builder;
pub mod delta;
pub mod engine;
pub mod error;
pub mod fields;
pub mod primary;
pub mod renamer;
pub mod transport;
pub mod types;
pub mod wal;

// Re-exports
pub use applier::{ApplierConfig, ApplierStats, ApplyOutcome, DeltaApplier, VersionCheck};
pub use builder::{Discrepancy, IndexBuilder, RebuildStats};
pub use delta::{Delta, FieldChange};
pub use engine::{SyncConfig, SyncEngine};
pub use error::{IndexError, Result};
pub use fields::{fields_map_name, FieldsMap, IndexConfig, IndexEdit, Transaction};
pub use primary::{DocumentStore, DocumentStoreConfig, PrimaryStore, PublishingStore, Scan};
pub use renamer::{
    BulkRenamer, RenameConfig, RenameFailure, RenameReport, RetryPolicy, SkipReason,
};
pub use transport::{
    ChannelTransport, DropReason, MessageTransport, OverflowPolicy, Subscription,
    SubscriptionId, TransportConfig, TransportEvent,
};
pub use types::*;
pub use wal::{WalEntry, WriteAheadLog};
