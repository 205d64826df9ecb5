//! The primary document store the fields map indexes.
//!
//! The engine only needs a key-value interface, captured by [`PrimaryStore`]:
//! read, write (returning the stored version), delete, and an ordered circular
//! scan. [`DocumentStore`] is the bundled file-backed implementation;
//! [`PublishingStore`] wraps any store and emits a change event for every
//! mutation.

mod document_store;
mod publishing;

pub use document_store::{DocumentStore, DocumentStoreConfig};
pub use publishing::PublishingStore;

use crate::error::Result;
use crate::types::{Document, DocumentId, Version};

/// Key-value interface of the authoritative document store.
pub trait PrimaryStore: Send + Sync {
    /// Current document for `id`, if any.
    fn read(&self, id: DocumentId) -> Result<Option<Document>>;

    /// Create or replace the document for `id`. Returns the stored version.
    ///
    /// May fail with [`IndexError::WriteTimeout`](crate::IndexError::WriteTimeout),
    /// in which case the caller is expected to retry.
    fn write(&self, id: DocumentId, document: &Document) -> Result<Version>;

    /// Remove the document for `id`. No-op if absent.
    fn delete(&self, id: DocumentId) -> Result<()>;

    /// Scan every document once, in id order, starting at the first id `>= start`
    /// and wrapping around to the lowest id.
    fn scan(&self, start: DocumentId) -> Result<Scan<'_>>;

    /// Identifier of this store, used to name its fields map.
    fn name(&self) -> &str;
}

/// A single circular pass over a primary store.
///
/// The id order is fixed when the scan starts, so the pass always ends after
/// visiting each of those ids exactly once, however the store changes meanwhile.
/// Documents are read lazily; one deleted after the scan started yields `None`.
pub struct Scan<'a> {
    store: &'a dyn PrimaryStore,
    order: Vec<DocumentId>,
    pos: usize,
}

impl<'a> Scan<'a> {
    /// Build a scan over `ids` (any order) beginning at the first id `>= start`.
    pub fn new(store: &'a dyn PrimaryStore, start: DocumentId, mut ids: Vec<DocumentId>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        let split = ids.partition_point(|id| *id < start);
        ids.rotate_left(split);

        Self {
            store,
            order: ids,
            pos: 0,
        }
    }

    /// Ids still to be visited.
    pub fn remaining(&self) -> usize {
        self.order.len() - self.pos
    }
}

impl Iterator for Scan<'_> {
    type Item = Result<(DocumentId, Option<Document>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = *self.order.get(self.pos)?;
        self.pos += 1;
        Some(self.store.read(id).map(|doc| (id, doc)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}

impl ExactSizeIterator for Scan<'_> {}

impl<P: PrimaryStore + ?Sized> PrimaryStore for std::sync::Arc<P> {
    fn read(&self, id: DocumentId) -> Result<Option<Document>> {
        (**self).read(id)
    }

    fn write(&self, id: DocumentId, document: &Document) -> Result<Version> {
        (**self).write(id, document)
    }

    fn delete(&self, id: DocumentId) -> Result<()> {
        (**self).delete(id)
    }

    fn scan(&self, start: DocumentId) -> Result<Scan<'_>> {
        (**self).scan(start)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
