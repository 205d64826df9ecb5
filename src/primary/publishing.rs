//! Primary store wrapper that publishes a change event for every mutation.

use super::{PrimaryStore, Scan};
use crate::delta::Delta;
use crate::error::Result;
use crate::transport::MessageTransport;
use crate::types::{Document, DocumentId, Version};

/// Wraps a primary store so that each successful write or delete is followed by
/// a delta on `transport`.
///
/// The delta is published after the write returns. A publish failure is logged
/// and not reported: the write already happened, and the fields map stays
/// stale for that document until the next rebuild.
pub struct PublishingStore<P, T> {
    inner: P,
    transport: T,
}

impl<P: PrimaryStore, T: MessageTransport> PublishingStore<P, T> {
    pub fn new(inner: P, transport: T) -> Self {
        Self { inner, transport }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn publish(&self, id: DocumentId, delta: &Delta) {
        let result = delta
            .to_payload()
            .and_then(|payload| self.transport.publish(id, &payload));
        if let Err(e) = result {
            tracing::warn!(%id, error = %e, "failed to publish change event");
        }
    }
}

impl<P: PrimaryStore, T: MessageTransport> PrimaryStore for PublishingStore<P, T> {
    fn read(&self, id: DocumentId) -> Result<Option<Document>> {
        self.inner.read(id)
    }

    fn write(&self, id: DocumentId, document: &Document) -> Result<Version> {
        let before = self.inner.read(id)?;
        let version = self.inner.write(id, document)?;

        let delta = match before {
            Some(before) => Delta::between(&before, document),
            None => Delta::created(document),
        };
        self.publish(id, &delta.with_version(version));

        Ok(version)
    }

    fn delete(&self, id: DocumentId) -> Result<()> {
        let before = self.inner.read(id)?;
        self.inner.delete(id)?;

        if let Some(before) = before {
            self.publish(id, &Delta::deleted(&before));
        }
        Ok(())
    }

    fn scan(&self, start: DocumentId) -> Result<Scan<'_>> {
        self.inner.scan(start)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primary::{DocumentStore, DocumentStoreConfig};
    use crate::transport::{ChannelTransport, TransportEvent};
    use crate::types::FieldKind;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (PublishingStore<DocumentStore, Arc<ChannelTransport>>, Arc<ChannelTransport>) {
        let store = DocumentStore::open(DocumentStoreConfig {
            path: dir.path().join("docs"),
            name: "users".into(),
            ..Default::default()
        })
        .unwrap();
        let transport = Arc::new(ChannelTransport::default());
        (PublishingStore::new(store, Arc::clone(&transport)), transport)
    }

    fn next_delta(transport: &ChannelTransport) -> (DocumentId, Delta) {
        let sub = transport.subscribe();
        match sub.recv_timeout(Duration::from_millis(100)).unwrap() {
            TransportEvent::Delta { id, payload } => (id, Delta::parse(id, &payload).unwrap()),
            other => panic!("Expected Delta event, got {:?}", other),
        }
    }

    #[test]
    fn test_create_publishes_insertions() {
        let dir = TempDir::new().unwrap();
        let (store, transport) = setup(&dir);

        store
            .write(DocumentId(3), &Document::new("Joe", "SDE", "Aviation"))
            .unwrap();

        let (id, delta) = next_delta(&transport);
        assert_eq!(id, DocumentId(3));
        assert_eq!(delta.version(), Some(Version(1)));
        let change = delta.change(FieldKind::JobTitle).unwrap();
        assert_eq!(change.old, None);
        assert_eq!(change.new.as_deref(), Some("SDE"));
    }

    #[test]
    fn test_update_publishes_transition() {
        let dir = TempDir::new().unwrap();
        let (store, transport) = setup(&dir);

        let mut doc = Document::new("Joe", "SDE", "Aviation");
        store.inner().write(DocumentId(3), &doc).unwrap();
        doc.set_field(FieldKind::Industry, "Space");
        store.write(DocumentId(3), &doc).unwrap();

        let (_, delta) = next_delta(&transport);
        assert_eq!(delta.version(), Some(Version(2)));
        assert!(delta.change(FieldKind::JobTitle).is_none());
        let change = delta.change(FieldKind::Industry).unwrap();
        assert_eq!(change.old.as_deref(), Some("Aviation"));
        assert_eq!(change.new.as_deref(), Some("Space"));
    }

    #[test]
    fn test_delete_publishes_removals() {
        let dir = TempDir::new().unwrap();
        let (store, transport) = setup(&dir);

        store
            .inner()
            .write(DocumentId(3), &Document::new("Joe", "SDE", "Aviation"))
            .unwrap();
        store.delete(DocumentId(3)).unwrap();

        let (_, delta) = next_delta(&transport);
        assert_eq!(delta.version(), None);
        assert_eq!(
            delta.change(FieldKind::JobTitle).unwrap().old.as_deref(),
            Some("SDE")
        );

        // Deleting a missing document publishes nothing
        store.delete(DocumentId(3)).unwrap();
        assert_eq!(transport.backlog_len(), 0);
    }
}
