//! Full rebuild of the fields map from the primary store.

use crate::error::Result;
use crate::fields::FieldsMap;
use crate::primary::PrimaryStore;
use crate::types::{DocumentId, FieldKind};

/// Outcome of a rebuild pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RebuildStats {
    /// Documents whose entries were committed.
    pub indexed: usize,
    /// Ids whose document was gone by the time the scan reached them.
    pub missing: usize,
    /// Documents skipped because reading or committing them failed.
    pub failed: usize,
}

/// Seeds a fields map from a full scan of the primary store.
///
/// Safe to run any number of times: every pass re-adds the current value of each
/// indexed field, and adds are idempotent. It never removes, so entries left by
/// earlier data are not cleaned up.
pub struct IndexBuilder;

impl IndexBuilder {
    /// Scan `primary` from the lowest id and add each document to `index`,
    /// committing once per document.
    pub fn rebuild<P: PrimaryStore + ?Sized>(primary: &P, index: &FieldsMap) -> Result<RebuildStats> {
        let mut stats = RebuildStats::default();

        for item in primary.scan(DocumentId(0))? {
            let (id, document) = match item {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::error!(error = %e, "failed to read document during rebuild");
                    stats.failed += 1;
                    continue;
                }
            };

            let Some(document) = document else {
                stats.missing += 1;
                continue;
            };

            let mut txn = index.transaction();
            for kind in FieldKind::ALL {
                txn.add(kind, document.field(kind), id);
            }

            match txn.commit() {
                Ok(_) => stats.indexed += 1,
                Err(e) => {
                    tracing::error!(%id, error = %e, "failed to index document");
                    stats.failed += 1;
                }
            }
        }

        tracing::info!(
            store = primary.name(),
            indexed = stats.indexed,
            missing = stats.missing,
            failed = stats.failed,
            "fields map rebuilt"
        );

        Ok(stats)
    }

    /// Compare `index` against the current contents of `primary`.
    ///
    /// Returns every id missing from the entry of its current value, and every id
    /// listed under a value its document no longer holds (or listed at all after
    /// its document was deleted). An empty result means the index is exact.
    pub fn verify<P: PrimaryStore + ?Sized>(
        primary: &P,
        index: &FieldsMap,
    ) -> Result<Vec<Discrepancy>> {
        let mut discrepancies = Vec::new();

        for item in primary.scan(DocumentId(0))? {
            let (id, document) = item?;
            let Some(document) = document else { continue };
            for kind in FieldKind::ALL {
                let value = document.field(kind);
                if !index.contains(kind, value, id) {
                    discrepancies.push(Discrepancy::Missing {
                        id,
                        field: kind,
                        value: value.to_string(),
                    });
                }
            }
        }

        for kind in FieldKind::ALL {
            for (value, ids) in index.snapshot(kind) {
                for id in ids {
                    let holds = primary
                        .read(id)?
                        .map(|doc| doc.field(kind) == value)
                        .unwrap_or(false);
                    if !holds {
                        discrepancies.push(Discrepancy::Extra {
                            id,
                            field: kind,
                            value: value.clone(),
                        });
                    }
                }
            }
        }

        Ok(discrepancies)
    }
}

/// A difference between the fields map and the primary store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Discrepancy {
    /// The document holds `value` but is not indexed under it.
    Missing {
        id: DocumentId,
        field: FieldKind,
        value: String,
    },
    /// The document is indexed under `value` but doesn't hold it.
    Extra {
        id: DocumentId,
        field: FieldKind,
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::IndexConfig;
    use crate::primary::{DocumentStore, DocumentStoreConfig};
    use crate::types::Document;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (DocumentStore, FieldsMap) {
        let store = DocumentStore::open(DocumentStoreConfig {
            path: dir.path().join("docs"),
            name: "users".into(),
            ..Default::default()
        })
        .unwrap();
        let index = FieldsMap::open(
            IndexConfig {
                path: dir.path().to_path_buf(),
                ..Default::default()
            },
            store.name(),
        )
        .unwrap();
        (store, index)
    }

    #[test]
    fn test_rebuild_indexes_every_field() {
        let dir = TempDir::new().unwrap();
        let (store, index) = setup(&dir);

        store
            .write(DocumentId(0), &Document::new("Rob", "SDE", "SaaS"))
            .unwrap();
        store
            .write(DocumentId(1), &Document::new("Heather", "Manager", "SaaS"))
            .unwrap();

        let stats = IndexBuilder::rebuild(&store, &index).unwrap();
        assert_eq!(stats.indexed, 2);
        assert_eq!(stats.failed, 0);

        assert_eq!(index.lookup(FieldKind::JobTitle, "SDE"), [DocumentId(0)].into());
        assert_eq!(
            index.lookup(FieldKind::Industry, "SaaS"),
            [DocumentId(0), DocumentId(1)].into()
        );
    }

    #[test]
    fn test_rebuild_empty_store() {
        let dir = TempDir::new().unwrap();
        let (store, index) = setup(&dir);

        let stats = IndexBuilder::rebuild(&store, &index).unwrap();
        assert_eq!(stats, RebuildStats::default());
        assert_eq!(index.entry_count(FieldKind::JobTitle), 0);
    }

    #[test]
    fn test_rebuild_does_not_remove_stale_entries() {
        let dir = TempDir::new().unwrap();
        let (store, index) = setup(&dir);

        store
            .write(DocumentId(0), &Document::new("Rob", "SDE", "SaaS"))
            .unwrap();
        index.add(FieldKind::JobTitle, "Stale", DocumentId(0)).unwrap();

        IndexBuilder::rebuild(&store, &index).unwrap();
        assert!(index.contains(FieldKind::JobTitle, "Stale", DocumentId(0)));
        assert!(index.contains(FieldKind::JobTitle, "SDE", DocumentId(0)));

        assert_eq!(
            IndexBuilder::verify(&store, &index).unwrap(),
            vec![Discrepancy::Extra {
                id: DocumentId(0),
                field: FieldKind::JobTitle,
                value: "Stale".to_string(),
            }]
        );
    }

    #[test]
    fn test_verify_reports_missing_entries() {
        let dir = TempDir::new().unwrap();
        let (store, index) = setup(&dir);

        store
            .write(DocumentId(5), &Document::new("Jane", "Producer", "Film"))
            .unwrap();
        assert_eq!(IndexBuilder::verify(&store, &index).unwrap().len(), 2);

        IndexBuilder::rebuild(&store, &index).unwrap();
        assert!(IndexBuilder::verify(&store, &index).unwrap().is_empty());
    }
}
