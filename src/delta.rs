//! Change events (deltas) describing a document mutation.
//!
//! The payload is a flat JSON object. Recognized keys:
//!
//! - `version`: document version after the mutation
//! - `old_<field>`: previous value of an indexed field
//! - `new_<field>`: new value of an indexed field
//!
//! Keys for unindexed fields (`old_name`, ...) and unknown keys are ignored.

use crate::error::{IndexError, Result};
use crate::types::{Document, DocumentId, FieldKind, Version};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const VERSION_KEY: &str = "version";
const OLD_PREFIX: &str = "old_";
const NEW_PREFIX: &str = "new_";

/// Old and new value of one field in a delta. Either side may be missing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldChange {
    pub old: Option<String>,
    pub new: Option<String>,
}

/// A parsed change event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delta {
    version: Option<Version>,
    changes: BTreeMap<FieldKind, FieldChange>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Record a transition of `field` from `old` to `new`.
    pub fn with_change(mut self, field: FieldKind, old: &str, new: &str) -> Self {
        self.changes.insert(
            field,
            FieldChange {
                old: Some(old.to_string()),
                new: Some(new.to_string()),
            },
        );
        self
    }

    /// Delta for a mutation from `before` to `after`: every indexed field whose value
    /// differs, stamped with `after`'s version.
    pub fn between(before: &Document, after: &Document) -> Self {
        let mut delta = Delta::new().with_version(after.version());
        for kind in FieldKind::ALL {
            if before.field(kind) != after.field(kind) {
                delta = delta.with_change(kind, before.field(kind), after.field(kind));
            }
        }
        delta
    }

    /// Delta for a newly created document: insertions only.
    pub fn created(document: &Document) -> Self {
        let mut delta = Delta::new().with_version(document.version());
        for kind in FieldKind::ALL {
            delta.changes.insert(
                kind,
                FieldChange {
                    old: None,
                    new: Some(document.field(kind).to_string()),
                },
            );
        }
        delta
    }

    /// Delta for a deleted document: removals only, unversioned so it is never
    /// considered stale.
    pub fn deleted(document: &Document) -> Self {
        let mut delta = Delta::new();
        for kind in FieldKind::ALL {
            delta.changes.insert(
                kind,
                FieldChange {
                    old: Some(document.field(kind).to_string()),
                    new: None,
                },
            );
        }
        delta
    }

    /// Parse a payload received for document `id`.
    pub fn parse(id: DocumentId, payload: &str) -> Result<Self> {
        let object: Map<String, Value> =
            serde_json::from_str(payload).map_err(|e| malformed(id, e.to_string()))?;

        let mut delta = Delta::new();
        for (key, value) in object {
            if key == VERSION_KEY {
                delta.version = Some(parse_version(id, &value)?);
            } else if let Some(field) = key.strip_prefix(OLD_PREFIX) {
                if let Some(kind) = FieldKind::from_field_name(field) {
                    delta.changes.entry(kind).or_default().old =
                        Some(field_value(id, &key, &value)?);
                }
            } else if let Some(field) = key.strip_prefix(NEW_PREFIX) {
                if let Some(kind) = FieldKind::from_field_name(field) {
                    delta.changes.entry(kind).or_default().new =
                        Some(field_value(id, &key, &value)?);
                }
            }
        }

        Ok(delta)
    }

    /// Encode as a payload. All values are written as strings.
    pub fn to_payload(&self) -> Result<String> {
        let mut object = Map::new();
        if let Some(version) = self.version {
            object.insert(VERSION_KEY.to_string(), Value::String(version.to_string()));
        }
        for (kind, change) in &self.changes {
            if let Some(old) = &change.old {
                object.insert(format!("{}{}", OLD_PREFIX, kind), Value::String(old.clone()));
            }
            if let Some(new) = &change.new {
                object.insert(format!("{}{}", NEW_PREFIX, kind), Value::String(new.clone()));
            }
        }
        Ok(serde_json::to_string(&object)?)
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// Field changes, in field order.
    pub fn changes(&self) -> impl Iterator<Item = (FieldKind, &FieldChange)> {
        self.changes.iter().map(|(k, c)| (*k, c))
    }

    pub fn change(&self, field: FieldKind) -> Option<&FieldChange> {
        self.changes.get(&field)
    }

    /// True when the delta touches no indexed field.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

fn malformed(id: DocumentId, reason: impl Into<String>) -> IndexError {
    IndexError::MalformedEvent {
        id,
        reason: reason.into(),
    }
}

fn parse_version(id: DocumentId, value: &Value) -> Result<Version> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .map(Version)
        .ok_or_else(|| malformed(id, format!("invalid version: {}", value)))
}

fn field_value(id: DocumentId, key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(malformed(id, format!("invalid value for {}: {}", key, other))),
    }
}
