//! Core types for the fields map.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique key of a document in the primary store (assigned by the caller).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct DocumentId(pub u64);

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Document version counter. New documents start at 1.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    pub const INITIAL: Version = Version(1);

    /// The following version. Saturates at `u64::MAX`.
    pub fn next(self) -> Self {
        Version(self.0.saturating_add(1))
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::INITIAL
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document attribute that is secondarily indexed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    JobTitle,
    Industry,
}

impl FieldKind {
    /// Every indexed kind, in table order.
    pub const ALL: [FieldKind; 2] = [FieldKind::JobTitle, FieldKind::Industry];

    /// Attribute name, used as the `old_`/`new_` suffix in change events.
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::JobTitle => "job_title",
            FieldKind::Industry => "industry",
        }
    }

    /// Name of the table holding this kind's entries.
    pub fn table_name(self) -> &'static str {
        self.as_str()
    }

    /// Look up a kind by attribute name. Unindexed attributes return `None`.
    pub fn from_field_name(name: &str) -> Option<Self> {
        match name {
            "job_title" => Some(FieldKind::JobTitle),
            "industry" => Some(FieldKind::Industry),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldKind::from_field_name(s).ok_or_else(|| format!("not an indexed field: {}", s))
    }
}

/// A user document as held by the primary store.
///
/// Serialized as a flat JSON object: `{"name", "job_title", "industry", "version"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    name: String,
    job_title: String,
    industry: String,
    #[serde(default)]
    version: Version,
}

impl Document {
    /// Create a new document at the initial version.
    pub fn new(
        name: impl Into<String>,
        job_title: impl Into<String>,
        industry: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            job_title: job_title.into(),
            industry: industry.into(),
            version: Version::INITIAL,
        }
    }

    /// Override the version (for documents loaded from elsewhere).
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn job_title(&self) -> &str {
        &self.job_title
    }

    pub fn industry(&self) -> &str {
        &self.industry
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Value of an indexed field.
    pub fn field(&self, kind: FieldKind) -> &str {
        match kind {
            FieldKind::JobTitle => &self.job_title,
            FieldKind::Industry => &self.industry,
        }
    }

    /// Set the name. Bumps the version.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.version = self.version.next();
    }

    /// Set an indexed field. Bumps the version.
    pub fn set_field(&mut self, kind: FieldKind, value: impl Into<String>) {
        let value = value.into();
        match kind {
            FieldKind::JobTitle => self.job_title = value,
            FieldKind::Industry => self.industry = value,
        }
        self.version = self.version.next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_document_starts_at_version_one() {
        let doc = Document::new("Rob", "SDE", "SaaS");
        assert_eq!(doc.version(), Version(1));
        assert_eq!(doc.field(FieldKind::JobTitle), "SDE");
        assert_eq!(doc.field(FieldKind::Industry), "SaaS");
    }

    #[test]
    fn test_setters_bump_version() {
        let mut doc = Document::new("Rob", "SDE", "SaaS");
        doc.set_field(FieldKind::JobTitle, "Coder");
        doc.set_field(FieldKind::Industry, "Aviation");
        doc.set_name("Robert");

        assert_eq!(doc.version(), Version(4));
        assert_eq!(doc.job_title(), "Coder");
        assert_eq!(doc.industry(), "Aviation");
        assert_eq!(doc.name(), "Robert");
    }

    #[test]
    fn test_version_saturates() {
        assert_eq!(Version(7).next(), Version(8));
        assert_eq!(Version(u64::MAX).next(), Version(u64::MAX));

        let mut doc = Document::new("Rob", "SDE", "SaaS").with_version(Version(u64::MAX));
        doc.set_field(FieldKind::JobTitle, "Coder");
        assert_eq!(doc.version(), Version(u64::MAX));
        assert_eq!(doc.job_title(), "Coder");
    }

    #[test]
    fn test_document_json_shape() {
        let doc = Document::new("Jane", "Producer", "Film").with_version(Version(7));
        let json = serde_json::to_value(&doc).unwrap();

        assert_eq!(json["job_title"], "Producer");
        assert_eq!(json["industry"], "Film");
        assert_eq!(json["version"], 7);

        let back: Document = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_field_kind_names() {
        for kind in FieldKind::ALL {
            assert_eq!(FieldKind::from_field_name(kind.as_str()), Some(kind));
        }
        assert_eq!(FieldKind::from_field_name("name"), None);
        assert!("version".parse::<FieldKind>().is_err());
    }
}
