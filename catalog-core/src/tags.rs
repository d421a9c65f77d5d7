//! Cache tag vocabulary.
//!
//! A tag is a `kind` plus an optional `id`. Queries declare the tags they
//! provide; writes declare the tags they invalidate. Two tags match only when
//! both parts are equal.

use crate::RecordId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag kind carried by record-list and per-record entries.
pub const RECORDS_TAG_KIND: &str = "Records";

/// Tag kind carried by the analytics overview.
pub const ANALYTICS_TAG_KIND: &str = "Analytics";

/// Reserved id marking the collection-wide tag.
pub const LIST_TAG_ID: &str = "LIST";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheTag {
    pub kind: String,
    pub id: Option<String>,
}

impl CacheTag {
    /// A tag with no id.
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
        }
    }

    pub fn with_id(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: Some(id.into()),
        }
    }

    /// The collection-wide tag every list query provides.
    pub fn collection() -> Self {
        Self::with_id(RECORDS_TAG_KIND, LIST_TAG_ID)
    }

    /// The tag a single record contributes to any query containing it.
    pub fn record(id: &RecordId) -> Self {
        Self::with_id(RECORDS_TAG_KIND, id.as_str())
    }

    pub fn analytics() -> Self {
        Self::kind(ANALYTICS_TAG_KIND)
    }

    /// Tags invalidated by a successful create.
    pub fn for_create() -> Vec<Self> {
        vec![Self::collection(), Self::analytics()]
    }

    /// Tags invalidated by a successful update, delete or status change.
    pub fn for_record_write(id: &RecordId) -> Vec<Self> {
        vec![Self::record(id), Self::collection(), Self::analytics()]
    }
}

impl fmt::Display for CacheTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}#{}", self.kind, id),
            None => f.write_str(&self.kind),
        }
    }
}
