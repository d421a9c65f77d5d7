//! Catalog Core - Entity Types
//!
//! Pure data structures shared by every other crate in the workspace: the
//! managed record, its write inputs, the cache-tag vocabulary, wire envelopes
//! and the opaque analytics payload. Schema validation lives here too so that
//! it runs before anything touches the network.

use chrono::{DateTime, Utc};

mod analytics;
mod entities;
mod enums;
mod error;
mod tags;
mod validation;
mod wire;

pub use analytics::{AnalyticsOverview, CategoryCount, StatusCount};
pub use entities::{CreateRecordInput, Record, RecordId, StatusChange, UpdateRecordInput};
pub use enums::{RecordStatus, RecordStatusParseError};
pub use error::ValidationError;
pub use tags::{CacheTag, ANALYTICS_TAG_KIND, LIST_TAG_ID, RECORDS_TAG_KIND};
pub use validation::{normalize_category, validate_create, validate_update};
pub use wire::{Envelope, ErrorBody, LiveMessage, LiveRecord, SubscribeRequest};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Sort records the way the authoritative store lists them: newest first.
///
/// The sort is stable, so records sharing a creation timestamp keep the order
/// the store delivered them in.
pub fn sort_newest_first(records: &mut [Record]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
