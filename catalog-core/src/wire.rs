//! Wire shapes shared by the REST and live transports.

use crate::{Record, RecordId, RecordStatus, Timestamp};
use serde::{Deserialize, Serialize};

/// Success envelope returned by every REST operation.
///
/// `data` is absent on operations that return nothing (delete).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
        }
    }

    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
        }
    }
}

/// Error body carrying the server's human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Opening frame a client sends on a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub collection: String,
    pub order_by: String,
    pub direction: String,
}

impl SubscribeRequest {
    /// Full collection, newest first.
    pub fn newest_first(collection: impl Into<String>) -> Self {
        Self {
            kind: "subscribe".to_string(),
            collection: collection.into(),
            order_by: "createdAt".to_string(),
            direction: "desc".to_string(),
        }
    }
}

/// Frames pushed by the store on a live connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LiveMessage {
    /// The complete collection as of one commit.
    Snapshot { records: Vec<LiveRecord> },
    /// The store gave up on this subscription.
    Error { message: String },
}

/// A record as pushed by the live channel; timestamps may be missing on
/// documents written without them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveRecord {
    pub id: RecordId,
    pub name: String,
    pub price: f64,
    pub status: RecordStatus,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub stock: Option<u64>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl LiveRecord {
    /// Fill missing timestamps: creation falls back to `received_at`, update
    /// falls back to creation.
    pub fn into_record(self, received_at: Timestamp) -> Record {
        let created_at = self.created_at.unwrap_or(received_at);
        let updated_at = self.updated_at.unwrap_or(created_at);
        Record {
            id: self.id,
            name: self.name,
            price: self.price,
            status: self.status,
            category: self.category,
            stock: self.stock,
            created_at,
            updated_at,
        }
    }
}

impl From<&Record> for LiveRecord {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            price: record.price,
            status: record.status,
            category: record.category.clone(),
            stock: record.stock,
            created_at: Some(record.created_at),
            updated_at: Some(record.updated_at),
        }
    }
}
