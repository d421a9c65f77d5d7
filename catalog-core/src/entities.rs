//! Core entity structures

use crate::{RecordStatus, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned by the authoritative store.
///
/// Opaque to the client: never generated locally, never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Record - the managed catalog entity.
///
/// Both the cache and the live subscription hold read projections of a
/// record; the store owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    pub name: String,
    pub price: f64,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<u64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Record {
    /// Inventory value contributed by this record (price times stock).
    pub fn inventory_value(&self) -> f64 {
        self.price * self.stock.unwrap_or(0) as f64
    }
}

/// Payload of a create command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordInput {
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<u64>,
}

impl CreateRecordInput {
    pub fn new(name: impl Into<String>, price: f64) -> Self {
        Self {
            name: name.into(),
            price,
            status: RecordStatus::Active,
            category: None,
            stock: None,
        }
    }

    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_stock(mut self, stock: u64) -> Self {
        self.stock = Some(stock);
        self
    }
}

/// Payload of an update command. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRecordInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RecordStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<u64>,
}

impl UpdateRecordInput {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.price.is_none()
            && self.status.is_none()
            && self.category.is_none()
            && self.stock.is_none()
    }

    /// Apply the present fields to `record`, stamping `updated_at`.
    pub fn apply_to(&self, record: &mut Record, now: Timestamp) {
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        if let Some(price) = self.price {
            record.price = price;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(category) = &self.category {
            record.category = Some(category.clone());
        }
        if let Some(stock) = self.stock {
            record.stock = Some(stock);
        }
        record.updated_at = now;
    }
}

/// Body of a status-change command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: RecordStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_record_serializes_camel_case() {
        let now = Utc::now();
        let record = Record {
            id: RecordId::new("42"),
            name: "Widget".to_string(),
            price: 9.99,
            status: RecordStatus::Active,
            category: None,
            stock: Some(3),
            created_at: now,
            updated_at: now,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], "42");
        assert!(value.get("createdAt").is_some());
        assert!(value.get("updatedAt").is_some());
        assert!(value.get("category").is_none());
    }

    #[test]
    fn test_create_input_defaults_status_to_active() {
        let input: CreateRecordInput =
            serde_json::from_str(r#"{"name":"Widget","price":9.99}"#).unwrap();
        assert_eq!(input.status, RecordStatus::Active);
        assert_eq!(input.stock, None);
    }

    #[test]
    fn test_update_apply_only_touches_present_fields() {
        let created = Utc::now();
        let mut record = Record {
            id: RecordId::new("1"),
            name: "Old".to_string(),
            price: 1.0,
            status: RecordStatus::Active,
            category: Some("tools".to_string()),
            stock: None,
            created_at: created,
            updated_at: created,
        };
        let later = created + chrono::Duration::seconds(5);
        let update = UpdateRecordInput {
            price: Some(2.5),
            ..Default::default()
        };
        update.apply_to(&mut record, later);
        assert_eq!(record.name, "Old");
        assert_eq!(record.price, 2.5);
        assert_eq!(record.category.as_deref(), Some("tools"));
        assert_eq!(record.updated_at, later);
        assert_eq!(record.created_at, created);
    }

    #[test]
    fn test_inventory_value() {
        let now = Utc::now();
        let record = Record {
            id: RecordId::new("1"),
            name: "Bolt".to_string(),
            price: 0.5,
            status: RecordStatus::Active,
            category: None,
            stock: Some(10),
            created_at: now,
            updated_at: now,
        };
        assert!((record.inventory_value() - 5.0).abs() < f64::EPSILON);
    }
}
