//! Aggregate statistics payload.
//!
//! Computed by the store; the client only caches and displays it.

use crate::RecordStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: RecordStatus,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsOverview {
    pub by_status: Vec<StatusCount>,
    pub by_category: Vec<CategoryCount>,
    pub total_inventory_value: f64,
}

impl AnalyticsOverview {
    pub fn count_for(&self, status: RecordStatus) -> u64 {
        self.by_status
            .iter()
            .find(|s| s.status == status)
            .map(|s| s.count)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_overview() {
        let json = r#"{
            "byStatus": [{"status": "active", "count": 3}, {"status": "inactive", "count": 1}],
            "byCategory": [{"category": "tools", "count": 2}],
            "totalInventoryValue": 120.5
        }"#;
        let overview: AnalyticsOverview = serde_json::from_str(json).unwrap();
        assert_eq!(overview.count_for(RecordStatus::Active), 3);
        assert_eq!(overview.count_for(RecordStatus::Inactive), 1);
        assert_eq!(overview.by_category[0].category, "tools");
    }
}
