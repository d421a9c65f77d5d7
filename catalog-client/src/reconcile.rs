//! Choosing between the cache-backed list and the live snapshot.
//!
//! The selector never merges the two sources. It renders one of them whole,
//! which rules out partial or duplicated rows while the cache refetch and the
//! live push for the same write race each other.

use crate::realtime::LiveState;
use catalog_core::Record;
use serde::Deserialize;
use std::fmt;

/// Rule for picking the rendered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    /// Render the live snapshot once the subscription is connected and has
    /// delivered one, even when it is empty. Render the cache until then.
    #[default]
    ConnectionAware,
    /// Render the live snapshot whenever it is non-empty, else the cache.
    ///
    /// Cannot tell "not connected yet" from "collection is empty", so an
    /// emptied collection keeps showing the cache's stale rows.
    PreferNonEmpty,
}

impl ReconcilePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilePolicy::ConnectionAware => "connection_aware",
            ReconcilePolicy::PreferNonEmpty => "prefer_non_empty",
        }
    }
}

impl fmt::Display for ReconcilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Live,
}

/// The record sequence to render and where it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection<'a> {
    pub source: Source,
    pub records: &'a [Record],
}

impl<'a> Selection<'a> {
    fn cache(records: &'a [Record]) -> Self {
        Self {
            source: Source::Cache,
            records,
        }
    }

    fn live(records: &'a [Record]) -> Self {
        Self {
            source: Source::Live,
            records,
        }
    }
}

pub fn select<'a>(
    policy: ReconcilePolicy,
    cache_list: &'a [Record],
    live: &'a LiveState,
) -> Selection<'a> {
    match (policy, live.records()) {
        (ReconcilePolicy::ConnectionAware, Some(records)) if live.is_live() => {
            Selection::live(records)
        }
        (ReconcilePolicy::PreferNonEmpty, Some(records)) if !records.is_empty() => {
            Selection::live(records)
        }
        _ => Selection::cache(cache_list),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::{ConnectionStatus, LiveEvent, LiveSnapshot, SubscriptionId};
    use catalog_core::{RecordId, RecordStatus};
    use chrono::Utc;

    fn record(id: &str) -> Record {
        let now = Utc::now();
        Record {
            id: RecordId::new(id),
            name: id.to_uppercase(),
            price: 5.0,
            status: RecordStatus::Active,
            category: None,
            stock: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn connected(records: Vec<Record>) -> LiveState {
        let mut state = LiveState::default();
        state.apply(LiveEvent::Status(ConnectionStatus::Connected));
        state.apply(LiveEvent::Snapshot(LiveSnapshot {
            subscription: SubscriptionId::new(),
            sequence: 1,
            received_at: Utc::now(),
            records,
        }));
        state
    }

    #[test]
    fn test_connected_empty_snapshot_wins() {
        let cache = vec![record("a"), record("b")];
        let live = connected(Vec::new());
        let selection = select(ReconcilePolicy::ConnectionAware, &cache, &live);
        assert_eq!(selection.source, Source::Live);
        assert!(selection.records.is_empty());
    }

    #[test]
    fn test_prefer_non_empty_keeps_stale_cache() {
        let cache = vec![record("a"), record("b")];
        let live = connected(Vec::new());
        let selection = select(ReconcilePolicy::PreferNonEmpty, &cache, &live);
        assert_eq!(selection.source, Source::Cache);
        assert_eq!(selection.records.len(), 2);
    }

    #[test]
    fn test_live_snapshot_replaces_cache() {
        let cache = vec![record("a"), record("b")];
        let live = connected(vec![record("c")]);
        for policy in [ReconcilePolicy::ConnectionAware, ReconcilePolicy::PreferNonEmpty] {
            let selection = select(policy, &cache, &live);
            assert_eq!(selection.source, Source::Live);
            let ids: Vec<&str> = selection.records.iter().map(|r| r.id.as_str()).collect();
            assert_eq!(ids, vec!["c"]);
        }
    }

    #[test]
    fn test_connecting_renders_cache() {
        let cache = vec![record("a")];
        let mut live = LiveState::default();
        live.apply(LiveEvent::Status(ConnectionStatus::Connecting));
        let selection = select(ReconcilePolicy::ConnectionAware, &cache, &live);
        assert_eq!(selection.source, Source::Cache);
    }

    #[test]
    fn test_policy_names() {
        let policy: ReconcilePolicy = serde_json::from_str("\"prefer_non_empty\"").unwrap();
        assert_eq!(policy, ReconcilePolicy::PreferNonEmpty);
        assert_eq!(ReconcilePolicy::default().to_string(), "connection_aware");
    }
}
