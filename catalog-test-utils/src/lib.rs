//! Catalog Test Utilities
//!
//! Centralized test infrastructure for the catalog workspace:
//! - An in-memory authoritative store serving both the request/response
//!   transport and the live snapshot feed
//! - Proptest generators for records and write inputs
//! - Test fixtures for common scenarios
//! - Small assertions and async polling helpers

pub use catalog_core::{
    CreateRecordInput, LiveMessage, LiveRecord, Record, RecordId, RecordStatus, SubscribeRequest,
    Timestamp, UpdateRecordInput,
};

use async_trait::async_trait;
use catalog_client::api_client::{ApiClientError, RecordTransport};
use catalog_client::realtime::{LiveError, SnapshotSource, SnapshotStream};
use catalog_core::{sort_newest_first, AnalyticsOverview, CategoryCount, StatusCount};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// 2026-01-01T00:00:00Z. Store timestamps advance one second per write so
/// creation order is total.
const STORE_EPOCH_SECS: i64 = 1_767_225_600;

const PUSH_CAPACITY: usize = 64;

/// Operations the store counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    List,
    Create,
    Update,
    Delete,
    SetStatus,
    Analytics,
    Subscribe,
}

impl StoreOp {
    pub const WRITES: [StoreOp; 4] = [
        StoreOp::Create,
        StoreOp::Update,
        StoreOp::Delete,
        StoreOp::SetStatus,
    ];
}

/// A failure the store answers with instead of performing an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    Rejected { status: u16, message: String },
    Unavailable(String),
}

impl Failure {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    fn into_error(self) -> ApiClientError {
        match self {
            Failure::Rejected { status, message } => ApiClientError::rejected(status, message),
            Failure::Unavailable(reason) => ApiClientError::Unavailable(reason),
        }
    }
}

#[derive(Debug, Clone)]
enum Push {
    Snapshot(Vec<LiveRecord>),
    Error(String),
}

#[derive(Debug, Default)]
struct StoreState {
    records: Vec<Record>,
    sequence: i64,
    failures: HashMap<StoreOp, Failure>,
    refuse_subscriptions: Option<String>,
    calls: HashMap<StoreOp, usize>,
}

impl StoreState {
    fn tick(&mut self) -> Timestamp {
        self.sequence += 1;
        DateTime::from_timestamp(STORE_EPOCH_SECS + self.sequence, 0).unwrap_or_else(Utc::now)
    }

    fn newest_first(&self) -> Vec<Record> {
        let mut records = self.records.clone();
        sort_newest_first(&mut records);
        records
    }

    fn position(&self, id: &RecordId) -> Option<usize> {
        self.records.iter().position(|record| &record.id == id)
    }
}

/// The authoritative store, held in memory.
///
/// Implements [`RecordTransport`] and [`SnapshotSource`]; every committed
/// write is pushed to all open live connections as a full snapshot.
#[derive(Clone)]
pub struct InMemoryStore {
    collection: String,
    state: Arc<Mutex<StoreState>>,
    push: broadcast::Sender<Push>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (push, _) = broadcast::channel(PUSH_CAPACITY);
        Self {
            collection: "products".to_string(),
            state: Arc::new(Mutex::new(StoreState::default())),
            push,
        }
    }

    /// Store pre-loaded with `records` (no snapshot is pushed).
    pub fn with_records(records: Vec<Record>) -> Self {
        let store = Self::new();
        {
            let mut state = store.lock();
            state.sequence = records.len() as i64;
            state.records = records;
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, op: StoreOp) -> (MutexGuard<'_, StoreState>, Result<(), ApiClientError>) {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        let outcome = match state.failures.remove(&op) {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        };
        (state, outcome)
    }

    fn commit(&self, state: &StoreState) {
        let records = state.newest_first().iter().map(LiveRecord::from).collect();
        // no receivers is fine
        let _ = self.push.send(Push::Snapshot(records));
    }

    fn not_found(id: &RecordId) -> ApiClientError {
        ApiClientError::rejected(404, format!("Record {id} not found"))
    }

    /// Current records, newest first.
    pub fn records(&self) -> Vec<Record> {
        self.lock().newest_first()
    }

    pub fn get(&self, id: &RecordId) -> Option<Record> {
        let state = self.lock();
        state.position(id).map(|index| state.records[index].clone())
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Times `op` was attempted, failed attempts included.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn write_calls(&self) -> usize {
        StoreOp::WRITES.iter().map(|op| self.calls(*op)).sum()
    }

    /// Answer the next `op` with `failure` instead of performing it.
    pub fn fail_next(&self, op: StoreOp, failure: Failure) {
        self.lock().failures.insert(op, failure);
    }

    /// Refuse new live connections until [`accept_subscriptions`](Self::accept_subscriptions).
    pub fn refuse_subscriptions(&self, reason: impl Into<String>) {
        self.lock().refuse_subscriptions = Some(reason.into());
    }

    pub fn accept_subscriptions(&self) {
        self.lock().refuse_subscriptions = None;
    }

    /// Send an error frame to every open live connection.
    pub fn break_live(&self, message: impl Into<String>) {
        let _ = self.push.send(Push::Error(message.into()));
    }

    /// Live connections currently open against the store.
    pub fn live_connections(&self) -> usize {
        self.push.receiver_count()
    }

    /// A write by another party: committed and pushed, never counted.
    pub fn external_create(&self, input: CreateRecordInput) -> Record {
        let mut state = self.lock();
        let record = insert(&mut state, input);
        self.commit(&state);
        record
    }

    pub fn external_delete(&self, id: &RecordId) -> bool {
        let mut state = self.lock();
        let Some(index) = state.position(id) else {
            return false;
        };
        state.records.remove(index);
        self.commit(&state);
        true
    }

    pub fn overview(&self) -> AnalyticsOverview {
        overview(&self.lock().records)
    }
}

fn insert(state: &mut StoreState, input: CreateRecordInput) -> Record {
    let now = state.tick();
    let record = Record {
        id: RecordId::new(format!("rec-{}", state.sequence)),
        name: input.name,
        price: input.price,
        status: input.status,
        category: input.category,
        stock: input.stock,
        created_at: now,
        updated_at: now,
    };
    state.records.push(record.clone());
    record
}

fn overview(records: &[Record]) -> AnalyticsOverview {
    let mut by_status: BTreeMap<&'static str, (RecordStatus, u64)> = BTreeMap::new();
    let mut by_category: BTreeMap<String, u64> = BTreeMap::new();
    for record in records {
        by_status
            .entry(record.status.as_str())
            .or_insert((record.status, 0))
            .1 += 1;
        if let Some(category) = &record.category {
            *by_category.entry(category.clone()).or_default() += 1;
        }
    }
    AnalyticsOverview {
        by_status: by_status
            .into_values()
            .map(|(status, count)| StatusCount { status, count })
            .collect(),
        by_category: by_category
            .into_iter()
            .map(|(category, count)| CategoryCount { category, count })
            .collect(),
        total_inventory_value: records.iter().map(Record::inventory_value).sum(),
    }
}

#[async_trait]
impl RecordTransport for InMemoryStore {
    async fn list(&self) -> Result<Vec<Record>, ApiClientError> {
        let (state, outcome) = self.begin(StoreOp::List);
        outcome?;
        Ok(state.newest_first())
    }

    async fn create(&self, input: &CreateRecordInput) -> Result<Record, ApiClientError> {
        let (mut state, outcome) = self.begin(StoreOp::Create);
        outcome?;
        let record = insert(&mut state, input.clone());
        self.commit(&state);
        Ok(record)
    }

    async fn update(
        &self,
        id: &RecordId,
        input: &UpdateRecordInput,
    ) -> Result<Record, ApiClientError> {
        let (mut state, outcome) = self.begin(StoreOp::Update);
        outcome?;
        let index = state.position(id).ok_or_else(|| Self::not_found(id))?;
        let now = state.tick();
        input.apply_to(&mut state.records[index], now);
        let record = state.records[index].clone();
        self.commit(&state);
        Ok(record)
    }

    async fn delete(&self, id: &RecordId) -> Result<(), ApiClientError> {
        let (mut state, outcome) = self.begin(StoreOp::Delete);
        outcome?;
        let index = state.position(id).ok_or_else(|| Self::not_found(id))?;
        state.records.remove(index);
        self.commit(&state);
        Ok(())
    }

    async fn set_status(
        &self,
        id: &RecordId,
        status: RecordStatus,
    ) -> Result<Record, ApiClientError> {
        let (mut state, outcome) = self.begin(StoreOp::SetStatus);
        outcome?;
        let index = state.position(id).ok_or_else(|| Self::not_found(id))?;
        let now = state.tick();
        let record = &mut state.records[index];
        record.status = status;
        record.updated_at = now;
        let record = record.clone();
        self.commit(&state);
        Ok(record)
    }

    async fn analytics_overview(&self) -> Result<AnalyticsOverview, ApiClientError> {
        let (state, outcome) = self.begin(StoreOp::Analytics);
        outcome?;
        Ok(overview(&state.records))
    }
}

#[async_trait]
impl SnapshotSource for InMemoryStore {
    async fn open(&self, request: SubscribeRequest) -> Result<SnapshotStream, LiveError> {
        let mut state = self.lock();
        *state.calls.entry(StoreOp::Subscribe).or_default() += 1;
        if request.collection != self.collection {
            return Err(LiveError::Server(format!(
                "unknown collection {}",
                request.collection
            )));
        }
        if let Some(reason) = &state.refuse_subscriptions {
            return Err(LiveError::Connect(reason.clone()));
        }

        // subscribe under the lock so no commit falls between the initial
        // snapshot and the first push
        let receiver = self.push.subscribe();
        let initial = LiveMessage::Snapshot {
            records: state.newest_first().iter().map(LiveRecord::from).collect(),
        };
        drop(state);

        let pushes = BroadcastStream::new(receiver).map(|push| match push {
            Ok(Push::Snapshot(records)) => Ok(LiveMessage::Snapshot { records }),
            Ok(Push::Error(message)) => Ok(LiveMessage::Error { message }),
            Err(err) => Err(LiveError::Transport(err.to_string())),
        });
        Ok(Box::pin(
            futures_util::stream::once(async move { Ok(initial) }).chain(pushes),
        ))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for catalog types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_record_id() -> impl Strategy<Value = RecordId> {
        "[a-z0-9]{1,12}".prop_map(RecordId::new)
    }

    pub fn arb_status() -> impl Strategy<Value = RecordStatus> {
        prop_oneof![Just(RecordStatus::Active), Just(RecordStatus::Inactive)]
    }

    /// Timestamps between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_577_836_800i64..1_893_456_000i64)
            .prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    pub fn arb_category() -> impl Strategy<Value = Option<String>> {
        prop::option::of(prop_oneof![
            Just("tools".to_string()),
            Just("garden".to_string()),
            Just("kitchen".to_string()),
        ])
    }

    pub fn arb_record() -> impl Strategy<Value = Record> {
        (
            arb_record_id(),
            "[A-Za-z][A-Za-z ]{0,23}",
            0.0f64..10_000.0,
            arb_status(),
            arb_category(),
            prop::option::of(0u64..500),
            arb_timestamp(),
        )
            .prop_map(|(id, name, price, status, category, stock, created_at)| Record {
                id,
                name,
                price,
                status,
                category,
                stock,
                created_at,
                updated_at: created_at,
            })
    }

    /// Records with distinct ids, newest first.
    pub fn arb_records(max: usize) -> impl Strategy<Value = Vec<Record>> {
        prop::collection::vec(arb_record(), 0..=max).prop_map(|records| {
            let mut seen = std::collections::HashSet::new();
            let mut records: Vec<Record> = records
                .into_iter()
                .filter(|record| seen.insert(record.id.clone()))
                .collect();
            sort_newest_first(&mut records);
            records
        })
    }

    /// Create inputs that pass validation.
    pub fn arb_create_input() -> impl Strategy<Value = CreateRecordInput> {
        (
            "[A-Za-z][A-Za-z0-9 ]{0,23}",
            0.0f64..10_000.0,
            arb_status(),
            arb_category(),
            prop::option::of(0u64..500),
        )
            .prop_map(|(name, price, status, category, stock)| CreateRecordInput {
                name,
                price,
                status,
                category,
                stock,
            })
    }

    /// Create inputs that fail validation: blank name or bad price.
    pub fn arb_invalid_create_input() -> impl Strategy<Value = CreateRecordInput> {
        prop_oneof![
            ("[ \t]{0,4}", 0.0f64..100.0)
                .prop_map(|(name, price)| CreateRecordInput::new(name, price)),
            (-10_000.0f64..-0.01).prop_map(|price| CreateRecordInput::new("Widget", price)),
            Just(CreateRecordInput::new("Widget", f64::NAN)),
            Just(CreateRecordInput::new("Widget", f64::INFINITY)),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records and inputs for common scenarios.

    use super::*;

    /// A record created `created_secs` seconds after the store epoch.
    pub fn record(id: &str, name: &str, price: f64, created_secs: i64) -> Record {
        let created_at =
            DateTime::from_timestamp(STORE_EPOCH_SECS + created_secs, 0).unwrap_or_else(Utc::now);
        Record {
            id: RecordId::new(id),
            name: name.to_string(),
            price,
            status: RecordStatus::Active,
            category: None,
            stock: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// `{name: "Widget", price: 9.99, status: "active"}`.
    pub fn widget_input() -> CreateRecordInput {
        CreateRecordInput::new("Widget", 9.99).with_status(RecordStatus::Active)
    }

    /// Three records with ids `a`, `b` and `42`, oldest first.
    pub fn sample_records() -> Vec<Record> {
        vec![
            record("a", "Anvil", 120.0, -30),
            record("b", "Bucket", 4.5, -20),
            record("42", "Hammer", 18.25, -10),
        ]
    }

    pub fn sample_store() -> InMemoryStore {
        InMemoryStore::with_records(sample_records())
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions and polling helpers.

    use super::*;
    use std::time::Duration;

    /// Ids of `records`, in order.
    pub fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(|record| record.id.as_str()).collect()
    }

    #[track_caller]
    pub fn assert_ids(records: &[Record], expected: &[&str]) {
        assert_eq!(ids(records), expected, "unexpected record ids");
    }

    #[track_caller]
    pub fn assert_newest_first(records: &[Record]) {
        for pair in records.windows(2) {
            assert!(
                pair[0].created_at >= pair[1].created_at,
                "records out of order: {} before {}",
                pair[0].id,
                pair[1].id
            );
        }
    }

    /// Poll `condition` every 5ms until it holds; false after `timeout`.
    pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_store_lists_newest_first() {
        let store = fixtures::sample_store();
        let records = store.list().await.unwrap();
        assertions::assert_ids(&records, &["42", "b", "a"]);
        assert_eq!(store.calls(StoreOp::List), 1);
    }

    #[tokio::test]
    async fn test_create_pushes_snapshot() {
        let store = InMemoryStore::new();
        let mut stream = store
            .open(SubscribeRequest::newest_first("products"))
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, LiveMessage::Snapshot { records: vec![] });

        let created = store.create(&fixtures::widget_input()).await.unwrap();
        let Some(Ok(LiveMessage::Snapshot { records })) = stream.next().await else {
            panic!("expected a snapshot");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, created.id);
    }

    #[tokio::test]
    async fn test_fail_next_applies_once() {
        let store = fixtures::sample_store();
        store.fail_next(StoreOp::Delete, Failure::rejected(409, "In use"));
        let err = store.delete(&RecordId::new("a")).await.unwrap_err();
        assert_eq!(err.server_message(), Some("In use"));
        store.delete(&RecordId::new("a")).await.unwrap();
        assert_eq!(store.calls(StoreOp::Delete), 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_collection_is_refused() {
        let store = InMemoryStore::new();
        let result = store.open(SubscribeRequest::newest_first("orders")).await;
        assert!(matches!(result, Err(LiveError::Server(_))));
    }

    #[test]
    fn test_overview_counts() {
        let mut records = fixtures::sample_records();
        records[0].status = RecordStatus::Inactive;
        records[1].category = Some("garden".to_string());
        records[1].stock = Some(4);
        let overview = overview(&records);
        assert_eq!(overview.count_for(RecordStatus::Active), 2);
        assert_eq!(overview.count_for(RecordStatus::Inactive), 1);
        assert_eq!(overview.by_category.len(), 1);
        assert_eq!(overview.total_inventory_value, 18.0);
    }

    proptest! {
        #[test]
        fn prop_generated_records_are_sorted(records in generators::arb_records(12)) {
            assertions::assert_newest_first(&records);
        }

        #[test]
        fn prop_generated_inputs_validate(input in generators::arb_create_input()) {
            prop_assert!(catalog_core::validate_create(&input).is_ok());
        }

        #[test]
        fn prop_invalid_inputs_fail(input in generators::arb_invalid_create_input()) {
            prop_assert!(catalog_core::validate_create(&input).is_err());
        }
    }
}
