//! Command/query gateway.
//!
//! Reads go through the shared [`QueryCache`]; writes go straight to the
//! transport and, once acknowledged, invalidate the tags they affect. A
//! failed write never touches the cache and is never retried here.

use crate::api_client::{ApiClientError, RecordTransport};
use async_trait::async_trait;
use catalog_cache::{
    CacheError, FetchError, Freshness, QueryCache, QueryFetcher, QueryKey, QuerySubscription,
};
use catalog_core::{
    validate_create, validate_update, AnalyticsOverview, CacheTag, CreateRecordInput, Record,
    RecordId, RecordStatus, UpdateRecordInput, ValidationError,
};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// The imperative actions and reads a view can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Load,
    LoadAnalytics,
    Create,
    Update,
    Delete,
    SetStatus,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::Load,
        ActionKind::LoadAnalytics,
        ActionKind::Create,
        ActionKind::Update,
        ActionKind::Delete,
        ActionKind::SetStatus,
    ];

    /// Message shown when the store gives no usable message of its own.
    pub fn fallback_message(&self) -> &'static str {
        match self {
            ActionKind::Load => "Failed to load records.",
            ActionKind::LoadAnalytics => "Failed to load statistics.",
            ActionKind::Create => "Failed to create record. Please try again.",
            ActionKind::Update => "Failed to update record. Please try again.",
            ActionKind::Delete => "Failed to delete record.",
            ActionKind::SetStatus => "Failed to change status.",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Load => "list",
            ActionKind::LoadAnalytics => "analytics",
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
            ActionKind::SetStatus => "set_status",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{kind} rejected: {}", .message.as_deref().unwrap_or("no message"))]
    Rejected {
        kind: ActionKind,
        status: Option<u16>,
        message: Option<String>,
    },

    #[error("{kind} failed: {message}")]
    Transport { kind: ActionKind, message: String },
}

impl ActionError {
    fn from_api(kind: ActionKind, err: ApiClientError) -> Self {
        match err {
            ApiClientError::Rejected { status, message } => Self::Rejected {
                kind,
                status: Some(status),
                message: message.filter(|m| !m.trim().is_empty()),
            },
            other => Self::Transport {
                kind,
                message: other.to_string(),
            },
        }
    }

    fn from_cache(kind: ActionKind, err: CacheError) -> Self {
        match err {
            CacheError::Fetch(FetchError::Rejected { status, message }) => Self::Rejected {
                kind,
                status,
                message: Some(message).filter(|m| !m.trim().is_empty()),
            },
            other => Self::Transport {
                kind,
                message: other.to_string(),
            },
        }
    }

    /// Map a fetch failure recorded on a cache entry.
    pub fn from_fetch(kind: ActionKind, err: &FetchError) -> Self {
        Self::from_cache(kind, CacheError::Fetch(err.clone()))
    }

    /// Text to show the operator: the store's message when it sent one,
    /// otherwise the action's generic fallback.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(err) => err.to_string(),
            Self::Rejected {
                message: Some(message),
                ..
            } => message.clone(),
            Self::Rejected { kind, .. } | Self::Transport { kind, .. } => {
                kind.fallback_message().to_string()
            }
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// The record list, tagged with the collection and every record it holds.
#[derive(Clone)]
pub struct ListRecords {
    transport: Arc<dyn RecordTransport>,
}

impl ListRecords {
    pub fn new(transport: Arc<dyn RecordTransport>) -> Self {
        Self { transport }
    }

    pub fn cache_key() -> QueryKey {
        QueryKey::operation("records.list")
    }
}

#[async_trait]
impl QueryFetcher for ListRecords {
    type Output = Vec<Record>;

    fn key(&self) -> QueryKey {
        Self::cache_key()
    }

    fn provides_tags(&self, output: Option<&Vec<Record>>) -> Vec<CacheTag> {
        let mut tags = vec![CacheTag::collection()];
        if let Some(records) = output {
            tags.extend(records.iter().map(|record| CacheTag::record(&record.id)));
        }
        tags
    }

    async fn fetch(&self) -> Result<Vec<Record>, FetchError> {
        let mut records = self.transport.list().await?;
        catalog_core::sort_newest_first(&mut records);
        Ok(records)
    }
}

/// The aggregate statistics, computed by the store.
#[derive(Clone)]
pub struct AnalyticsOverviewQuery {
    transport: Arc<dyn RecordTransport>,
}

impl AnalyticsOverviewQuery {
    pub fn new(transport: Arc<dyn RecordTransport>) -> Self {
        Self { transport }
    }

    pub fn cache_key() -> QueryKey {
        QueryKey::operation("analytics.overview")
    }
}

#[async_trait]
impl QueryFetcher for AnalyticsOverviewQuery {
    type Output = AnalyticsOverview;

    fn key(&self) -> QueryKey {
        Self::cache_key()
    }

    fn provides_tags(&self, _output: Option<&AnalyticsOverview>) -> Vec<CacheTag> {
        vec![CacheTag::analytics()]
    }

    async fn fetch(&self) -> Result<AnalyticsOverview, FetchError> {
        Ok(self.transport.analytics_overview().await?)
    }
}

/// Issues reads and writes against the store on behalf of views.
#[derive(Clone)]
pub struct Gateway {
    transport: Arc<dyn RecordTransport>,
    cache: QueryCache,
    list_freshness: Freshness,
}

impl Gateway {
    pub fn new(transport: Arc<dyn RecordTransport>, cache: QueryCache) -> Self {
        let list_freshness = cache.config().default_freshness.clone();
        Self {
            transport,
            cache,
            list_freshness,
        }
    }

    /// Freshness for list reads and list subscriptions only. Other queries
    /// keep the cache default.
    pub fn with_list_freshness(mut self, freshness: Freshness) -> Self {
        self.list_freshness = freshness;
        self
    }

    pub fn list_freshness(&self) -> &Freshness {
        &self.list_freshness
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn list_query(&self) -> ListRecords {
        ListRecords::new(Arc::clone(&self.transport))
    }

    pub fn analytics_query(&self) -> AnalyticsOverviewQuery {
        AnalyticsOverviewQuery::new(Arc::clone(&self.transport))
    }

    pub async fn list(&self) -> Result<Arc<Vec<Record>>, ActionError> {
        let read = self
            .cache
            .read_with(self.list_query(), self.list_freshness.clone())
            .await
            .map_err(|err| ActionError::from_cache(ActionKind::Load, err))?;
        Ok(read.into_shared())
    }

    /// Register an active view of the record list.
    pub fn subscribe_list(&self) -> QuerySubscription<Vec<Record>> {
        self.cache
            .subscribe_with(self.list_query(), self.list_freshness.clone())
    }

    pub async fn analytics_overview(&self) -> Result<Arc<AnalyticsOverview>, ActionError> {
        let read = self
            .cache
            .read(self.analytics_query())
            .await
            .map_err(|err| ActionError::from_cache(ActionKind::LoadAnalytics, err))?;
        Ok(read.into_shared())
    }

    pub async fn create(&self, input: CreateRecordInput) -> Result<Record, ActionError> {
        let input = validate_create(&input)?;
        match self.transport.create(&input).await {
            Ok(record) => {
                let report = self.cache.invalidate(&CacheTag::for_create());
                info!(
                    operation = "create",
                    record_id = %record.id,
                    refetching = report.refetching.len(),
                    dropped = report.dropped.len(),
                    "Record created"
                );
                Ok(record)
            }
            Err(err) => Err(self.failed(ActionKind::Create, None, err)),
        }
    }

    pub async fn update(
        &self,
        id: &RecordId,
        input: UpdateRecordInput,
    ) -> Result<Record, ActionError> {
        let input = validate_update(&input)?;
        match self.transport.update(id, &input).await {
            Ok(record) => {
                self.written(ActionKind::Update, id);
                Ok(record)
            }
            Err(err) => Err(self.failed(ActionKind::Update, Some(id), err)),
        }
    }

    pub async fn delete(&self, id: &RecordId) -> Result<(), ActionError> {
        match self.transport.delete(id).await {
            Ok(()) => {
                self.written(ActionKind::Delete, id);
                Ok(())
            }
            Err(err) => Err(self.failed(ActionKind::Delete, Some(id), err)),
        }
    }

    pub async fn set_status(
        &self,
        id: &RecordId,
        status: RecordStatus,
    ) -> Result<Record, ActionError> {
        match self.transport.set_status(id, status).await {
            Ok(record) => {
                self.written(ActionKind::SetStatus, id);
                Ok(record)
            }
            Err(err) => Err(self.failed(ActionKind::SetStatus, Some(id), err)),
        }
    }

    fn written(&self, kind: ActionKind, id: &RecordId) {
        let report = self.cache.invalidate(&CacheTag::for_record_write(id));
        info!(
            operation = kind.as_str(),
            record_id = %id,
            refetching = report.refetching.len(),
            dropped = report.dropped.len(),
            "Record written"
        );
    }

    fn failed(&self, kind: ActionKind, id: Option<&RecordId>, err: ApiClientError) -> ActionError {
        warn!(
            operation = kind.as_str(),
            record_id = id.map(RecordId::as_str),
            error = %err,
            "Write failed, cache left untouched"
        );
        ActionError::from_api(kind, err)
    }
}
