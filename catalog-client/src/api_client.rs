//! REST transport for the record collection.
//!
//! [`RecordTransport`] is the seam between the gateway and the store; the
//! production implementation is [`RestClient`].

use crate::config::ClientConfig;
use async_trait::async_trait;
use catalog_cache::FetchError;
use catalog_core::{
    AnalyticsOverview, CreateRecordInput, Envelope, ErrorBody, Record, RecordId, RecordStatus,
    StatusChange, UpdateRecordInput,
};
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Request rejected (status {status}): {}", .message.as_deref().unwrap_or("no message"))]
    Rejected { status: u16, message: Option<String> },
    #[error("Connection failed: {0}")]
    Unavailable(String),
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl ApiClientError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: Some(message.into()),
        }
    }

    /// The store answered and refused the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Human-readable message supplied by the store, if any.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Rejected { message, .. } => message.as_deref().filter(|m| !m.trim().is_empty()),
            _ => None,
        }
    }
}

impl From<ApiClientError> for FetchError {
    fn from(err: ApiClientError) -> Self {
        match err {
            ApiClientError::Rejected { status, message } => {
                FetchError::rejected(Some(status), message.unwrap_or_default())
            }
            ApiClientError::Serde(err) => FetchError::Decode {
                message: err.to_string(),
            },
            ApiClientError::InvalidResponse(message) => FetchError::Decode { message },
            other => FetchError::transport(other.to_string()),
        }
    }
}

/// Request/response operations against the authoritative store.
#[async_trait]
pub trait RecordTransport: Send + Sync + 'static {
    /// Full collection, newest first.
    async fn list(&self) -> Result<Vec<Record>, ApiClientError>;

    async fn create(&self, input: &CreateRecordInput) -> Result<Record, ApiClientError>;

    async fn update(
        &self,
        id: &RecordId,
        input: &UpdateRecordInput,
    ) -> Result<Record, ApiClientError>;

    async fn delete(&self, id: &RecordId) -> Result<(), ApiClientError>;

    async fn set_status(&self, id: &RecordId, status: RecordStatus)
        -> Result<Record, ApiClientError>;

    async fn analytics_overview(&self) -> Result<AnalyticsOverview, ApiClientError>;
}

#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: Url,
    collection: String,
}

impl RestClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiClientError> {
        let base_url = Url::parse(config.api_base_url.trim())
            .map_err(|err| ApiClientError::Config(format!("api_base_url: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiClientError::Config(format!(
                "api_base_url: {base_url} cannot carry a path"
            )));
        }
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            collection: config.collection.clone(),
        })
    }

    /// `base_url` extended by `segments`, each percent-encoded as one path
    /// segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ApiClientError::Config(format!("api_base_url: {} cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn collection_url(&self) -> Result<Url, ApiClientError> {
        self.endpoint(&[&self.collection])
    }

    fn record_url(&self, id: &RecordId) -> Result<Url, ApiClientError> {
        self.endpoint(&[&self.collection, id.as_str()])
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, ApiClientError> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        parse_envelope(status, &text)
    }

    async fn send_required<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ApiClientError> {
        self.send(request)
            .await?
            .ok_or_else(|| ApiClientError::InvalidResponse("envelope carried no data".to_string()))
    }
}

/// Decode one response body.
///
/// Success statuses carry `{ success, data }`, where `data` may be absent and
/// `204 No Content` carries nothing at all. Anything else is a rejection whose
/// message is taken from the error body when it has one.
pub(crate) fn parse_envelope<T: DeserializeOwned>(
    status: StatusCode,
    text: &str,
) -> Result<Option<T>, ApiClientError> {
    if !status.is_success() {
        let message = serde_json::from_str::<ErrorBody>(text)
            .ok()
            .and_then(|body| body.message);
        return Err(ApiClientError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
        return Ok(None);
    }

    let envelope: Envelope<serde_json::Value> = serde_json::from_str(text)?;
    if !envelope.success {
        let message = serde_json::from_str::<ErrorBody>(text)
            .ok()
            .and_then(|body| body.message);
        return Err(ApiClientError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    match envelope.data {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(data) => Ok(Some(serde_json::from_value(data)?)),
    }
}

#[async_trait]
impl RecordTransport for RestClient {
    async fn list(&self) -> Result<Vec<Record>, ApiClientError> {
        let records: Option<Vec<Record>> = self.send(self.client.get(self.collection_url()?)).await?;
        Ok(records.unwrap_or_default())
    }

    async fn create(&self, input: &CreateRecordInput) -> Result<Record, ApiClientError> {
        self.send_required(self.client.post(self.collection_url()?).json(input))
            .await
    }

    async fn update(
        &self,
        id: &RecordId,
        input: &UpdateRecordInput,
    ) -> Result<Record, ApiClientError> {
        self.send_required(self.client.put(self.record_url(id)?).json(input))
            .await
    }

    async fn delete(&self, id: &RecordId) -> Result<(), ApiClientError> {
        let _: Option<serde_json::Value> = self.send(self.client.delete(self.record_url(id)?)).await?;
        Ok(())
    }

    async fn set_status(
        &self,
        id: &RecordId,
        status: RecordStatus,
    ) -> Result<Record, ApiClientError> {
        let url = self.endpoint(&[&self.collection, id.as_str(), "status"])?;
        self.send_required(self.client.patch(url).json(&StatusChange { status }))
            .await
    }

    async fn analytics_overview(&self) -> Result<AnalyticsOverview, ApiClientError> {
        let url = self.endpoint(&["analytics", "overview"])?;
        self.send_required(self.client.get(url)).await
    }
}
