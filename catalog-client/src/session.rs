//! Application session.
//!
//! A session owns the process-wide query cache and hands it to every view it
//! mounts. It is created once at startup; `logout` resets the cache so the
//! next session starts without any of the previous one's results.

use crate::api_client::{ApiClientError, RecordTransport, RestClient};
use crate::config::ClientConfig;
use crate::gateway::Gateway;
use crate::realtime::{LiveSubscriber, SnapshotSource, WsSnapshotSource};
use crate::reconcile::ReconcilePolicy;
use crate::view::CatalogView;
use catalog_cache::{CacheConfig, Freshness, QueryCache};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub collection: String,
    pub policy: ReconcilePolicy,
    /// Applied to record list reads only.
    pub list_freshness: Freshness,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            collection: "products".to_string(),
            policy: ReconcilePolicy::default(),
            list_freshness: Freshness::default(),
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            collection: config.collection.clone(),
            policy: config.reconcile_policy,
            list_freshness: config.list_freshness(),
        }
    }
}

pub struct Session {
    id: Uuid,
    cache: QueryCache,
    gateway: Gateway,
    subscriber: LiveSubscriber,
    policy: ReconcilePolicy,
}

impl Session {
    pub fn new(
        transport: Arc<dyn RecordTransport>,
        source: Arc<dyn SnapshotSource>,
        options: SessionOptions,
    ) -> Self {
        let id = Uuid::now_v7();
        let cache = QueryCache::new(CacheConfig::default());
        let gateway =
            Gateway::new(transport, cache.clone()).with_list_freshness(options.list_freshness);
        let subscriber = LiveSubscriber::new(source, options.collection);
        info!(session = %id, collection = subscriber.collection(), policy = %options.policy, "Session started");
        Self {
            id,
            cache,
            gateway,
            subscriber,
            policy: options.policy,
        }
    }

    /// Session against the REST API and WebSocket endpoint in `config`.
    pub fn connect(config: &ClientConfig) -> Result<Self, ApiClientError> {
        let transport = Arc::new(RestClient::new(config)?);
        let source = Arc::new(WsSnapshotSource::new(config));
        Ok(Self::new(transport, source, SessionOptions::from_config(config)))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn subscriber(&self) -> &LiveSubscriber {
        &self.subscriber
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    /// Mount a catalog view with its own live subscription.
    pub fn mount_view(&self) -> CatalogView {
        CatalogView::mount(self.gateway.clone(), self.subscriber.clone(), self.policy)
    }

    /// Drop every cached result. Views still mounted stop receiving cache
    /// updates and should be unmounted.
    pub fn logout(&self) {
        self.cache.reset();
        info!(session = %self.id, "Session cache reset");
    }
}
