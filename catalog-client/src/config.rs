//! Configuration loading for the catalog admin client.
//!
//! Connection fields are required. Only the collection name, the reconcile
//! policy and the optional sections have defaults.

use crate::reconcile::ReconcilePolicy;
use catalog_cache::Freshness;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV_VAR: &str = "CATALOG_ADMIN_CONFIG";

const DEFAULT_COLLECTION: &str = "products";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub live_endpoint: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub reconcile_policy: ReconcilePolicy,
    #[serde(default)]
    pub log_filter: Option<String>,
    #[serde(default)]
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    /// Refetch list reads older than this even without an invalidation.
    #[serde(default)]
    pub max_staleness_ms: Option<u64>,
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or CATALOG_ADMIN_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

impl ClientConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args(std::env::args().skip(1)).or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let api = self.api_base_url.trim();
        if api.is_empty() {
            return Err(invalid("api_base_url", "must not be empty"));
        }
        if !(api.starts_with("http://") || api.starts_with("https://")) {
            return Err(invalid("api_base_url", "must use http or https"));
        }
        let live = self.live_endpoint.trim();
        if live.is_empty() {
            return Err(invalid("live_endpoint", "must not be empty"));
        }
        if !(live.starts_with("ws://") || live.starts_with("wss://")) {
            return Err(invalid("live_endpoint", "must use ws or wss"));
        }
        if self.collection.trim().is_empty() {
            return Err(invalid("collection", "must not be empty"));
        }
        if self.collection.contains('/') {
            return Err(invalid("collection", "must be a single path segment"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be > 0"));
        }
        if let Some(filter) = &self.log_filter {
            if filter.trim().is_empty() {
                return Err(invalid("log_filter", "must not be empty when set"));
            }
            if let Err(err) = tracing_subscriber::EnvFilter::try_new(filter) {
                return Err(ConfigError::InvalidValue {
                    field: "log_filter",
                    reason: err.to_string(),
                });
            }
        }
        if self.cache.max_staleness_ms == Some(0) {
            return Err(invalid("cache.max_staleness_ms", "must be > 0 when set"));
        }
        Ok(())
    }

    /// Freshness for record list reads. Other queries stay consistent.
    pub fn list_freshness(&self) -> Freshness {
        match self.cache.max_staleness_ms {
            Some(ms) => Freshness::best_effort(Duration::from_millis(ms)),
            None => Freshness::consistent(),
        }
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
}

fn config_path_from_args(args: impl IntoIterator<Item = String>) -> Option<PathBuf> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_config_flag_forms() {
        assert_eq!(
            config_path_from_args(args(&["--config", "admin.toml"])),
            Some(PathBuf::from("admin.toml"))
        );
        assert_eq!(
            config_path_from_args(args(&["-v", "--config=/etc/admin.toml"])),
            Some(PathBuf::from("/etc/admin.toml"))
        );
        assert_eq!(config_path_from_args(args(&["--config"])), None);
        assert_eq!(config_path_from_args(args(&[])), None);
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            api_base_url = "http://localhost:3000/api"
            live_endpoint = "ws://localhost:3000/live"
            request_timeout_ms = 5000
            "#,
        )
        .unwrap();
        assert_eq!(config.collection, "products");
        assert_eq!(config.reconcile_policy, ReconcilePolicy::ConnectionAware);
        assert!(config.validate().is_ok());
        assert!(config.list_freshness().is_consistent());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let parsed = toml::from_str::<ClientConfig>(
            r#"
            api_base_url = "http://localhost:3000"
            live_endpoint = "ws://localhost:3000"
            request_timeout_ms = 5000
            tenant = "x"
            "#,
        );
        assert!(parsed.is_err());
    }
}
