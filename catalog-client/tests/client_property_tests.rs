use catalog_client::commands::{parse_line, Command};
use catalog_client::config::{CacheSettings, ClientConfig, ConfigError};
use catalog_client::realtime::{ConnectionStatus, LiveEvent, LiveSnapshot, LiveState, SubscriptionId};
use catalog_client::reconcile::{select, ReconcilePolicy, Source};
use catalog_core::Record;
use catalog_test_utils::generators::{arb_create_input, arb_record_id, arb_records};
use chrono::Utc;
use proptest::prelude::*;
use std::io::Write;

fn base_config() -> ClientConfig {
    ClientConfig {
        api_base_url: "http://localhost:3000/api".to_string(),
        live_endpoint: "ws://localhost:3000/live".to_string(),
        collection: "products".to_string(),
        request_timeout_ms: 5_000,
        reconcile_policy: ReconcilePolicy::ConnectionAware,
        log_filter: Some("catalog_client=debug,info".to_string()),
        cache: CacheSettings::default(),
    }
}

fn live_state(status: ConnectionStatus, snapshot: Option<Vec<Record>>) -> LiveState {
    LiveState {
        status,
        snapshot: snapshot.map(|records| LiveSnapshot {
            subscription: SubscriptionId::new(),
            sequence: 1,
            received_at: Utc::now(),
            records,
        }),
        error: None,
    }
}

fn arb_policy() -> impl Strategy<Value = ReconcilePolicy> {
    prop_oneof![
        Just(ReconcilePolicy::ConnectionAware),
        Just(ReconcilePolicy::PreferNonEmpty)
    ]
}

fn arb_status() -> impl Strategy<Value = ConnectionStatus> {
    prop_oneof![
        Just(ConnectionStatus::Disconnected),
        Just(ConnectionStatus::Connecting),
        Just(ConnectionStatus::Connected),
    ]
}

#[test]
fn config_base_is_valid() {
    assert!(base_config().validate().is_ok());
}

#[test]
fn config_rejects_bad_log_filter() {
    let mut config = base_config();
    config.log_filter = Some("   ".to_string());
    assert!(config.validate().is_err());
    config.log_filter = Some("catalog_client=notalevel".to_string());
    assert!(config.validate().is_err());
}

#[test]
fn config_rejects_zero_staleness() {
    let mut config = base_config();
    config.cache.max_staleness_ms = Some(0);
    assert!(config.validate().is_err());
    config.cache.max_staleness_ms = Some(30_000);
    assert!(config.validate().is_ok());
    assert!(config.list_freshness().is_best_effort());
}

#[test]
fn config_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
api_base_url = "https://catalog.example.com/api"
live_endpoint = "wss://catalog.example.com/live"
request_timeout_ms = 2500
reconcile_policy = "prefer_non_empty"

[cache]
max_staleness_ms = 60000
"#
    )
    .unwrap();

    let config = ClientConfig::from_path(file.path()).unwrap();
    assert_eq!(config.reconcile_policy, ReconcilePolicy::PreferNonEmpty);
    assert_eq!(config.collection, "products");
    assert_eq!(config.cache.max_staleness_ms, Some(60_000));
    assert!(config.validate().is_ok());
}

#[test]
fn config_file_errors_are_typed() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(matches!(ClientConfig::from_path(&missing), Err(ConfigError::Io(_))));

    let broken = dir.path().join("broken.toml");
    std::fs::write(&broken, "api_base_url = ").unwrap();
    assert!(matches!(ClientConfig::from_path(&broken), Err(ConfigError::Parse(_))));

    let unknown = dir.path().join("unknown.toml");
    std::fs::write(
        &unknown,
        "api_base_url = \"http://x\"\nlive_endpoint = \"ws://x\"\nrequest_timeout_ms = 1\n[cache]\nttl = 5\n",
    )
    .unwrap();
    assert!(matches!(ClientConfig::from_path(&unknown), Err(ConfigError::Parse(_))));
}

#[test]
fn connected_empty_snapshot_renders_empty() {
    let cache = fixtures_ab();
    let live = live_state(ConnectionStatus::Connected, Some(Vec::new()));
    let selection = select(ReconcilePolicy::ConnectionAware, &cache, &live);
    assert_eq!(selection.source, Source::Live);
    assert!(selection.records.is_empty());
}

fn fixtures_ab() -> Vec<Record> {
    vec![
        catalog_test_utils::fixtures::record("b", "Bucket", 4.5, -20),
        catalog_test_utils::fixtures::record("a", "Anvil", 120.0, -30),
    ]
}

proptest! {
    #[test]
    fn config_timeout_validation(timeout in 0u64..100_000) {
        let mut config = base_config();
        config.request_timeout_ms = timeout;
        prop_assert_eq!(config.validate().is_ok(), timeout > 0);
    }

    #[test]
    fn config_requires_http_scheme(scheme in "(ftp|ws|file|tcp)", host in "[a-z]{1,12}") {
        let mut config = base_config();
        config.api_base_url = format!("{scheme}://{host}");
        prop_assert!(config.validate().is_err());
    }

    #[test]
    fn config_requires_ws_scheme(scheme in "(http|https|ftp)", host in "[a-z]{1,12}") {
        let mut config = base_config();
        config.live_endpoint = format!("{scheme}://{host}");
        prop_assert!(config.validate().is_err());
    }

    #[test]
    fn config_collection_is_one_segment(left in "[a-z]{1,8}", right in "[a-z]{1,8}") {
        let mut config = base_config();
        config.collection = left.clone();
        prop_assert!(config.validate().is_ok());
        config.collection = format!("{left}/{right}");
        prop_assert!(config.validate().is_err());
    }

    #[test]
    fn selection_is_one_source_whole(
        policy in arb_policy(),
        status in arb_status(),
        cache in arb_records(6),
        live in prop::option::of(arb_records(6)),
    ) {
        let state = live_state(status, live.clone());
        let selection = select(policy, &cache, &state);
        match selection.source {
            Source::Cache => prop_assert_eq!(selection.records, cache.as_slice()),
            Source::Live => prop_assert_eq!(Some(selection.records.to_vec()), live),
        }
    }

    #[test]
    fn connected_snapshot_always_wins_when_connection_aware(
        cache in arb_records(6),
        live in arb_records(6),
    ) {
        let state = live_state(ConnectionStatus::Connected, Some(live.clone()));
        let selection = select(ReconcilePolicy::ConnectionAware, &cache, &state);
        prop_assert_eq!(selection.source, Source::Live);
        prop_assert_eq!(selection.records, live.as_slice());
    }

    #[test]
    fn prefer_non_empty_follows_emptiness(
        cache in arb_records(6),
        live in arb_records(6),
    ) {
        let state = live_state(ConnectionStatus::Connected, Some(live.clone()));
        let selection = select(ReconcilePolicy::PreferNonEmpty, &cache, &state);
        let expected = if live.is_empty() { Source::Cache } else { Source::Live };
        prop_assert_eq!(selection.source, expected);
    }

    #[test]
    fn unconnected_views_render_cache(policy in arb_policy(), cache in arb_records(6)) {
        let mut state = LiveState::default();
        state.apply(LiveEvent::Status(ConnectionStatus::Connecting));
        let selection = select(policy, &cache, &state);
        prop_assert_eq!(selection.source, Source::Cache);
        prop_assert_eq!(selection.records, cache.as_slice());
    }

    #[test]
    fn id_commands_parse(id in arb_record_id()) {
        let line = format!("toggle {id}");
        prop_assert_eq!(parse_line(&line).unwrap(), Some(Command::Toggle(id.clone())));
        let line = format!("delete {id}");
        prop_assert_eq!(parse_line(&line).unwrap(), Some(Command::Delete(id)));
    }

    #[test]
    fn add_command_carries_fields(input in arb_create_input()) {
        let mut line = format!("add name=\"{}\" price={} status={}", input.name, input.price, input.status);
        if let Some(category) = &input.category {
            line.push_str(&format!(" category={category}"));
        }
        if let Some(stock) = input.stock {
            line.push_str(&format!(" stock={stock}"));
        }
        prop_assert_eq!(parse_line(&line).unwrap(), Some(Command::Add(input)));
    }
}
