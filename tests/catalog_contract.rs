//! Contract tests for the catalog and configuration files.

use std::time::Duration;

use ferrofeed_core::{CoreError, OrchestratorConfig, ValidationError};
use ferrofeed_tests::{id, Category, SourceCatalog, Tier};
use tempfile::tempdir;

const CATALOG: &str = r#"{
    "sources": [
        {"id": "CoinGecko", "category": "market_price", "tier": "critical", "requires_auth": false,
         "weight": 1.0, "rate_limit": {"limit": 30, "period_secs": 60},
         "endpoint": "https://api.coingecko.com/api/v3/simple/price?ids={key}&vs_currencies=usd",
         "value_pointer": "/{key}/usd"},
        {"id": "binance", "category": "ohlc", "tier": "high", "requires_auth": false, "weight": 0.8,
         "endpoint": "https://api.binance.com/api/v3/klines?symbol={key}&interval=1h"},
        {"id": "whale-alert", "category": "whale_tracking", "tier": "medium", "requires_auth": true,
         "weight": 1.0}
    ]
}"#;

#[test]
fn catalog_file_loads_with_normalized_ids() {
    // Given: a catalog file on disk
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("sources.json");
    std::fs::write(&path, CATALOG).expect("write catalog");

    // When
    let catalog = SourceCatalog::load(&path).expect("valid catalog");

    // Then: ids are normalized and every field survives
    assert_eq!(catalog.len(), 3);
    let gecko = catalog.get(&id("coingecko")).expect("lowercased id");
    assert_eq!(gecko.tier, Tier::Critical);
    assert_eq!(gecko.rate_limit.map(|quota| quota.limit), Some(30));
    assert_eq!(gecko.render_value_pointer("btc").as_deref(), Some("/btc/usd"));
    assert_eq!(
        catalog.for_category(Category::WhaleTracking)[0].id,
        id("whale-alert")
    );
    assert!(catalog.for_category(Category::News).is_empty());
}

#[test]
fn endpoint_template_encodes_the_key() {
    let catalog = SourceCatalog::from_json_str(CATALOG).expect("valid catalog");
    let binance = catalog.get(&id("binance")).expect("present");

    assert_eq!(
        binance.render_endpoint("BTC/USDT").as_deref(),
        Some("https://api.binance.com/api/v3/klines?symbol=BTC%2FUSDT&interval=1h")
    );
}

#[test]
fn invalid_entries_are_rejected_at_load() {
    // Given: an entry with an id containing a space
    let result = SourceCatalog::from_json_str(
        r#"{"sources": [{"id": "bad id", "category": "news", "tier": "low",
            "requires_auth": false, "weight": 1.0}]}"#,
    );

    // Then: the index of the offending entry is reported
    assert!(matches!(
        result,
        Err(CoreError::Validation(ValidationError::MalformedEntry { index: 0, .. }))
    ));
}

#[test]
fn duplicate_ids_are_rejected_even_with_different_case() {
    let result = SourceCatalog::from_json_str(
        r#"{"sources": [
            {"id": "Kraken", "category": "market_price", "tier": "high", "requires_auth": false, "weight": 1.0},
            {"id": "kraken", "category": "ohlc", "tier": "low", "requires_auth": false, "weight": 1.0}
        ]}"#,
    );

    assert!(matches!(
        result,
        Err(CoreError::Validation(ValidationError::DuplicateSource { .. }))
    ));
}

#[test]
fn missing_catalog_file_is_an_io_error() {
    let dir = tempdir().expect("tempdir");
    let result = SourceCatalog::load(dir.path().join("absent.json"));
    assert!(matches!(result, Err(CoreError::Io(_))));
}

#[test]
fn config_file_overrides_only_what_it_names() {
    // Given: a partial configuration file
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("ferrofeed.json");
    std::fs::write(
        &path,
        r#"{
            "resolve_deadline_ms": 5000,
            "breaker": {"failure_threshold": 3},
            "cache": {"news": {"ttl_secs": 30, "max_age_secs": 60}}
        }"#,
    )
    .expect("write config");

    // When
    let config = OrchestratorConfig::load(&path).expect("valid config");

    // Then: named values change, everything else keeps its default
    assert_eq!(config.resolve_deadline, Duration::from_secs(5));
    assert_eq!(config.attempt_timeout, Duration::from_secs(8));
    assert_eq!(config.breaker.failure_threshold, 3);
    assert_eq!(config.breaker.cooldown, Duration::from_secs(60));
    assert_eq!(config.cache.for_category(Category::News).ttl, Duration::from_secs(30));
    assert_eq!(
        config.cache.for_category(Category::MarketPrice).max_age,
        Duration::from_secs(300)
    );
}

#[test]
fn environment_overrides_win_over_the_file() {
    // Given: a loaded configuration and a deadline override in the environment
    let config = OrchestratorConfig::from_json_str(r#"{"resolve_deadline_ms": 5000}"#)
        .expect("valid config");

    // When
    let config = config
        .with_overrides_from(|name| {
            (name == "FERROFEED_RESOLVE_DEADLINE_MS").then(|| "2500".to_owned())
        })
        .expect("valid override");

    // Then
    assert_eq!(config.resolve_deadline, Duration::from_millis(2500));
    assert_eq!(config.attempt_timeout, Duration::from_secs(8));
}

#[test]
fn non_numeric_environment_override_is_rejected() {
    let result = OrchestratorConfig::default()
        .with_overrides_from(|name| (name == "FERROFEED_ATTEMPT_TIMEOUT_MS").then(|| "soon".to_owned()));

    assert!(matches!(
        result,
        Err(ValidationError::InvalidEnvOverride { .. })
    ));
}
