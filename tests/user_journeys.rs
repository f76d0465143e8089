//! End-to-end journeys: catalog file on disk, orchestrator, resolved values.

use std::sync::Arc;
use std::time::Duration;

use ferrofeed_core::{
    Adapter, Candle, FeedValue, FetchRequest, ParseError, RawResponse, SourceDescriptor, Transport,
};
use ferrofeed_tests::{
    id, orchestrator, price_source, status_of, Category, CircuitState, ErrorKind,
    FallbackOrchestrator, Freshness, ResolveMode, ScriptStep, ScriptedTransport, SourceCatalog,
    Tier,
};
use serde_json::json;
use tempfile::tempdir;

fn load_catalog(document: &str) -> SourceCatalog {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("sources.json");
    std::fs::write(&path, document).expect("write catalog");
    SourceCatalog::load(&path).expect("valid catalog")
}

const OHLC_CATALOG: &str = r#"{
    "sources": [
        {"id": "binance", "category": "ohlc", "tier": "critical", "requires_auth": false, "weight": 1.0,
         "endpoint": "https://api.binance.com/api/v3/klines?symbol={key}&interval=1h"},
        {"id": "kraken", "category": "ohlc", "tier": "high", "requires_auth": false, "weight": 1.0,
         "endpoint": "https://api.kraken.com/0/public/OHLC?pair={key}",
         "value_pointer": "/result/{key}"}
    ]
}"#;

#[tokio::test(start_paused = true)]
async fn candles_fall_back_to_second_exchange_and_are_then_cached() {
    // Given: the primary exchange is down and the secondary nests candles under the pair
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_script(&id("binance"), [ScriptStep::Fail(ErrorKind::ServerError)])
            .with_script(
                &id("kraken"),
                [ScriptStep::json(json!({
                    "result": {
                        "BTCUSDT": [
                            {"time": 1_700_000_000_000_i64, "open": "100.0", "high": "110.0",
                             "low": "95.0", "close": "105.0", "volume": "12.5"},
                            {"time": 1_700_003_600_000_i64, "open": "105.0", "high": "108.0",
                             "low": "101.0", "close": "102.0"}
                        ]
                    }
                }))],
            ),
    );
    let shared: Arc<dyn Transport> = transport.clone();
    let orchestrator = FallbackOrchestrator::builder(load_catalog(OHLC_CATALOG))
        .with_transport(shared)
        .build()
        .expect("default config is valid");

    // When
    let live = orchestrator
        .resolve(Category::Ohlc, "BTCUSDT", ResolveMode::Sequential)
        .await
        .expect("secondary answers");

    // Then: the candles come from kraken and the detour is reported
    assert_eq!(live.source, id("kraken"));
    assert_eq!(live.freshness, Freshness::Live);
    assert_eq!(live.source_chain(), vec![id("binance"), id("kraken")]);
    assert_eq!(
        live.value,
        FeedValue::Candles(vec![
            Candle::new(1_700_000_000_000, 100.0, 110.0, 95.0, 105.0, Some(12.5)).expect("valid"),
            Candle::new(1_700_003_600_000, 105.0, 108.0, 101.0, 102.0, None).expect("valid"),
        ])
    );
    assert!(live.warnings[0].contains("after 1 failed attempt"));

    // And: a repeat inside the ttl never touches the network
    tokio::time::advance(Duration::from_secs(60)).await;
    let cached = orchestrator
        .resolve(Category::Ohlc, "BTCUSDT", ResolveMode::Sequential)
        .await
        .expect("cached");
    assert_eq!(cached.freshness, Freshness::Cached);
    assert_eq!(cached.age_ms, 60_000);
    assert_eq!(transport.total_calls(), 2);
}

#[tokio::test]
async fn source_without_credential_is_benched_without_network_traffic() {
    // Given: an auth-requiring source whose key variable is not set, on the real transport
    let catalog = load_catalog(
        r#"{"sources": [
            {"id": "ferrofeed-journey-locked", "category": "whale_tracking", "tier": "high",
             "requires_auth": true, "weight": 1.0, "endpoint": "https://example.invalid/{key}"}
        ]}"#,
    );
    let orchestrator = FallbackOrchestrator::builder(catalog)
        .build()
        .expect("default config is valid");

    // When
    let error = orchestrator
        .resolve(Category::WhaleTracking, "btc", ResolveMode::Sequential)
        .await
        .expect_err("nothing can answer");

    // Then: the attempt fails as an auth error and the source is parked for the auth cooldown
    assert_eq!(error.last_error_kinds(), vec![ErrorKind::AuthFailed]);
    let status = status_of(&orchestrator, "ferrofeed-journey-locked");
    assert_eq!(status.circuit_state, CircuitState::Open);
    assert_eq!(status.last_error, Some(ErrorKind::AuthFailed));
    assert!(status.cooldown_remaining_ms > 3_590_000);
}

#[tokio::test(start_paused = true)]
async fn outage_after_a_good_answer_serves_the_stale_value() {
    // Given: a single price source that answers once and then goes down
    let transport = Arc::new(ScriptedTransport::new().with_script(
        &id("gecko"),
        [ScriptStep::number(64_000.0), ScriptStep::Fail(ErrorKind::Timeout)],
    ));
    let orchestrator = orchestrator(vec![price_source("gecko", Tier::Critical)], &transport);
    orchestrator
        .resolve(Category::MarketPrice, "btc", ResolveMode::Sequential)
        .await
        .expect("first answer");

    // When: the ttl has passed but the max age has not
    tokio::time::advance(Duration::from_secs(120)).await;
    let degraded = orchestrator
        .resolve(Category::MarketPrice, "btc", ResolveMode::Sequential)
        .await
        .expect("stale value is served");

    // Then
    assert!(degraded.is_degraded());
    assert_eq!(degraded.value, FeedValue::Number(64_000.0));
    assert_eq!(degraded.source, id("gecko"));
    assert_eq!(degraded.attempts.len(), 1);
    assert!(degraded.warnings[0].contains("serving stale value"));
    assert_eq!(orchestrator.stats(Some(Category::MarketPrice)).stale_served, 1);
}

#[tokio::test(start_paused = true)]
async fn parallel_price_check_reports_agreement() {
    // Given: three exchanges quoting close prices
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_script(&id("alpha"), [ScriptStep::number(100.0)])
            .with_script(&id("beta"), [ScriptStep::number(101.0)])
            .with_script(&id("gamma"), [ScriptStep::number(99.0)]),
    );
    let orchestrator = orchestrator(
        vec![
            price_source("alpha", Tier::Critical),
            price_source("beta", Tier::High),
            price_source("gamma", Tier::High),
        ],
        &transport,
    );

    // When
    let resolved = orchestrator
        .resolve(Category::MarketPrice, "eth", ResolveMode::Parallel)
        .await
        .expect("quorum reached");

    // Then: the critical source is authoritative and consensus finds no outliers
    assert_eq!(resolved.source, id("alpha"));
    let consensus = resolved.consensus.expect("parallel numbers carry consensus");
    assert!(consensus.outliers.is_empty());
    assert!(resolved.warnings.is_empty());
    assert_eq!(transport.total_calls(), 3);
}

/// Reads plain-text numbers such as `"42\n"`.
struct PlainTextAdapter;

impl Adapter for PlainTextAdapter {
    fn parse(
        &self,
        _descriptor: &SourceDescriptor,
        _request: &FetchRequest,
        response: &RawResponse,
    ) -> Result<FeedValue, ParseError> {
        let number: f64 = response
            .body
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidJson(response.body.clone()))?;
        Ok(FeedValue::Number(number))
    }
}

#[tokio::test(start_paused = true)]
async fn custom_adapter_parses_non_json_bodies() {
    // Given: a sentiment index answering in plain text
    let transport = Arc::new(ScriptedTransport::new().with_script(
        &id("fear-greed"),
        [ScriptStep::Body("42\n".to_owned())],
    ));
    let shared: Arc<dyn Transport> = transport.clone();
    let orchestrator = FallbackOrchestrator::builder(load_catalog(
        r#"{"sources": [{"id": "fear-greed", "category": "sentiment", "tier": "high",
            "requires_auth": false, "weight": 1.0}]}"#,
    ))
    .with_transport(shared)
    .with_adapter(Arc::new(PlainTextAdapter))
    .build()
    .expect("default config is valid");

    // When
    let resolved = orchestrator
        .resolve(Category::Sentiment, "fng", ResolveMode::Sequential)
        .await
        .expect("adapter parses the body");

    // Then
    assert_eq!(resolved.value, FeedValue::Number(42.0));
}
