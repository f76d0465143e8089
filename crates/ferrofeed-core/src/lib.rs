//! # Ferrofeed Core
//!
//! Resilient multi-source data fetching for crypto and market data.
//!
//! ## Overview
//!
//! Many free or rate-limited upstream sources can answer the same logical
//! request (the price of BTC, hourly candles for ETH, the latest news). Any of
//! them may time out, throttle, reject credentials or return garbage. This
//! crate hides that behind one call:
//!
//! - **Source catalog** of prioritized, typed source descriptors
//! - **Circuit breakers** that stop calling sources which keep failing
//! - **Rate-limit tracking** that never sends a call over quota
//! - **Response cache** with a stale-but-usable tier for degraded answers
//! - **Health monitor** that reorders sources within a tier
//! - **Consensus** across several sources in parallel mode
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapter`] | Parsing raw responses into [`FeedValue`]s |
//! | [`backoff`] | Cooldown growth strategies |
//! | [`cache`] | Fresh/stale response cache |
//! | [`catalog`] | Source descriptors and the catalog file |
//! | [`circuit_breaker`] | Per-source breaker registry |
//! | [`config`] | Orchestrator configuration and env overrides |
//! | [`consensus`] | Median consensus over numeric values |
//! | [`domain`] | Values returned to callers |
//! | [`error`] | Validation errors and exhaustion reports |
//! | [`executor`] | One classified attempt against one source |
//! | [`monitor`] | Rolling success rate and latency |
//! | [`orchestrator`] | The fallback orchestrator |
//! | [`outcome`] | Attempt outcomes and error classification |
//! | [`rate_limit`] | Fixed-window quota tracking |
//! | [`source`] | Source ids, categories and tiers |
//! | [`stats`] | Resolve counters |
//! | [`transport`] | Network seam, HTTP and scripted implementations |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ferrofeed_core::{Category, FallbackOrchestrator, ResolveMode, SourceCatalog};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = SourceCatalog::load("sources.json")?;
//!     let orchestrator = FallbackOrchestrator::builder(catalog).build()?;
//!
//!     let resolved = orchestrator
//!         .resolve(Category::MarketPrice, "btc", ResolveMode::Sequential)
//!         .await?;
//!     println!("{} from {} ({:?})", resolved.value.kind(), resolved.source, resolved.freshness);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  CLI / Caller       │
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐     ┌──────────────────────────────┐
//! │ FallbackOrchestrator│────▶│ Cache / Breakers / Limits /  │
//! └──────────┬──────────┘     │ Monitor / Consensus          │
//!            │                └──────────────────────────────┘
//!            ▼
//! ┌─────────────────────┐     ┌──────────────────┐
//! │ FetchExecutor       │────▶│ Transport        │
//! │                     │     │ (reqwest/script) │
//! └──────────┬──────────┘     └──────────────────┘
//!            ▼
//! ┌─────────────────────┐
//! │ Adapter → FeedValue │
//! └─────────────────────┘
//! ```
//!
//! ## Security
//!
//! - API keys are read from `FERROFEED_<SOURCE_ID>_API_KEY` only and never logged
//! - Credentials are sent only to the source they were configured for

pub mod adapter;
pub mod backoff;
pub mod cache;
pub mod catalog;
pub mod circuit_breaker;
pub mod config;
pub mod consensus;
pub mod domain;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod orchestrator;
pub mod outcome;
pub mod rate_limit;
pub mod source;
pub mod stats;
pub mod transport;

// Parsing
pub use adapter::{Adapter, JsonAdapter, ParseError};

// Cooldowns
pub use backoff::Backoff;

// Caching
pub use cache::{CacheEntry, CacheKey, CacheLookup, CachePolicies, CachePolicy, ResponseCache};

// Catalog
pub use catalog::{RateLimitQuota, SourceCatalog, SourceDescriptor};

// Circuit breaker
pub use circuit_breaker::{
    BreakerConfig, BreakerPermit, CircuitBreaker, CircuitState, SourceHealth,
};

// Configuration
pub use config::{OrchestratorConfig, ParallelConfig};

// Consensus
pub use consensus::{ConsensusConfig, ConsensusError, ConsensusResult, ConsensusValidator};

// Domain values
pub use domain::{Candle, FeedValue};

// Error types
pub use error::{
    AttemptRecord, CoreError, NoSourceAvailable, SkipReason, SkippedSource, ValidationError,
};

// Execution
pub use executor::FetchExecutor;

// Monitoring
pub use monitor::{MonitorConfig, MonitorSnapshot, SourceMonitor};

// Orchestration
pub use orchestrator::{
    FallbackOrchestrator, FallbackOrchestratorBuilder, Freshness, ResolveMode, Resolved,
    SourceStatus,
};

// Outcomes
pub use outcome::{ErrorKind, FetchFailure, FetchOutcome};

// Rate limits
pub use rate_limit::RateLimitTracker;

// Source identifiers
pub use source::{Category, SourceId, Tier};

// Stats
pub use stats::{ResolveStats, StatsSnapshot};

// Transport
pub use transport::{
    credential_env_var, FetchRequest, HttpAuth, RawResponse, ReqwestTransport, ScriptStep,
    ScriptedTransport, Transport, TransportError,
};
