//! Fallback orchestration across prioritized sources.
//!
//! A resolve walks the candidates of one category until a usable value is
//! found:
//!
//! 1. a fresh cache entry is returned without any network call;
//! 2. candidates are filtered by circuit state and rate-limit budget, then
//!    ordered by tier, health-adjusted weight, average latency and catalog
//!    position;
//! 3. candidates are attempted (one at a time, or `fan_out` at a time in
//!    [`ResolveMode::Parallel`]) until a success, or a quorum of successes;
//! 4. when every candidate fails, a stale cache entry within its max age is
//!    served as a degraded answer, otherwise [`NoSourceAvailable`] is returned.

use std::cmp::{Ordering, Reverse};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::Instrument;

use crate::adapter::{Adapter, JsonAdapter};
use crate::cache::{CacheEntry, CacheKey, CacheLookup, ResponseCache};
use crate::catalog::{SourceCatalog, SourceDescriptor};
use crate::circuit_breaker::{BreakerPermit, CircuitBreaker, CircuitState};
use crate::config::OrchestratorConfig;
use crate::consensus::{ConsensusResult, ConsensusValidator};
use crate::domain::FeedValue;
use crate::error::{AttemptRecord, NoSourceAvailable, SkipReason, SkippedSource};
use crate::executor::{elapsed_ms, FetchExecutor};
use crate::monitor::SourceMonitor;
use crate::outcome::{ErrorKind, FetchOutcome};
use crate::rate_limit::RateLimitTracker;
use crate::source::{Category, SourceId, Tier};
use crate::stats::{ResolveStats, StatsSnapshot};
use crate::transport::{FetchRequest, ReqwestTransport, Transport};
use crate::ValidationError;

/// How candidates are attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveMode {
    /// One source at a time; the first success wins.
    #[default]
    Sequential,
    /// Several sources at once; successes are combined by consensus.
    Parallel,
}

impl ResolveMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }
}

impl Display for ResolveMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolveMode {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sequential" | "seq" => Ok(Self::Sequential),
            "parallel" | "par" => Ok(Self::Parallel),
            other => Err(ValidationError::InvalidMode {
                value: other.to_owned(),
            }),
        }
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Fetched during this resolve.
    Live,
    /// Fresh cache entry; no network call was made.
    Cached,
    /// Cache entry past its ttl, served because every live source failed.
    Stale,
}

/// Successful resolve, possibly degraded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolved {
    pub category: Category,
    pub key: String,
    pub value: FeedValue,
    pub freshness: Freshness,
    /// Source that produced the value (highest-priority success in parallel mode).
    pub source: SourceId,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    pub age_ms: u64,
    pub latency_ms: u64,
    pub attempts: Vec<AttemptRecord>,
    pub skipped: Vec<SkippedSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusResult>,
    pub warnings: Vec<String>,
}

impl Resolved {
    pub const fn is_degraded(&self) -> bool {
        matches!(self.freshness, Freshness::Stale)
    }

    /// Sources attempted, in dispatch order.
    pub fn source_chain(&self) -> Vec<SourceId> {
        self.attempts
            .iter()
            .map(|attempt| attempt.source.clone())
            .collect()
    }
}

/// Operational view of one catalog source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub id: SourceId,
    pub category: Category,
    pub tier: Tier,
    pub circuit_state: CircuitState,
    pub health_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_remaining: Option<u32>,
    /// Time until the quota window rolls over.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_resets_in_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub cooldown_remaining_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorKind>,
}

/// Builder for [`FallbackOrchestrator`].
///
/// Without an explicit transport the orchestrator uses [`ReqwestTransport`]
/// with credentials read from `FERROFEED_<SOURCE_ID>_API_KEY`.
pub struct FallbackOrchestratorBuilder {
    catalog: SourceCatalog,
    config: OrchestratorConfig,
    transport: Option<Arc<dyn Transport>>,
    adapter: Option<Arc<dyn Adapter>>,
}

impl FallbackOrchestratorBuilder {
    pub fn new(catalog: SourceCatalog) -> Self {
        Self {
            catalog,
            config: OrchestratorConfig::default(),
            transport: None,
            adapter: None,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn build(self) -> Result<FallbackOrchestrator, ValidationError> {
        self.config.validate()?;

        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(ReqwestTransport::new().with_env_credentials(&self.catalog))
        });
        let adapter = self.adapter.unwrap_or_else(|| Arc::new(JsonAdapter));

        Ok(FallbackOrchestrator {
            limiter: RateLimitTracker::new(&self.catalog),
            breaker: CircuitBreaker::new(self.config.breaker),
            cache: ResponseCache::new(self.config.cache.clone()),
            monitor: SourceMonitor::new(self.config.monitor),
            consensus: ConsensusValidator::new(self.config.consensus),
            stats: ResolveStats::new(),
            executor: FetchExecutor::new(transport, adapter),
            catalog: RwLock::new(Arc::new(self.catalog)),
            config: self.config,
        })
    }
}

/// Resilient resolver in front of many unreliable sources.
#[derive(Debug)]
pub struct FallbackOrchestrator {
    catalog: RwLock<Arc<SourceCatalog>>,
    config: OrchestratorConfig,
    executor: FetchExecutor,
    breaker: CircuitBreaker,
    limiter: RateLimitTracker,
    cache: ResponseCache,
    monitor: SourceMonitor,
    consensus: ConsensusValidator,
    stats: ResolveStats,
}

struct Run<'a> {
    attempts: Vec<AttemptRecord>,
    /// Successful values in priority order.
    successes: Vec<(&'a SourceDescriptor, FeedValue)>,
    deadline_exceeded: bool,
}

impl Run<'_> {
    fn new() -> Self {
        Self {
            attempts: Vec::new(),
            successes: Vec::new(),
            deadline_exceeded: false,
        }
    }
}

impl FallbackOrchestrator {
    pub fn builder(catalog: SourceCatalog) -> FallbackOrchestratorBuilder {
        FallbackOrchestratorBuilder::new(catalog)
    }

    /// Current catalog snapshot.
    pub fn catalog(&self) -> Arc<SourceCatalog> {
        Arc::clone(&self.catalog.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub const fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Swaps the catalog. Breaker and monitor history is kept per source id;
    /// rate-limit windows follow the new quotas.
    pub fn reload(&self, catalog: SourceCatalog) {
        self.limiter.resize(&catalog);
        let sources = catalog.len();
        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(catalog);
        tracing::info!(sources, "catalog reloaded");
    }

    pub fn stats(&self, category: Option<Category>) -> StatsSnapshot {
        self.stats.snapshot(category)
    }

    pub fn source_status(&self) -> Vec<SourceStatus> {
        self.catalog()
            .iter()
            .map(|descriptor| {
                let health = self.breaker.snapshot(&descriptor.id);
                let monitor = self.monitor.snapshot(&descriptor.id);
                SourceStatus {
                    id: descriptor.id.clone(),
                    category: descriptor.category,
                    tier: descriptor.tier,
                    circuit_state: health.state,
                    health_score: monitor.health_score,
                    success_rate: monitor.success_rate,
                    avg_latency_ms: monitor.avg_latency_ms,
                    rate_limit_remaining: self.limiter.remaining(&descriptor.id),
                    rate_limit_resets_in_ms: self
                        .limiter
                        .resets_in(&descriptor.id)
                        .map(|wait| u64::try_from(wait.as_millis()).unwrap_or(u64::MAX)),
                    consecutive_failures: health.consecutive_failures,
                    cooldown_remaining_ms: health.cooldown_remaining_ms,
                    last_error: health.last_error,
                }
            })
            .collect()
    }

    /// Resolves one logical request. Per-attempt failures never escape; the
    /// only error is exhaustion without a usable cache entry.
    pub async fn resolve(
        &self,
        category: Category,
        key: &str,
        mode: ResolveMode,
    ) -> Result<Resolved, NoSourceAvailable> {
        let span = tracing::info_span!("resolve", category = %category, key = %key, mode = %mode);
        self.resolve_inner(category, key, mode).instrument(span).await
    }

    async fn resolve_inner(
        &self,
        category: Category,
        key: &str,
        mode: ResolveMode,
    ) -> Result<Resolved, NoSourceAvailable> {
        let started = Instant::now();
        let deadline = started + self.config.resolve_deadline;
        let cache_key = CacheKey::new(category, key);

        if let CacheLookup::Fresh(entry) = self.cache.get(&cache_key).await {
            self.stats.record_cache_hit(category);
            tracing::debug!(source = %entry.source, "served from cache");
            return Ok(from_entry(&entry, Freshness::Cached, Vec::new(), Vec::new(), started));
        }

        let catalog = self.catalog();
        let (candidates, mut skipped) = self.plan(&catalog, category);
        let request = FetchRequest::new(category, key);

        let run = match mode {
            ResolveMode::Sequential => {
                self.run_sequential(&candidates, &request, deadline, &mut skipped)
                    .await
            }
            ResolveMode::Parallel => {
                self.run_parallel(&candidates, &request, deadline, &mut skipped)
                    .await
            }
        };

        let failed = run.attempts.iter().filter(|a| !a.succeeded()).count();
        if let Some((value, source, consensus, mut warnings)) = self.settle(mode, run.successes) {
            if failed > 0 {
                warnings.insert(
                    0,
                    format!("source fallback succeeded with '{source}' after {failed} failed attempt(s)"),
                );
            }
            let entry = self.cache.put(cache_key, value.clone(), source.clone()).await;
            self.stats.record_live(category, run.attempts.len());

            return Ok(Resolved {
                category,
                key: key.to_owned(),
                value,
                freshness: Freshness::Live,
                source,
                fetched_at: entry.fetched_at_utc,
                age_ms: 0,
                latency_ms: elapsed_ms(started),
                attempts: run.attempts,
                skipped,
                consensus,
                warnings,
            });
        }

        match self.cache.get(&cache_key).await {
            CacheLookup::Stale { entry, age } => {
                let age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(
                    source = %entry.source,
                    age_ms,
                    attempted = run.attempts.len(),
                    skipped = skipped.len(),
                    "all live sources failed, serving stale value"
                );
                self.stats.record_stale(category);
                let mut resolved =
                    from_entry(&entry, Freshness::Stale, run.attempts, skipped, started);
                resolved.warnings.push(format!(
                    "all live sources failed; serving stale value from '{}' aged {age_ms} ms",
                    entry.source
                ));
                Ok(resolved)
            }
            // Filled by a concurrent resolve while this one was failing.
            CacheLookup::Fresh(entry) => {
                self.stats.record_cache_hit(category);
                Ok(from_entry(&entry, Freshness::Cached, run.attempts, skipped, started))
            }
            CacheLookup::Miss => {
                tracing::warn!(
                    attempted = run.attempts.len(),
                    skipped = skipped.len(),
                    deadline_exceeded = run.deadline_exceeded,
                    "no source available"
                );
                self.stats.record_exhausted(category);
                Err(NoSourceAvailable {
                    category,
                    key: key.to_owned(),
                    attempted: run.attempts,
                    skipped,
                    deadline_exceeded: run.deadline_exceeded,
                })
            }
        }
    }

    /// Available candidates in attempt order, plus the ones filtered out.
    fn plan<'a>(
        &self,
        catalog: &'a SourceCatalog,
        category: Category,
    ) -> (Vec<&'a SourceDescriptor>, Vec<SkippedSource>) {
        let mut skipped = Vec::new();
        let mut ranked = Vec::new();

        for descriptor in catalog.for_category(category) {
            let reason = if !self.breaker.is_available(&descriptor.id) {
                Some(SkipReason::CircuitOpen)
            } else if !self.limiter.allow(&descriptor.id) {
                Some(SkipReason::RateLimited)
            } else {
                None
            };

            if let Some(reason) = reason {
                tracing::debug!(source = %descriptor.id, reason = %reason, "source skipped");
                skipped.push(SkippedSource {
                    source: descriptor.id.clone(),
                    reason,
                });
                continue;
            }

            let monitor = self.monitor.snapshot(&descriptor.id);
            let priority = (descriptor.weight * monitor.health_score * 100.0).round() as i64;
            ranked.push((
                descriptor,
                priority,
                monitor.avg_latency_ms.unwrap_or(0.0),
                catalog.position(&descriptor.id).unwrap_or(usize::MAX),
            ));
        }

        ranked.sort_by(|left, right| {
            left.0
                .tier
                .rank()
                .cmp(&right.0.tier.rank())
                .then_with(|| Reverse(left.1).cmp(&Reverse(right.1)))
                .then_with(|| left.2.partial_cmp(&right.2).unwrap_or(Ordering::Equal))
                .then_with(|| left.3.cmp(&right.3))
        });

        (
            ranked.into_iter().map(|(descriptor, ..)| descriptor).collect(),
            skipped,
        )
    }

    /// Takes the dispatch permits for one attempt. The breaker permit must
    /// travel with the attempt so a cancelled resolve releases it.
    fn acquire(&self, descriptor: &SourceDescriptor) -> Result<BreakerPermit<'_>, SkipReason> {
        let id = &descriptor.id;
        if !self.limiter.allow(id) {
            return Err(SkipReason::RateLimited);
        }
        let permit = self.breaker.acquire(id).ok_or(SkipReason::CircuitOpen)?;
        if !self.limiter.consume(id) {
            return Err(SkipReason::RateLimited);
        }
        Ok(permit)
    }

    /// Attempt budget and whether it was shortened by the resolve deadline.
    fn attempt_budget(&self, category: Category, deadline: Instant, now: Instant) -> (Duration, bool) {
        let budget = self.config.attempt_timeout_for(category);
        let remaining = deadline.saturating_duration_since(now);
        if remaining < budget {
            (remaining, true)
        } else {
            (budget, false)
        }
    }

    /// Feeds one outcome to breaker and monitor. Returns true when the attempt
    /// was cut by the resolve deadline rather than by its own timeout.
    fn observe(
        &self,
        descriptor: &SourceDescriptor,
        permit: BreakerPermit<'_>,
        outcome: &FetchOutcome,
        clipped: bool,
        attempts: &mut Vec<AttemptRecord>,
    ) -> bool {
        let id = &descriptor.id;
        attempts.push(AttemptRecord {
            source: id.clone(),
            tier: descriptor.tier,
            error_kind: outcome.error_kind(),
            latency_ms: outcome.latency_ms,
        });

        match &outcome.result {
            Ok(_) => {
                permit.record_success(outcome.latency_ms);
                self.monitor.record(outcome);
                false
            }
            Err(failure) if clipped && failure.kind() == ErrorKind::Timeout => {
                drop(permit);
                tracing::debug!(source = %id, "attempt cut by resolve deadline");
                true
            }
            Err(failure) => {
                let trial = permit.is_trial();
                permit.record_failure(failure.kind());
                self.monitor.record(outcome);
                tracing::debug!(
                    source = %id,
                    tier = %descriptor.tier,
                    trial,
                    kind = %failure.kind(),
                    latency_ms = outcome.latency_ms,
                    message = failure.message(),
                    "attempt failed"
                );
                false
            }
        }
    }

    async fn run_sequential<'a>(
        &self,
        candidates: &[&'a SourceDescriptor],
        request: &FetchRequest,
        deadline: Instant,
        skipped: &mut Vec<SkippedSource>,
    ) -> Run<'a> {
        let mut run = Run::new();

        for descriptor in candidates.iter().copied() {
            let now = Instant::now();
            if now >= deadline {
                run.deadline_exceeded = true;
                break;
            }
            let permit = match self.acquire(descriptor) {
                Ok(permit) => permit,
                Err(reason) => {
                    skipped.push(SkippedSource {
                        source: descriptor.id.clone(),
                        reason,
                    });
                    continue;
                }
            };

            let (timeout, clipped) = self.attempt_budget(request.category, deadline, now);
            let outcome = self.executor.attempt(descriptor, request, timeout).await;
            if self.observe(descriptor, permit, &outcome, clipped, &mut run.attempts) {
                run.deadline_exceeded = true;
                break;
            }

            if let Ok(value) = outcome.result {
                run.successes.push((descriptor, value));
                break;
            }
        }

        run
    }

    async fn run_parallel<'a>(
        &self,
        candidates: &[&'a SourceDescriptor],
        request: &FetchRequest,
        deadline: Instant,
        skipped: &mut Vec<SkippedSource>,
    ) -> Run<'a> {
        let fan_out = self.config.parallel.fan_out;
        let quorum = self.config.parallel.quorum.min(fan_out);
        let executor = &self.executor;

        let mut run = Run::new();
        let mut successes: Vec<(usize, &'a SourceDescriptor, FeedValue)> = Vec::new();
        let mut in_flight = FuturesUnordered::new();
        let mut queue = candidates.iter().copied().enumerate();

        loop {
            while in_flight.len() + successes.len() < fan_out {
                let Some((rank, descriptor)) = queue.next() else {
                    break;
                };
                let now = Instant::now();
                if now >= deadline {
                    run.deadline_exceeded = true;
                    break;
                }
                let permit = match self.acquire(descriptor) {
                    Ok(permit) => permit,
                    Err(reason) => {
                        skipped.push(SkippedSource {
                            source: descriptor.id.clone(),
                            reason,
                        });
                        continue;
                    }
                };

                let (timeout, clipped) = self.attempt_budget(request.category, deadline, now);
                in_flight.push(async move {
                    let outcome = executor.attempt(descriptor, request, timeout).await;
                    (rank, descriptor, permit, clipped, outcome)
                });
            }

            if in_flight.is_empty() {
                break;
            }

            match tokio::time::timeout_at(deadline, in_flight.next()).await {
                Err(_) => {
                    run.deadline_exceeded = true;
                    break;
                }
                Ok(None) => break,
                Ok(Some((rank, descriptor, permit, clipped, outcome))) => {
                    if self.observe(descriptor, permit, &outcome, clipped, &mut run.attempts) {
                        run.deadline_exceeded = true;
                    }
                    if let Ok(value) = outcome.result {
                        successes.push((rank, descriptor, value));
                        if successes.len() >= quorum {
                            break;
                        }
                    }
                }
            }
        }

        // Dropping the pending attempts releases their breaker permits.
        if !in_flight.is_empty() {
            tracing::debug!(abandoned = in_flight.len(), "in-flight attempts abandoned");
        }
        drop(in_flight);

        successes.sort_by_key(|(rank, ..)| *rank);
        run.successes = successes
            .into_iter()
            .map(|(_, descriptor, value)| (descriptor, value))
            .collect();
        run
    }

    /// Picks the value to return from the successes of one run, `None` when
    /// there were none.
    fn settle(
        &self,
        mode: ResolveMode,
        successes: Vec<(&SourceDescriptor, FeedValue)>,
    ) -> Option<(FeedValue, SourceId, Option<ConsensusResult>, Vec<String>)> {
        let mut warnings = Vec::new();
        let values: Vec<(SourceId, FeedValue)> = successes
            .into_iter()
            .map(|(descriptor, value)| (descriptor.id.clone(), value))
            .collect();
        let (source, first) = values.first().cloned()?;

        let consensus = match mode {
            ResolveMode::Sequential => None,
            ResolveMode::Parallel => match self.consensus.combine(&values) {
                Ok(result) => Some(result),
                Err(err) => {
                    tracing::debug!(error = %err, "consensus skipped");
                    None
                }
            },
        };

        Some(match consensus {
            Some(result) => {
                if result.low_confidence {
                    let outliers: Vec<&str> = result.outliers.iter().map(SourceId::as_str).collect();
                    warnings.push(format!(
                        "low consensus confidence; outliers: {}",
                        outliers.join(", ")
                    ));
                }
                (result.value.clone(), source, Some(result), warnings)
            }
            None => (first, source, None, warnings),
        })
    }
}

fn from_entry(
    entry: &CacheEntry,
    freshness: Freshness,
    attempts: Vec<AttemptRecord>,
    skipped: Vec<SkippedSource>,
    started: Instant,
) -> Resolved {
    Resolved {
        category: entry.key.category,
        key: entry.key.key.clone(),
        value: entry.value.clone(),
        freshness,
        source: entry.source.clone(),
        fetched_at: entry.fetched_at_utc,
        age_ms: u64::try_from(entry.age().as_millis()).unwrap_or(u64::MAX),
        latency_ms: elapsed_ms(started),
        attempts,
        skipped,
        consensus: None,
        warnings: Vec::new(),
    }
}
