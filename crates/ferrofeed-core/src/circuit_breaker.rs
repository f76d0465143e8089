//! Per-source circuit breakers.
//!
//! Each source owns one cell moving through `Closed -> Open -> HalfOpen ->
//! {Closed | Open}`. Cells are created lazily in `Closed` the first time a
//! source is seen and live for the lifetime of the registry.
//!
//! | Trigger | Cooldown |
//! |---------|----------|
//! | `failure_threshold` consecutive failures | `cooldown` |
//! | failure rate above `failure_rate_threshold` over a full window | `cooldown` |
//! | `RateLimited` | `rate_limit_cooldown`, doubling per repeat up to `rate_limit_cooldown_max` |
//! | `AuthFailed` / `GeoBlocked` | `auth_cooldown` |
//! | failed half-open trial | previous cooldown doubled, up to `max_cooldown` |

use std::collections::{HashMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::backoff::Backoff;
use crate::config::duration_secs;
use crate::outcome::ErrorKind;
use crate::source::SourceId;
use crate::ValidationError;

/// Runtime circuit state of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub window_size: usize,
    pub failure_rate_threshold: f64,
    #[serde(rename = "cooldown_secs", with = "duration_secs")]
    pub cooldown: Duration,
    #[serde(rename = "auth_cooldown_secs", with = "duration_secs")]
    pub auth_cooldown: Duration,
    #[serde(rename = "rate_limit_cooldown_secs", with = "duration_secs")]
    pub rate_limit_cooldown: Duration,
    #[serde(rename = "rate_limit_cooldown_max_secs", with = "duration_secs")]
    pub rate_limit_cooldown_max: Duration,
    #[serde(rename = "max_cooldown_secs", with = "duration_secs")]
    pub max_cooldown: Duration,
    /// Spread rate-limit cooldowns by +/- 50%.
    pub jitter: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_size: 20,
            failure_rate_threshold: 0.5,
            cooldown: Duration::from_secs(60),
            auth_cooldown: Duration::from_secs(3600),
            rate_limit_cooldown: Duration::from_secs(5),
            rate_limit_cooldown_max: Duration::from_secs(300),
            max_cooldown: Duration::from_secs(3600),
            jitter: false,
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.failure_threshold == 0 {
            return Err(ValidationError::ZeroConfigValue {
                field: "breaker.failure_threshold",
            });
        }
        if self.window_size == 0 {
            return Err(ValidationError::ZeroConfigValue {
                field: "breaker.window_size",
            });
        }
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 1.0) {
            return Err(ValidationError::ConfigOutOfRange {
                field: "breaker.failure_rate_threshold",
                range: "(0, 1]",
            });
        }
        for (field, value) in [
            ("breaker.cooldown_secs", self.cooldown),
            ("breaker.auth_cooldown_secs", self.auth_cooldown),
            ("breaker.rate_limit_cooldown_secs", self.rate_limit_cooldown),
            ("breaker.max_cooldown_secs", self.max_cooldown),
        ] {
            if value.is_zero() {
                return Err(ValidationError::ZeroConfigValue { field });
            }
        }
        if self.rate_limit_cooldown_max < self.rate_limit_cooldown {
            return Err(ValidationError::ConfigOutOfRange {
                field: "breaker.rate_limit_cooldown_max_secs",
                range: ">= rate_limit_cooldown_secs",
            });
        }
        Ok(())
    }

    fn rate_limit_backoff(&self) -> Backoff {
        Backoff {
            base: self.rate_limit_cooldown,
            factor: 2.0,
            max: self.rate_limit_cooldown_max,
            jitter: self.jitter,
        }
    }
}

/// Point-in-time view of one source's breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceHealth {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    #[serde(skip)]
    pub opened_at: Option<Instant>,
    pub cooldown_remaining_ms: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorKind>,
}

#[derive(Debug)]
struct BreakerCell {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
    trial_in_flight: bool,
    trial_epoch: u64,
    rate_limit_strikes: u32,
    success_count: u64,
    failure_count: u64,
    latency_total_ms: u64,
    recent_failures: VecDeque<bool>,
    last_error: Option<ErrorKind>,
}

impl BreakerCell {
    fn new(cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            cooldown,
            trial_in_flight: false,
            trial_epoch: 0,
            rate_limit_strikes: 0,
            success_count: 0,
            failure_count: 0,
            latency_total_ms: 0,
            recent_failures: VecDeque::new(),
            last_error: None,
        }
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        self.opened_at
            .map(|opened_at| now.saturating_duration_since(opened_at) >= self.cooldown)
            .unwrap_or(true)
    }

    fn push_outcome(&mut self, failed: bool, window_size: usize) {
        self.recent_failures.push_back(failed);
        while self.recent_failures.len() > window_size {
            self.recent_failures.pop_front();
        }
    }

    fn window_failure_rate(&self, window_size: usize) -> Option<f64> {
        if self.recent_failures.len() < window_size {
            return None;
        }
        let failures = self.recent_failures.iter().filter(|failed| **failed).count();
        Some(failures as f64 / self.recent_failures.len() as f64)
    }

    fn start_trial(&mut self) -> u64 {
        self.trial_in_flight = true;
        self.trial_epoch = self.trial_epoch.wrapping_add(1);
        self.trial_epoch
    }

    fn close(&mut self, base_cooldown: Duration) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.cooldown = base_cooldown;
        self.trial_in_flight = false;
        self.rate_limit_strikes = 0;
        self.recent_failures.clear();
    }

    fn snapshot(&self, now: Instant) -> SourceHealth {
        let cooldown_remaining_ms = match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                let elapsed = now.saturating_duration_since(opened_at);
                duration_ms(self.cooldown.saturating_sub(elapsed))
            }
            _ => 0,
        };
        let avg_latency_ms = if self.success_count == 0 {
            0.0
        } else {
            self.latency_total_ms as f64 / self.success_count as f64
        };

        SourceHealth {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            opened_at: self.opened_at,
            cooldown_remaining_ms,
            success_count: self.success_count,
            failure_count: self.failure_count,
            avg_latency_ms,
            last_error: self.last_error,
        }
    }
}

/// Thread-safe registry of per-source circuit breakers.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    cells: RwLock<HashMap<SourceId, Arc<Mutex<BreakerCell>>>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            cells: RwLock::new(HashMap::new()),
        }
    }

    pub const fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Grants a dispatch permit. Moves an expired `Open` breaker to `HalfOpen`
    /// and hands out its single trial.
    ///
    /// A granted trial stays taken until a verdict or
    /// [`record_abandoned`](Self::record_abandoned) arrives; prefer
    /// [`acquire`](Self::acquire) when the attempt may be cancelled.
    pub fn allow(&self, id: &SourceId) -> bool {
        self.grant(id).is_some()
    }

    /// Grants a dispatch permit that releases its half-open trial when dropped
    /// without a verdict.
    pub fn acquire(&self, id: &SourceId) -> Option<BreakerPermit<'_>> {
        let trial = self.grant(id)?;
        Some(BreakerPermit {
            breaker: self,
            id: id.clone(),
            trial,
        })
    }

    /// `Some(None)` for a closed permit, `Some(Some(epoch))` for a trial.
    fn grant(&self, id: &SourceId) -> Option<Option<u64>> {
        let cell = self.cell(id);
        let mut cell = cell.lock().unwrap_or_else(PoisonError::into_inner);
        match cell.state {
            CircuitState::Closed => Some(None),
            CircuitState::HalfOpen => {
                if cell.trial_in_flight {
                    None
                } else {
                    Some(Some(cell.start_trial()))
                }
            }
            CircuitState::Open => {
                if !cell.cooldown_elapsed(Instant::now()) {
                    return None;
                }
                cell.state = CircuitState::HalfOpen;
                tracing::debug!(source = %id, "circuit half-open, dispatching trial");
                Some(Some(cell.start_trial()))
            }
        }
    }

    /// Planning check: would `allow` grant a permit right now. Never mutates.
    pub fn is_available(&self, id: &SourceId) -> bool {
        let Some(cell) = self.existing_cell(id) else {
            return true;
        };
        let cell = cell.lock().unwrap_or_else(PoisonError::into_inner);
        match cell.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !cell.trial_in_flight,
            CircuitState::Open => cell.cooldown_elapsed(Instant::now()),
        }
    }

    pub fn record_success(&self, id: &SourceId, latency_ms: u64) {
        let cell = self.cell(id);
        let mut cell = cell.lock().unwrap_or_else(PoisonError::into_inner);
        cell.success_count = cell.success_count.saturating_add(1);
        cell.latency_total_ms = cell.latency_total_ms.saturating_add(latency_ms);
        cell.push_outcome(false, self.config.window_size);

        match cell.state {
            CircuitState::Closed => cell.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                cell.close(self.config.cooldown);
                tracing::info!(source = %id, "circuit closed after successful trial");
            }
            // Late answer from an attempt dispatched before the breaker opened.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, id: &SourceId, kind: ErrorKind) {
        let cell = self.cell(id);
        let mut cell = cell.lock().unwrap_or_else(PoisonError::into_inner);

        if !kind.counts_as_failure() {
            if cell.state == CircuitState::HalfOpen {
                cell.close(self.config.cooldown);
                tracing::info!(source = %id, kind = %kind, "circuit closed, source reachable");
            }
            return;
        }

        cell.failure_count = cell.failure_count.saturating_add(1);
        cell.consecutive_failures = cell.consecutive_failures.saturating_add(1);
        cell.last_error = Some(kind);
        cell.push_outcome(true, self.config.window_size);

        let should_open = match cell.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => {
                kind.forces_cooldown()
                    || cell.consecutive_failures >= self.config.failure_threshold
                    || cell
                        .window_failure_rate(self.config.window_size)
                        .is_some_and(|rate| rate > self.config.failure_rate_threshold)
            }
            CircuitState::Open => false,
        };

        if should_open {
            self.trip(id, &mut cell, kind);
        }
    }

    /// Releases a half-open trial slot without a verdict.
    pub fn record_abandoned(&self, id: &SourceId) {
        let Some(cell) = self.existing_cell(id) else {
            return;
        };
        let mut cell = cell.lock().unwrap_or_else(PoisonError::into_inner);
        if cell.state == CircuitState::HalfOpen {
            cell.trial_in_flight = false;
        }
    }

    /// Releases the trial handed out as `epoch`, unless a later trial replaced it.
    fn release_trial(&self, id: &SourceId, epoch: u64) {
        let Some(cell) = self.existing_cell(id) else {
            return;
        };
        let mut cell = cell.lock().unwrap_or_else(PoisonError::into_inner);
        if cell.state == CircuitState::HalfOpen && cell.trial_in_flight && cell.trial_epoch == epoch {
            cell.trial_in_flight = false;
            tracing::debug!(source = %id, "half-open trial abandoned");
        }
    }

    pub fn state(&self, id: &SourceId) -> CircuitState {
        self.existing_cell(id)
            .map(|cell| cell.lock().unwrap_or_else(PoisonError::into_inner).state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self, id: &SourceId) -> SourceHealth {
        let now = Instant::now();
        match self.existing_cell(id) {
            Some(cell) => cell
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .snapshot(now),
            None => BreakerCell::new(self.config.cooldown).snapshot(now),
        }
    }

    fn trip(&self, id: &SourceId, cell: &mut BreakerCell, kind: ErrorKind) {
        let from_trial = cell.state == CircuitState::HalfOpen;
        let cooldown = match kind {
            ErrorKind::AuthFailed | ErrorKind::GeoBlocked => self.config.auth_cooldown,
            ErrorKind::RateLimited => {
                let cooldown = self.config.rate_limit_backoff().delay(cell.rate_limit_strikes);
                cell.rate_limit_strikes = cell.rate_limit_strikes.saturating_add(1);
                cooldown
            }
            _ if from_trial => cell
                .cooldown
                .saturating_mul(2)
                .min(self.config.max_cooldown),
            _ => self.config.cooldown,
        };

        cell.state = CircuitState::Open;
        cell.opened_at = Some(Instant::now());
        cell.cooldown = cooldown;
        cell.trial_in_flight = false;

        let cooldown_ms = duration_ms(cooldown);
        if cooldown >= self.config.max_cooldown {
            tracing::warn!(source = %id, kind = %kind, cooldown_ms, "circuit opened with long cooldown");
        } else {
            tracing::info!(
                source = %id,
                kind = %kind,
                cooldown_ms,
                consecutive_failures = cell.consecutive_failures,
                "circuit opened"
            );
        }
    }

    fn existing_cell(&self, id: &SourceId) -> Option<Arc<Mutex<BreakerCell>>> {
        self.cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(Arc::clone)
    }

    fn cell(&self, id: &SourceId) -> Arc<Mutex<BreakerCell>> {
        if let Some(cell) = self.existing_cell(id) {
            return cell;
        }
        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            cells
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(BreakerCell::new(self.config.cooldown)))),
        )
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Dispatch permit from [`CircuitBreaker::acquire`].
///
/// Recording a verdict consumes the permit. Dropping it without one, as
/// happens when the attempt future is cancelled, gives a half-open trial
/// slot back so the source is retried after its cooldown.
#[derive(Debug)]
#[must_use = "dropping the permit abandons the attempt"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    id: SourceId,
    trial: Option<u64>,
}

impl BreakerPermit<'_> {
    pub const fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    pub fn record_success(mut self, latency_ms: u64) {
        self.trial = None;
        self.breaker.record_success(&self.id, latency_ms);
    }

    pub fn record_failure(mut self, kind: ErrorKind) {
        self.trial = None;
        self.breaker.record_failure(&self.id, kind);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if let Some(epoch) = self.trial.take() {
            self.breaker.release_trial(&self.id, epoch);
        }
    }
}
