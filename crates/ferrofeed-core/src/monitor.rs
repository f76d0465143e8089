use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::outcome::{ErrorKind, FetchOutcome};
use crate::source::SourceId;
use crate::ValidationError;

/// Rolling statistics settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Number of recent attempts in the success-rate window.
    pub window: usize,
    /// Weight of the newest sample in the latency EMA.
    pub latency_alpha: f64,
    /// Latency at which the health score is halved.
    pub reference_latency_ms: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window: 50,
            latency_alpha: 0.2,
            reference_latency_ms: 1_000.0,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.window == 0 {
            return Err(ValidationError::ZeroConfigValue {
                field: "monitor.window",
            });
        }
        if !(self.latency_alpha > 0.0 && self.latency_alpha <= 1.0) {
            return Err(ValidationError::ConfigOutOfRange {
                field: "monitor.latency_alpha",
                range: "(0, 1]",
            });
        }
        if !(self.reference_latency_ms.is_finite() && self.reference_latency_ms > 0.0) {
            return Err(ValidationError::ZeroConfigValue {
                field: "monitor.reference_latency_ms",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SourceRecord {
    recent: VecDeque<bool>,
    ema_latency_ms: Option<f64>,
}

impl SourceRecord {
    fn success_rate(&self) -> Option<f64> {
        if self.recent.is_empty() {
            return None;
        }
        let ok = self.recent.iter().filter(|ok| **ok).count();
        Some(ok as f64 / self.recent.len() as f64)
    }
}

/// Rolling per-source view used by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub observed: usize,
    pub success_rate: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub health_score: f64,
}

/// Rolling success rate and latency per source; only ever a ranking signal.
#[derive(Debug, Default)]
pub struct SourceMonitor {
    config: MonitorConfig,
    records: RwLock<HashMap<SourceId, Arc<Mutex<SourceRecord>>>>,
}

impl SourceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn record(&self, outcome: &FetchOutcome) {
        // A logical miss still proves the source answers.
        let reachable = outcome.is_success() || outcome.error_kind() == Some(ErrorKind::NotFound);
        let record = self.record_for(&outcome.source);
        let mut record = record.lock().unwrap_or_else(PoisonError::into_inner);

        record.recent.push_back(reachable);
        while record.recent.len() > self.config.window {
            record.recent.pop_front();
        }

        let sample = outcome.latency_ms as f64;
        let alpha = self.config.latency_alpha;
        record.ema_latency_ms = Some(match record.ema_latency_ms {
            Some(previous) => alpha * sample + (1.0 - alpha) * previous,
            None => sample,
        });
    }

    /// `success_rate / (1 + ema_latency / reference_latency)`; 1.0 when unobserved.
    pub fn health_score(&self, id: &SourceId) -> f64 {
        self.snapshot(id).health_score
    }

    pub fn avg_latency_ms(&self, id: &SourceId) -> Option<f64> {
        self.snapshot(id).avg_latency_ms
    }

    pub fn snapshot(&self, id: &SourceId) -> MonitorSnapshot {
        let record = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(Arc::clone);

        let Some(record) = record else {
            return MonitorSnapshot {
                observed: 0,
                success_rate: None,
                avg_latency_ms: None,
                health_score: 1.0,
            };
        };
        let record = record.lock().unwrap_or_else(PoisonError::into_inner);

        let health_score = match (record.success_rate(), record.ema_latency_ms) {
            (Some(rate), Some(latency)) => {
                rate / (1.0 + latency / self.config.reference_latency_ms)
            }
            _ => 1.0,
        };

        MonitorSnapshot {
            observed: record.recent.len(),
            success_rate: record.success_rate(),
            avg_latency_ms: record.ema_latency_ms,
            health_score,
        }
    }

    fn record_for(&self, id: &SourceId) -> Arc<Mutex<SourceRecord>> {
        if let Some(record) = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            return Arc::clone(record);
        }
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(records.entry(id.clone()).or_default())
    }
}
