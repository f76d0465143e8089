//! Orchestrator configuration.
//!
//! Every field has a default, so `{}` is a valid configuration file.
//!
//! | Key | Default | Meaning |
//! |-----|---------|---------|
//! | `attempt_timeout_ms` | 8000 | per-attempt budget |
//! | `category_timeouts_ms` | `{}` | per-category override of the attempt budget |
//! | `resolve_deadline_ms` | 15000 | budget of a whole resolve |
//! | `parallel.fan_out` | 3 | concurrent attempts in parallel mode |
//! | `parallel.quorum` | 3 | successes awaited in parallel mode |
//! | `breaker.*` | see [`BreakerConfig`] | circuit breaker thresholds |
//! | `cache.<category>` | see [`CachePolicy::default_for`](crate::CachePolicy::default_for) | ttl/max-age |
//! | `monitor.*` | see [`MonitorConfig`] | ranking statistics |
//! | `consensus.outlier_tolerance` | 0.05 | outlier threshold |
//!
//! | Environment variable | Overrides |
//! |----------------------|-----------|
//! | `FERROFEED_RESOLVE_DEADLINE_MS` | `resolve_deadline_ms` |
//! | `FERROFEED_ATTEMPT_TIMEOUT_MS` | `attempt_timeout_ms` |

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CachePolicies;
use crate::circuit_breaker::BreakerConfig;
use crate::consensus::ConsensusConfig;
use crate::monitor::MonitorConfig;
use crate::source::Category;
use crate::{CoreError, ValidationError};

pub const RESOLVE_DEADLINE_ENV: &str = "FERROFEED_RESOLVE_DEADLINE_MS";
pub const ATTEMPT_TIMEOUT_ENV: &str = "FERROFEED_ATTEMPT_TIMEOUT_MS";

/// Parallel-mode fan-out settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    pub fan_out: usize,
    pub quorum: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            fan_out: 3,
            quorum: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    #[serde(rename = "attempt_timeout_ms", with = "duration_ms")]
    pub attempt_timeout: Duration,
    pub category_timeouts_ms: BTreeMap<Category, u64>,
    #[serde(rename = "resolve_deadline_ms", with = "duration_ms")]
    pub resolve_deadline: Duration,
    pub parallel: ParallelConfig,
    pub breaker: BreakerConfig,
    pub cache: CachePolicies,
    pub monitor: MonitorConfig,
    pub consensus: ConsensusConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(8),
            category_timeouts_ms: BTreeMap::new(),
            resolve_deadline: Duration::from_secs(15),
            parallel: ParallelConfig::default(),
            breaker: BreakerConfig::default(),
            cache: CachePolicies::default(),
            monitor: MonitorConfig::default(),
            consensus: ConsensusConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_json_str(input: &str) -> Result<Self, CoreError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Applies `FERROFEED_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self, ValidationError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ms) = positive_ms(RESOLVE_DEADLINE_ENV, &lookup)? {
            self.resolve_deadline = Duration::from_millis(ms);
        }
        if let Some(ms) = positive_ms(ATTEMPT_TIMEOUT_ENV, &lookup)? {
            self.attempt_timeout = Duration::from_millis(ms);
        }
        Ok(self)
    }

    /// Per-attempt budget for `category`.
    pub fn attempt_timeout_for(&self, category: Category) -> Duration {
        self.category_timeouts_ms
            .get(&category)
            .map(|ms| Duration::from_millis(*ms))
            .unwrap_or(self.attempt_timeout)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.attempt_timeout.is_zero() {
            return Err(ValidationError::ZeroConfigValue {
                field: "attempt_timeout_ms",
            });
        }
        if self.category_timeouts_ms.values().any(|ms| *ms == 0) {
            return Err(ValidationError::ZeroConfigValue {
                field: "category_timeouts_ms",
            });
        }
        if self.resolve_deadline.is_zero() {
            return Err(ValidationError::ZeroConfigValue {
                field: "resolve_deadline_ms",
            });
        }
        if self.parallel.fan_out == 0 {
            return Err(ValidationError::ZeroConfigValue {
                field: "parallel.fan_out",
            });
        }
        if self.parallel.quorum == 0 {
            return Err(ValidationError::ZeroConfigValue {
                field: "parallel.quorum",
            });
        }
        self.breaker.validate()?;
        self.cache.validate()?;
        self.monitor.validate()?;
        self.consensus.validate()
    }
}

fn positive_ms<F>(name: &'static str, lookup: &F) -> Result<Option<u64>, ValidationError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Some(ms)),
        _ => Err(ValidationError::InvalidEnvOverride { name, value: raw }),
    }
}

/// `Duration` as whole seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// `Duration` as whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis())
            .map_err(|_| serde::ser::Error::custom("duration exceeds u64 milliseconds"))?;
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;

    #[test]
    fn empty_document_yields_defaults() {
        let config = OrchestratorConfig::from_json_str("{}").expect("valid");
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.parallel.fan_out, 3);
    }

    #[test]
    fn parses_nested_overrides() {
        let config = OrchestratorConfig::from_json_str(
            r#"{
                "attempt_timeout_ms": 2000,
                "category_timeouts_ms": {"news": 5000},
                "breaker": {"failure_threshold": 2, "cooldown_secs": 30},
                "cache": {"market_price": {"ttl_secs": 10, "max_age_secs": 20}},
                "parallel": {"quorum": 2}
            }"#,
        )
        .expect("valid");

        assert_eq!(config.attempt_timeout_for(Category::MarketPrice), Duration::from_secs(2));
        assert_eq!(config.attempt_timeout_for(Category::News), Duration::from_secs(5));
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.breaker.cooldown, Duration::from_secs(30));
        assert_eq!(config.breaker.auth_cooldown, Duration::from_secs(3600));
        assert_eq!(
            config.cache.for_category(Category::MarketPrice),
            CachePolicy::new(Duration::from_secs(10), Duration::from_secs(20))
        );
        assert_eq!(config.parallel, ParallelConfig { fan_out: 3, quorum: 2 });
    }

    #[test]
    fn rejects_invalid_values() {
        let err = OrchestratorConfig::from_json_str(r#"{"parallel": {"fan_out": 0}}"#)
            .expect_err("zero fan-out");
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::ZeroConfigValue { field: "parallel.fan_out" })
        ));

        let err = OrchestratorConfig::from_json_str(
            r#"{"cache": {"news": {"ttl_secs": 60, "max_age_secs": 10}}}"#,
        )
        .expect_err("max_age below ttl");
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::InvalidCachePolicy { .. })
        ));

        assert!(matches!(
            OrchestratorConfig::from_json_str("{not json"),
            Err(CoreError::Serialization(_))
        ));
    }

    #[test]
    fn environment_overrides_apply_and_validate() {
        let config = OrchestratorConfig::default()
            .with_overrides_from(|name| match name {
                RESOLVE_DEADLINE_ENV => Some("2500".to_owned()),
                _ => None,
            })
            .expect("valid override");
        assert_eq!(config.resolve_deadline, Duration::from_millis(2500));
        assert_eq!(config.attempt_timeout, Duration::from_secs(8));

        let err = OrchestratorConfig::default()
            .with_overrides_from(|name| (name == ATTEMPT_TIMEOUT_ENV).then(|| "soon".to_owned()))
            .expect_err("non-numeric override");
        assert_eq!(
            err,
            ValidationError::InvalidEnvOverride {
                name: ATTEMPT_TIMEOUT_ENV,
                value: "soon".to_owned()
            }
        );
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ferrofeed.json");
        std::fs::write(&path, r#"{"resolve_deadline_ms": 1000}"#).expect("write config");

        let config = OrchestratorConfig::load(&path).expect("loads");
        assert_eq!(config.resolve_deadline, Duration::from_secs(1));
    }
}
