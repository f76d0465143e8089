use std::fmt::{Display, Formatter};

use serde::Serialize;
use thiserror::Error;

use crate::outcome::ErrorKind;
use crate::source::{Category, SourceId, Tier};

/// Validation and contract errors exposed by `ferrofeed-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("source id cannot be empty")]
    EmptySourceId,
    #[error("source id length {len} exceeds max {max}")]
    SourceIdTooLong { len: usize, max: usize },
    #[error("source id contains invalid character '{ch}' at index {index}")]
    SourceIdInvalidChar { ch: char, index: usize },

    #[error(
        "invalid category '{value}', expected one of market_price, ohlc, news, sentiment, on_chain, whale_tracking"
    )]
    InvalidCategory { value: String },
    #[error("invalid tier '{value}', expected one of critical, high, medium, low, emergency")]
    InvalidTier { value: String },
    #[error("invalid resolve mode '{value}', expected sequential or parallel")]
    InvalidMode { value: String },

    #[error("catalog entry {index} is malformed: {message}")]
    MalformedEntry { index: usize, message: String },
    #[error("source '{id}' is declared more than once")]
    DuplicateSource { id: String },
    #[error("source '{id}' weight must be finite and greater than zero")]
    InvalidWeight { id: String },
    #[error("source '{id}' rate limit must allow at least one call per non-zero period")]
    InvalidRateLimit { id: String },
    #[error("source '{id}' endpoint must be an http(s) URL")]
    InvalidEndpoint { id: String },
    #[error("source '{id}' value_pointer must be empty or start with '/'")]
    InvalidValuePointer { id: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
    #[error("candle high must be >= low")]
    InvalidCandleRange,
    #[error("candle open/close must be within high/low range")]
    InvalidCandleBounds,

    #[error("config field '{field}' must be greater than zero")]
    ZeroConfigValue { field: &'static str },
    #[error("config field '{field}' must be within {range}")]
    ConfigOutOfRange {
        field: &'static str,
        range: &'static str,
    },
    #[error("cache policy for '{category}' has max_age shorter than ttl")]
    InvalidCachePolicy { category: Category },
    #[error("environment variable '{name}' must be a positive integer: '{value}'")]
    InvalidEnvOverride { name: &'static str, value: String },
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a candidate was passed over without a network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    CircuitOpen,
    RateLimited,
}

impl SkipReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit_open",
            Self::RateLimited => "rate_limited",
        }
    }
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One physical attempt made during a resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub source: SourceId,
    pub tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub latency_ms: u64,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.error_kind.is_none()
    }
}

/// A candidate that was never dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSource {
    pub source: SourceId,
    pub reason: SkipReason,
}

/// Terminal failure of a resolve: every candidate failed or was skipped and
/// no cache entry within its max age exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoSourceAvailable {
    pub category: Category,
    pub key: String,
    pub attempted: Vec<AttemptRecord>,
    pub skipped: Vec<SkippedSource>,
    pub deadline_exceeded: bool,
}

impl Display for NoSourceAvailable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no source available for {} '{}' ({} attempted, {} skipped",
            self.category,
            self.key,
            self.attempted.len(),
            self.skipped.len()
        )?;
        if self.deadline_exceeded {
            f.write_str(", deadline exceeded")?;
        }
        f.write_str(")")
    }
}

impl std::error::Error for NoSourceAvailable {}

impl NoSourceAvailable {
    /// Error kinds of the attempts, in the order they were observed.
    pub fn last_error_kinds(&self) -> Vec<ErrorKind> {
        self.attempted
            .iter()
            .filter_map(|attempt| attempt.error_kind)
            .collect()
    }
}
