//! Tagged result of a single fetch attempt and its error classification.
//!
//! | Kind | Breaker failure | Next source | Extra |
//! |------|-----------------|-------------|-------|
//! | `Timeout` | yes | yes | |
//! | `RateLimited` | yes | yes | opens immediately, short doubling cooldown |
//! | `AuthFailed` | yes | yes | excluded for the resolve, long cooldown |
//! | `GeoBlocked` | yes | yes | excluded for the resolve, long cooldown |
//! | `NotFound` | no | yes | logical miss |
//! | `ServerError` | yes | yes | |
//! | `ParseError` | yes | yes | |

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::domain::FeedValue;
use crate::source::SourceId;

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    RateLimited,
    AuthFailed,
    NotFound,
    ServerError,
    GeoBlocked,
    ParseError,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::AuthFailed => "auth_failed",
            Self::NotFound => "not_found",
            Self::ServerError => "server_error",
            Self::GeoBlocked => "geo_blocked",
            Self::ParseError => "parse_error",
        }
    }

    /// Whether the circuit breaker should count this outcome against the source.
    pub const fn counts_as_failure(self) -> bool {
        !matches!(self, Self::NotFound)
    }

    /// Whether a single occurrence opens the breaker regardless of thresholds.
    pub const fn forces_cooldown(self) -> bool {
        matches!(self, Self::RateLimited | Self::AuthFailed | Self::GeoBlocked)
    }

    /// Maps an HTTP status to a failure kind; `None` for 2xx.
    pub const fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            429 => Some(Self::RateLimited),
            401 | 403 => Some(Self::AuthFailed),
            451 => Some(Self::GeoBlocked),
            404 => Some(Self::NotFound),
            _ => Some(Self::ServerError),
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified attempt failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    kind: ErrorKind,
    message: String,
}

impl FetchFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for FetchFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl std::error::Error for FetchFailure {}

/// Result of one attempt against one source.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub source: SourceId,
    pub result: Result<FeedValue, FetchFailure>,
    pub latency_ms: u64,
}

impl FetchOutcome {
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.result.as_ref().err().map(FetchFailure::kind)
    }

    pub fn value(&self) -> Option<&FeedValue> {
        self.result.as_ref().ok()
    }
}
