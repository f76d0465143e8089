use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_SOURCE_ID_LEN: usize = 64;

/// Validated catalog identifier of a data source (e.g. `coingecko`, `binance_spot`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(ValidationError::EmptySourceId);
        }

        if normalized.len() > MAX_SOURCE_ID_LEN {
            return Err(ValidationError::SourceIdTooLong {
                len: normalized.len(),
                max: MAX_SOURCE_ID_LEN,
            });
        }

        for (index, ch) in normalized.chars().enumerate() {
            if !(ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.')) {
                return Err(ValidationError::SourceIdInvalidChar { ch, index });
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Environment-variable friendly form: `binance-spot` becomes `BINANCE_SPOT`.
    pub fn env_suffix(&self) -> String {
        self.0
            .chars()
            .map(|ch| match ch {
                '-' | '.' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect()
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SourceId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for SourceId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SourceId> for String {
    fn from(value: SourceId) -> Self {
        value.0
    }
}

/// Kind of requested data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    MarketPrice,
    #[serde(rename = "ohlc")]
    Ohlc,
    News,
    Sentiment,
    OnChain,
    WhaleTracking,
}

impl Category {
    pub const ALL: [Self; 6] = [
        Self::MarketPrice,
        Self::Ohlc,
        Self::News,
        Self::Sentiment,
        Self::OnChain,
        Self::WhaleTracking,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MarketPrice => "market_price",
            Self::Ohlc => "ohlc",
            Self::News => "news",
            Self::Sentiment => "sentiment",
            Self::OnChain => "on_chain",
            Self::WhaleTracking => "whale_tracking",
        }
    }

    /// Whether values of this category are expected to carry a numeric view.
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::MarketPrice | Self::Ohlc | Self::Sentiment)
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let compact = value
            .trim()
            .to_ascii_lowercase()
            .replace(['_', '-', ' '], "");
        match compact.as_str() {
            "marketprice" | "price" => Ok(Self::MarketPrice),
            "ohlc" | "candles" => Ok(Self::Ohlc),
            "news" => Ok(Self::News),
            "sentiment" => Ok(Self::Sentiment),
            "onchain" => Ok(Self::OnChain),
            "whaletracking" | "whales" => Ok(Self::WhaleTracking),
            _ => Err(ValidationError::InvalidCategory {
                value: value.trim().to_owned(),
            }),
        }
    }
}

/// Priority bucket; Critical sources are always tried first, Emergency last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Critical,
    High,
    Medium,
    Low,
    Emergency,
}

impl Tier {
    pub const ALL: [Self; 5] = [
        Self::Critical,
        Self::High,
        Self::Medium,
        Self::Low,
        Self::Emergency,
    ];

    /// Cascade position; lower ranks are attempted first.
    pub const fn rank(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
            Self::Emergency => 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Emergency => "emergency",
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "emergency" => Ok(Self::Emergency),
            other => Err(ValidationError::InvalidTier {
                value: other.to_owned(),
            }),
        }
    }
}
