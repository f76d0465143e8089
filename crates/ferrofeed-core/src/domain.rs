use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// One validated OHLCV row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time in unix milliseconds.
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
}

impl Candle {
    pub fn new(
        open_time_ms: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: Option<f64>,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("open", open)?;
        validate_non_negative("high", high)?;
        validate_non_negative("low", low)?;
        validate_non_negative("close", close)?;
        if let Some(volume) = volume {
            validate_non_negative("volume", volume)?;
        }

        if high < low {
            return Err(ValidationError::InvalidCandleRange);
        }

        if open < low || open > high || close < low || close > high {
            return Err(ValidationError::InvalidCandleBounds);
        }

        Ok(Self {
            open_time_ms,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

/// Structured value extracted from a provider response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FeedValue {
    Number(f64),
    Candles(Vec<Candle>),
    Document(serde_json::Value),
}

impl FeedValue {
    /// Builds a numeric value, rejecting NaN and infinities.
    pub fn number(value: f64) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteValue { field: "value" });
        }
        Ok(Self::Number(value))
    }

    /// Scalar used by consensus: the number itself or the last candle close.
    pub fn numeric(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Candles(candles) => candles.last().map(|candle| candle.close),
            Self::Document(_) => None,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Candles(_) => "candles",
            Self::Document(_) => "document",
        }
    }
}

fn validate_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}
