//! Response parsing seam.
//!
//! [`JsonAdapter`] extracts values from JSON bodies:
//!
//! | Category | Expected value at `value_pointer` |
//! |----------|-----------------------------------|
//! | `market_price`, `sentiment` | number or numeric string |
//! | `ohlc` | array of `[time, open, high, low, close, volume?]` rows or row objects |
//! | `news`, `on_chain`, `whale_tracking` | any non-null JSON document |

use serde_json::Value;
use thiserror::Error;

use crate::catalog::SourceDescriptor;
use crate::domain::{Candle, FeedValue};
use crate::source::Category;
use crate::transport::{FetchRequest, RawResponse};
use crate::ValidationError;

/// Reasons a provider body could not be turned into a [`FeedValue`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("no value at pointer '{pointer}'")]
    MissingValue { pointer: String },
    #[error("value at pointer '{pointer}' is not numeric")]
    NotNumeric { pointer: String },
    #[error("candle series is empty")]
    EmptySeries,
    #[error("candle row {index} is malformed")]
    MalformedRow { index: usize },
    #[error("candle row {index} is invalid: {source}")]
    InvalidCandle {
        index: usize,
        #[source]
        source: ValidationError,
    },
}

/// Turns a successful raw response into a structured value.
pub trait Adapter: Send + Sync {
    fn parse(
        &self,
        descriptor: &SourceDescriptor,
        request: &FetchRequest,
        response: &RawResponse,
    ) -> Result<FeedValue, ParseError>;
}

/// JSON-pointer based adapter shared by every source.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonAdapter;

impl Adapter for JsonAdapter {
    fn parse(
        &self,
        descriptor: &SourceDescriptor,
        request: &FetchRequest,
        response: &RawResponse,
    ) -> Result<FeedValue, ParseError> {
        let document: Value = serde_json::from_str(&response.body)
            .map_err(|err| ParseError::InvalidJson(err.to_string()))?;

        let pointer = descriptor
            .render_value_pointer(&request.key)
            .unwrap_or_default();
        let target = document
            .pointer(&pointer)
            .filter(|value| !value.is_null())
            .ok_or_else(|| ParseError::MissingValue {
                pointer: pointer.clone(),
            })?;

        match request.category {
            Category::MarketPrice | Category::Sentiment => {
                let number = as_f64(target).ok_or_else(|| ParseError::NotNumeric {
                    pointer: pointer.clone(),
                })?;
                FeedValue::number(number).map_err(|_| ParseError::NotNumeric { pointer })
            }
            Category::Ohlc => parse_candles(target).map(FeedValue::Candles),
            Category::News | Category::OnChain | Category::WhaleTracking => {
                Ok(FeedValue::Document(target.clone()))
            }
        }
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn field<'a>(row: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| row.get(*name))
}

fn parse_candles(value: &Value) -> Result<Vec<Candle>, ParseError> {
    let rows = value.as_array().ok_or(ParseError::MalformedRow { index: 0 })?;
    if rows.is_empty() {
        return Err(ParseError::EmptySeries);
    }

    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let malformed = || ParseError::MalformedRow { index };
            let (time, open, high, low, close, volume) = match row {
                Value::Array(cells) => (
                    cells.first().and_then(as_i64),
                    cells.get(1).and_then(as_f64),
                    cells.get(2).and_then(as_f64),
                    cells.get(3).and_then(as_f64),
                    cells.get(4).and_then(as_f64),
                    cells.get(5).and_then(as_f64),
                ),
                Value::Object(_) => (
                    field(row, &["open_time_ms", "time", "t"]).and_then(as_i64),
                    field(row, &["open", "o"]).and_then(as_f64),
                    field(row, &["high", "h"]).and_then(as_f64),
                    field(row, &["low", "l"]).and_then(as_f64),
                    field(row, &["close", "c"]).and_then(as_f64),
                    field(row, &["volume", "v"]).and_then(as_f64),
                ),
                _ => return Err(malformed()),
            };

            let (Some(time), Some(open), Some(high), Some(low), Some(close)) =
                (time, open, high, low, close)
            else {
                return Err(malformed());
            };

            Candle::new(time, open, high, low, close, volume)
                .map_err(|source| ParseError::InvalidCandle { index, source })
        })
        .collect()
}
