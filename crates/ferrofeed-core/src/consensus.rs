use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::FeedValue;
use crate::source::SourceId;
use crate::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Relative deviation from the median above which a source is an outlier.
    pub outlier_tolerance: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            outlier_tolerance: 0.05,
        }
    }
}

impl ConsensusConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.outlier_tolerance.is_finite() && self.outlier_tolerance > 0.0) {
            return Err(ValidationError::ConfigOutOfRange {
                field: "consensus.outlier_tolerance",
                range: "(0, inf)",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("consensus needs at least one successful value")]
    NoSuccesses,
    #[error("none of the successful values is numeric")]
    NoNumericValues,
}

/// Aggregate of several sources answering the same request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusResult {
    pub value: FeedValue,
    pub mean: f64,
    pub median: f64,
    pub stdev: f64,
    pub sources_used: Vec<SourceId>,
    pub confidence: f64,
    pub low_confidence: bool,
    pub outliers: Vec<SourceId>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsensusValidator {
    config: ConsensusConfig,
}

impl ConsensusValidator {
    pub const fn new(config: ConsensusConfig) -> Self {
        Self { config }
    }

    /// Combines successful values. Non-numeric values are ignored.
    pub fn combine(&self, values: &[(SourceId, FeedValue)]) -> Result<ConsensusResult, ConsensusError> {
        if values.is_empty() {
            return Err(ConsensusError::NoSuccesses);
        }

        let numeric: Vec<(&SourceId, &FeedValue, f64)> = values
            .iter()
            .filter_map(|(source, value)| value.numeric().map(|number| (source, value, number)))
            .collect();
        if numeric.is_empty() {
            return Err(ConsensusError::NoNumericValues);
        }

        let count = numeric.len() as f64;
        let mean = numeric.iter().map(|(_, _, number)| number).sum::<f64>() / count;
        let median = median(numeric.iter().map(|(_, _, number)| *number).collect());
        let variance = numeric
            .iter()
            .map(|(_, _, number)| (number - mean).powi(2))
            .sum::<f64>()
            / count;
        let stdev = variance.sqrt();

        let confidence = if mean == 0.0 {
            if stdev == 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            (1.0 - stdev / mean.abs()).clamp(0.0, 1.0)
        };

        let tolerance = self.config.outlier_tolerance * median.abs();
        let outliers: Vec<SourceId> = numeric
            .iter()
            .filter(|(_, _, number)| (number - median).abs() > tolerance)
            .map(|(source, _, _)| (*source).clone())
            .collect();

        let all_numbers = numeric
            .iter()
            .all(|(_, value, _)| matches!(value, FeedValue::Number(_)));
        let value = if all_numbers {
            FeedValue::Number(median)
        } else {
            numeric
                .iter()
                .min_by(|left, right| {
                    (left.2 - median)
                        .abs()
                        .total_cmp(&(right.2 - median).abs())
                })
                .map(|(_, value, _)| (*value).clone())
                .ok_or(ConsensusError::NoNumericValues)?
        };

        Ok(ConsensusResult {
            value,
            mean,
            median,
            stdev,
            sources_used: numeric.iter().map(|(source, _, _)| (*source).clone()).collect(),
            confidence,
            low_confidence: !outliers.is_empty(),
            outliers,
        })
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
