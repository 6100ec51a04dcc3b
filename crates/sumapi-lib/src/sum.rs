//! Sum request decoding, validation and response construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};

/// Smallest accepted number of inputs (inclusive).
pub const MIN_NUMBERS: usize = 2;

/// Largest accepted number of inputs (inclusive).
pub const MAX_NUMBERS: usize = 100;

/// Request payload for the sum endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumRequest {
    /// Values to add, in the order they were supplied.
    pub numbers: Vec<f64>,
}

impl SumRequest {
    /// Decode a request from a raw JSON body.
    ///
    /// The `numbers` field is required; `null`, a missing field or a
    /// non-numeric element is a decode error rather than a validation error.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Check the input length against [`MIN_NUMBERS`] and [`MAX_NUMBERS`].
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let got = self.numbers.len();
        if got < MIN_NUMBERS {
            return Err(ValidationError::TooFewNumbers {
                min: MIN_NUMBERS,
                got,
            });
        }
        if got > MAX_NUMBERS {
            return Err(ValidationError::TooManyNumbers {
                max: MAX_NUMBERS,
                got,
            });
        }
        Ok(())
    }
}

/// Response payload for a successful sum calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumResponse {
    pub sum: f64,
    pub count: usize,
    pub numbers: Vec<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
}

impl SumResponse {
    /// Compute the sum of `numbers` and wrap it with the echoed input.
    ///
    /// Values are accumulated left to right with plain `f64` addition, so the
    /// result matches a sequential fold over the input. A sum that overflows
    /// to infinity has no JSON representation and is rejected.
    pub fn new(
        numbers: Vec<f64>,
        request_id: impl Into<String>,
    ) -> std::result::Result<Self, ValidationError> {
        let sum = numbers.iter().fold(0.0, |acc, n| acc + n);
        if !sum.is_finite() {
            return Err(ValidationError::SumNotFinite);
        }
        Ok(Self {
            sum,
            count: numbers.len(),
            numbers,
            timestamp: Utc::now(),
            request_id: request_id.into(),
        })
    }
}

impl std::fmt::Display for SumResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SumResponse{{sum: {}, count: {}}}", self.sum, self.count)
    }
}
