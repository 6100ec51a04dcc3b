use thiserror::Error;

/// Convenient result alias for the sum API library.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level library error type.
#[derive(Debug, Error)]
pub enum Error {
    /// The request body could not be decoded into the expected shape.
    #[error("{0}")]
    Decode(#[from] serde_json::Error),

    /// The request decoded but violates an input rule.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Input rule violations for a sum request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Fewer numbers than the lower bound.
    #[error("at least {min} numbers are required, got {got}")]
    TooFewNumbers { min: usize, got: usize },

    /// More numbers than the upper bound.
    #[error("maximum {max} numbers allowed, got {got}")]
    TooManyNumbers { max: usize, got: usize },

    /// The inputs are in range but their sum overflows `f64`.
    #[error("sum is not representable as a finite number")]
    SumNotFinite,
}

impl ValidationError {
    /// Name of the request field the violation applies to.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::TooFewNumbers { .. }
            | ValidationError::TooManyNumbers { .. }
            | ValidationError::SumNotFinite => "numbers",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_name_the_bound() {
        let few = ValidationError::TooFewNumbers { min: 2, got: 1 };
        assert_eq!(few.to_string(), "at least 2 numbers are required, got 1");

        let many = ValidationError::TooManyNumbers { max: 100, got: 101 };
        assert_eq!(many.to_string(), "maximum 100 numbers allowed, got 101");
    }

    #[test]
    fn sum_not_finite_applies_to_numbers() {
        let err = ValidationError::SumNotFinite;
        assert_eq!(err.field(), "numbers");
        assert_eq!(
            err.to_string(),
            "sum is not representable as a finite number"
        );
    }

    #[test]
    fn validation_error_converts_transparently() {
        let err: Error = ValidationError::TooFewNumbers { min: 2, got: 0 }.into();
        assert_eq!(err.to_string(), "at least 2 numbers are required, got 0");
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn decode_error_keeps_decoder_message() {
        let json_err = serde_json::from_str::<Vec<f64>>("nope").unwrap_err();
        let expected = json_err.to_string();
        let err: Error = json_err.into();
        assert_eq!(err.to_string(), expected);
    }
}
