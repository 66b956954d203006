//! Error types for the infusion_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for infusion_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing, non-numeric or out-of-range input to a rule engine
    #[error("{0}")]
    Validation(String),

    /// Input falls in a range the protocol table does not define
    #[error("Value outside defined protocol range: {0}")]
    DomainGap(String),

    /// Key-value store read/write failure
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl Error {
    /// Whether this error came from operator input rather than the system
    pub fn is_input_error(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::DomainGap(_))
    }
}

/// Reject non-finite numbers and values outside `min..` (inclusive when `inclusive`).
pub(crate) fn require_at_least(value: f64, min: f64, inclusive: bool, message: &str) -> Result<f64> {
    let ok = value.is_finite() && if inclusive { value >= min } else { value > min };
    if ok {
        Ok(value)
    } else {
        Err(Error::Validation(message.to_string()))
    }
}
