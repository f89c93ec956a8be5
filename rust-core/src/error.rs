//! Error types for the activity sensing engine.
//!
//! Two kinds of failure exist in the pipeline:
//!
//! - **Recoverable** conditions (motion during calibration, degenerate gravity,
//!   a buffer wait that timed out, a classifier with nothing to say) are plain
//!   values in the APIs that produce them and never reach this type.
//! - **Fatal** conditions (corrupted statistics, a broken pool invariant, an
//!   unknown label in the model, a misconfigured FFT) are [`SensingError`]s.
//!   The orchestrator stops consuming batches when it sees one.

use thiserror::Error;

use crate::types::AXES;

/// A specialized `Result` type for sensing operations.
pub type Result<T> = std::result::Result<T, SensingError>;

/// Error type for the sensing pipeline.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SensingError {
    /// A variance came out NaN or clearly negative. The sample stream or the
    /// pooled sums are corrupted.
    #[error("numerical corruption in {context}: variance {variance} on dimension {dimension}")]
    NumericalCorruption {
        /// Component that detected the corruption
        context: &'static str,
        /// Dimension index of the offending value
        dimension: usize,
        /// The offending variance
        variance: f64,
    },

    /// `empty + filled + checked_out != capacity` for a pool.
    #[error("pool '{pool}' invariant violated: empty {empty} + filled {filled} + out {checked_out} != capacity {capacity}")]
    PoolInvariant {
        /// Pool name
        pool: &'static str,
        /// Items on the empty side
        empty: usize,
        /// Items on the filled side
        filled: usize,
        /// Items currently held by callers
        checked_out: usize,
        /// Configured capacity
        capacity: usize,
    },

    /// FFT constructed with a non power of two, or called with the wrong length.
    #[error("FFT length error: expected {expected}, got {actual}")]
    FftLength {
        /// Configured window length (0 if the configured length itself is invalid)
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// The model references a label outside the closed activity set.
    #[error("model entry {index} references unknown activity label '{label}'")]
    UnknownLabel {
        /// Index of the model entry
        index: usize,
        /// The unrecognized label string
        label: String,
    },

    /// The model is structurally unusable.
    #[error("invalid model: {message}")]
    InvalidModel {
        /// Description of the problem
        message: String,
    },

    /// Configuration values are out of range.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem
        message: String,
    },

    /// An operation that needs at least one sample got none.
    #[error("{operation} requires at least one sample")]
    EmptyInput {
        /// The operation that was attempted
        operation: &'static str,
    },

    /// A worker thread panicked.
    #[error("{thread} thread panicked")]
    ThreadPanicked {
        /// Name of the thread
        thread: &'static str,
    },

    /// File access for configuration or models failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding of configuration or models failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SensingError {
    /// Whether this error must stop the processing loop.
    ///
    /// Everything except configuration input errors is fatal once the
    /// pipeline is running; I/O and JSON errors only happen at startup.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SensingError::Io(_) | SensingError::Json(_) | SensingError::InvalidConfig { .. })
    }

    /// Convenience constructor for a corrupted per-axis variance.
    pub(crate) fn corrupted_axis(context: &'static str, axis: usize, variance: f64) -> Self {
        debug_assert!(axis < AXES);
        SensingError::NumericalCorruption {
            context,
            dimension: axis,
            variance,
        }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        SensingError::InvalidConfig {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_model(message: impl Into<String>) -> Self {
        SensingError::InvalidModel {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let err = SensingError::corrupted_axis("stats", 1, f64::NAN);
        assert!(err.is_fatal());

        let err = SensingError::invalid_config("window must be > 0");
        assert!(!err.is_fatal());

        let err = SensingError::UnknownLabel {
            index: 3,
            label: "FLYING".into(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("FLYING"));
    }

    #[test]
    fn test_pool_invariant_message() {
        let err = SensingError::PoolInvariant {
            pool: "batches",
            empty: 1,
            filled: 2,
            checked_out: 0,
            capacity: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("batches"));
        assert!(msg.contains("capacity 4"));
    }
}
