//! Error types for the research pipeline

use crate::stage::StageName;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the research pipeline
///
/// Only `Configuration` is ever surfaced to callers as an error; everything
/// else is folded into a `StageResult` or a `Report` status by the executor.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid stage graph or pipeline configuration (fatal, never retried)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network or parsing failure inside a stage (retried, then folded
    /// into a Failed stage result)
    #[error("external call failed: {0}")]
    ExternalCall(String),

    /// Fast-fail while a circuit breaker is open for the target
    #[error("circuit open for {target}")]
    CircuitOpen { target: String },

    /// Provider responded but returned nothing usable
    #[error("no usable data for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    /// Invalid security symbol
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    /// The mandatory stage failed and the run was aborted
    #[error("mandatory stage {stage} failed: {reason}")]
    MandatoryStageFailed { stage: StageName, reason: String },

    /// The whole-run deadline elapsed before every stage settled
    #[error("run timed out after {elapsed_ms} ms")]
    RunTimeout { elapsed_ms: u64 },
}

impl Error {
    /// True for failures worth another attempt under the retry policy.
    ///
    /// Configuration and symbol errors are deterministic; retrying them
    /// can only waste the backoff budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ExternalCall(_) | Error::DataUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::CircuitOpen {
            target: "news".to_string(),
        };
        assert_eq!(err.to_string(), "circuit open for news");

        let err = Error::DataUnavailable {
            symbol: "NSE:TCS".to_string(),
            reason: "empty response".to_string(),
        };
        assert_eq!(err.to_string(), "no usable data for NSE:TCS: empty response");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::ExternalCall("timeout".to_string()).is_retryable());
        assert!(!Error::Configuration("cycle".to_string()).is_retryable());
        assert!(
            !Error::CircuitOpen {
                target: "x".to_string()
            }
            .is_retryable()
        );
    }
}
