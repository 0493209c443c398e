use thiserror::Error;

use crate::market::Timeframe;

/// Failure taxonomy shared by the indicator engine, the scorer and the
/// evaluator.
///
/// "No setup found" is deliberately absent: a quiet market is an ordinary
/// outcome, not an error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScanError {
    /// Not enough candles, or a required timeframe/indicator is missing.
    /// Skip the instrument and carry on.
    #[error("insufficient data for {symbol} {timeframe}: {detail}")]
    InsufficientData {
        symbol: String,
        timeframe: Timeframe,
        detail: String,
    },

    /// Structurally broken input (non-ascending timestamps, negative prices,
    /// high below close, ...). Aborts scoring for the instrument.
    #[error("invariant violated for {symbol} {timeframe}: {detail}")]
    InvariantViolation {
        symbol: String,
        timeframe: Timeframe,
        detail: String,
    },

    /// Data fetch or analyst call failed after the caller's retries.
    #[error("external call failed for {symbol}: {message}")]
    ExternalCall { symbol: String, message: String },
}

impl ScanError {
    pub fn insufficient(symbol: &str, timeframe: Timeframe, detail: impl Into<String>) -> Self {
        Self::InsufficientData {
            symbol: symbol.to_string(),
            timeframe,
            detail: detail.into(),
        }
    }

    pub fn invariant(symbol: &str, timeframe: Timeframe, detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            symbol: symbol.to_string(),
            timeframe,
            detail: detail.into(),
        }
    }

    pub fn external(symbol: &str, err: &anyhow::Error) -> Self {
        Self::ExternalCall {
            symbol: symbol.to_string(),
            message: format!("{:#}", err),
        }
    }

    /// Invariant violations must surface distinctly; the other variants are
    /// skip-and-continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_invariant_violation_is_fatal() {
        let insufficient = ScanError::insufficient("BTC/USDT", Timeframe::H4, "12 candles");
        let broken = ScanError::invariant("BTC/USDT", Timeframe::H4, "timestamps not ascending");
        let external = ScanError::external("BTC/USDT", &anyhow::anyhow!("timeout"));

        assert!(!insufficient.is_fatal());
        assert!(broken.is_fatal());
        assert!(!external.is_fatal());
    }

    #[test]
    fn test_error_display_names_the_instrument() {
        let err = ScanError::insufficient("ETH/USDT", Timeframe::D1, "only 120 candles");
        assert_eq!(
            err.to_string(),
            "insufficient data for ETH/USDT 1d: only 120 candles"
        );
    }
}
