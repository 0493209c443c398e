//! Shared market data types for the scanner workspace.
//!
//! Everything that crosses a crate boundary without carrying decision logic
//! lives here: raw OHLCV candles, the timeframe vocabulary, the error
//! taxonomy used by every stage of a scan, and the trait the exchange
//! connectors implement.

pub mod error;
pub mod market;
pub mod source;

pub use error::{ScanError, ScanResult};
pub use market::{Candle, CandleSeries, Timeframe};
pub use source::CandleSource;

// Re-exported so downstream crates agree on the time types.
pub use chrono::{DateTime, Utc};
