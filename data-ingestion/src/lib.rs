// Data Ingestion Layer
// Exchange connectors that feed raw candles into the scanner

pub mod connectors;

pub use connectors::{BybitConfig, BybitConnector};
