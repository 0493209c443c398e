pub mod bybit;

pub use bybit::{BybitConfig, BybitConnector};
