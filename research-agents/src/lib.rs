//! Research Agents - LLM analyst
//!
//! An alternative to the confluence scorer that delegates the whole trade
//! decision to a text-generation model. This crate provides:
//! - `AnalysisRequest`: the snapshot view and prompt sent to the model
//! - `ClaudeAnalyst`: an Anthropic Messages API client
//! - `parse_analyst_response`: validation of the loosely structured reply
//! - `AnalystDetector`: a `SignalDetector` the evaluator can run

pub mod agent;
pub mod claude;
pub mod detector;
pub mod request;
pub mod response;

pub use agent::{AnalystConfig, CompletionClient};
pub use claude::ClaudeAnalyst;
pub use detector::AnalystDetector;
pub use request::{AnalysisRequest, CandleDigest};
pub use response::{extract_json, parse_analyst_response};
