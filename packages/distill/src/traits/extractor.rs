//! Unit extraction collaborator trait.
//!
//! Prompt wording and response schemas live outside the core; the worker
//! pool only needs to build a prompt for a unit, parse the raw response,
//! and ask for one repair prompt when the response parses but is invalid.

use thiserror::Error;

use crate::types::knowledge::ExtractionResult;
use crate::types::unit::Unit;

/// The response was readable but did not match the expected shape.
///
/// Triggers exactly one repair attempt per unit before the unit fails.
#[derive(Debug, Clone, Error)]
#[error("malformed extraction output: {reason}")]
pub struct MalformedOutput {
    /// What was wrong with the response.
    pub reason: String,
}

impl MalformedOutput {
    /// Create a malformed-output error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Builds prompts for units and parses completion responses.
pub trait UnitExtractor: Send + Sync {
    /// Which model extraction calls should use.
    fn model(&self) -> &str;

    /// The extraction prompt for a unit.
    fn prompt(&self, unit: &Unit) -> String;

    /// An adjusted prompt after a malformed response, given the raw text
    /// that failed to parse.
    fn repair_prompt(&self, unit: &Unit, raw: &str) -> String;

    /// Parse a raw response into the unit's extraction result.
    fn parse(&self, unit: &Unit, raw: &str) -> Result<ExtractionResult, MalformedOutput>;
}
