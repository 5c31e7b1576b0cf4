//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the pipeline
//! without making real completion or network calls.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::credentials::CredentialLease;
use crate::error::{CollaboratorResult, ServiceError, ServiceResult};
use crate::traits::completion::CompletionService;
use crate::traits::extractor::{MalformedOutput, UnitExtractor};
use crate::traits::segmenter::Segmenter;
use crate::types::knowledge::ExtractionResult;
use crate::types::unit::{Segment, Speaker, StructureOutline, TimeRange, Unit};

/// Record of one call made to the mock completion service.
#[derive(Debug, Clone)]
pub struct MockCall {
    /// The requested model.
    pub model: String,

    /// Which credential was leased for the call.
    pub key_id: String,

    /// The prompt as sent.
    pub prompt: String,
}

/// A mock completion service with scriptable responses.
///
/// Responses resolve in order: the next scripted response if any remain,
/// then the first prompt-substring match, then the default response.
/// Clones share state, so a handle kept before handing the service to a
/// client can still inspect recorded calls.
#[derive(Clone, Default)]
pub struct MockCompletionService {
    script: Arc<RwLock<VecDeque<Result<String, ServiceError>>>>,
    by_prompt_substring: Arc<RwLock<Vec<(String, String)>>>,
    default_response: Arc<RwLock<Option<String>>>,
    calls: Arc<RwLock<Vec<MockCall>>>,
}

impl MockCompletionService {
    /// Create a mock with no configured responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback response.
    pub fn with_default_response(self, response: impl Into<String>) -> Self {
        *self.default_response.write().unwrap() = Some(response.into());
        self
    }

    /// Queue responses consumed in order before any other resolution.
    pub fn with_script(
        self,
        responses: impl IntoIterator<Item = Result<String, ServiceError>>,
    ) -> Self {
        self.script.write().unwrap().extend(responses);
        self
    }

    /// Respond with `response` whenever the prompt contains `substring`.
    pub fn with_response_containing(
        self,
        substring: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        self.by_prompt_substring
            .write()
            .unwrap()
            .push((substring.into(), response.into()));
        self
    }

    /// All recorded calls, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.read().unwrap().clone()
    }

    /// Number of calls made.
    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl CompletionService for MockCompletionService {
    async fn send(
        &self,
        model: &str,
        prompt: &str,
        credential: &CredentialLease,
    ) -> ServiceResult<String> {
        self.calls.write().unwrap().push(MockCall {
            model: model.to_string(),
            key_id: credential.key_id.clone(),
            prompt: prompt.to_string(),
        });

        if let Some(scripted) = self.script.write().unwrap().pop_front() {
            return scripted;
        }

        for (substring, response) in self.by_prompt_substring.read().unwrap().iter() {
            if prompt.contains(substring) {
                return Ok(response.clone());
            }
        }

        self.default_response
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| ServiceError::server("no scripted response"))
    }
}

/// A mock extractor with configurable per-unit results.
///
/// Prompts embed the unit id so prompt-substring scripting on the service
/// side can target individual units; repair prompts carry a `repair:`
/// prefix for assertions.
#[derive(Clone, Default)]
pub struct MockUnitExtractor {
    rejected_raw: Arc<RwLock<Option<String>>>,
    results: Arc<RwLock<HashMap<String, ExtractionResult>>>,
}

impl MockUnitExtractor {
    /// Create a mock that accepts every response with an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any raw response containing this text as malformed.
    pub fn with_rejected_raw(self, raw: impl Into<String>) -> Self {
        *self.rejected_raw.write().unwrap() = Some(raw.into());
        self
    }

    /// Return a fixed result for a unit instead of the empty default.
    pub fn with_result(self, unit_id: impl Into<String>, result: ExtractionResult) -> Self {
        self.results.write().unwrap().insert(unit_id.into(), result);
        self
    }
}

impl UnitExtractor for MockUnitExtractor {
    fn model(&self) -> &str {
        "test-model"
    }

    fn prompt(&self, unit: &Unit) -> String {
        format!("extract from {}: {}", unit.unit_id, unit.text)
    }

    fn repair_prompt(&self, unit: &Unit, _raw: &str) -> String {
        format!("repair: re-extract from {}: {}", unit.unit_id, unit.text)
    }

    fn parse(&self, unit: &Unit, raw: &str) -> Result<ExtractionResult, MalformedOutput> {
        if let Some(rejected) = self.rejected_raw.read().unwrap().as_deref() {
            if raw.contains(rejected) {
                return Err(MalformedOutput::new("response failed schema validation"));
            }
        }
        Ok(self
            .results
            .read()
            .unwrap()
            .get(&unit.unit_id)
            .cloned()
            .unwrap_or_else(|| ExtractionResult::empty(&unit.unit_id)))
    }
}

/// Which segmenter operation was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmenterCall {
    /// `parse`
    Parse,
    /// `identify_speakers`
    IdentifySpeakers,
    /// `analyze_structure`
    AnalyzeStructure,
    /// `create_units`
    CreateUnits,
}

/// A deterministic mock segmenter.
///
/// Parses one segment per non-empty transcript line and creates one unit
/// per segment. Individual operations can be made to fail, and clones
/// share state so a kept handle can clear failures between runs.
#[derive(Clone, Default)]
pub struct MockSegmenter {
    failures: Arc<RwLock<HashSet<SegmenterCall>>>,
    calls: Arc<RwLock<Vec<SegmenterCall>>>,
}

impl MockSegmenter {
    /// Create a segmenter that succeeds at everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make one operation fail until cleared.
    pub fn with_failing(self, call: SegmenterCall) -> Self {
        self.failures.write().unwrap().insert(call);
        self
    }

    /// Clear all injected failures.
    pub fn clear_failures(&self) {
        self.failures.write().unwrap().clear();
    }

    /// All recorded calls, in order.
    pub fn calls(&self) -> Vec<SegmenterCall> {
        self.calls.read().unwrap().clone()
    }

    fn record(&self, call: SegmenterCall) -> CollaboratorResult<()> {
        self.calls.write().unwrap().push(call);
        if self.failures.read().unwrap().contains(&call) {
            return Err(format!("injected failure in {call:?}").into());
        }
        Ok(())
    }
}

#[async_trait]
impl Segmenter for MockSegmenter {
    async fn parse(&self, transcript: &str) -> CollaboratorResult<Vec<Segment>> {
        self.record(SegmenterCall::Parse)?;
        Ok(transcript
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                Segment::new(
                    i,
                    line.trim(),
                    TimeRange::new(i as u64 * 1000, (i as u64 + 1) * 1000),
                )
            })
            .collect())
    }

    async fn identify_speakers(&self, _segments: &[Segment]) -> CollaboratorResult<Vec<Speaker>> {
        self.record(SegmenterCall::IdentifySpeakers)?;
        Ok(vec![Speaker::new("spk-1").with_name("Host")])
    }

    async fn analyze_structure(
        &self,
        segments: &[Segment],
        _speakers: &[Speaker],
    ) -> CollaboratorResult<StructureOutline> {
        self.record(SegmenterCall::AnalyzeStructure)?;
        Ok(StructureOutline::single("conversation", segments.len()))
    }

    async fn create_units(
        &self,
        segments: &[Segment],
        _outline: &StructureOutline,
    ) -> CollaboratorResult<Vec<Unit>> {
        self.record(SegmenterCall::CreateUnits)?;
        Ok(segments
            .iter()
            .map(|s| Unit::new(s.ordinal, s.text.clone(), s.time_range))
            .collect())
    }
}
