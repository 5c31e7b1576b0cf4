//! Segmentation collaborator trait.
//!
//! The four transcript-analysis stages are driven by the executor but
//! implemented outside the core: the pipeline does not care how segments,
//! speakers, structure, or units are derived, only that each step is
//! deterministic enough to be safely re-run after a crash.

use async_trait::async_trait;

use crate::error::CollaboratorResult;
use crate::types::unit::{Segment, Speaker, StructureOutline, Unit};

/// Transcript analysis collaborator.
#[async_trait]
pub trait Segmenter: Send + Sync {
    /// Parse the raw transcript into timestamped segments.
    async fn parse(&self, transcript: &str) -> CollaboratorResult<Vec<Segment>>;

    /// Identify the speakers appearing in the segments.
    async fn identify_speakers(&self, segments: &[Segment]) -> CollaboratorResult<Vec<Speaker>>;

    /// Derive the high-level structure of the conversation.
    async fn analyze_structure(
        &self,
        segments: &[Segment],
        speakers: &[Speaker],
    ) -> CollaboratorResult<StructureOutline>;

    /// Slice segments into independently extractable units.
    async fn create_units(
        &self,
        segments: &[Segment],
        outline: &StructureOutline,
    ) -> CollaboratorResult<Vec<Unit>>;
}
