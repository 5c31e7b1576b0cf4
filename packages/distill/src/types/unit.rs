//! Transcript artifacts: segments, speakers, structure, and units.
//!
//! These are produced by the segmentation collaborator and are read-only
//! inputs to the rest of the pipeline.

use serde::{Deserialize, Serialize};

/// A time span within the source recording, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TimeRange {
    /// Start offset.
    pub start_ms: u64,

    /// End offset.
    pub end_ms: u64,
}

impl TimeRange {
    /// Create a new time range.
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }

    /// Span covering both ranges.
    pub fn union(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            start_ms: self.start_ms.min(other.start_ms),
            end_ms: self.end_ms.max(other.end_ms),
        }
    }
}

/// A raw timestamped slice of the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// Position within the transcript.
    pub ordinal: usize,

    /// Verbatim text.
    pub text: String,

    /// Where in the recording this was spoken.
    pub time_range: TimeRange,

    /// Speaker label, once identified (raw segments may leave this unset).
    pub speaker: Option<String>,
}

impl Segment {
    /// Create a segment.
    pub fn new(ordinal: usize, text: impl Into<String>, time_range: TimeRange) -> Self {
        Self {
            ordinal,
            text: text.into(),
            time_range,
            speaker: None,
        }
    }

    /// Attach a speaker label.
    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }
}

/// A speaker identified in the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Speaker {
    /// Stable label used in segment attribution.
    pub id: String,

    /// Display name, if known.
    pub name: Option<String>,
}

impl Speaker {
    /// Create a speaker with just a label.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// One topical section of the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureSection {
    /// Section title or topic.
    pub title: String,

    /// First segment ordinal covered (inclusive).
    pub start_ordinal: usize,

    /// Last segment ordinal covered (inclusive).
    pub end_ordinal: usize,
}

/// High-level structure of the transcript.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StructureOutline {
    /// Sections in transcript order.
    pub sections: Vec<StructureSection>,
}

impl StructureOutline {
    /// Outline with a single section spanning everything.
    pub fn single(title: impl Into<String>, segment_count: usize) -> Self {
        Self {
            sections: vec![StructureSection {
                title: title.into(),
                start_ordinal: 0,
                end_ordinal: segment_count.saturating_sub(1),
            }],
        }
    }
}

/// An independently extractable slice of the transcript.
///
/// Immutable once created; extraction results are re-associated to their
/// unit by `unit_id`, never by completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    /// Stable identifier within the episode.
    pub unit_id: String,

    /// Position within the transcript.
    pub ordinal: usize,

    /// The unit's text.
    pub text: String,

    /// Where in the recording this unit occurs.
    pub time_range: TimeRange,
}

impl Unit {
    /// Create a unit, deriving its id from the ordinal.
    pub fn new(ordinal: usize, text: impl Into<String>, time_range: TimeRange) -> Self {
        Self {
            unit_id: format!("unit-{ordinal:04}"),
            ordinal,
            text: text.into(),
            time_range,
        }
    }

    /// Override the unit id.
    pub fn with_id(mut self, unit_id: impl Into<String>) -> Self {
        self.unit_id = unit_id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_range_union() {
        let a = TimeRange::new(100, 200);
        let b = TimeRange::new(150, 400);
        assert_eq!(a.union(&b), TimeRange::new(100, 400));
    }

    #[test]
    fn unit_id_from_ordinal() {
        let unit = Unit::new(7, "text", TimeRange::default());
        assert_eq!(unit.unit_id, "unit-0007");
    }
}
