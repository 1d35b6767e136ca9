//! Redaction core: static term matching, entity detection, and anonymization.
//!
//! [`engine::RedactionEngine`] composes the pieces:
//!
//! 1. [`matcher::StaticMatcher`] replaces exact configured terms in one pass.
//! 2. [`detector::EntityDetector`] asks an [`EntityClassifier`] for spans and drops
//!    those scoring below the threshold.
//! 3. [`anonymizer::Anonymizer`] replaces the surviving spans.

pub mod anonymizer;
pub mod detector;
pub mod engine;
pub mod matcher;
pub mod patterns;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::Result;

/// A span of sensitive text found by an [`EntityClassifier`].
///
/// `start..end` are byte offsets into the text that was classified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedSpan {
    pub start: usize,
    pub end: usize,
    pub entity_type: String,
    pub score: f64,
}

impl DetectedSpan {
    pub fn new(start: usize, end: usize, entity_type: impl Into<String>, score: f64) -> Self {
        Self {
            start,
            end,
            entity_type: entity_type.into(),
            score,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &DetectedSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Per-call redaction statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedactionStats {
    /// Exact number of static term occurrences replaced.
    pub static_replacements: usize,
    /// Number of entity spans replaced.
    pub ml_replacements: usize,
    /// Entity type to number of replaced spans.
    pub pii_type_counts: BTreeMap<String, usize>,
}

impl RedactionStats {
    pub fn static_replacement_occurred(&self) -> bool {
        self.static_replacements > 0
    }

    pub fn total(&self) -> usize {
        self.static_replacements + self.ml_replacements
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Output of a single [`engine::RedactionEngine::redact`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedactionResult {
    pub redacted_text: String,
    pub stats: RedactionStats,
}

/// A span classifier for sensitive entities (phone numbers, emails, names, ...).
///
/// Implementations must be `Send + Sync`: one instance serves every request
/// concurrently. `classify` may block; callers run it off the async scheduler.
pub trait EntityClassifier: Send + Sync {
    /// Find entity spans in `text`. `entities = None` means every supported type.
    fn classify(&self, text: &str, entities: Option<&[String]>) -> Result<Vec<DetectedSpan>>;

    /// Entity types this classifier can produce.
    fn supported_entities(&self) -> Vec<String>;
}
