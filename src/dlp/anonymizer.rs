use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::DetectedSpan;
use crate::error::{DlpError, Result};

/// Result of applying spans to a text.
#[derive(Debug, Clone, PartialEq)]
pub struct AnonymizedText {
    pub text: String,
    /// Number of spans actually replaced, after overlap resolution.
    pub applied: usize,
    pub type_counts: BTreeMap<String, usize>,
}

/// Replaces detected spans with a fixed token.
#[derive(Debug, Clone)]
pub struct Anonymizer {
    replacement: String,
}

impl Anonymizer {
    pub fn new(replacement: impl Into<String>) -> Self {
        Self {
            replacement: replacement.into(),
        }
    }

    /// Replace `spans` in `text`. Offsets refer to `text` as given.
    ///
    /// Overlapping spans keep the higher score; ties go to the longer span, then
    /// the earlier one. A span outside `text` or off a char boundary is an error.
    pub fn apply(&self, text: &str, spans: &[DetectedSpan]) -> Result<AnonymizedText> {
        for span in spans {
            if span.start > span.end
                || span.end > text.len()
                || !text.is_char_boundary(span.start)
                || !text.is_char_boundary(span.end)
            {
                return Err(DlpError::InvalidSpan {
                    start: span.start,
                    end: span.end,
                    len: text.len(),
                });
            }
        }

        let mut ranked: Vec<&DetectedSpan> = spans.iter().filter(|s| !s.is_empty()).collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.len().cmp(&a.len()))
                .then_with(|| a.start.cmp(&b.start))
        });

        // Kept spans never overlap, so among those starting before `span.end`
        // the last one also ends last; it is the only one that can collide.
        let mut kept: BTreeMap<usize, &DetectedSpan> = BTreeMap::new();
        for span in ranked {
            let collides = kept
                .range(..span.end)
                .next_back()
                .is_some_and(|(_, k)| k.overlaps(span));
            if !collides {
                kept.insert(span.start, span);
            }
        }

        let mut out = String::with_capacity(text.len());
        let mut type_counts = BTreeMap::new();
        let mut last = 0;
        for span in kept.values() {
            out.push_str(&text[last..span.start]);
            out.push_str(&self.replacement);
            last = span.end;
            *type_counts.entry(span.entity_type.clone()).or_insert(0) += 1;
        }
        out.push_str(&text[last..]);

        Ok(AnonymizedText {
            text: out,
            applied: kept.len(),
            type_counts,
        })
    }
}
