//! Exact multi-term replacement backed by an Aho-Corasick automaton.

use std::collections::BTreeSet;

use aho_corasick::{AhoCorasick, MatchKind};
use tracing::{debug, warn};

use crate::error::Result;

/// Replaces every configured term with the replacement token in a single pass.
///
/// Overlapping terms resolve leftmost-longest, so `"secret key"` wins over
/// `"secret"` when both are configured.
#[derive(Debug, Clone)]
pub struct StaticMatcher {
    automaton: Option<AhoCorasick>,
    replacement: String,
    term_count: usize,
}

impl StaticMatcher {
    /// Build a matcher from a term list.
    ///
    /// Empty and duplicate terms collapse. Terms that occur inside the
    /// replacement token are skipped, otherwise redacted output would match again.
    pub fn new(terms: &[String], replacement: &str, case_insensitive: bool) -> Result<Self> {
        let token_probe = if case_insensitive {
            replacement.to_ascii_lowercase()
        } else {
            replacement.to_string()
        };

        let mut unique = BTreeSet::new();
        for term in terms {
            if term.is_empty() {
                continue;
            }
            let probe = if case_insensitive {
                term.to_ascii_lowercase()
            } else {
                term.clone()
            };
            if token_probe.contains(&probe) {
                warn!(
                    "Skipping static term {:?}: it occurs inside the replacement token",
                    term
                );
                continue;
            }
            unique.insert(term.as_str());
        }

        let term_count = unique.len();
        let automaton = if unique.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostLongest)
                    .ascii_case_insensitive(case_insensitive)
                    .build(unique.iter())?,
            )
        };
        debug!("Static matcher built with {} terms", term_count);

        Ok(Self {
            automaton,
            replacement: replacement.to_string(),
            term_count,
        })
    }

    /// A matcher with no terms; `replace` is the identity.
    pub fn empty(replacement: &str) -> Self {
        Self {
            automaton: None,
            replacement: replacement.to_string(),
            term_count: 0,
        }
    }

    pub fn term_count(&self) -> usize {
        self.term_count
    }

    /// Replace all term occurrences, returning the new text and the match count.
    pub fn replace(&self, text: &str) -> (String, usize) {
        let Some(ref automaton) = self.automaton else {
            return (text.to_string(), 0);
        };

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        let mut count = 0;
        for mat in automaton.find_iter(text) {
            out.push_str(&text[last..mat.start()]);
            out.push_str(&self.replacement);
            last = mat.end();
            count += 1;
        }
        out.push_str(&text[last..]);
        (out, count)
    }
}
