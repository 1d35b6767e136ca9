//! Regex-based entity classifier.
//!
//! Ships with built-in recognizers for common sensitive entities:
//!
//! | Entity | Score | Notes |
//! |--------|-------|-------|
//! | `EMAIL_ADDRESS` | 1.0 | |
//! | `CREDIT_CARD` | 1.0 | Luhn-validated |
//! | `PRIVATE_KEY` | 1.0 | PEM header |
//! | `API_KEY` | 0.95 | OpenAI, Anthropic, Google AI, HuggingFace, Groq, Replicate, Fireworks, AWS, GitHub |
//! | `US_SSN` | 0.85 | invalid area numbers rejected |
//! | `IBAN_CODE` | 0.8 | mod-97 validated |
//! | `PHONE_NUMBER` | 0.75 | NANP formats |
//! | `IP_ADDRESS` | 0.6 | IPv4 |
//! | `URL` | 0.3 | below the default threshold |
//!
//! Scores are fixed per recognizer; the detector threshold decides what is redacted.

use regex::Regex;

use super::{DetectedSpan, EntityClassifier};
use crate::error::Result;

/// Internal recognizer pairing a compiled regex with its entity type and score.
struct Recognizer {
    entity: &'static str,
    regex: Regex,
    score: f64,
    validate: Option<fn(&str) -> bool>,
}

/// An [`EntityClassifier`] backed by regular expressions.
///
/// Restrict it to a subset of entity types per call through `classify`.
pub struct PatternClassifier {
    recognizers: Vec<Recognizer>,
}

impl PatternClassifier {
    /// Create a classifier with every built-in recognizer.
    pub fn new() -> Self {
        let defs: Vec<(&'static str, &str, f64, Option<fn(&str) -> bool>)> = vec![
            (
                "EMAIL_ADDRESS",
                r"\b[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}\b",
                1.0,
                None,
            ),
            (
                "CREDIT_CARD",
                r"\b(?:\d[ -]?){12,18}\d\b",
                1.0,
                Some(luhn_valid),
            ),
            (
                "PRIVATE_KEY",
                r"-----BEGIN (?:RSA |EC |DSA |OPENSSH )?PRIVATE KEY-----",
                1.0,
                None,
            ),
            (
                "API_KEY",
                concat!(
                    r"sk-ant-(?:api03|admin)[A-Za-z0-9_-]{20,}",
                    r"|sk-(?:proj-|svcacct-)?[A-Za-z0-9_-]{20,}",
                    r"|AIzaSy[A-Za-z0-9_-]{33}",
                    r"|hf_[A-Za-z0-9]{20,}",
                    r"|gsk_[A-Za-z0-9]{20,}",
                    r"|r8_[A-Za-z0-9]{20,}",
                    r"|fw_[A-Za-z0-9]{20,}",
                    r"|AKIA[0-9A-Z]{16}",
                    r"|ghp_[A-Za-z0-9]{36}",
                ),
                0.95,
                None,
            ),
            ("US_SSN", r"\b\d{3}-\d{2}-\d{4}\b", 0.85, Some(ssn_valid)),
            (
                "IBAN_CODE",
                r"\b[A-Z]{2}\d{2}(?: ?[A-Z0-9]{4}){2,7}(?: ?[A-Z0-9]{1,3})?\b",
                0.8,
                Some(iban_valid),
            ),
            (
                "PHONE_NUMBER",
                r"(?:\+?1[-. ]?)?(?:\(\d{3}\)|\b[2-9]\d{2})[-. ]?\d{3}[-. ]\d{4}\b",
                0.75,
                None,
            ),
            (
                "IP_ADDRESS",
                r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b",
                0.6,
                None,
            ),
            ("URL", r#"\bhttps?://[^\s"'<>]+"#, 0.3, None),
        ];

        let recognizers = defs
            .into_iter()
            .map(|(entity, pattern, score, validate)| Recognizer {
                entity,
                regex: Regex::new(pattern).unwrap(),
                score,
                validate,
            })
            .collect();

        Self { recognizers }
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityClassifier for PatternClassifier {
    fn classify(&self, text: &str, entities: Option<&[String]>) -> Result<Vec<DetectedSpan>> {
        let mut spans = Vec::new();
        for rec in &self.recognizers {
            if let Some(allowed) = entities {
                if !allowed.iter().any(|e| e == rec.entity) {
                    continue;
                }
            }
            for mat in rec.regex.find_iter(text) {
                if let Some(validate) = rec.validate {
                    if !validate(mat.as_str()) {
                        continue;
                    }
                }
                spans.push(DetectedSpan::new(
                    mat.start(),
                    mat.end(),
                    rec.entity,
                    rec.score,
                ));
            }
        }
        Ok(spans)
    }

    fn supported_entities(&self) -> Vec<String> {
        self.recognizers.iter().map(|r| r.entity.to_string()).collect()
    }
}

fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

fn ssn_valid(candidate: &str) -> bool {
    let mut parts = candidate.split('-');
    let (Some(area), Some(group), Some(serial)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    area != "000" && area != "666" && !area.starts_with('9') && group != "00" && serial != "0000"
}

fn iban_valid(candidate: &str) -> bool {
    let compact: String = candidate.chars().filter(|c| !c.is_whitespace()).collect();
    if !(15..=34).contains(&compact.len()) {
        return false;
    }
    let (head, tail) = compact.split_at(4);
    let mut remainder: u32 = 0;
    for c in tail.chars().chain(head.chars()) {
        let value = match c.to_digit(36) {
            Some(v) => v,
            None => return false,
        };
        // Letters expand to two digits (A=10 .. Z=35).
        remainder = if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        };
    }
    remainder == 1
}
