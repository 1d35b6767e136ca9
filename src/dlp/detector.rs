use std::sync::Arc;

use super::{DetectedSpan, EntityClassifier};
use crate::error::Result;

/// Thresholded view over an [`EntityClassifier`].
///
/// Holds no per-request state, so one detector serves concurrent callers.
#[derive(Clone)]
pub struct EntityDetector {
    classifier: Arc<dyn EntityClassifier>,
    threshold: f64,
    entities: Option<Vec<String>>,
}

impl EntityDetector {
    pub fn new(
        classifier: Arc<dyn EntityClassifier>,
        threshold: f64,
        entities: Option<Vec<String>>,
    ) -> Self {
        Self {
            classifier,
            threshold,
            entities,
        }
    }

    /// Run the classifier and keep spans scoring at or above the threshold.
    pub fn analyze(&self, text: &str) -> Result<Vec<DetectedSpan>> {
        let allowed = self.entities.as_deref();
        let mut spans = self.classifier.classify(text, allowed)?;
        spans.retain(|span| {
            span.score >= self.threshold
                && allowed.is_none_or(|list| list.iter().any(|e| *e == span.entity_type))
        });
        Ok(spans)
    }
}
