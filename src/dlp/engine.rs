//! The redaction engine: static matching, then entity detection and anonymization.
//!
//! Configuration lives in an immutable [`EngineSnapshot`] behind
//! `RwLock<Arc<_>>`. [`RedactionEngine::redact`] clones the `Arc` once and works
//! only on that snapshot, so a concurrent [`RedactionEngine::reload`] swaps in a
//! new snapshot for later calls without disturbing calls already running.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{info, warn};

use super::anonymizer::Anonymizer;
use super::detector::EntityDetector;
use super::matcher::StaticMatcher;
use super::{EntityClassifier, RedactionResult, RedactionStats};
use crate::config::{DlpConfig, SecretsProviderConfig};
use crate::error::Result;
use crate::terms::{self, TermSource};

/// Everything one `redact` call needs, built wholesale on reload.
struct EngineSnapshot {
    matcher: StaticMatcher,
    /// `None` when ML detection is disabled.
    detector: Option<EntityDetector>,
    anonymizer: Anonymizer,
}

/// The term source together with the settings it was built from.
struct TermSlot {
    provider: SecretsProviderConfig,
    static_terms_file: PathBuf,
    source: Arc<dyn TermSource>,
}

impl TermSlot {
    fn matches(&self, config: &DlpConfig) -> bool {
        self.provider == config.secrets_provider
            && self.static_terms_file == config.static_terms_file
    }
}

/// Composes [`StaticMatcher`] → [`EntityDetector`] → [`Anonymizer`].
pub struct RedactionEngine {
    snapshot: RwLock<Arc<EngineSnapshot>>,
    classifier: Arc<dyn EntityClassifier>,
    terms: Mutex<TermSlot>,
    ready: AtomicBool,
}

impl RedactionEngine {
    /// Create an engine whose term source is chosen by `config`.
    ///
    /// The engine redacts nothing and reports not ready until the first
    /// [`reload`](Self::reload) completes.
    pub fn new(config: &DlpConfig, classifier: Arc<dyn EntityClassifier>) -> Self {
        let source = terms::from_config(config);
        Self::with_term_source(config, classifier, source)
    }

    /// Create an engine with an explicit term source.
    pub fn with_term_source(
        config: &DlpConfig,
        classifier: Arc<dyn EntityClassifier>,
        source: Arc<dyn TermSource>,
    ) -> Self {
        let snapshot = EngineSnapshot {
            matcher: StaticMatcher::empty(&config.replacement_token),
            detector: None,
            anonymizer: Anonymizer::new(config.replacement_token.clone()),
        };
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            classifier,
            terms: Mutex::new(TermSlot {
                provider: config.secrets_provider.clone(),
                static_terms_file: config.static_terms_file.clone(),
                source,
            }),
            ready: AtomicBool::new(false),
        }
    }

    /// Whether the first reload has completed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Number of distinct static terms in the current snapshot.
    pub fn term_count(&self) -> usize {
        self.current().matcher.term_count()
    }

    /// Rebuild the matcher from a fresh term query and re-derive ML settings.
    ///
    /// If the term source settings changed, the source itself is rebuilt first.
    /// On error the previous snapshot stays in place.
    pub async fn reload(&self, config: &DlpConfig) -> Result<()> {
        let source = {
            let mut slot = self.terms.lock().unwrap_or_else(PoisonError::into_inner);
            if !slot.matches(config) {
                info!("Term source settings changed, rebuilding term source");
                *slot = TermSlot {
                    provider: config.secrets_provider.clone(),
                    static_terms_file: config.static_terms_file.clone(),
                    source: terms::from_config(config),
                };
            }
            slot.source.clone()
        };

        let term_list = source.get_terms().await;
        let matcher = StaticMatcher::new(
            &term_list,
            &config.replacement_token,
            config.case_insensitive,
        )?;

        let detector = if config.ml_enabled {
            if let Some(ref entities) = config.entities {
                let supported = self.classifier.supported_entities();
                for entity in entities.iter().filter(|e| !supported.contains(e)) {
                    warn!("Entity type {} is not supported by the classifier", entity);
                }
            }
            Some(EntityDetector::new(
                self.classifier.clone(),
                config.ml_threshold,
                config.entities.clone(),
            ))
        } else {
            None
        };

        let snapshot = Arc::new(EngineSnapshot {
            matcher,
            detector,
            anonymizer: Anonymizer::new(config.replacement_token.clone()),
        });
        info!(
            "Redaction engine reloaded: {} static terms from {}, ml_enabled={}, threshold={}",
            snapshot.matcher.term_count(),
            source.name(),
            config.ml_enabled,
            config.ml_threshold
        );

        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Redact `text`. Blocking: the classifier may do heavy work.
    ///
    /// Classifier and span errors propagate; the caller decides the policy.
    pub fn redact(&self, text: &str) -> Result<RedactionResult> {
        let snapshot = self.current();

        let (after_static, static_replacements) = snapshot.matcher.replace(text);
        let mut stats = RedactionStats {
            static_replacements,
            ..RedactionStats::default()
        };

        let Some(ref detector) = snapshot.detector else {
            return Ok(RedactionResult {
                redacted_text: after_static,
                stats,
            });
        };

        let spans = detector.analyze(&after_static)?;
        let anonymized = snapshot.anonymizer.apply(&after_static, &spans)?;
        stats.ml_replacements = anonymized.applied;
        stats.pii_type_counts = anonymized.type_counts;

        Ok(RedactionResult {
            redacted_text: anonymized.text,
            stats,
        })
    }

    fn current(&self) -> Arc<EngineSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
