//! Per-request redaction pipeline invoked by the host proxy.
//!
//! [`DlpAddon::request`] takes one intercepted request through:
//!
//! 1. health probe on the configured path (answered directly)
//! 2. method/body filter: only POST, PUT and PATCH with a body are inspected
//! 3. correlation id assignment (`X-Request-ID`)
//! 4. body size ceiling (413)
//! 5. redaction on the bounded blocking pool, under a timeout
//! 6. body rewrite, metrics, stats, and a structured log entry
//!
//! The pipeline **fails closed**: if redaction errors, times out, or the body
//! cannot be decoded, the request is answered with a 500 and never forwarded.

pub mod flow;

pub use flow::{InterceptedRequest, SyntheticResponse};

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{HeaderName, HeaderValue, Method, StatusCode};
use prometheus::IntGauge;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::config::DlpConfig;
use crate::dlp::RedactionResult;
use crate::dlp::engine::RedactionEngine;
use crate::error::{DlpError, Result};
use crate::metrics::DlpMetrics;
use crate::stats::StatsAggregator;

/// Header carrying the correlation id.
pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Terminal state of one pass through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Health path answered directly.
    HealthProbe,
    /// Not a body-carrying POST/PUT/PATCH; forwarded untouched.
    Passthrough,
    /// Body over the size ceiling; answered with 413.
    SizeRejected,
    /// Body rewritten and forwarded.
    ForwardedRedacted,
    /// Body inspected, nothing to redact, forwarded.
    ForwardedUnchanged,
    /// Redaction failed; answered with 500 and not forwarded.
    Blocked,
}

/// Increments the active-connection counters on creation and decrements them on drop.
struct ActiveGuard<'a> {
    stats: &'a StatsAggregator,
    gauge: &'a IntGauge,
}

impl<'a> ActiveGuard<'a> {
    fn enter(stats: &'a StatsAggregator, gauge: &'a IntGauge) -> Self {
        stats.increment_active();
        gauge.inc();
        Self { stats, gauge }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.stats.decrement_active();
        self.gauge.dec();
    }
}

/// The redaction pipeline. One instance serves every request for the process lifetime.
pub struct DlpAddon {
    engine: Arc<RedactionEngine>,
    stats: Arc<StatsAggregator>,
    metrics: DlpMetrics,
    workers: Arc<Semaphore>,
    max_body_bytes: usize,
    timeout: Duration,
    health_path: String,
}

impl DlpAddon {
    /// Build the pipeline. Size, timeout, worker and health settings are fixed here;
    /// only the engine configuration is hot-reloadable.
    pub fn new(
        engine: Arc<RedactionEngine>,
        stats: Arc<StatsAggregator>,
        metrics: DlpMetrics,
        config: &DlpConfig,
    ) -> Self {
        Self {
            engine,
            stats,
            metrics,
            workers: Arc::new(Semaphore::new(config.worker_threads.max(1))),
            max_body_bytes: config.max_body_bytes,
            timeout: Duration::from_millis(config.detection_timeout_ms),
            health_path: config.health_path.clone(),
        }
    }

    pub fn engine(&self) -> &Arc<RedactionEngine> {
        &self.engine
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    pub fn metrics(&self) -> &DlpMetrics {
        &self.metrics
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Process one intercepted request. On return the request is either safe to
    /// forward or carries a [`SyntheticResponse`].
    pub async fn request(&self, flow: &mut InterceptedRequest) -> Outcome {
        if flow.path_only() == self.health_path {
            flow.response = Some(self.health_response());
            return Outcome::HealthProbe;
        }

        if !is_inspected_method(&flow.method) || flow.body.is_empty() {
            return Outcome::Passthrough;
        }

        let body_len = flow.body.len();
        if body_len > self.max_body_bytes {
            return self.reject_oversize(flow, body_len);
        }
        let correlation_id = ensure_correlation_id(flow);

        let _active = ActiveGuard::enter(&self.stats, &self.metrics.active_connections);
        self.metrics.requests_total.inc();

        let Some(text) = flow.text().map(str::to_owned) else {
            return self.block(flow, &correlation_id, "undecodable", "request body is not valid UTF-8");
        };

        let started = Instant::now();
        let result = self.offload(text.clone()).await;
        let duration = started.elapsed();
        self.metrics.latency_seconds.observe(duration.as_secs_f64());

        match result {
            Ok(RedactionResult {
                redacted_text,
                stats,
            }) => {
                let outcome = if redacted_text != text {
                    self.metrics.record_redaction(&stats);
                    self.metrics.record_tokens(text.len(), redacted_text.len());
                    info!(
                        correlation_id = %correlation_id,
                        url = %flow.pretty_url(),
                        static_replacements = stats.static_replacements,
                        ml_replacements = stats.ml_replacements,
                        pii_types = %serde_json::to_string(&stats.pii_type_counts).unwrap_or_default(),
                        duration_ms = duration.as_millis() as u64,
                        "Redacted request"
                    );
                    flow.set_text(redacted_text);
                    Outcome::ForwardedRedacted
                } else {
                    self.metrics.record_tokens(text.len(), text.len());
                    Outcome::ForwardedUnchanged
                };
                self.stats.update(&stats, duration, Some(&flow.host));
                outcome
            }
            Err(e) => {
                let reason = match e {
                    DlpError::Timeout(_) => "timeout",
                    _ => "engine_error",
                };
                self.block(flow, &correlation_id, reason, &e.to_string())
            }
        }
    }

    /// Answer `flow` with a 413 for a body of `body_len` bytes.
    ///
    /// Also used by a host that refuses to buffer an oversized body at all.
    pub fn reject_oversize(&self, flow: &mut InterceptedRequest, body_len: usize) -> Outcome {
        let correlation_id = ensure_correlation_id(flow);
        info!(
            correlation_id = %correlation_id,
            "Rejecting {} byte body for {} (limit {})",
            body_len,
            flow.pretty_url(),
            self.max_body_bytes
        );
        self.metrics.record_blocked("oversize");
        let mut response = SyntheticResponse::text(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Request body exceeds {} bytes", self.max_body_bytes),
        );
        attach_correlation_id(&mut response, &correlation_id);
        flow.response = Some(response);
        Outcome::SizeRejected
    }

    /// Run the blocking engine call on the worker pool.
    ///
    /// The timeout covers both the wait for a worker permit and the run itself.
    /// The permit moves into the blocking task, so an abandoned run still holds
    /// its slot until it actually finishes.
    async fn offload(&self, text: String) -> Result<RedactionResult> {
        let engine = self.engine.clone();
        let workers = self.workers.clone();
        let work = async move {
            let permit = workers
                .acquire_owned()
                .await
                .map_err(|e| DlpError::Worker(e.to_string()))?;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                engine.redact(&text)
            })
            .await
            .map_err(|e| DlpError::Worker(e.to_string()))?
        };

        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(DlpError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    fn block(
        &self,
        flow: &mut InterceptedRequest,
        correlation_id: &str,
        reason: &str,
        detail: &str,
    ) -> Outcome {
        error!(
            correlation_id = %correlation_id,
            url = %flow.pretty_url(),
            reason = reason,
            error = %detail,
            "Blocking request: redaction failed"
        );
        self.metrics.record_blocked(reason);
        self.stats.record_blocked(Some(&flow.host));

        let mut response = SyntheticResponse::text(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("DLP Engine Error: request blocked ({})", reason),
        );
        attach_correlation_id(&mut response, correlation_id);
        flow.response = Some(response);
        Outcome::Blocked
    }

    fn health_response(&self) -> SyntheticResponse {
        if self.engine.is_ready() {
            SyntheticResponse::text(StatusCode::OK, "OK")
        } else {
            SyntheticResponse::text(StatusCode::SERVICE_UNAVAILABLE, "DLP engine not ready")
        }
    }
}

fn is_inspected_method(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

fn attach_correlation_id(response: &mut SyntheticResponse, correlation_id: &str) {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers.insert(REQUEST_ID_HEADER.clone(), value);
    }
}

/// Return the request's correlation id, generating and attaching one if absent.
fn ensure_correlation_id(flow: &mut InterceptedRequest) -> String {
    if let Some(existing) = flow
        .headers
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return existing.to_string();
    }
    let id = uuid::Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&id) {
        flow.headers.insert(REQUEST_ID_HEADER.clone(), value);
    }
    id
}
