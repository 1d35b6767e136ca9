//! Prometheus metrics for the redaction pipeline.
//!
//! All metric updates are thread-safe via atomic operations in the prometheus crate.
//! [`DlpMetrics::render`] produces the text exposition format served at `/metrics`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use regex::Regex;

use crate::dlp::RedactionStats;
use crate::error::Result;

/// Latency buckets from sub-millisecond to ten seconds.
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Clone)]
pub struct DlpMetrics {
    pub registry: Registry,

    pub requests_total: IntCounter,
    pub redacted_total: IntCounter,
    pub blocked_total: IntCounterVec,
    pub pii_detected_total: IntCounterVec,
    pub token_usage_total: IntCounterVec,
    pub latency_seconds: Histogram,
    pub active_connections: IntGauge,
}

impl DlpMetrics {
    /// Create a fresh registry with every metric registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total =
            IntCounter::new("dlp_requests_total", "Total number of DLP requests processed")?;
        registry.register(Box::new(requests_total.clone()))?;

        let redacted_total =
            IntCounter::new("dlp_redacted_total", "Total number of requests redacted")?;
        registry.register(Box::new(redacted_total.clone()))?;

        let blocked_total = IntCounterVec::new(
            Opts::new("dlp_blocked_total", "Requests blocked instead of forwarded"),
            &["reason"],
        )?;
        registry.register(Box::new(blocked_total.clone()))?;

        let pii_detected_total = IntCounterVec::new(
            Opts::new("dlp_pii_detected_total", "Redacted entity spans by type"),
            &["type"],
        )?;
        registry.register(Box::new(pii_detected_total.clone()))?;

        let token_usage_total = IntCounterVec::new(
            Opts::new(
                "dlp_token_usage_total",
                "Estimated tokens (bytes / 4) of request bodies",
            ),
            &["direction"],
        )?;
        registry.register(Box::new(token_usage_total.clone()))?;

        let latency_seconds = Histogram::with_opts(
            HistogramOpts::new("dlp_latency_seconds", "Time spent processing DLP requests")
                .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(latency_seconds.clone()))?;

        let active_connections = IntGauge::new(
            "dlp_active_connections",
            "Number of currently active connections",
        )?;
        registry.register(Box::new(active_connections.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            redacted_total,
            blocked_total,
            pii_detected_total,
            token_usage_total,
            latency_seconds,
            active_connections,
        })
    }

    /// Count a redacted request and its per-type entity spans.
    pub fn record_redaction(&self, stats: &RedactionStats) {
        self.redacted_total.inc();
        for (entity, count) in &stats.pii_type_counts {
            self.pii_detected_total
                .with_label_values(&[entity.as_str()])
                .inc_by(*count as u64);
        }
    }

    pub fn record_tokens(&self, input_bytes: usize, output_bytes: usize) {
        self.token_usage_total
            .with_label_values(&["input"])
            .inc_by(estimate_tokens(input_bytes));
        self.token_usage_total
            .with_label_values(&["output"])
            .inc_by(estimate_tokens(output_bytes));
    }

    pub fn record_blocked(&self, reason: &str) {
        self.blocked_total.with_label_values(&[reason]).inc();
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Rough token estimate: one token per four bytes.
pub fn estimate_tokens(bytes: usize) -> u64 {
    (bytes / 4) as u64
}

/// Headline numbers scraped back out of a `/metrics` response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricTotals {
    pub requests: u64,
    pub redacted: u64,
    /// Sum over every `reason` label.
    pub blocked: u64,
    pub active_connections: i64,
    /// Entity type to detections.
    pub pii_detected: BTreeMap<String, u64>,
}

static RE_SAMPLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(dlp_[a-z_]+)(?:\{(?:type|reason|direction)="([^"]*)"\})? (\S+)$"#)
        .expect("valid regex")
});

/// Parse the text exposition format produced by [`DlpMetrics::render`].
///
/// Unknown lines are ignored.
pub fn summarize_exposition(text: &str) -> MetricTotals {
    let mut totals = MetricTotals::default();
    for line in text.lines().filter(|l| !l.starts_with('#')) {
        let Some(caps) = RE_SAMPLE.captures(line.trim()) else {
            continue;
        };
        let Ok(value) = caps[3].parse::<f64>() else {
            continue;
        };
        let label = caps.get(2).map(|m| m.as_str());
        match (&caps[1], label) {
            ("dlp_requests_total", None) => totals.requests = value as u64,
            ("dlp_redacted_total", None) => totals.redacted = value as u64,
            ("dlp_blocked_total", Some(_)) => totals.blocked += value as u64,
            ("dlp_active_connections", None) => totals.active_connections = value as i64,
            ("dlp_pii_detected_total", Some(entity)) => {
                totals.pii_detected.insert(entity.to_string(), value as u64);
            }
            _ => {}
        }
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_all_families() {
        let metrics = DlpMetrics::new().unwrap();
        metrics.requests_total.inc();
        metrics.record_blocked("timeout");
        metrics.record_tokens(400, 200);
        metrics.latency_seconds.observe(0.2);
        let mut stats = RedactionStats::default();
        stats.pii_type_counts.insert("PHONE_NUMBER".to_string(), 2);
        metrics.record_redaction(&stats);

        let text = metrics.render().unwrap();
        assert!(text.contains("dlp_requests_total 1"));
        assert!(text.contains("dlp_redacted_total 1"));
        assert!(text.contains(r#"dlp_pii_detected_total{type="PHONE_NUMBER"} 2"#));
        assert!(text.contains(r#"dlp_token_usage_total{direction="input"} 100"#));
        assert!(text.contains(r#"dlp_token_usage_total{direction="output"} 50"#));
        assert!(text.contains(r#"dlp_blocked_total{reason="timeout"} 1"#));
        assert!(text.contains("dlp_latency_seconds_bucket"));
        assert!(text.contains("dlp_active_connections 0"));
    }

    #[test]
    fn token_estimate_rounds_down() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(7), 1);
        assert_eq!(estimate_tokens(8), 2);
    }

    #[test]
    fn summarizes_rendered_output() {
        let metrics = DlpMetrics::new().unwrap();
        metrics.requests_total.inc_by(5);
        metrics.redacted_total.inc_by(2);
        metrics.record_blocked("timeout");
        metrics.record_blocked("oversize");
        metrics.record_blocked("oversize");
        metrics.active_connections.set(3);
        metrics
            .pii_detected_total
            .with_label_values(&["EMAIL_ADDRESS"])
            .inc_by(4);

        let totals = summarize_exposition(&metrics.render().unwrap());
        assert_eq!(totals.requests, 5);
        assert_eq!(totals.redacted, 2);
        assert_eq!(totals.blocked, 3);
        assert_eq!(totals.active_connections, 3);
        assert_eq!(totals.pii_detected.get("EMAIL_ADDRESS"), Some(&4));
    }

    #[test]
    fn summarize_ignores_foreign_lines() {
        let totals = summarize_exposition("# HELP x\nother_metric 7\ngarbage\n");
        assert_eq!(totals, MetricTotals::default());
    }

    #[test]
    fn separate_instances_do_not_collide() {
        let a = DlpMetrics::new().unwrap();
        let b = DlpMetrics::new().unwrap();
        a.requests_total.inc();
        assert_eq!(b.requests_total.get(), 0);
    }
}
