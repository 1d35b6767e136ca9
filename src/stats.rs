//! Cumulative request statistics with periodic JSON persistence.
//!
//! [`StatsAggregator`] is created once at startup, optionally seeded from the
//! snapshot a previous run left behind, and updated from every request
//! completion path. The snapshot is rewritten whenever more than the flush
//! interval has passed since the last write, so a crash loses at most one
//! interval of counts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::StatsConfig;
use crate::dlp::RedactionStats;
use crate::error::Result;

/// Process-wide counters, persisted as a flat JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CumulativeStats {
    pub total_requests: u64,
    pub total_redacted: u64,
    pub total_blocked: u64,
    pub static_replacements: u64,
    pub ml_replacements: u64,
    /// Seconds spent in redaction.
    pub total_time: f64,
    pub active_connections: u64,
    pub upstream_hosts: BTreeMap<String, u64>,
}

struct StatsState {
    stats: CumulativeStats,
    last_flush: Instant,
}

/// Thread-safe owner of [`CumulativeStats`].
pub struct StatsAggregator {
    state: Mutex<StatsState>,
    /// Held across serialize and write so snapshots land one at a time.
    /// Taken before `state`, never while holding it.
    flush_lock: Mutex<()>,
    path: Option<PathBuf>,
    flush_interval: Duration,
}

impl StatsAggregator {
    /// Create an aggregator, restoring counters from `path` when it holds a snapshot.
    ///
    /// An unreadable snapshot is logged and ignored.
    pub fn new(path: Option<PathBuf>, flush_interval: Duration) -> Self {
        let mut stats = path
            .as_deref()
            .and_then(|p| match load_snapshot(p) {
                Ok(stats) => stats,
                Err(e) => {
                    error!("Failed to load stats from {}: {}", p.display(), e);
                    None
                }
            })
            .unwrap_or_default();
        // Connections from a previous process are gone.
        stats.active_connections = 0;

        Self {
            state: Mutex::new(StatsState {
                stats,
                last_flush: Instant::now(),
            }),
            flush_lock: Mutex::new(()),
            path,
            flush_interval,
        }
    }

    pub fn from_config(config: &StatsConfig) -> Self {
        Self::new(
            config.file.clone(),
            Duration::from_millis(config.flush_interval_ms),
        )
    }

    /// Record a completed request and flush if the interval has elapsed.
    pub fn update(&self, request: &RedactionStats, duration: Duration, upstream_host: Option<&str>) {
        let due = {
            let mut state = self.lock();
            let stats = &mut state.stats;
            stats.total_requests += 1;
            if !request.is_empty() {
                stats.total_redacted += 1;
            }
            stats.static_replacements += request.static_replacements as u64;
            stats.ml_replacements += request.ml_replacements as u64;
            stats.total_time += duration.as_secs_f64();
            if let Some(host) = upstream_host.filter(|h| !h.is_empty()) {
                *stats.upstream_hosts.entry(host.to_string()).or_insert(0) += 1;
            }
            // Claim the interval while still locked; only one caller flushes.
            let now = Instant::now();
            if now.duration_since(state.last_flush) > self.flush_interval {
                state.last_flush = now;
                true
            } else {
                false
            }
        };
        if due {
            self.write_snapshot();
        }
    }

    /// Record a request that was blocked instead of forwarded.
    pub fn record_blocked(&self, upstream_host: Option<&str>) {
        let mut state = self.lock();
        state.stats.total_requests += 1;
        state.stats.total_blocked += 1;
        if let Some(host) = upstream_host.filter(|h| !h.is_empty()) {
            *state.stats.upstream_hosts.entry(host.to_string()).or_insert(0) += 1;
        }
    }

    pub fn increment_active(&self) {
        self.lock().stats.active_connections += 1;
    }

    pub fn decrement_active(&self) {
        let mut state = self.lock();
        state.stats.active_connections = state.stats.active_connections.saturating_sub(1);
    }

    /// A copy of the current counters.
    pub fn snapshot(&self) -> CumulativeStats {
        self.lock().stats.clone()
    }

    /// Write the snapshot to disk now. Failures are logged, never returned.
    pub fn flush(&self) {
        self.lock().last_flush = Instant::now();
        self.write_snapshot();
    }

    fn write_snapshot(&self) {
        let Some(ref path) = self.path else {
            return;
        };
        let _writing = self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let body = serde_json::to_vec(&self.lock().stats);
        let result = body
            .map_err(crate::error::DlpError::from)
            .and_then(|bytes| write_atomically(path, &bytes));
        match result {
            Ok(()) => debug!("Flushed stats to {}", path.display()),
            Err(e) => error!("Failed to flush stats to {}: {}", path.display(), e),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read a persisted snapshot. `Ok(None)` if the file does not exist.
pub fn load_snapshot(path: &Path) -> Result<Option<CumulativeStats>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        warn!("Atomic rename failed ({}), writing in place", e);
        std::fs::write(path, bytes)?;
    }
    Ok(())
}
