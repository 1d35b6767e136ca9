//! Configuration hot-reload.
//!
//! Watches the TOML configuration file and rebuilds the redaction engine's
//! snapshot without restarting the process. Requests already being redacted
//! finish against the snapshot they started with.
//!
//! Reload triggers:
//!
//! - **File change**: [`start_file_watcher`] uses the [`notify`] crate to detect
//!   modifications to the config file.
//! - **SIGHUP** (Unix only): [`start_sighup_handler`] listens for the HUP signal
//!   for manual reload via `kill -HUP <pid>`.
//!
//! Invalid configuration is handled fail-safe: the old snapshot is retained and
//! a warning is logged.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::runtime::Handle;
use tracing::{info, warn};

use super::AppConfig;
use crate::dlp::engine::RedactionEngine;

/// Re-read the config file and reload the engine from its `[dlp]` section.
///
/// On failure (I/O error, invalid TOML, missing env vars, matcher build error)
/// the engine keeps its previous snapshot and the error is returned.
pub async fn reload_engine(
    engine: &RedactionEngine,
    config_path: &Path,
) -> crate::error::Result<()> {
    let config = AppConfig::load_from_path(config_path)?;
    engine.reload(&config.dlp).await?;
    info!("Configuration reloaded from {}", config_path.display());
    Ok(())
}

/// Start a file-system watcher that triggers [`reload_engine`] on config changes.
///
/// The notify callback runs on its own thread, so reloads are spawned onto
/// `runtime`. Returns a [`RecommendedWatcher`] handle that must be kept alive
/// for the duration of the watch. Dropping the handle stops the watcher.
pub fn start_file_watcher(
    config_path: PathBuf,
    engine: Arc<RedactionEngine>,
    runtime: Handle,
) -> notify::Result<RecommendedWatcher> {
    let path = config_path.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    info!("Config file changed, reloading...");
                    let engine = engine.clone();
                    let path = path.clone();
                    runtime.spawn(async move {
                        if let Err(e) = reload_engine(&engine, &path).await {
                            warn!("Reload failed (keeping old configuration): {}", e);
                        }
                    });
                }
            }
            Err(e) => {
                warn!("File watcher error: {}", e);
            }
        }
    })?;

    watcher.watch(&config_path, RecursiveMode::NonRecursive)?;
    info!("Watching {} for changes", config_path.display());
    Ok(watcher)
}

/// Start a SIGHUP handler that reloads the configuration on signal.
#[cfg(unix)]
pub fn start_sighup_handler(config_path: PathBuf, engine: Arc<RedactionEngine>) {
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sig = match signal(SignalKind::hangup()) {
            Ok(sig) => sig,
            Err(e) => {
                warn!("Failed to register SIGHUP handler: {}", e);
                return;
            }
        };
        while sig.recv().await.is_some() {
            info!("SIGHUP received, reloading...");
            if let Err(e) = reload_engine(&engine, &config_path).await {
                warn!("Reload on SIGHUP failed (keeping old configuration): {}", e);
            }
        }
    });
}

/// No-op SIGHUP handler for non-Unix platforms.
#[cfg(not(unix))]
pub fn start_sighup_handler(_config_path: PathBuf, _engine: Arc<RedactionEngine>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlp::patterns::PatternClassifier;

    fn make_toml(terms_file: &Path, token: &str) -> String {
        format!(
            r#"
[dlp]
static_terms_file = "{}"
ml_enabled = false
replacement_token = "{}"
"#,
            terms_file.display(),
            token
        )
    }

    async fn setup(dir: &Path) -> (PathBuf, Arc<RedactionEngine>) {
        let terms = dir.join("terms.txt");
        std::fs::write(&terms, "alpha\n").unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, make_toml(&terms, "[REDACTED]")).unwrap();

        let config = AppConfig::load_from_path(&path).unwrap();
        let engine = Arc::new(RedactionEngine::new(
            &config.dlp,
            Arc::new(PatternClassifier::new()),
        ));
        engine.reload(&config.dlp).await.unwrap();
        (path, engine)
    }

    #[tokio::test]
    async fn reload_engine_applies_new_token() {
        let dir = tempfile::tempdir().unwrap();
        let (path, engine) = setup(dir.path()).await;
        assert_eq!(engine.redact("alpha").unwrap().redacted_text, "[REDACTED]");

        std::fs::write(&path, make_toml(&dir.path().join("terms.txt"), "***")).unwrap();
        reload_engine(&engine, &path).await.unwrap();
        assert_eq!(engine.redact("alpha").unwrap().redacted_text, "***");
    }

    #[tokio::test]
    async fn reload_engine_picks_up_new_terms() {
        let dir = tempfile::tempdir().unwrap();
        let (path, engine) = setup(dir.path()).await;
        std::fs::write(dir.path().join("terms.txt"), "alpha\nbeta\n").unwrap();
        reload_engine(&engine, &path).await.unwrap();
        assert_eq!(engine.term_count(), 2);
    }

    #[tokio::test]
    async fn reload_invalid_toml_keeps_old() {
        let dir = tempfile::tempdir().unwrap();
        let (path, engine) = setup(dir.path()).await;

        std::fs::write(&path, "this is not valid toml [[[").unwrap();
        assert!(reload_engine(&engine, &path).await.is_err());
        assert_eq!(engine.redact("alpha").unwrap().redacted_text, "[REDACTED]");
    }

    #[tokio::test]
    async fn reload_missing_file_keeps_old() {
        let dir = tempfile::tempdir().unwrap();
        let (path, engine) = setup(dir.path()).await;

        std::fs::remove_file(&path).unwrap();
        assert!(reload_engine(&engine, &path).await.is_err());
        assert_eq!(engine.term_count(), 1);
    }

    #[tokio::test]
    async fn file_watcher_starts_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let (path, engine) = setup(dir.path()).await;
        let watcher = start_file_watcher(path, engine, Handle::current());
        assert!(watcher.is_ok());
    }
}
