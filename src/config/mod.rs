//! TOML configuration types for the DLP proxy.
//!
//! The top-level [`AppConfig`] is deserialized from `dlp-proxy.toml` and contains
//! sections for the proxy listener, the redaction pipeline, and stats persistence.
//! Every field has a default, so an empty file (or no file at all) is a valid
//! configuration.
//!
//! # Example `dlp-proxy.toml`
//!
//! ```toml
//! [proxy]
//! metrics_port = 9090
//!
//! [dlp]
//! static_terms_file = "terms.txt"
//! ml_enabled = true
//! ml_threshold = 0.5
//! replacement_token = "[REDACTED]"
//!
//! [dlp.secrets_provider]
//! type = "vault"
//!
//! [dlp.secrets_provider.vault]
//! url = "http://localhost:8200"
//! token = "${VAULT_TOKEN}"
//! path = "aidlp/terms"
//! ```

pub mod reload;

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DlpError, Result};

/// Proxy listener configuration (`[proxy]` section).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Interface the proxy listener and metrics server bind to.
    pub host: String,
    /// Port of the forward proxy listener.
    pub port: u16,
    /// Port of the Prometheus metrics and health server.
    pub metrics_port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            metrics_port: 9090,
        }
    }
}

/// Which backend supplies static terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// One term per line in `dlp.static_terms_file`.
    #[default]
    File,
    /// KV v2 secret in a Vault-compatible store.
    Vault,
}

/// Remote secret store settings (`[dlp.secrets_provider.vault]`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct VaultConfig {
    pub url: String,
    pub token: Option<String>,
    /// Secret path below the KV mount.
    pub path: String,
    /// KV v2 mount point.
    pub mount: String,
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before a trial call.
    pub cooldown_secs: u64,
    pub request_timeout_ms: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8200".to_string(),
            token: None,
            path: "aidlp/terms".to_string(),
            mount: "secret".to_string(),
            failure_threshold: 3,
            cooldown_secs: 60,
            request_timeout_ms: 5000,
        }
    }
}

/// Term source selection (`[dlp.secrets_provider]`).
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SecretsProviderConfig {
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    pub vault: Option<VaultConfig>,
}

/// Redaction pipeline configuration (`[dlp]` section).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DlpConfig {
    /// Path of the local term file (file provider, and fallback for a broken vault config).
    pub static_terms_file: PathBuf,
    /// Whether entity detection runs after static matching.
    pub ml_enabled: bool,
    /// Minimum classifier score for a span to be redacted.
    pub ml_threshold: f64,
    /// Entity allow-list. `None` enables every supported entity.
    pub entities: Option<Vec<String>>,
    pub replacement_token: String,
    /// ASCII case-insensitive static matching.
    pub case_insensitive: bool,
    /// Bodies larger than this are rejected with 413.
    pub max_body_bytes: usize,
    /// Upper bound on a single offloaded redaction, including the wait for a worker.
    pub detection_timeout_ms: u64,
    /// Maximum concurrent redactions on the blocking pool.
    pub worker_threads: usize,
    pub health_path: String,
    pub secrets_provider: SecretsProviderConfig,
}

impl Default for DlpConfig {
    fn default() -> Self {
        Self {
            static_terms_file: PathBuf::from("terms.txt"),
            ml_enabled: true,
            ml_threshold: 0.5,
            entities: None,
            replacement_token: "[REDACTED]".to_string(),
            case_insensitive: false,
            max_body_bytes: 10 * 1024 * 1024,
            detection_timeout_ms: 30_000,
            worker_threads: default_worker_threads(),
            health_path: "/_health".to_string(),
            secrets_provider: SecretsProviderConfig::default(),
        }
    }
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .max(4)
}

/// Stats persistence (`[stats]` section).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StatsConfig {
    /// JSON snapshot path. `None` keeps stats in memory only.
    pub file: Option<PathBuf>,
    pub flush_interval_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            file: Some(PathBuf::from("stats.json")),
            flush_interval_ms: 1000,
        }
    }
}

/// Top-level application configuration deserialized from `dlp-proxy.toml`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub proxy: ProxyConfig,
    pub dlp: DlpConfig,
    pub stats: StatsConfig,
}

impl AppConfig {
    /// Load and parse the configuration from a TOML file at the given path.
    ///
    /// Before parsing, `${VAR}` and `$VAR` placeholders in the TOML text are
    /// replaced with the corresponding environment variable values. An error is
    /// returned if a referenced variable is not set.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Like [`AppConfig::load_from_path`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from_path(path)
    }

    /// Parse TOML text, substituting environment variables and validating ranges.
    pub fn parse(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let threshold = self.dlp.ml_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(DlpError::ConfigInvalid(format!(
                "dlp.ml_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if self.dlp.replacement_token.is_empty() {
            return Err(DlpError::ConfigInvalid(
                "dlp.replacement_token must not be empty".to_string(),
            ));
        }
        if self.dlp.worker_threads == 0 {
            return Err(DlpError::ConfigInvalid(
                "dlp.worker_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

static RE_BRACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));
// Bare form is uppercase-only to avoid false positives.
static RE_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Z_][A-Z0-9_]*)").expect("valid regex"));

/// Replace `${VAR_NAME}` and `$VAR_NAME` placeholders with environment variable values.
///
/// Comments are copied through untouched, so a commented-out placeholder never
/// needs its variable set. Returns an error naming the first unset variable.
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    for line in input.split_inclusive('\n') {
        let (code, comment) = split_comment(line);
        out.push_str(&substitute_in(code)?);
        out.push_str(comment);
    }
    Ok(out)
}

fn substitute_in(code: &str) -> Result<String> {
    let lookup = |name: &str| {
        std::env::var(name).map_err(|_| DlpError::ConfigEnvVar(name.to_string()))
    };

    let mut result = code.to_string();
    for cap in RE_BRACES.captures_iter(code) {
        let value = lookup(&cap[1])?;
        result = result.replace(&cap[0], &value);
    }

    let intermediate = result.clone();
    for cap in RE_BARE.captures_iter(&intermediate) {
        let value = lookup(&cap[1])?;
        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}

/// Split a TOML line at the first `#` outside a string.
fn split_comment(line: &str) -> (&str, &str) {
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    for (i, b) in line.bytes().enumerate() {
        match quote {
            Some(b'"') if escaped => escaped = false,
            Some(b'"') if b == b'\\' => escaped = true,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'#' => return line.split_at(i),
            None => {}
        }
    }
    (line, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.dlp.replacement_token, "[REDACTED]");
        assert_eq!(config.dlp.max_body_bytes, 10 * 1024 * 1024);
        assert_eq!(config.dlp.health_path, "/_health");
        assert_eq!(config.proxy.metrics_port, 9090);
        assert_eq!(config.dlp.secrets_provider.kind, ProviderKind::File);
    }

    #[test]
    fn parses_vault_provider() {
        let config = AppConfig::parse(
            r#"
[dlp]
ml_enabled = false
entities = ["PHONE_NUMBER"]

[dlp.secrets_provider]
type = "vault"

[dlp.secrets_provider.vault]
url = "http://vault:8200"
token = "s.abc"
"#,
        )
        .unwrap();
        assert!(!config.dlp.ml_enabled);
        assert_eq!(config.dlp.entities, Some(vec!["PHONE_NUMBER".to_string()]));
        assert_eq!(config.dlp.secrets_provider.kind, ProviderKind::Vault);
        let vault = config.dlp.secrets_provider.vault.unwrap();
        assert_eq!(vault.url, "http://vault:8200");
        assert_eq!(vault.token.as_deref(), Some("s.abc"));
        assert_eq!(vault.path, "aidlp/terms");
        assert_eq!(vault.failure_threshold, 3);
        assert_eq!(vault.cooldown_secs, 60);
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let err = AppConfig::parse("[dlp]\nml_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, DlpError::ConfigInvalid(_)));
    }

    #[test]
    fn rejects_wrong_types() {
        let err = AppConfig::parse("[dlp]\nml_enabled = \"yes\"\n").unwrap_err();
        assert!(matches!(err, DlpError::ConfigParse(_)));
    }

    #[test]
    fn substitutes_known_env_var() {
        // PATH is set in every test environment.
        let path = std::env::var("PATH").unwrap();
        let out = substitute_env_vars("token = \"${PATH}\"").unwrap();
        assert_eq!(out, format!("token = \"{}\"", path));
    }

    #[test]
    fn unset_env_var_is_an_error() {
        let err = substitute_env_vars("token = \"${DLP_PROXY_SURELY_UNSET_VAR}\"").unwrap_err();
        match err {
            DlpError::ConfigEnvVar(name) => assert_eq!(name, "DLP_PROXY_SURELY_UNSET_VAR"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn commented_placeholder_needs_no_variable() {
        let config = AppConfig::parse(
            "# token = \"${DLP_PROXY_COMMENTED_UNSET_VAR}\"\n[dlp]\nml_enabled = false # was $DLP_PROXY_TRAILING_UNSET_VAR\n",
        )
        .unwrap();
        assert!(!config.dlp.ml_enabled);
    }

    #[test]
    fn hash_inside_string_is_not_a_comment() {
        let path = std::env::var("PATH").unwrap();
        let out = substitute_env_vars("a = \"#${PATH}\" # ${DLP_PROXY_COMMENTED_UNSET_VAR}\n").unwrap();
        assert_eq!(
            out,
            format!("a = \"#{}\" # ${{DLP_PROXY_COMMENTED_UNSET_VAR}}\n", path)
        );

        let config = AppConfig::parse("[dlp]\nreplacement_token = 'x#y' # note\n").unwrap();
        assert_eq!(config.dlp.replacement_token, "x#y");
    }

    #[test]
    fn escaped_quote_does_not_end_string() {
        assert_eq!(
            split_comment("a = \"x\\\"#y\" # c"),
            ("a = \"x\\\"#y\" ", "# c")
        );
        assert_eq!(split_comment("# only"), ("", "# only"));
        assert_eq!(split_comment("b = 1\n"), ("b = 1\n", ""));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
