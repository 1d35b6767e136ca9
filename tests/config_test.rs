use std::path::PathBuf;

use dlp_proxy::config::{AppConfig, ProviderKind};
use dlp_proxy::error::DlpError;

const MINIMAL_CONFIG: &str = r#"
[dlp]
static_terms_file = "/etc/dlp/terms.txt"
"#;

const FULL_CONFIG: &str = r#"
[proxy]
host = "127.0.0.1"
port = 18080
metrics_port = 19090

[dlp]
static_terms_file = "terms.txt"
ml_enabled = true
ml_threshold = 0.7
entities = ["EMAIL_ADDRESS", "US_SSN"]
replacement_token = "<redacted>"
case_insensitive = true
max_body_bytes = 1024
detection_timeout_ms = 250
worker_threads = 2
health_path = "/healthz"

[dlp.secrets_provider]
type = "vault"

[dlp.secrets_provider.vault]
url = "https://vault.internal:8200"
token = "s.static"
mount = "kv"
path = "dlp/terms"
failure_threshold = 5
cooldown_secs = 30
request_timeout_ms = 1500

[stats]
file = "/var/lib/dlp/stats.json"
flush_interval_ms = 5000
"#;

#[test]
fn parse_minimal_config() {
    let config = AppConfig::parse(MINIMAL_CONFIG).unwrap();
    assert_eq!(
        config.dlp.static_terms_file,
        PathBuf::from("/etc/dlp/terms.txt")
    );
    assert!(config.dlp.ml_enabled);
    assert_eq!(config.dlp.ml_threshold, 0.5);
    assert_eq!(config.dlp.replacement_token, "[REDACTED]");
    assert_eq!(config.dlp.detection_timeout_ms, 30_000);
    assert!(config.dlp.worker_threads >= 4);
    assert_eq!(config.dlp.secrets_provider.kind, ProviderKind::File);
    assert_eq!(config.stats.file, Some(PathBuf::from("stats.json")));
}

#[test]
fn parse_full_config() {
    let config = AppConfig::parse(FULL_CONFIG).unwrap();
    assert_eq!(config.proxy.host, "127.0.0.1");
    assert_eq!(config.proxy.port, 18080);
    assert_eq!(config.proxy.metrics_port, 19090);

    let dlp = &config.dlp;
    assert_eq!(dlp.ml_threshold, 0.7);
    assert_eq!(
        dlp.entities.as_deref(),
        Some(&["EMAIL_ADDRESS".to_string(), "US_SSN".to_string()][..])
    );
    assert_eq!(dlp.replacement_token, "<redacted>");
    assert!(dlp.case_insensitive);
    assert_eq!(dlp.max_body_bytes, 1024);
    assert_eq!(dlp.detection_timeout_ms, 250);
    assert_eq!(dlp.worker_threads, 2);
    assert_eq!(dlp.health_path, "/healthz");

    let vault = dlp.secrets_provider.vault.as_ref().unwrap();
    assert_eq!(dlp.secrets_provider.kind, ProviderKind::Vault);
    assert_eq!(vault.url, "https://vault.internal:8200");
    assert_eq!(vault.mount, "kv");
    assert_eq!(vault.path, "dlp/terms");
    assert_eq!(vault.failure_threshold, 5);
    assert_eq!(vault.cooldown_secs, 30);
    assert_eq!(vault.request_timeout_ms, 1500);

    assert_eq!(
        config.stats.file,
        Some(PathBuf::from("/var/lib/dlp/stats.json"))
    );
    assert_eq!(config.stats.flush_interval_ms, 5000);
}

#[test]
fn unknown_provider_type_is_rejected() {
    let err = AppConfig::parse("[dlp.secrets_provider]\ntype = \"consul\"\n").unwrap_err();
    assert!(matches!(err, DlpError::ConfigParse(_)));
}

#[test]
fn empty_replacement_token_is_rejected() {
    let err = AppConfig::parse("[dlp]\nreplacement_token = \"\"\n").unwrap_err();
    assert!(matches!(err, DlpError::ConfigInvalid(_)));
}

#[test]
fn zero_workers_is_rejected() {
    let err = AppConfig::parse("[dlp]\nworker_threads = 0\n").unwrap_err();
    assert!(matches!(err, DlpError::ConfigInvalid(_)));
}

#[test]
fn invalid_toml_returns_error() {
    assert!(AppConfig::parse("[dlp\nml_enabled = true").is_err());
}

#[test]
fn unset_env_placeholder_is_an_error() {
    let content = r#"
[dlp.secrets_provider.vault]
token = "${DLP_PROXY_TEST_NEVER_SET_TOKEN}"
"#;
    match AppConfig::parse(content) {
        Err(DlpError::ConfigEnvVar(name)) => assert_eq!(name, "DLP_PROXY_TEST_NEVER_SET_TOKEN"),
        other => panic!("expected ConfigEnvVar, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn config_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dlp-proxy.toml");
    std::fs::write(&path, FULL_CONFIG).unwrap();

    let config = AppConfig::load_from_path(&path).unwrap();
    assert_eq!(config.dlp.health_path, "/healthz");
}

#[test]
fn load_from_missing_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = AppConfig::load_from_path(&dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, DlpError::Io(_)));
}
