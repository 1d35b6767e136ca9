use thiserror::Error;

/// Unified error type for the DLP library.
#[derive(Debug, Error)]
pub enum DlpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config references unset environment variable: {0}")]
    ConfigEnvVar(String),

    #[error("Invalid config: {0}")]
    ConfigInvalid(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Span {start}..{end} is invalid for text of {len} bytes")]
    InvalidSpan { start: usize, end: usize, len: usize },

    #[error("Matcher build error: {0}")]
    Matcher(#[from] aho_corasick::BuildError),

    #[error("Secret store error: {0}")]
    SecretStore(String),

    #[error("Secret store rejected the configured token")]
    Unauthenticated,

    #[error("Redaction timed out after {0} ms")]
    Timeout(u64),

    #[error("Redaction worker failed: {0}")]
    Worker(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, DlpError>;
