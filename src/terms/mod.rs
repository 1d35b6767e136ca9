//! Static term sources.
//!
//! The [`TermSource`] trait abstracts over where the blocklist comes from.
//! Implementations never fail: on any error they return the best fallback they
//! have (defaults, last known good list, or nothing).
//!
//! - [`file::FileTermSource`]: one term per line in a local file
//! - [`vault::RemoteTermSource`]: a KV v2 secret behind a circuit breaker

pub mod breaker;
pub mod file;
pub mod vault;

use std::sync::Arc;

use tracing::error;

use crate::config::{DlpConfig, ProviderKind};

/// A supplier of exact terms to redact.
#[async_trait::async_trait]
pub trait TermSource: Send + Sync {
    /// Current term list. Never errors; failures degrade to a fallback list.
    async fn get_terms(&self) -> Vec<String>;
    /// Backend name (e.g., `"file"`).
    fn name(&self) -> &str;
}

/// Build the term source selected by `dlp.secrets_provider`.
///
/// A vault provider with missing or unusable settings falls back to the file
/// source so the proxy keeps running with local terms.
pub fn from_config(config: &DlpConfig) -> Arc<dyn TermSource> {
    let file_source = || -> Arc<dyn TermSource> {
        Arc::new(file::FileTermSource::new(config.static_terms_file.clone()))
    };

    match config.secrets_provider.kind {
        ProviderKind::File => file_source(),
        ProviderKind::Vault => {
            let Some(ref vault) = config.secrets_provider.vault else {
                error!("secrets_provider.type is vault but [dlp.secrets_provider.vault] is missing; using file terms");
                return file_source();
            };
            match vault::RemoteTermSource::from_vault_config(vault) {
                Ok(source) => Arc::new(source),
                Err(e) => {
                    error!("Could not initialise vault term source ({}); using file terms", e);
                    file_source()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SecretsProviderConfig, VaultConfig};

    #[test]
    fn file_provider_by_default() {
        let source = from_config(&DlpConfig::default());
        assert_eq!(source.name(), "file");
    }

    #[test]
    fn vault_provider_when_configured() {
        let config = DlpConfig {
            secrets_provider: SecretsProviderConfig {
                kind: ProviderKind::Vault,
                vault: Some(VaultConfig::default()),
            },
            ..DlpConfig::default()
        };
        assert_eq!(from_config(&config).name(), "vault");
    }

    #[test]
    fn vault_without_settings_falls_back_to_file() {
        let config = DlpConfig {
            secrets_provider: SecretsProviderConfig {
                kind: ProviderKind::Vault,
                vault: None,
            },
            ..DlpConfig::default()
        };
        assert_eq!(from_config(&config).name(), "file");
    }
}
