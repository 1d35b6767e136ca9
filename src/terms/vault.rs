//! Remote term source backed by a Vault-compatible KV v2 secret store.
//!
//! Every value of the secret at the configured path becomes a term; list values
//! contribute each element. Fetches go through a [`CircuitBreaker`]: while it is
//! open, the last successfully fetched list is served without touching the network.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::TermSource;
use super::breaker::{BreakerState, CircuitBreaker};
use crate::config::VaultConfig;
use crate::error::{DlpError, Result};

/// Minimal secret store client surface.
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    /// Whether the configured credentials are accepted.
    async fn is_authenticated(&self) -> Result<bool>;
    /// Read the key/value payload of the secret at `path`.
    async fn read_secret(&self, path: &str) -> Result<Map<String, Value>>;
}

/// HTTP client for the Vault KV v2 API.
pub struct VaultClient {
    base_url: String,
    token: Option<String>,
    mount: String,
    client: reqwest::Client,
}

impl VaultClient {
    pub fn new(config: &VaultConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| DlpError::SecretStore(e.to_string()))?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
            mount: config.mount.trim_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl SecretStore for VaultClient {
    async fn is_authenticated(&self) -> Result<bool> {
        let Some(ref token) = self.token else {
            return Ok(false);
        };
        let url = format!("{}/v1/auth/token/lookup-self", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("X-Vault-Token", token)
            .send()
            .await
            .map_err(|e| DlpError::SecretStore(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            Ok(true)
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            Ok(false)
        } else {
            Err(DlpError::SecretStore(format!(
                "token lookup returned {}",
                status
            )))
        }
    }

    async fn read_secret(&self, path: &str) -> Result<Map<String, Value>> {
        let url = format!(
            "{}/v1/{}/data/{}",
            self.base_url,
            self.mount,
            path.trim_start_matches('/')
        );
        let mut req = self.client.get(&url);
        if let Some(ref token) = self.token {
            req = req.header("X-Vault-Token", token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| DlpError::SecretStore(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(DlpError::SecretStore(format!(
                "read {} returned {}: {}",
                path, status, body
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| DlpError::SecretStore(e.to_string()))?;
        body.pointer("/data/data")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| DlpError::SecretStore(format!("secret {} has no data", path)))
    }
}

/// State guarded by the provider's lock: last good terms plus breaker.
#[derive(Debug)]
pub struct TermProviderState {
    pub cached_terms: Vec<String>,
    pub breaker: CircuitBreaker,
}

/// [`TermSource`] that fetches terms from a [`SecretStore`] behind a circuit breaker.
pub struct RemoteTermSource {
    store: Arc<dyn SecretStore>,
    path: String,
    state: Mutex<TermProviderState>,
}

impl RemoteTermSource {
    pub fn new(
        store: Arc<dyn SecretStore>,
        path: impl Into<String>,
        failure_threshold: u32,
        cooldown: Duration,
    ) -> Self {
        Self {
            store,
            path: path.into(),
            state: Mutex::new(TermProviderState {
                cached_terms: Vec::new(),
                breaker: CircuitBreaker::new(failure_threshold, cooldown),
            }),
        }
    }

    /// Build a Vault-backed source from configuration.
    pub fn from_vault_config(config: &VaultConfig) -> Result<Self> {
        let client = VaultClient::new(config)?;
        Ok(Self::new(
            Arc::new(client),
            config.path.clone(),
            config.failure_threshold,
            Duration::from_secs(config.cooldown_secs),
        ))
    }

    pub async fn breaker_state(&self) -> BreakerState {
        self.state.lock().await.breaker.state()
    }

    async fn fetch(&self) -> Result<Vec<String>> {
        if !self.store.is_authenticated().await? {
            return Err(DlpError::Unauthenticated);
        }
        let secret = self.store.read_secret(&self.path).await?;
        Ok(flatten_secret(&secret))
    }
}

#[async_trait::async_trait]
impl TermSource for RemoteTermSource {
    async fn get_terms(&self) -> Vec<String> {
        // Held across the fetch so a half-open breaker admits a single trial.
        let mut state = self.state.lock().await;
        if !state.breaker.allow_request(Instant::now()) {
            let open_for = state
                .breaker
                .opened_at()
                .map(|at| at.elapsed().as_secs())
                .unwrap_or_default();
            debug!(
                "Circuit open for {}s, serving {} cached terms",
                open_for,
                state.cached_terms.len()
            );
            return state.cached_terms.clone();
        }

        match self.fetch().await {
            Ok(terms) => {
                state.breaker.record_success();
                info!("Fetched {} terms from secret store", terms.len());
                state.cached_terms = terms;
                state.cached_terms.clone()
            }
            Err(e) => {
                state.breaker.record_failure(Instant::now());
                match e {
                    DlpError::Unauthenticated => {
                        error!("Secret store authentication failed for {}", self.path)
                    }
                    other => warn!(
                        "Failed to fetch terms from secret store ({} consecutive failures): {}",
                        state.breaker.consecutive_failures(),
                        other
                    ),
                }
                state.cached_terms.clone()
            }
        }
    }

    fn name(&self) -> &str {
        "vault"
    }
}

/// Flatten secret values into a unique term list.
///
/// Strings are taken as-is, numbers and booleans by their text form, and lists
/// element by element. Nulls and nested objects are skipped.
pub fn flatten_secret(secret: &Map<String, Value>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    let mut push = |value: &Value| {
        let term = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return,
        };
        if !term.is_empty() && seen.insert(term.clone()) {
            terms.push(term);
        }
    };

    for value in secret.values() {
        match value {
            Value::Array(items) => items.iter().for_each(&mut push),
            other => push(other),
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// A scripted secret store that counts calls.
    struct MockStore {
        authenticated: AtomicBool,
        fail: AtomicBool,
        hang: AtomicBool,
        calls: AtomicUsize,
    }

    impl MockStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                authenticated: AtomicBool::new(true),
                fail: AtomicBool::new(false),
                hang: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl SecretStore for MockStore {
        async fn is_authenticated(&self) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.authenticated.load(Ordering::SeqCst))
        }

        async fn read_secret(&self, _path: &str) -> Result<Map<String, Value>> {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(DlpError::SecretStore("connection refused".to_string()));
            }
            let value = serde_json::json!({
                "term1": "secret1",
                "term2": ["secret2", "secret3"],
            });
            Ok(value.as_object().cloned().unwrap())
        }
    }

    #[test]
    fn flattens_scalars_and_lists() {
        let value = serde_json::json!({
            "a": "one",
            "b": ["two", "three", "one"],
            "c": 42,
            "d": null,
            "e": {"nested": "skip"},
        });
        let mut terms = flatten_secret(value.as_object().unwrap());
        terms.sort();
        assert_eq!(terms, vec!["42", "one", "three", "two"]);
    }

    #[tokio::test]
    async fn fetch_success_returns_all_values() {
        let store = MockStore::new();
        let source = RemoteTermSource::new(store, "aidlp/terms", 3, Duration::from_secs(60));
        let mut terms = source.get_terms().await;
        terms.sort();
        assert_eq!(terms, vec!["secret1", "secret2", "secret3"]);
    }

    #[tokio::test]
    async fn unauthenticated_returns_empty_cache() {
        let store = MockStore::new();
        store.authenticated.store(false, Ordering::SeqCst);
        let source = RemoteTermSource::new(store, "aidlp/terms", 3, Duration::from_secs(60));
        assert!(source.get_terms().await.is_empty());
    }

    #[tokio::test]
    async fn store_error_returns_empty_cache() {
        let store = MockStore::new();
        store.fail.store(true, Ordering::SeqCst);
        let source = RemoteTermSource::new(store, "aidlp/terms", 3, Duration::from_secs(60));
        assert!(source.get_terms().await.is_empty());
    }

    #[tokio::test]
    async fn open_breaker_serves_cache_without_calling_store() {
        let store = MockStore::new();
        let source =
            RemoteTermSource::new(store.clone(), "aidlp/terms", 3, Duration::from_secs(60));
        assert_eq!(source.get_terms().await.len(), 3);

        store.fail.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            assert_eq!(source.get_terms().await.len(), 3);
        }
        assert_eq!(source.breaker_state().await, BreakerState::Open);

        let calls_when_opened = store.calls.load(Ordering::SeqCst);
        for _ in 0..5 {
            assert_eq!(source.get_terms().await.len(), 3);
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), calls_when_opened);
    }

    #[tokio::test]
    async fn retries_once_after_cooldown() {
        let store = MockStore::new();
        store.fail.store(true, Ordering::SeqCst);
        let cooldown = Duration::from_millis(50);
        let source = RemoteTermSource::new(store.clone(), "aidlp/terms", 3, cooldown);
        for _ in 0..3 {
            source.get_terms().await;
        }
        assert_eq!(source.breaker_state().await, BreakerState::Open);
        let calls_when_opened = store.calls.load(Ordering::SeqCst);

        tokio::time::sleep(cooldown + Duration::from_millis(20)).await;
        source.get_terms().await;
        assert_eq!(store.calls.load(Ordering::SeqCst), calls_when_opened + 1);
        assert_eq!(source.breaker_state().await, BreakerState::Open);

        // Trial failed: the cool-down restarted, so no call goes out now.
        source.get_terms().await;
        assert_eq!(store.calls.load(Ordering::SeqCst), calls_when_opened + 1);

        store.fail.store(false, Ordering::SeqCst);
        tokio::time::sleep(cooldown + Duration::from_millis(20)).await;
        assert_eq!(source.get_terms().await.len(), 3);
        assert_eq!(source.breaker_state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn cancelled_trial_does_not_wedge_the_breaker() {
        let store = MockStore::new();
        let cooldown = Duration::from_millis(50);
        let source = RemoteTermSource::new(store.clone(), "aidlp/terms", 1, cooldown);
        assert_eq!(source.get_terms().await.len(), 3);

        store.fail.store(true, Ordering::SeqCst);
        source.get_terms().await;
        assert_eq!(source.breaker_state().await, BreakerState::Open);

        // The trial call hangs and its caller gives up.
        store.hang.store(true, Ordering::SeqCst);
        tokio::time::sleep(cooldown + Duration::from_millis(20)).await;
        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), source.get_terms()).await;
        assert!(abandoned.is_err());
        assert_eq!(source.breaker_state().await, BreakerState::HalfOpen);

        store.hang.store(false, Ordering::SeqCst);
        store.fail.store(false, Ordering::SeqCst);
        let calls_before = store.calls.load(Ordering::SeqCst);
        assert_eq!(source.get_terms().await.len(), 3);
        assert_eq!(store.calls.load(Ordering::SeqCst), calls_before);

        tokio::time::sleep(cooldown + Duration::from_millis(20)).await;
        assert_eq!(source.get_terms().await.len(), 3);
        assert_eq!(store.calls.load(Ordering::SeqCst), calls_before + 1);
        assert_eq!(source.breaker_state().await, BreakerState::Closed);
    }
}
