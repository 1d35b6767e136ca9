//! # dlp-proxy
//!
//! **Fail-closed redaction for outbound LLM API traffic.**
//!
//! dlp-proxy is the redaction core of an intercepting HTTP proxy. Each outbound
//! request is handed to [`addon::DlpAddon`], either by an embedding host proxy
//! or by the bundled forward listener in [`proxy`]. The addon scrubs configured
//! static terms and detected sensitive entities from the body before the request
//! is forwarded. If redaction fails for any reason the request is blocked, never
//! forwarded unredacted.
//!
//! ## Architecture
//!
//! - **[`terms`]**: static term sources (local file, remote secret store behind a circuit breaker)
//! - **[`dlp`]**: static matcher, entity detector, anonymizer, and the redaction engine
//! - **[`addon`]**: per-request pipeline (size limit, worker offload, timeout, fail-closed)
//! - **[`proxy`]**: forward HTTP listener on `proxy.port` that runs the pipeline and relays upstream
//! - **[`stats`]**: cumulative counters persisted as a JSON snapshot
//! - **[`metrics`]**: Prometheus counters, histogram and gauge
//! - **[`web`]**: axum server for `/metrics`, the health probe and `/api/stats`
//! - **[`config`]**: TOML configuration with env substitution and hot reload
//! - **[`cli`]**: command-line interface (clap)
//! - **[`error`]**: unified error types using `thiserror`
//!
//! ## Quick Start
//!
//! ```bash
//! # Write a default configuration
//! dlp-proxy init
//!
//! # Add a term to the blocklist
//! dlp-proxy add-term "Project Falcon"
//!
//! # Try the engine on a file
//! dlp-proxy redact --file prompt.txt
//!
//! # Run the proxy, metrics server and config watcher
//! dlp-proxy serve
//! ```

pub mod addon;
pub mod cli;
pub mod config;
pub mod dlp;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod stats;
pub mod terms;
pub mod web;
