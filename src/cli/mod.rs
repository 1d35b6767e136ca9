use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dlp-proxy")]
#[command(about = "DLP redaction proxy - fail-closed scrubbing of outbound LLM API requests")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "dlp-proxy.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the redaction engine with the metrics/health server and config watcher
    Serve,
    /// Redact text from stdin or a file and print the result
    Redact {
        /// Read input from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Show request totals from a running instance
    Stats {
        /// Metrics endpoint (defaults to the configured metrics port on localhost)
        #[arg(long)]
        url: Option<String>,
    },
    /// Append a term to the static terms file
    AddTerm {
        /// The exact term to redact
        term: String,
    },
    /// Write a default configuration file
    Init,
}
