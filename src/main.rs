use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use dlp_proxy::addon::DlpAddon;
use dlp_proxy::cli::{Cli, Commands};
use dlp_proxy::config::AppConfig;
use dlp_proxy::config::reload::{start_file_watcher, start_sighup_handler};
use dlp_proxy::dlp::engine::RedactionEngine;
use dlp_proxy::dlp::patterns::PatternClassifier;
use dlp_proxy::metrics::{self, DlpMetrics};
use dlp_proxy::proxy::{self, ProxyState};
use dlp_proxy::stats::StatsAggregator;
use dlp_proxy::terms::file::append_term;
use dlp_proxy::web::{self, AppState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            cmd_serve(&cli.config).await?;
        }
        Commands::Redact { file } => {
            cmd_redact(&cli.config, file.as_deref()).await?;
        }
        Commands::Stats { url } => {
            cmd_stats(&cli.config, url).await?;
        }
        Commands::AddTerm { term } => {
            cmd_add_term(&cli.config, &term)?;
        }
        Commands::Init => {
            cmd_init(&cli.config)?;
        }
    }

    Ok(())
}

async fn cmd_serve(config_path: &Path) -> anyhow::Result<()> {
    let config = AppConfig::load_or_default(config_path)?;
    println!("dlp-proxy starting...");
    println!("Config: {}", config_path.display());

    let metrics = DlpMetrics::new()?;
    let stats = Arc::new(StatsAggregator::from_config(&config.stats));
    let engine = Arc::new(RedactionEngine::new(
        &config.dlp,
        Arc::new(PatternClassifier::new()),
    ));
    engine.reload(&config.dlp).await?;
    println!("Static terms loaded: {}", engine.term_count());
    println!("Entity detection: {}", if config.dlp.ml_enabled { "on" } else { "off" });

    let addon = Arc::new(DlpAddon::new(
        engine.clone(),
        stats.clone(),
        metrics.clone(),
        &config.dlp,
    ));
    let proxy_state = Arc::new(ProxyState::new(addon)?);
    let proxy_listen = format!("{}:{}", config.proxy.host, config.proxy.port);
    let proxy_server =
        tokio::spawn(async move { proxy::start(&proxy_listen, proxy_state).await });
    println!("Proxy on http://{}:{}", config.proxy.host, config.proxy.port);

    let state = Arc::new(AppState {
        metrics,
        engine: engine.clone(),
        stats: stats.clone(),
    });
    let listen = format!("{}:{}", config.proxy.host, config.proxy.metrics_port);
    let health_path = config.dlp.health_path.clone();
    let server = tokio::spawn(async move { web::start(&listen, state, &health_path).await });
    println!(
        "Metrics on http://{}:{}/metrics",
        config.proxy.host, config.proxy.metrics_port
    );

    let _watcher = if config_path.exists() {
        match start_file_watcher(
            config_path.to_path_buf(),
            engine.clone(),
            tokio::runtime::Handle::current(),
        ) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Config watcher unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };
    start_sighup_handler(config_path.to_path_buf(), engine.clone());

    // Keep running until interrupted or either server dies
    let outcome = tokio::select! {
        res = tokio::signal::ctrl_c() => res.map_err(anyhow::Error::from),
        res = server => match res {
            Ok(inner) => inner.map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        },
        res = proxy_server => match res {
            Ok(inner) => inner.map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        },
    };

    println!("\nShutting down...");
    stats.flush();
    info!("Final stats flushed");
    outcome
}

async fn cmd_redact(config_path: &Path, file: Option<&Path>) -> anyhow::Result<()> {
    let config = AppConfig::load_or_default(config_path)?;
    let input = match file {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let engine = RedactionEngine::new(&config.dlp, Arc::new(PatternClassifier::new()));
    engine.reload(&config.dlp).await?;
    let result = tokio::task::spawn_blocking(move || engine.redact(&input)).await??;

    println!("{}", result.redacted_text);
    println!("{}", serde_json::to_string_pretty(&result.stats)?);
    Ok(())
}

async fn cmd_stats(config_path: &Path, url: Option<String>) -> anyhow::Result<()> {
    let url = match url {
        Some(url) => url,
        None => {
            let config = AppConfig::load_or_default(config_path)?;
            format!("http://127.0.0.1:{}/metrics", config.proxy.metrics_port)
        }
    };

    let body = match reqwest::get(&url).await {
        Ok(resp) => resp.error_for_status()?.text().await?,
        Err(e) => {
            println!("dlp-proxy Status: not reachable at {} ({})", url, e);
            println!("Run 'dlp-proxy serve' to start it.");
            return Ok(());
        }
    };
    let totals = metrics::summarize_exposition(&body);

    println!("dlp-proxy Status");
    println!("────────────────");
    println!("Total requests:     {}", totals.requests);
    println!("  Redacted:         {}", totals.redacted);
    println!("  Blocked:          {}", totals.blocked);
    println!("Active connections: {}", totals.active_connections);
    if !totals.pii_detected.is_empty() {
        println!("Entities detected:");
        for (entity, count) in &totals.pii_detected {
            println!("  {:<16} {}", entity, count);
        }
    }
    Ok(())
}

fn cmd_add_term(config_path: &Path, term: &str) -> anyhow::Result<()> {
    let config = AppConfig::load_or_default(config_path)?;
    let path = &config.dlp.static_terms_file;
    if append_term(path, term)? {
        println!("Added term to {}", path.display());
    } else {
        println!("Term already present in {} (nothing to do)", path.display());
    }
    Ok(())
}

fn cmd_init(config_path: &Path) -> anyhow::Result<()> {
    println!("Initializing dlp-proxy...");

    if !config_path.exists() {
        let default_config = include_str!("../templates/dlp-proxy.toml");
        std::fs::write(config_path, default_config)?;
        println!("  Created config: {}", config_path.display());
    } else {
        println!("  Config already exists: {}", config_path.display());
    }

    println!("\nDone! Next steps:");
    println!("  1. Add terms:        dlp-proxy add-term \"Project Falcon\"");
    println!("  2. Try the engine:   echo 'call 415-555-0199' | dlp-proxy redact");
    println!("  3. Start the engine: dlp-proxy serve");
    Ok(())
}
