// SPDX-License-Identifier: MIT
//! slotwatch binary — CLI wiring, config loading, and task startup.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use slotwatch::config::BotConfig;
use slotwatch::engine::PollingEngine;
use slotwatch::health::heartbeat;
use slotwatch::notify::{LogNotifier, Notifier, WebhookNotifier};
use slotwatch::portal::http::HttpPortal;
use slotwatch::solver::HttpOcrSolver;

#[derive(Parser)]
#[command(
    name = "slotwatch",
    about = "Appointment-slot polling daemon with session health and anti-ban scheduling",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to slotwatch.toml
    #[arg(long, env = "SLOTWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Portal calendar URL (overrides [portal].base_url)
    #[arg(long, env = "SLOTWATCH_BASE_URL")]
    base_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SLOTWATCH_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "SLOTWATCH_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Emit logs as JSON lines instead of human-readable text
    #[arg(long, env = "SLOTWATCH_LOG_JSON")]
    log_json: bool,

    /// Stop short of any booking-side action; discovery is still notified
    #[arg(long, env = "SLOTWATCH_DRY_RUN")]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the polling engine (default when no subcommand given).
    ///
    /// Examples:
    ///   slotwatch run
    ///   slotwatch --base-url "https://…/appointment_showMonth.do?locationCode=…"
    Run,
    /// Load and validate the configuration, then exit.
    ///
    /// Exit code 0 means the engine would start with these settings.
    CheckConfig,
}

fn init_tracing(
    level: Option<&str>,
    log_file: Option<&PathBuf>,
    json: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_env("SLOTWATCH_LOG")
        .or_else(|_| EnvFilter::try_new(level.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file = path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "slotwatch.log".to_string());
            let appender = tracing_appender::rolling::daily(dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false);
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
            Some(guard)
        }
        None => {
            let builder = tracing_subscriber::fmt().with_env_filter(filter);
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
            None
        }
    }
}

fn load_config(args: &Args) -> Result<BotConfig> {
    let mut config = match &args.config {
        Some(path) => BotConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            let default_path = PathBuf::from("slotwatch.toml");
            if default_path.exists() {
                BotConfig::load(&default_path).context("loading ./slotwatch.toml")?
            } else {
                BotConfig::default()
            }
        }
    };
    if let Some(url) = &args.base_url {
        config.portal.base_url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_tracing(args.log.as_deref(), args.log_file.as_ref(), args.log_json);

    let config = load_config(&args)?;

    match args.command.as_ref().unwrap_or(&Command::Run) {
        Command::CheckConfig => {
            println!("configuration ok");
            return Ok(());
        }
        Command::Run => {}
    }

    let (api_url, client_key) = match (&config.solver.api_url, &config.solver.client_key) {
        (Some(url), Some(key)) => (url.clone(), key.clone()),
        _ => bail!("[solver] api_url and client_key are required to run (see slotwatch.toml)"),
    };

    let config = Arc::new(config);
    let portal = Arc::new(HttpPortal::new(
        &config.portal.base_url,
        config.portal.timeout_secs,
    )?);
    let solver = Arc::new(HttpOcrSolver::new(
        api_url,
        client_key,
        config.solver.timeout_secs,
    )?);
    let notifier: Arc<dyn Notifier> = match &config.notify.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };

    info!(version = env!("CARGO_PKG_VERSION"), "slotwatch starting");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let hb_state = heartbeat::new_shared_heartbeat();
    let mut engine = PollingEngine::new(
        config.clone(),
        portal.clone(),
        solver,
        notifier,
        hb_state.clone(),
    );
    engine.set_dry_run(args.dry_run);

    let hb_task = tokio::spawn(heartbeat::run_heartbeat(
        portal,
        engine.gate(),
        hb_state,
        config.heartbeat.interval_secs,
        shutdown_rx.clone(),
    ));

    // Operator stop: flip the watch channel; the engine checks it at every
    // sleep boundary and before every gated action.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    engine.run(shutdown_rx).await;
    hb_task.abort();

    Ok(())
}
