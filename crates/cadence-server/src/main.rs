//! cadence server binary.
//!
//! Reads `cadence.toml` (or the path specified with `--config`), opens the
//! SQLite store, starts the horizon job, and serves the JSON API over HTTP
//! until Ctrl-C.
//!
//! # One-off horizon run
//!
//! To materialize, collect installments, and send reminders once without
//! serving:
//!
//! ```sh
//! cargo run -p cadence-server --bin cadence -- --once
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use cadence_scheduler::{
  Horizon, Scheduler, Wiring, availability::LocalCalendar, notify::ChannelNotifier,
  outbox::OutboxPayments,
};
use cadence_server::{ServerConfig, expand_tilde};
use cadence_store_sqlite::SqliteStore;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Cadence recurring-appointment scheduler")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "cadence.toml")]
  config: PathBuf,

  /// Run a single horizon tick and exit.
  #[arg(long)]
  once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let server_cfg = ServerConfig::load(&cli.config)
    .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;

  let store_path = expand_tilde(&server_cfg.store_path);
  if let Some(dir) = store_path.parent().filter(|d| !d.as_os_str().is_empty()) {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {dir:?}"))?;
  }
  let store = Arc::new(
    SqliteStore::open(&store_path)
      .await
      .with_context(|| format!("failed to open store at {store_path:?}"))?,
  );

  let (notifier, log_task) = ChannelNotifier::logging();
  let wiring = Wiring {
    gate: LocalCalendar::new(store.clone()),
    payments: OutboxPayments::new(store.clone()),
    notifier,
  };
  let scheduler = Arc::new(Scheduler::new(store, wiring, server_cfg.scheduler.clone()));
  let horizon = Arc::new(Horizon::new(scheduler.clone()));

  if cli.once {
    let report = horizon.tick().await;
    info!(?report, "horizon tick complete");
    return Ok(());
  }

  let job = horizon.spawn();
  let app = cadence_server::app(scheduler);
  let address = server_cfg.address();

  info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  job.shutdown().await;
  // The log task ends once every notifier handle is gone.
  if let Err(e) = log_task.await {
    warn!(error = %e, "notification log task failed");
  }
  info!("shut down");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "failed to listen for Ctrl-C");
    std::future::pending::<()>().await;
  }
  info!("shutdown requested");
}
