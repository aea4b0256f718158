//! Runtime configuration and HTTP wiring for the `cadence` binary.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use axum::{Router, routing::get};
use cadence_core::store::ScheduleStore;
use cadence_scheduler::{Collaborators, Scheduler, SchedulerConfig};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `cadence.toml` and
/// `CADENCE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  /// SQLite database file; a leading `~/` is expanded.
  pub store_path: PathBuf,
  pub scheduler:  SchedulerConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:       "127.0.0.1".to_string(),
      port:       8080,
      store_path: PathBuf::from("~/.local/share/cadence/cadence.db"),
      scheduler:  SchedulerConfig::default(),
    }
  }
}

impl ServerConfig {
  /// Read `path` (if it exists), then overlay the environment.
  ///
  /// Nested keys use a double underscore:
  /// `CADENCE_SCHEDULER__BATCH_SIZE=16`.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("CADENCE")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()?
      .try_deserialize()
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// The full application: `/health` plus the JSON API under `/api`, with
/// request tracing.
pub fn app<S, C>(scheduler: Arc<Scheduler<S, C>>) -> Router
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  Router::new()
    .route("/health", get(|| async { "ok" }))
    .nest("/api", cadence_api::api_router(scheduler))
    .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
  use super::*;

  use axum::{
    body::Body,
    http::{Request, StatusCode},
  };
  use cadence_scheduler::{
    Wiring, availability::LocalCalendar, notify::ChannelNotifier, outbox::OutboxPayments,
  };
  use cadence_store_sqlite::SqliteStore;
  use tower::ServiceExt as _;

  #[test]
  fn file_overrides_defaults() {
    let toml = r#"
      port = 9090
      store_path = "/var/lib/cadence/cadence.db"

      [scheduler]
      batch_size = 16
      horizon_days = 30
    "#;
    let cfg: ServerConfig = config::Config::builder()
      .add_source(config::File::from_str(toml, config::FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap();

    assert_eq!(cfg.host, "127.0.0.1");
    assert_eq!(cfg.address(), "127.0.0.1:9090");
    assert_eq!(cfg.store_path, PathBuf::from("/var/lib/cadence/cadence.db"));
    assert_eq!(cfg.scheduler.batch_size, 16);
    assert_eq!(cfg.scheduler.horizon_days, 30);
    assert_eq!(cfg.scheduler.low_water_mark, SchedulerConfig::default().low_water_mark);
  }

  #[test]
  fn missing_file_gives_defaults() {
    let cfg = ServerConfig::load(Path::new("/nonexistent/cadence.toml")).unwrap();
    assert_eq!(cfg.scheduler, SchedulerConfig::default());
  }

  #[test]
  fn tilde_expands_to_home() {
    let Ok(home) = std::env::var("HOME") else {
      return;
    };
    assert_eq!(expand_tilde(Path::new("~/db.sqlite")), PathBuf::from(home).join("db.sqlite"));
    assert_eq!(expand_tilde(Path::new("/tmp/db.sqlite")), PathBuf::from("/tmp/db.sqlite"));
  }

  #[tokio::test]
  async fn serves_health_and_api() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let (notifier, _rx) = ChannelNotifier::new();
    let wiring = Wiring {
      gate: LocalCalendar::new(store.clone()),
      payments: OutboxPayments::new(store.clone()),
      notifier,
    };
    let scheduler = Arc::new(Scheduler::new(store, wiring, SchedulerConfig::default()));

    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app(scheduler.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let req = Request::builder().uri("/api/series").body(Body::empty()).unwrap();
    let resp = app(scheduler).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"[]");
  }
}
