//! Error type for `cadence-store-sqlite`.

use cadence_core::store::StaleWrite;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A column held a value no domain type maps to.
  #[error("unknown {column} value: {value:?}")]
  Decode { column: &'static str, value: String },

  #[error("stale write: {0}")]
  Stale(#[source] StaleWrite),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
