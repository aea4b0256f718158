//! Error type for `cadence-scheduler`.

use cadence_core::store::StaleWrite;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] cadence_core::Error),

  #[error("store error: {0}")]
  Store(#[source] BoxError),

  #[error("availability gate error: {0}")]
  Gate(#[source] BoxError),
}

impl Error {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }

  pub fn gate(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Gate(Box::new(e))
  }

  /// A concurrent writer got there first; the operation may be retried.
  pub fn is_stale(&self) -> bool {
    match self {
      Self::Store(e) => StaleWrite::in_chain(e.as_ref()),
      _ => false,
    }
  }
}

impl From<cadence_core::ValidationError> for Error {
  fn from(e: cadence_core::ValidationError) -> Self { Self::Core(e.into()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
