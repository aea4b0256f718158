//! Error types for `cadence-core`.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("{0}")]
  Validation(#[from] ValidationError),

  #[error("cannot {action} {entity} {id} while it is {state}")]
  InvalidStateTransition {
    entity: &'static str,
    id:     Uuid,
    state:  String,
    action: &'static str,
  },

  #[error("slot at {at} is not available{}", booking_suffix(.booking_id))]
  SchedulingConflict {
    at:         NaiveDateTime,
    booking_id: Option<String>,
  },

  #[error("{what} exceeds the configured maximum of {limit}")]
  BoundExceeded { what: &'static str, limit: u32 },

  #[error("series not found: {0}")]
  SeriesNotFound(Uuid),

  #[error("occurrence not found: {0}")]
  OccurrenceNotFound(Uuid),

  #[error("unknown cadence strategy: {0:?}")]
  UnknownCadence(String),

  #[error("cadence {name:?} produced {date}, which is not after {previous}")]
  NonMonotonicCadence {
    name:     String,
    date:     NaiveDate,
    previous: NaiveDate,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

fn booking_suffix(booking_id: &Option<String>) -> String {
  match booking_id {
    Some(id) => format!(" (conflicts with booking {id})"),
    None => String::new(),
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// ─── Validation ──────────────────────────────────────────────────────────────

/// What is wrong with a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
  /// The field must be present for this configuration.
  Required,
  /// The field may not be present for this configuration.
  NotAllowed,
  /// The value is outside `[min, max]`.
  OutOfRange { min: i64, max: i64 },
  /// The value is not one of the recognised names.
  Unknown { value: String },
  /// The configuration would generate more occurrences than allowed.
  BoundExceeded { limit: u32 },
  /// The date must fall strictly after the series anchor.
  NotAfterAnchor,
  /// Free-form constraint that does not fit the other kinds.
  Invalid { reason: String },
}

impl fmt::Display for ViolationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Required => f.write_str("is required"),
      Self::NotAllowed => f.write_str("is not allowed here"),
      Self::OutOfRange { min, max } => write!(f, "must be within [{min}, {max}]"),
      Self::Unknown { value } => write!(f, "has unknown value {value:?}"),
      Self::BoundExceeded { limit } => write!(f, "exceeds the bound of {limit}"),
      Self::NotAfterAnchor => f.write_str("must be after the anchor date"),
      Self::Invalid { reason } => f.write_str(reason),
    }
  }
}

/// A single violated field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
  pub field: &'static str,
  #[serde(flatten)]
  pub kind:  ViolationKind,
}

impl Violation {
  pub fn new(field: &'static str, kind: ViolationKind) -> Self {
    Self { field, kind }
  }
}

/// Every violated field of a rejected input, in the order they were checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Error)]
pub struct ValidationError {
  pub violations: Vec<Violation>,
}

impl ValidationError {
  pub fn push(&mut self, field: &'static str, kind: ViolationKind) {
    self.violations.push(Violation::new(field, kind));
  }

  pub fn is_empty(&self) -> bool { self.violations.is_empty() }

  /// Whether any violation is a `BoundExceeded`.
  pub fn is_bound_exceeded(&self) -> bool {
    self
      .violations
      .iter()
      .any(|v| matches!(v.kind, ViolationKind::BoundExceeded { .. }))
  }

  /// Merge another set of violations into this one.
  pub fn extend(&mut self, other: ValidationError) {
    self.violations.extend(other.violations);
  }

  /// `Ok(value)` if nothing was violated.
  pub fn finish<T>(self, value: T) -> Result<T, ValidationError> {
    if self.is_empty() { Ok(value) } else { Err(self) }
  }
}

impl fmt::Display for ValidationError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("validation failed: ")?;
    for (i, v) in self.violations.iter().enumerate() {
      if i > 0 {
        f.write_str("; ")?;
      }
      write!(f, "{} {}", v.field, v.kind)?;
    }
    Ok(())
  }
}
