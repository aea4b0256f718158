//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use cadence_scheduler::Error as SchedulerError;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error(transparent)]
  Scheduler(#[from] SchedulerError),

  #[error("bad request: {0}")]
  BadRequest(String),
}

impl ApiError {
  fn status(&self) -> StatusCode {
    use cadence_core::Error as Core;

    let ApiError::Scheduler(e) = self else {
      return StatusCode::BAD_REQUEST;
    };
    match e {
      SchedulerError::Core(Core::Validation(_) | Core::BoundExceeded { .. }) => {
        StatusCode::UNPROCESSABLE_ENTITY
      }
      SchedulerError::Core(Core::InvalidStateTransition { .. } | Core::SchedulingConflict { .. }) => {
        StatusCode::CONFLICT
      }
      SchedulerError::Core(Core::SeriesNotFound(_) | Core::OccurrenceNotFound(_)) => {
        StatusCode::NOT_FOUND
      }
      e if e.is_stale() => StatusCode::CONFLICT,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  /// Structured fields added next to `"error"`.
  fn details(&self) -> Option<Value> {
    use cadence_core::Error as Core;

    let ApiError::Scheduler(SchedulerError::Core(e)) = self else {
      return None;
    };
    match e {
      Core::Validation(v) => Some(json!({ "violations": v.violations })),
      Core::BoundExceeded { what, limit } => Some(json!({ "what": what, "limit": limit })),
      Core::SchedulingConflict { at, booking_id } => {
        Some(json!({ "at": at, "booking_id": booking_id }))
      }
      Core::InvalidStateTransition { entity, id, state, action } => Some(json!({
        "entity": entity,
        "id": id,
        "state": state,
        "action": action,
      })),
      _ => None,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!(error = %self, "request failed");
    }

    let mut body = json!({ "error": self.to_string() });
    if let (Some(Value::Object(details)), Some(map)) = (self.details(), body.as_object_mut()) {
      map.extend(details);
    }
    (status, Json(body)).into_response()
  }
}
