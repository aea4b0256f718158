//! Handlers for `/occurrences` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/occurrences/:id` | 404 if not found |
//! | `GET`  | `/occurrences/:id/transitions` | Audit log, oldest first |
//! | `POST` | `/occurrences/:id/complete` | Body: [`CompleteBody`] |
//! | `POST` | `/occurrences/:id/skip` | Body: [`ActorBody`] |
//! | `POST` | `/occurrences/:id/cancel` | Body: [`ActorBody`] |
//! | `POST` | `/occurrences/:id/reschedule` | Body: [`RescheduleBody`] |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use cadence_core::{
  occurrence::{Actor, Occurrence, Transition},
  store::ScheduleStore,
};
use cadence_scheduler::{Collaborators, Scheduler};
use chrono::NaiveDateTime;
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::ApiError, series::ActorBody};

// ─── Reads ────────────────────────────────────────────────────────────────────

/// `GET /occurrences/:id`
pub async fn get_one<S, C>(
  State(scheduler): State<Arc<Scheduler<S, C>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Occurrence>, ApiError>
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  Ok(Json(scheduler.get_occurrence(id).await?))
}

/// `GET /occurrences/:id/transitions`
pub async fn transitions<S, C>(
  State(scheduler): State<Arc<Scheduler<S, C>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<Transition>>, ApiError>
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  Ok(Json(scheduler.transitions(id).await?))
}

// ─── Transitions ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CompleteBody {
  pub actor:     Option<Actor>,
  /// When the appointment actually took place; defaults to the scheduled
  /// time.
  pub actual_at: Option<NaiveDateTime>,
  pub note:      Option<String>,
}

/// `POST /occurrences/:id/complete`
pub async fn complete<S, C>(
  State(scheduler): State<Arc<Scheduler<S, C>>>,
  Path(id): Path<Uuid>,
  Json(body): Json<CompleteBody>,
) -> Result<Json<Occurrence>, ApiError>
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  let actor = body.actor.unwrap_or(Actor::System);
  Ok(Json(scheduler.complete_occurrence(id, actor, body.actual_at, body.note).await?))
}

/// `POST /occurrences/:id/skip`
pub async fn skip<S, C>(
  State(scheduler): State<Arc<Scheduler<S, C>>>,
  Path(id): Path<Uuid>,
  Json(body): Json<ActorBody>,
) -> Result<Json<Occurrence>, ApiError>
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  let actor = body.actor();
  Ok(Json(scheduler.skip_occurrence(id, actor, body.note).await?))
}

/// `POST /occurrences/:id/cancel`
pub async fn cancel<S, C>(
  State(scheduler): State<Arc<Scheduler<S, C>>>,
  Path(id): Path<Uuid>,
  Json(body): Json<ActorBody>,
) -> Result<Json<Occurrence>, ApiError>
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  let actor = body.actor();
  Ok(Json(scheduler.cancel_occurrence(id, actor, body.note).await?))
}

#[derive(Debug, Deserialize)]
pub struct RescheduleBody {
  pub scheduled_at:   NaiveDateTime,
  /// Moves the appointment to another staff member.
  pub staff_override: Option<String>,
  pub actor:          Option<Actor>,
}

/// `POST /occurrences/:id/reschedule`
pub async fn reschedule<S, C>(
  State(scheduler): State<Arc<Scheduler<S, C>>>,
  Path(id): Path<Uuid>,
  Json(body): Json<RescheduleBody>,
) -> Result<Json<Occurrence>, ApiError>
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  let actor = body.actor.unwrap_or(Actor::System);
  let occ = scheduler
    .reschedule_occurrence(id, body.scheduled_at, body.staff_override, actor)
    .await?;
  Ok(Json(occ))
}
