//! Handlers for `/series` endpoints.
//!
//! | Method  | Path | Notes |
//! |---------|------|-------|
//! | `POST`  | `/series` | Body: [`SeriesDraft`]; returns 201 + stored series |
//! | `GET`   | `/series` | Optional `?state=active\|paused\|completed\|cancelled` |
//! | `GET`   | `/series/:id` | 404 if not found |
//! | `PATCH` | `/series/:id` | Body: [`SeriesEdit`] |
//! | `POST`  | `/series/:id/pause` | |
//! | `POST`  | `/series/:id/resume` | Tops the series up again |
//! | `POST`  | `/series/:id/cancel` | Body: [`ActorBody`]; idempotent |
//! | `POST`  | `/series/:id/materialize` | Returns the occurrences created |
//! | `GET`   | `/series/:id/occurrences` | In sequence order |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use cadence_core::{
  occurrence::{Actor, Occurrence},
  series::{Series, SeriesDraft, SeriesEdit, SeriesState},
  store::ScheduleStore,
};
use cadence_scheduler::{Collaborators, Scheduler};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

/// Who is acting, with an optional note. Defaults to the system actor.
#[derive(Debug, Default, Deserialize)]
pub struct ActorBody {
  pub actor: Option<Actor>,
  pub note:  Option<String>,
}

impl ActorBody {
  pub(crate) fn actor(&self) -> Actor { self.actor.clone().unwrap_or(Actor::System) }
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// `POST /series`
pub async fn create<S, C>(
  State(scheduler): State<Arc<Scheduler<S, C>>>,
  Json(draft): Json<SeriesDraft>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  let series = scheduler.create(draft).await?;
  Ok((StatusCode::CREATED, Json(series)))
}

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub state: Option<String>,
}

/// `GET /series[?state=<state>]`
pub async fn list<S, C>(
  State(scheduler): State<Arc<Scheduler<S, C>>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Series>>, ApiError>
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  let state = params
    .state
    .as_deref()
    .map(|s| SeriesState::parse(s).ok_or_else(|| ApiError::BadRequest(format!("unknown series state {s:?}"))))
    .transpose()?;
  Ok(Json(scheduler.list_series(state).await?))
}

// ─── Get one / edit ───────────────────────────────────────────────────────────

/// `GET /series/:id`
pub async fn get_one<S, C>(
  State(scheduler): State<Arc<Scheduler<S, C>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Series>, ApiError>
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  Ok(Json(scheduler.get_series(id).await?))
}

/// `PATCH /series/:id`
pub async fn edit<S, C>(
  State(scheduler): State<Arc<Scheduler<S, C>>>,
  Path(id): Path<Uuid>,
  Json(edit): Json<SeriesEdit>,
) -> Result<Json<Series>, ApiError>
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  Ok(Json(scheduler.edit(id, edit).await?))
}

// ─── Lifecycle ────────────────────────────────────────────────────────────────

/// `POST /series/:id/pause`
pub async fn pause<S, C>(
  State(scheduler): State<Arc<Scheduler<S, C>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Series>, ApiError>
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  Ok(Json(scheduler.pause(id).await?))
}

/// `POST /series/:id/resume`
pub async fn resume<S, C>(
  State(scheduler): State<Arc<Scheduler<S, C>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Series>, ApiError>
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  Ok(Json(scheduler.resume(id).await?))
}

/// `POST /series/:id/cancel`, body: `{"actor":{"kind":"customer","id":"..."}}`
/// (optional fields).
pub async fn cancel<S, C>(
  State(scheduler): State<Arc<Scheduler<S, C>>>,
  Path(id): Path<Uuid>,
  Json(body): Json<ActorBody>,
) -> Result<Json<Series>, ApiError>
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  Ok(Json(scheduler.cancel(id, body.actor()).await?))
}

/// `POST /series/:id/materialize`
pub async fn materialize<S, C>(
  State(scheduler): State<Arc<Scheduler<S, C>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<Occurrence>>, ApiError>
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  Ok(Json(scheduler.materialize(id).await?))
}

/// `GET /series/:id/occurrences`
pub async fn occurrences<S, C>(
  State(scheduler): State<Arc<Scheduler<S, C>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<Occurrence>>, ApiError>
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  Ok(Json(scheduler.occurrences(id).await?))
}
