//! JSON REST API for Cadence.
//!
//! Exposes an axum [`Router`] over a shared [`Scheduler`]. Auth, TLS, and
//! transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", cadence_api::api_router(scheduler.clone()))
//! ```

pub mod error;
pub mod occurrences;
pub mod series;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use cadence_core::store::ScheduleStore;
use cadence_scheduler::{Collaborators, Scheduler};

pub use error::ApiError;

/// Build a fully-materialised API router for `scheduler`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, C>(scheduler: Arc<Scheduler<S, C>>) -> Router<()>
where
  S: ScheduleStore + 'static,
  C: Collaborators,
{
  Router::new()
    // Series
    .route("/series", get(series::list::<S, C>).post(series::create::<S, C>))
    .route("/series/{id}", get(series::get_one::<S, C>).patch(series::edit::<S, C>))
    .route("/series/{id}/pause", post(series::pause::<S, C>))
    .route("/series/{id}/resume", post(series::resume::<S, C>))
    .route("/series/{id}/cancel", post(series::cancel::<S, C>))
    .route("/series/{id}/materialize", post(series::materialize::<S, C>))
    .route("/series/{id}/occurrences", get(series::occurrences::<S, C>))
    // Occurrences
    .route("/occurrences/{id}", get(occurrences::get_one::<S, C>))
    .route("/occurrences/{id}/transitions", get(occurrences::transitions::<S, C>))
    .route("/occurrences/{id}/complete", post(occurrences::complete::<S, C>))
    .route("/occurrences/{id}/skip", post(occurrences::skip::<S, C>))
    .route("/occurrences/{id}/cancel", post(occurrences::cancel::<S, C>))
    .route("/occurrences/{id}/reschedule", post(occurrences::reschedule::<S, C>))
    .with_state(scheduler)
}

#[cfg(test)]
mod tests {
  use super::*;

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
  };
  use cadence_scheduler::{
    SchedulerConfig, Wiring, availability::LocalCalendar, notify::ChannelNotifier,
    outbox::OutboxPayments,
  };
  use cadence_store_sqlite::SqliteStore;
  use serde_json::{Value, json};
  use tower::ServiceExt as _;

  type TestScheduler =
    Scheduler<SqliteStore, Wiring<LocalCalendar<SqliteStore>, OutboxPayments<SqliteStore>, ChannelNotifier>>;

  async fn make_scheduler() -> Arc<TestScheduler> {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let (notifier, _rx) = ChannelNotifier::new();
    let wiring = Wiring {
      gate: LocalCalendar::new(store.clone()),
      payments: OutboxPayments::new(store.clone()),
      notifier,
    };
    Arc::new(Scheduler::new(store, wiring, SchedulerConfig::default()))
  }

  async fn send(
    scheduler: &Arc<TestScheduler>,
    method: &str,
    uri: &str,
    body: Option<Value>,
  ) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
      Some(b) => builder
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(b.to_string())),
      None => builder.body(Body::empty()),
    }
    .unwrap();
    let resp: Response = api_router(scheduler.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
  }

  fn haircut_draft() -> Value {
    json!({
      "customer_id": "cust_001",
      "staff_id": "staff_sarah",
      "service_id": "service_haircut",
      "starts_at": "2025-01-15T10:00:00",
      "timezone": "Africa/Johannesburg",
      "duration_minutes": 60,
      "total_minor": 15000,
      "currency": "ZAR",
      "payment_model": { "model": "full_upfront" },
      "pattern": {
        "frequency": "monthly",
        "day_of_month": 15,
        "end_type": "after_occurrences",
        "end_after_occurrences": 3
      }
    })
  }

  async fn create_series(scheduler: &Arc<TestScheduler>) -> String {
    let (status, body) = send(scheduler, "POST", "/series", Some(haircut_draft())).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["series_id"].as_str().unwrap().to_owned()
  }

  // ── Series ──────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn create_then_list_occurrences() {
    let scheduler = make_scheduler().await;
    let id = create_series(&scheduler).await;

    let (status, body) = send(&scheduler, "GET", &format!("/series/{id}/occurrences"), None).await;
    assert_eq!(status, StatusCode::OK);
    let dates: Vec<_> = body
      .as_array()
      .unwrap()
      .iter()
      .map(|o| o["scheduled_at"].as_str().unwrap().to_owned())
      .collect();
    assert_eq!(dates, vec!["2025-01-15T10:00:00", "2025-02-15T10:00:00", "2025-03-15T10:00:00"]);

    let (status, body) = send(&scheduler, "GET", "/series?state=active", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn invalid_draft_lists_every_violation() {
    let scheduler = make_scheduler().await;
    let mut draft = haircut_draft();
    draft["pattern"]["day_of_month"] = json!(0);
    draft["duration_minutes"] = json!(0);

    let (status, body) = send(&scheduler, "POST", "/series", Some(draft)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let fields: Vec<_> = body["violations"]
      .as_array()
      .unwrap()
      .iter()
      .map(|v| v["field"].as_str().unwrap())
      .collect();
    assert!(fields.contains(&"duration_minutes"), "{fields:?}");
    assert!(fields.contains(&"day_of_month"), "{fields:?}");
  }

  #[tokio::test]
  async fn double_booking_is_a_conflict() {
    let scheduler = make_scheduler().await;
    create_series(&scheduler).await;

    let (status, body) = send(&scheduler, "POST", "/series", Some(haircut_draft())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["at"], "2025-01-15T10:00:00");
    assert!(body["booking_id"].is_string());
  }

  #[tokio::test]
  async fn pause_after_cancel_is_a_conflict() {
    let scheduler = make_scheduler().await;
    let id = create_series(&scheduler).await;

    let cancel = json!({ "actor": { "kind": "customer", "id": "cust_001" } });
    let (status, body) = send(&scheduler, "POST", &format!("/series/{id}/cancel"), Some(cancel)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "cancelled");

    let (status, _) = send(&scheduler, "POST", &format!("/series/{id}/cancel"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&scheduler, "POST", &format!("/series/{id}/pause"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["action"], "pause");
    assert_eq!(body["state"], "cancelled");
  }

  #[tokio::test]
  async fn edit_updates_series() {
    let scheduler = make_scheduler().await;
    let id = create_series(&scheduler).await;

    let edit = json!({ "notes": "prefers the window seat", "tags": ["vip"] });
    let (status, body) = send(&scheduler, "PATCH", &format!("/series/{id}"), Some(edit)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tags"], json!(["vip"]));

    let (_, body) = send(&scheduler, "GET", &format!("/series/{id}"), None).await;
    assert_eq!(body["notes"], "prefers the window seat");
  }

  #[tokio::test]
  async fn missing_series_is_404() {
    let scheduler = make_scheduler().await;
    let id = uuid::Uuid::new_v4();
    let (status, body) = send(&scheduler, "GET", &format!("/series/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains(&id.to_string()));
  }

  #[tokio::test]
  async fn unknown_state_filter_is_400() {
    let scheduler = make_scheduler().await;
    let (status, _) = send(&scheduler, "GET", "/series?state=sleeping", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  // ── Occurrences ─────────────────────────────────────────────────────────────

  async fn first_occurrence(scheduler: &Arc<TestScheduler>, series_id: &str) -> String {
    let (_, body) = send(scheduler, "GET", &format!("/series/{series_id}/occurrences"), None).await;
    body[0]["occurrence_id"].as_str().unwrap().to_owned()
  }

  #[tokio::test]
  async fn complete_records_the_transition() {
    let scheduler = make_scheduler().await;
    let series_id = create_series(&scheduler).await;
    let occ = first_occurrence(&scheduler, &series_id).await;

    let body = json!({ "actor": { "kind": "staff", "id": "staff_sarah" }, "note": "all good" });
    let (status, body) = send(&scheduler, "POST", &format!("/occurrences/{occ}/complete"), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "completed");
    assert_eq!(body["actual_at"], "2025-01-15T10:00:00");

    let (status, log) = send(&scheduler, "GET", &format!("/occurrences/{occ}/transitions"), None).await;
    assert_eq!(status, StatusCode::OK);
    let last = log.as_array().unwrap().last().unwrap().clone();
    assert_eq!(last["to"], "completed");
    assert_eq!(last["note"], "all good");
    assert_eq!(last["actor"], json!({ "kind": "staff", "id": "staff_sarah" }));

    let (_, series) = send(&scheduler, "GET", &format!("/series/{series_id}"), None).await;
    assert_eq!(series["progress"]["completed"], 1);
  }

  #[tokio::test]
  async fn reschedule_cap_is_422() {
    let scheduler = make_scheduler().await;
    let series_id = create_series(&scheduler).await;
    let occ = first_occurrence(&scheduler, &series_id).await;
    let uri = format!("/occurrences/{occ}/reschedule");

    for hour in 11..=13 {
      let body = json!({ "scheduled_at": format!("2025-01-16T{hour}:00:00") });
      let (status, _) = send(&scheduler, "POST", &uri, Some(body)).await;
      assert_eq!(status, StatusCode::OK);
    }
    let body = json!({ "scheduled_at": "2025-01-16T14:00:00" });
    let (status, body) = send(&scheduler, "POST", &uri, Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["limit"], 3);
  }

  #[tokio::test]
  async fn reschedule_out_of_order_is_422() {
    let scheduler = make_scheduler().await;
    let series_id = create_series(&scheduler).await;
    let occ = first_occurrence(&scheduler, &series_id).await;

    let body = json!({ "scheduled_at": "2025-02-20T10:00:00" });
    let (status, body) = send(&scheduler, "POST", &format!("/occurrences/{occ}/reschedule"), Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["violations"][0]["field"], "scheduled_at");
  }

  #[tokio::test]
  async fn skip_twice_is_harmless() {
    let scheduler = make_scheduler().await;
    let series_id = create_series(&scheduler).await;
    let occ = first_occurrence(&scheduler, &series_id).await;
    let uri = format!("/occurrences/{occ}/skip");

    let (status, _) = send(&scheduler, "POST", &uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&scheduler, "POST", &uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "skipped");

    let (status, _) = send(&scheduler, "POST", &format!("/occurrences/{occ}/complete"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
  }
}
