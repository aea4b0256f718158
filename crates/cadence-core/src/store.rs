//! The `ScheduleStore` trait and the write set it commits.
//!
//! The trait is implemented by storage backends (e.g. `cadence-store-sqlite`).
//! The scheduler and the API depend on this abstraction, not on any concrete
//! backend.

use std::future::Future;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  collab::{Booking, ChargeTarget},
  occurrence::{Occurrence, Transition},
  payment::ChargeStatus,
  series::{ProgressDelta, Series, SeriesState},
};

// ─── Write set ───────────────────────────────────────────────────────────────

/// How the series row is written in a [`Changeset`].
#[derive(Debug, Clone)]
pub enum SeriesWrite {
  Insert(Series),
  /// Overwrite everything except the progress counters, provided the stored
  /// revision still equals `series.revision`.
  Update(Series),
}

/// Everything one lifecycle operation writes, applied in a single
/// transaction.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
  pub series:              Option<SeriesWrite>,
  /// Counter increments, applied atomically in the store.
  pub progress:            Option<ProgressDelta>,
  /// Inserted idempotently per `(series_id, sequence)`: a sequence that
  /// already exists is left alone, and so are its transitions.
  pub new_occurrences:     Vec<Occurrence>,
  /// Written only if each stored revision still matches.
  pub updated_occurrences: Vec<Occurrence>,
  /// Appended to the audit log.
  pub transitions:         Vec<Transition>,
}

impl Changeset {
  pub fn is_empty(&self) -> bool {
    self.series.is_none()
      && self.progress.is_none()
      && self.new_occurrences.is_empty()
      && self.updated_occurrences.is_empty()
      && self.transitions.is_empty()
  }

  /// Fold an occurrence-level change (and its counter increment) into the
  /// set.
  pub fn record(&mut self, occurrence: Occurrence, transitions: Vec<Transition>, delta: ProgressDelta) {
    self.updated_occurrences.push(occurrence);
    self.transitions.extend(transitions);
    let progress = self.progress.get_or_insert(ProgressDelta {
      series_id: delta.series_id,
      ..ProgressDelta::default()
    });
    progress.completed += delta.completed;
    progress.skipped += delta.skipped;
    progress.cancelled += delta.cancelled;
  }
}

/// A guarded row changed between read and write. Backends report this as
/// the source of their own error so callers can detect it without knowing
/// the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} was modified concurrently (expected revision {expected})")]
pub struct StaleWrite {
  pub entity:   &'static str,
  pub id:       Uuid,
  pub expected: u32,
}

impl StaleWrite {
  /// Whether `err` or anything in its source chain is a [`StaleWrite`].
  pub fn in_chain(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut cur = Some(err);
    while let Some(e) = cur {
      if e.is::<Self>() {
        return true;
      }
      cur = e.source();
    }
    false
  }
}

// ─── Payment outbox ──────────────────────────────────────────────────────────

/// A charge handed to the external settlement process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
  pub target:       ChargeTarget,
  pub amount_minor: i64,
  pub currency:     String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
  pub id:         i64,
  #[serde(flatten)]
  pub request:    ChargeRequest,
  pub status:     ChargeStatus,
  pub created_at: DateTime<Utc>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a schedule store backend.
///
/// Series and occurrences are never deleted, and the transition log is
/// append-only. Every write goes through [`ScheduleStore::commit`] so that
/// an operation either lands completely or not at all.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait ScheduleStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Apply `changes` atomically. Returns the number of new occurrences that
  /// were actually inserted.
  ///
  /// Fails with a stale-revision error if any guarded row changed since it
  /// was read; nothing is written in that case.
  fn commit(&self, changes: Changeset) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Queue a charge in the payment outbox and return its id.
  fn enqueue_charge(
    &self,
    request: ChargeRequest,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  fn get_series(&self, id: Uuid) -> impl Future<Output = Result<Option<Series>, Self::Error>> + Send + '_;

  /// All series, optionally restricted to one state, oldest first.
  fn list_series(
    &self,
    state: Option<SeriesState>,
  ) -> impl Future<Output = Result<Vec<Series>, Self::Error>> + Send + '_;

  fn get_occurrence(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Occurrence>, Self::Error>> + Send + '_;

  /// Occurrences of a series in sequence order.
  fn list_occurrences(
    &self,
    series_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Occurrence>, Self::Error>> + Send + '_;

  /// The audit log of an occurrence in transition order.
  fn transitions(
    &self,
    occurrence_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Transition>, Self::Error>> + Send + '_;

  /// Non-terminal occurrences attended by `staff_id` (directly or through a
  /// staff override) that start before `until` and end after `from`.
  fn staff_bookings<'a>(
    &'a self,
    staff_id: &'a str,
    from: NaiveDateTime,
    until: NaiveDateTime,
  ) -> impl Future<Output = Result<Vec<Booking>, Self::Error>> + Send + 'a;

  /// Scheduled occurrences of active series starting in `[from, until]`
  /// whose reminder has not been sent.
  fn due_reminders(
    &self,
    from: NaiveDateTime,
    until: NaiveDateTime,
  ) -> impl Future<Output = Result<Vec<Occurrence>, Self::Error>> + Send + '_;

  /// Outbox entries, optionally restricted to one status, oldest first.
  fn outbox(
    &self,
    status: Option<ChargeStatus>,
  ) -> impl Future<Output = Result<Vec<OutboxEntry>, Self::Error>> + Send + '_;
}
