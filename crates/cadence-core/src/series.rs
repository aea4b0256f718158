//! A series is one recurring-appointment definition and its progress.
//!
//! A series is never deleted. Cancellation and completion are terminal
//! states, and every counter only ever grows.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  error::{ValidationError, ViolationKind},
  generator::{self, Cadences},
  pattern::{PatternDraft, RecurrencePattern},
  payment::{self, PaymentModel, PaymentPlan, PaymentTerms},
};

/// Longest appointment accepted, in minutes.
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesState {
  Active,
  Paused,
  Completed,
  Cancelled,
}

impl SeriesState {
  pub fn is_terminal(self) -> bool { matches!(self, Self::Completed | Self::Cancelled) }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Active => "active",
      Self::Paused => "paused",
      Self::Completed => "completed",
      Self::Cancelled => "cancelled",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "active" => Some(Self::Active),
      "paused" => Some(Self::Paused),
      "completed" => Some(Self::Completed),
      "cancelled" => Some(Self::Cancelled),
      _ => None,
    }
  }
}

// ─── Progress ────────────────────────────────────────────────────────────────

/// Occurrence counters. Maintained by atomic increments in the store, never
/// by read-modify-write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
  pub completed: u32,
  pub skipped:   u32,
  /// Occurrences cancelled individually; they leave the plan. Occurrences
  /// swept up by a series cancellation are not counted.
  pub cancelled: u32,
  /// Total the pattern yields; `None` for open-ended patterns.
  pub planned:   Option<u32>,
}

impl Progress {
  /// Planned occurrences still expected to happen or be skipped.
  pub fn total_planned(&self) -> Option<u32> {
    self.planned.map(|p| p.saturating_sub(self.cancelled))
  }

  /// Occurrences in a terminal state.
  pub fn settled(&self) -> u32 { self.completed + self.skipped + self.cancelled }

  /// Mirror an increment the store has applied.
  pub fn apply(&mut self, delta: &ProgressDelta) {
    self.completed += delta.completed;
    self.skipped += delta.skipped;
    self.cancelled += delta.cancelled;
  }
}

/// A counter increment applied atomically alongside an occurrence change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressDelta {
  pub series_id: Uuid,
  pub completed: u32,
  pub skipped:   u32,
  pub cancelled: u32,
}

// ─── Series ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
  pub series_id:             Uuid,
  pub customer_id:           String,
  pub staff_id:              String,
  pub service_id:            String,
  /// Anchor: first possible occurrence date and the time every occurrence
  /// starts at, as local wall-clock time in `timezone`.
  pub starts_at:             NaiveDateTime,
  /// IANA zone name; carried for the booking application, not interpreted.
  pub timezone:              String,
  pub duration_minutes:      u32,
  pub deposit_minor:         i64,
  pub payment:               PaymentPlan,
  pub pattern:               RecurrencePattern,
  pub state:                 SeriesState,
  pub progress:              Progress,
  /// Highest sequence number persisted so far (0 before the first batch).
  pub last_materialized_seq: u32,
  /// The generator has nothing left to produce.
  pub exhausted:             bool,
  /// Earliest non-terminal occurrence; derived and cached.
  pub next_occurrence_at:    Option<NaiveDateTime>,
  pub notes:                 Option<String>,
  pub tags:                  Vec<String>,
  /// Optimistic-concurrency token, bumped by the store on every write.
  pub revision:              u32,
  pub created_at:            DateTime<Utc>,
  pub updated_at:            DateTime<Utc>,
}

impl Series {
  pub fn anchor_date(&self) -> NaiveDate { self.starts_at.date() }

  pub fn start_time(&self) -> NaiveTime { self.starts_at.time() }

  /// Materialized occurrences that are not yet terminal.
  pub fn outstanding(&self) -> u32 {
    self.last_materialized_seq.saturating_sub(self.progress.settled())
  }

  /// Nothing left to generate and every materialized occurrence is terminal.
  pub fn is_finished(&self) -> bool { self.exhausted && self.outstanding() == 0 }

  fn illegal(&self, action: &'static str) -> Error {
    Error::InvalidStateTransition {
      entity: "series",
      id: self.series_id,
      state: self.state.as_str().to_owned(),
      action,
    }
  }

  /// `active → paused`.
  pub fn pause(&mut self, now: DateTime<Utc>) -> Result<()> {
    if self.state != SeriesState::Active {
      return Err(self.illegal("pause"));
    }
    self.state = SeriesState::Paused;
    self.updated_at = now;
    Ok(())
  }

  /// `paused → active`.
  pub fn resume(&mut self, now: DateTime<Utc>) -> Result<()> {
    if self.state != SeriesState::Paused {
      return Err(self.illegal("resume"));
    }
    self.state = SeriesState::Active;
    self.updated_at = now;
    Ok(())
  }

  /// `active | paused → cancelled`. Returns `false` if it was already
  /// cancelled.
  pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<bool> {
    match self.state {
      SeriesState::Cancelled => Ok(false),
      SeriesState::Completed => Err(self.illegal("cancel")),
      SeriesState::Active | SeriesState::Paused => {
        self.state = SeriesState::Cancelled;
        self.updated_at = now;
        Ok(true)
      }
    }
  }

  /// `active | paused → completed`, once [`Series::is_finished`]. Returns
  /// `false` if it was already completed or is not finished yet.
  pub fn complete(&mut self, now: DateTime<Utc>) -> Result<bool> {
    match self.state {
      SeriesState::Completed => Ok(false),
      SeriesState::Cancelled => Err(self.illegal("complete")),
      SeriesState::Active | SeriesState::Paused if self.is_finished() => {
        self.state = SeriesState::Completed;
        self.next_occurrence_at = None;
        self.updated_at = now;
        Ok(true)
      }
      SeriesState::Active | SeriesState::Paused => Ok(false),
    }
  }

  /// Apply a [`SeriesEdit`]; allowed while active or paused.
  pub fn edit(&mut self, edit: SeriesEdit, now: DateTime<Utc>) -> Result<()> {
    if self.state.is_terminal() {
      return Err(self.illegal("edit"));
    }
    edit.validate()?;
    if let Some(staff_id) = edit.staff_id {
      self.staff_id = staff_id;
    }
    if let Some(minutes) = edit.duration_minutes {
      self.duration_minutes = minutes;
    }
    if let Some(notes) = edit.notes {
      self.notes = (!notes.is_empty()).then_some(notes);
    }
    if let Some(tags) = edit.tags {
      self.tags = tags;
    }
    self.updated_at = now;
    Ok(())
  }
}

// ─── Draft ───────────────────────────────────────────────────────────────────

/// Everything the customer confirms when booking a series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesDraft {
  pub customer_id:      String,
  pub staff_id:         String,
  pub service_id:       String,
  pub starts_at:        NaiveDateTime,
  pub timezone:         String,
  pub duration_minutes: u32,
  pub total_minor:      i64,
  #[serde(default)]
  pub deposit_minor:    i64,
  pub currency:         String,
  pub payment_model:    PaymentModel,
  pub pattern:          PatternDraft,
  #[serde(default)]
  pub notes:            Option<String>,
  #[serde(default)]
  pub tags:             Vec<String>,
}

/// A draft that passed validation, with its derived plan.
#[derive(Debug, Clone)]
pub struct ValidatedDraft {
  pub pattern: RecurrencePattern,
  pub planned: Option<u32>,
  pub terms:   PaymentTerms,
}

impl SeriesDraft {
  /// Validate every field of the draft, pattern and payment terms together.
  pub fn validate(&self, cap: u32, cadences: &Cadences) -> Result<ValidatedDraft, ValidationError> {
    let mut errors = ValidationError::default();

    for (field, value) in [
      ("customer_id", &self.customer_id),
      ("staff_id", &self.staff_id),
      ("service_id", &self.service_id),
      ("timezone", &self.timezone),
    ] {
      if value.trim().is_empty() {
        errors.push(field, ViolationKind::Required);
      }
    }
    if !(1..=MAX_DURATION_MINUTES).contains(&self.duration_minutes) {
      errors.push("duration_minutes", ViolationKind::OutOfRange {
        min: 1,
        max: i64::from(MAX_DURATION_MINUTES),
      });
    }

    let anchor = self.starts_at.date();
    let pattern = self
      .pattern
      .validate(anchor, cap, cadences)
      .map_err(|e| errors.extend(e))
      .ok();

    let terms = PaymentTerms {
      model:         self.payment_model,
      total_minor:   self.total_minor,
      deposit_minor: self.deposit_minor,
      currency:      self.currency.clone(),
    };
    let bounded = match &pattern {
      Some(p) => p.is_bounded(),
      None => self.pattern.end_type != "never",
    };
    if let Err(e) = terms.validate(bounded, cap) {
      errors.extend(e);
    }

    let Some(pattern) = pattern else {
      return Err(errors);
    };
    let planned = match generator::planned_count(&pattern, anchor, cap, cadences) {
      Ok(planned) => planned,
      Err(_) => {
        errors.push("pattern", ViolationKind::BoundExceeded { limit: cap });
        None
      }
    };
    if planned == Some(0) {
      errors.push("pattern", ViolationKind::Invalid {
        reason: "yields no occurrences before the end date".into(),
      });
    }

    errors.finish(ValidatedDraft { pattern, planned, terms })
  }

  /// Build the `active` series for a validated draft.
  pub fn into_series(self, validated: ValidatedDraft, now: DateTime<Utc>) -> Series {
    let payment = payment::compute_plan(&validated.terms, validated.planned, self.starts_at.date());
    Series {
      series_id: Uuid::new_v4(),
      customer_id: self.customer_id,
      staff_id: self.staff_id,
      service_id: self.service_id,
      starts_at: self.starts_at,
      timezone: self.timezone,
      duration_minutes: self.duration_minutes,
      deposit_minor: self.deposit_minor,
      payment,
      pattern: validated.pattern,
      state: SeriesState::Active,
      progress: Progress { planned: validated.planned, ..Progress::default() },
      last_materialized_seq: 0,
      exhausted: false,
      next_occurrence_at: None,
      notes: self.notes.filter(|n| !n.is_empty()),
      tags: self.tags,
      revision: 0,
      created_at: now,
      updated_at: now,
    }
  }
}

// ─── Edit ────────────────────────────────────────────────────────────────────

/// Changes to a live series. They affect occurrences materialized from now
/// on; existing occurrences keep their slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesEdit {
  pub staff_id:         Option<String>,
  pub duration_minutes: Option<u32>,
  /// An empty string clears the notes.
  pub notes:            Option<String>,
  pub tags:             Option<Vec<String>>,
}

impl SeriesEdit {
  fn validate(&self) -> Result<(), ValidationError> {
    let mut errors = ValidationError::default();
    if self.staff_id.as_deref().is_some_and(|s| s.trim().is_empty()) {
      errors.push("staff_id", ViolationKind::Required);
    }
    if self
      .duration_minutes
      .is_some_and(|m| !(1..=MAX_DURATION_MINUTES).contains(&m))
    {
      errors.push("duration_minutes", ViolationKind::OutOfRange {
        min: 1,
        max: i64::from(MAX_DURATION_MINUTES),
      });
    }
    errors.finish(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn draft() -> SeriesDraft {
    SeriesDraft {
      customer_id:      "cust_001".into(),
      staff_id:         "staff_sarah".into(),
      service_id:       "service_haircut".into(),
      starts_at:        NaiveDate::from_ymd_opt(2025, 1, 15)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap(),
      timezone:         "Africa/Johannesburg".into(),
      duration_minutes: 60,
      total_minor:      15_000,
      deposit_minor:    0,
      currency:         "ZAR".into(),
      payment_model:    PaymentModel::FullUpfront,
      pattern:          PatternDraft {
        frequency: "monthly".into(),
        day_of_month: Some(15),
        end_type: "after_occurrences".into(),
        end_after_occurrences: Some(3),
        ..Default::default()
      },
      notes:            None,
      tags:             vec!["haircut".into()],
    }
  }

  fn series() -> Series {
    let d = draft();
    let v = d.validate(10_000, &Cadences::default()).unwrap();
    d.into_series(v, Utc::now())
  }

  #[test]
  fn draft_becomes_active_series() {
    let s = series();
    assert_eq!(s.state, SeriesState::Active);
    assert_eq!(s.progress.planned, Some(3));
    assert_eq!(s.payment.upfront.as_ref().unwrap().amount_minor, 15_000);
    assert_eq!(s.anchor_date(), NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
  }

  #[test]
  fn draft_violations_span_pattern_and_payment() {
    let mut d = draft();
    d.staff_id = " ".into();
    d.duration_minutes = 0;
    d.pattern.day_of_month = Some(40);
    d.deposit_minor = 100;
    let err = d.validate(10_000, &Cadences::default()).unwrap_err();
    let fields: Vec<_> = err.violations.iter().map(|v| v.field).collect();
    assert_eq!(fields, vec!["staff_id", "duration_minutes", "day_of_month", "deposit_minor"]);
  }

  #[test]
  fn pause_resume_cycle() {
    let mut s = series();
    s.pause(Utc::now()).unwrap();
    assert_eq!(s.state, SeriesState::Paused);
    assert!(s.pause(Utc::now()).is_err());
    s.resume(Utc::now()).unwrap();
    assert_eq!(s.state, SeriesState::Active);
    assert!(s.resume(Utc::now()).is_err());
  }

  #[test]
  fn cancel_is_idempotent_and_terminal() {
    let mut s = series();
    assert!(s.cancel(Utc::now()).unwrap());
    assert!(!s.cancel(Utc::now()).unwrap());
    let err = s.pause(Utc::now()).unwrap_err();
    assert!(matches!(err, Error::InvalidStateTransition { action: "pause", .. }));
    assert!(s.edit(SeriesEdit::default(), Utc::now()).is_err());
  }

  #[test]
  fn completes_only_when_finished() {
    let mut s = series();
    s.last_materialized_seq = 3;
    s.progress.completed = 2;
    assert!(!s.complete(Utc::now()).unwrap());

    s.exhausted = true;
    s.progress.skipped = 1;
    assert!(s.is_finished());
    assert!(s.complete(Utc::now()).unwrap());
    assert_eq!(s.state, SeriesState::Completed);
    assert!(s.cancel(Utc::now()).is_err());
  }

  #[test]
  fn edit_changes_future_details() {
    let mut s = series();
    s.edit(
      SeriesEdit {
        staff_id: Some("staff_emma".into()),
        notes: Some("prefers mornings".into()),
        ..Default::default()
      },
      Utc::now(),
    )
    .unwrap();
    assert_eq!(s.staff_id, "staff_emma");
    assert_eq!(s.notes.as_deref(), Some("prefers mornings"));

    let err = s
      .edit(SeriesEdit { duration_minutes: Some(0), ..Default::default() }, Utc::now())
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }
}
