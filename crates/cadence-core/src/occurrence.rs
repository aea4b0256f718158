//! Occurrences and their lifecycle.
//!
//! An occurrence is one concrete, dated appointment generated from a series.
//! It is never deleted: every change of state appends a [`Transition`] to an
//! audit log that is never rewritten.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  collab::{Availability, ChargeReceipt},
  generator::Candidate,
  payment::PaymentStatus,
  series::{ProgressDelta, Series},
};

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceState {
  Scheduled,
  /// Transient: the occurrence is being moved and re-enters `Scheduled` in
  /// the same operation.
  Rescheduled,
  Completed,
  Skipped,
  Cancelled,
}

impl OccurrenceState {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Skipped | Self::Cancelled)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Scheduled => "scheduled",
      Self::Rescheduled => "rescheduled",
      Self::Completed => "completed",
      Self::Skipped => "skipped",
      Self::Cancelled => "cancelled",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "scheduled" => Some(Self::Scheduled),
      "rescheduled" => Some(Self::Rescheduled),
      "completed" => Some(Self::Completed),
      "skipped" => Some(Self::Skipped),
      "cancelled" => Some(Self::Cancelled),
      _ => None,
    }
  }
}

// ─── Audit ───────────────────────────────────────────────────────────────────

/// Who caused a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
  System,
  Customer(String),
  Staff(String),
}

/// One entry of the append-only transition log, keyed by
/// `(occurrence_id, transition_seq)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
  pub occurrence_id:  Uuid,
  /// 1-based, gapless per occurrence.
  pub transition_seq: u32,
  /// `None` for the entry that records creation.
  pub from:           Option<OccurrenceState>,
  pub to:             OccurrenceState,
  pub actor:          Actor,
  pub at:             DateTime<Utc>,
  pub note:           Option<String>,
}

// ─── Occurrence ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Occurrence {
  pub occurrence_id:       Uuid,
  pub series_id:           Uuid,
  /// 1-based, contiguous within the series.
  pub sequence:            u32,
  pub scheduled_at:        NaiveDateTime,
  /// When the appointment actually took place.
  pub actual_at:           Option<NaiveDateTime>,
  pub state:               OccurrenceState,
  pub amount_minor:        i64,
  pub payment_status:      PaymentStatus,
  pub payment_reference:   Option<String>,
  pub staff_override:      Option<String>,
  /// The Availability Gate did not confirm the slot; needs manual resolution.
  pub conflict:            bool,
  pub conflicting_booking: Option<String>,
  pub reschedule_count:    u32,
  pub reminder_sent_at:    Option<DateTime<Utc>>,
  /// Number of audit entries written so far.
  pub transition_count:    u32,
  /// Optimistic-concurrency token, bumped by the store on every write.
  pub revision:            u32,
  pub created_at:          DateTime<Utc>,
  pub updated_at:          DateTime<Utc>,
}

impl Occurrence {
  /// Build a new `scheduled` occurrence for `candidate` along with the audit
  /// entry recording its creation.
  ///
  /// A slot the gate did not confirm is still scheduled, flagged as a
  /// conflict.
  pub fn materialize(
    series: &Series,
    candidate: Candidate,
    availability: &Availability,
    now: DateTime<Utc>,
  ) -> (Self, Transition) {
    let (amount_minor, payment_status) = series.payment.occurrence_terms(candidate.sequence);
    let mut occ = Self {
      occurrence_id: Uuid::new_v4(),
      series_id: series.series_id,
      sequence: candidate.sequence,
      scheduled_at: candidate.at(series.start_time()),
      actual_at: None,
      state: OccurrenceState::Scheduled,
      amount_minor,
      payment_status,
      payment_reference: None,
      staff_override: None,
      conflict: false,
      conflicting_booking: None,
      reschedule_count: 0,
      reminder_sent_at: None,
      transition_count: 0,
      revision: 0,
      created_at: now,
      updated_at: now,
    };
    occ.apply_availability(availability);
    let t = occ.record(None, OccurrenceState::Scheduled, Actor::System, now, None);
    (occ, t)
  }

  /// The staff member who will attend this occurrence.
  pub fn staff<'a>(&'a self, series: &'a Series) -> &'a str {
    self.staff_override.as_deref().unwrap_or(&series.staff_id)
  }

  pub fn is_live(&self) -> bool { !self.state.is_terminal() }

  /// The counter increment for having reached the current state.
  pub fn progress_delta(&self) -> ProgressDelta {
    let mut delta = ProgressDelta { series_id: self.series_id, ..ProgressDelta::default() };
    match self.state {
      OccurrenceState::Completed => delta.completed = 1,
      OccurrenceState::Skipped => delta.skipped = 1,
      OccurrenceState::Cancelled => delta.cancelled = 1,
      OccurrenceState::Scheduled | OccurrenceState::Rescheduled => {}
    }
    delta
  }

  fn apply_availability(&mut self, availability: &Availability) {
    match availability {
      Availability::Free => {
        self.conflict = false;
        self.conflicting_booking = None;
      }
      Availability::Conflict { booking_id } => {
        self.conflict = true;
        self.conflicting_booking = booking_id.clone();
      }
    }
  }

  fn record(
    &mut self,
    from: Option<OccurrenceState>,
    to: OccurrenceState,
    actor: Actor,
    at: DateTime<Utc>,
    note: Option<String>,
  ) -> Transition {
    self.transition_count += 1;
    self.state = to;
    self.updated_at = at;
    Transition {
      occurrence_id: self.occurrence_id,
      transition_seq: self.transition_count,
      from,
      to,
      actor,
      at,
      note,
    }
  }

  fn illegal(&self, action: &'static str) -> Error {
    Error::InvalidStateTransition {
      entity: "occurrence",
      id: self.occurrence_id,
      state: self.state.as_str().to_owned(),
      action,
    }
  }

  /// Move to a terminal state. Repeating the same terminal transition is a
  /// no-op (`Ok(None)`); any other move out of a terminal state is illegal.
  fn finish(
    &mut self,
    to: OccurrenceState,
    action: &'static str,
    actor: Actor,
    note: Option<String>,
    now: DateTime<Utc>,
  ) -> Result<Option<Transition>> {
    if self.state == to {
      return Ok(None);
    }
    if self.state.is_terminal() {
      return Err(self.illegal(action));
    }
    let from = self.state;
    Ok(Some(self.record(Some(from), to, actor, now, note)))
  }

  /// `scheduled → completed`. `actual_at` defaults to the scheduled time.
  pub fn complete(
    &mut self,
    actor: Actor,
    actual_at: Option<NaiveDateTime>,
    note: Option<String>,
    now: DateTime<Utc>,
  ) -> Result<Option<Transition>> {
    let t = self.finish(OccurrenceState::Completed, "complete", actor, note, now)?;
    if t.is_some() {
      self.actual_at = Some(actual_at.unwrap_or(self.scheduled_at));
    }
    Ok(t)
  }

  /// `scheduled → skipped`. An unpaid obligation is waived.
  pub fn skip(&mut self, actor: Actor, note: Option<String>, now: DateTime<Utc>) -> Result<Option<Transition>> {
    let t = self.finish(OccurrenceState::Skipped, "skip", actor, note, now)?;
    if t.is_some() && self.payment_status == PaymentStatus::Pending {
      self.payment_status = PaymentStatus::Waived;
    }
    Ok(t)
  }

  /// `scheduled → cancelled`. An unpaid obligation is voided.
  pub fn cancel(&mut self, actor: Actor, note: Option<String>, now: DateTime<Utc>) -> Result<Option<Transition>> {
    let t = self.finish(OccurrenceState::Cancelled, "cancel", actor, note, now)?;
    if t.is_some() && self.payment_status == PaymentStatus::Pending {
      self.payment_status = PaymentStatus::Void;
    }
    Ok(t)
  }

  /// Whether this occurrence may be moved again.
  pub fn check_reschedule(&self, max_reschedules: u32) -> Result<()> {
    if self.state != OccurrenceState::Scheduled {
      return Err(self.illegal("reschedule"));
    }
    if self.reschedule_count >= max_reschedules {
      return Err(Error::BoundExceeded {
        what:  "reschedule count",
        limit: max_reschedules,
      });
    }
    Ok(())
  }

  /// `scheduled → rescheduled → scheduled` at a new time.
  ///
  /// Fails with [`Error::BoundExceeded`] once `max_reschedules` moves have
  /// been made. Ordering against neighbouring occurrences is the caller's
  /// responsibility.
  pub fn reschedule(
    &mut self,
    to: NaiveDateTime,
    staff_override: Option<String>,
    availability: &Availability,
    actor: Actor,
    max_reschedules: u32,
    now: DateTime<Utc>,
  ) -> Result<Vec<Transition>> {
    self.check_reschedule(max_reschedules)?;

    let note = format!("moved from {} to {}", self.scheduled_at, to);
    let out = self.record(
      Some(OccurrenceState::Scheduled),
      OccurrenceState::Rescheduled,
      actor.clone(),
      now,
      Some(note),
    );

    self.scheduled_at = to;
    self.reschedule_count += 1;
    self.reminder_sent_at = None;
    if staff_override.is_some() {
      self.staff_override = staff_override;
    }
    self.apply_availability(availability);

    let back = self.record(
      Some(OccurrenceState::Rescheduled),
      OccurrenceState::Scheduled,
      actor,
      now,
      None,
    );
    Ok(vec![out, back])
  }

  /// Record the outcome of charging this occurrence on completion.
  pub fn settle_payment(&mut self, receipt: Option<&ChargeReceipt>) {
    match receipt {
      Some(r) if r.success => {
        self.payment_status = PaymentStatus::Paid;
        self.payment_reference = r.reference.clone();
      }
      Some(r) => {
        self.payment_status = PaymentStatus::Failed;
        self.payment_reference = r.reference.clone();
      }
      None => self.payment_status = PaymentStatus::Failed,
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;
  use crate::{
    generator::Cadences,
    pattern::PatternDraft,
    payment::PaymentModel,
    series::SeriesDraft,
  };

  fn series(model: PaymentModel) -> Series {
    let draft = SeriesDraft {
      customer_id:      "cust_002".into(),
      staff_id:         "staff_emma".into(),
      service_id:       "service_facial".into(),
      starts_at:        NaiveDate::from_ymd_opt(2025, 2, 3)
        .unwrap()
        .and_hms_opt(14, 30, 0)
        .unwrap(),
      timezone:         "Africa/Johannesburg".into(),
      duration_minutes: 120,
      total_minor:      25_000,
      deposit_minor:    0,
      currency:         "ZAR".into(),
      payment_model:    model,
      pattern:          PatternDraft {
        frequency: "weekly".into(),
        days_of_week: Some(vec![1]),
        end_type: "after_occurrences".into(),
        end_after_occurrences: Some(26),
        ..Default::default()
      },
      notes:            None,
      tags:             vec![],
    };
    let v = draft.validate(10_000, &Cadences::default()).unwrap();
    draft.into_series(v, Utc::now())
  }

  fn first(model: PaymentModel) -> Occurrence {
    let s = series(model);
    let c = Candidate {
      sequence: 1,
      date:     NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
    };
    Occurrence::materialize(&s, c, &Availability::Free, Utc::now()).0
  }

  #[test]
  fn materialize_records_creation() {
    let s = series(PaymentModel::PerOccurrence);
    let c = Candidate {
      sequence: 26,
      date:     NaiveDate::from_ymd_opt(2025, 7, 28).unwrap(),
    };
    let conflict = Availability::Conflict { booking_id: Some("appt_9".into()) };
    let (occ, t) = Occurrence::materialize(&s, c, &conflict, Utc::now());
    assert_eq!(occ.scheduled_at.to_string(), "2025-07-28 14:30:00");
    assert_eq!(occ.amount_minor, 25_000 / 26 + 25_000 % 26);
    assert!(occ.conflict);
    assert_eq!(occ.conflicting_booking.as_deref(), Some("appt_9"));
    assert_eq!(t.transition_seq, 1);
    assert_eq!(t.from, None);
    assert_eq!(t.to, OccurrenceState::Scheduled);
  }

  #[test]
  fn terminal_transitions_are_idempotent() {
    let mut occ = first(PaymentModel::PerOccurrence);
    let t = occ
      .complete(Actor::Staff("staff_emma".into()), None, None, Utc::now())
      .unwrap();
    assert!(t.is_some());
    assert_eq!(occ.actual_at, Some(occ.scheduled_at));

    let again = occ
      .complete(Actor::Staff("staff_emma".into()), None, None, Utc::now())
      .unwrap();
    assert!(again.is_none());
    assert_eq!(occ.transition_count, 2);

    let err = occ.skip(Actor::System, None, Utc::now()).unwrap_err();
    assert!(matches!(err, Error::InvalidStateTransition { action: "skip", .. }));
  }

  #[test]
  fn skip_waives_and_cancel_voids() {
    let mut a = first(PaymentModel::PerOccurrence);
    a.skip(Actor::Customer("cust_002".into()), None, Utc::now()).unwrap();
    assert_eq!(a.payment_status, PaymentStatus::Waived);

    let mut b = first(PaymentModel::PerOccurrence);
    b.cancel(Actor::System, Some("series cancelled".into()), Utc::now())
      .unwrap();
    assert_eq!(b.payment_status, PaymentStatus::Void);

    let mut c = first(PaymentModel::FullUpfront);
    c.skip(Actor::System, None, Utc::now()).unwrap();
    assert_eq!(c.payment_status, PaymentStatus::Prepaid);
  }

  #[test]
  fn reschedule_cycles_back_to_scheduled_and_is_capped() {
    let mut occ = first(PaymentModel::FullUpfront);
    let to = occ.scheduled_at + chrono::Duration::hours(2);
    let ts = occ
      .reschedule(to, Some("staff_lee".into()), &Availability::Free, Actor::System, 1, Utc::now())
      .unwrap();
    assert_eq!(ts.len(), 2);
    assert_eq!(ts[0].to, OccurrenceState::Rescheduled);
    assert_eq!(ts[1].to, OccurrenceState::Scheduled);
    assert_eq!(ts[1].transition_seq, 3);
    assert_eq!(occ.state, OccurrenceState::Scheduled);
    assert_eq!(occ.scheduled_at, to);
    assert_eq!(occ.reschedule_count, 1);
    assert_eq!(occ.staff_override.as_deref(), Some("staff_lee"));

    let err = occ
      .reschedule(to, None, &Availability::Free, Actor::System, 1, Utc::now())
      .unwrap_err();
    assert!(matches!(err, Error::BoundExceeded { limit: 1, .. }));
  }

  #[test]
  fn failed_charge_marks_payment_failed() {
    let mut occ = first(PaymentModel::PerOccurrence);
    occ.settle_payment(Some(&ChargeReceipt { success: false, reference: Some("ch_1".into()) }));
    assert_eq!(occ.payment_status, PaymentStatus::Failed);
    occ.settle_payment(None);
    assert_eq!(occ.payment_status, PaymentStatus::Failed);
  }
}
