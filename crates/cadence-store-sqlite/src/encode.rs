//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Instants are stored as RFC 3339 strings, local wall-clock times as
//! ISO 8601 without an offset (so both sort lexicographically). Patterns,
//! payment plans, actors and tags are compact JSON. UUIDs are hyphenated
//! lowercase strings.

use cadence_core::{
  collab::ChargeTarget,
  occurrence::{Occurrence, OccurrenceState, Transition},
  payment::{ChargeStatus, PaymentStatus},
  series::{Progress, Series, SeriesState},
  store::{ChargeRequest, OutboxEntry},
};
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_local(dt: NaiveDateTime) -> String { dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string() }

pub fn decode_local(s: &str) -> Result<NaiveDateTime> {
  s.parse().map_err(|e: chrono::ParseError| Error::DateParse(e.to_string()))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn decode_series_state(s: &str) -> Result<SeriesState> {
  SeriesState::parse(s).ok_or_else(|| Error::Decode { column: "series.state", value: s.to_owned() })
}

pub fn decode_occurrence_state(s: &str) -> Result<OccurrenceState> {
  OccurrenceState::parse(s).ok_or_else(|| Error::Decode {
    column: "occurrences.state",
    value:  s.to_owned(),
  })
}

pub fn encode_payment_status(p: PaymentStatus) -> &'static str {
  match p {
    PaymentStatus::Pending => "pending",
    PaymentStatus::Prepaid => "prepaid",
    PaymentStatus::OnPlan => "on_plan",
    PaymentStatus::Paid => "paid",
    PaymentStatus::Failed => "failed",
    PaymentStatus::Waived => "waived",
    PaymentStatus::Void => "void",
  }
}

pub fn decode_payment_status(s: &str) -> Result<PaymentStatus> {
  match s {
    "pending" => Ok(PaymentStatus::Pending),
    "prepaid" => Ok(PaymentStatus::Prepaid),
    "on_plan" => Ok(PaymentStatus::OnPlan),
    "paid" => Ok(PaymentStatus::Paid),
    "failed" => Ok(PaymentStatus::Failed),
    "waived" => Ok(PaymentStatus::Waived),
    "void" => Ok(PaymentStatus::Void),
    other => Err(Error::Decode { column: "occurrences.payment_status", value: other.to_owned() }),
  }
}

pub fn encode_charge_status(c: ChargeStatus) -> &'static str {
  match c {
    ChargeStatus::Pending => "pending",
    ChargeStatus::Submitted => "submitted",
    ChargeStatus::Paid => "paid",
    ChargeStatus::Failed => "failed",
  }
}

pub fn decode_charge_status(s: &str) -> Result<ChargeStatus> {
  match s {
    "pending" => Ok(ChargeStatus::Pending),
    "submitted" => Ok(ChargeStatus::Submitted),
    "paid" => Ok(ChargeStatus::Paid),
    "failed" => Ok(ChargeStatus::Failed),
    other => Err(Error::Decode { column: "payment_outbox.status", value: other.to_owned() }),
  }
}

pub fn encode_target(t: ChargeTarget) -> (&'static str, String) {
  match t {
    ChargeTarget::Series(id) => ("series", encode_uuid(id)),
    ChargeTarget::Occurrence(id) => ("occurrence", encode_uuid(id)),
  }
}

pub fn decode_target(kind: &str, id: &str) -> Result<ChargeTarget> {
  let id = decode_uuid(id)?;
  match kind {
    "series" => Ok(ChargeTarget::Series(id)),
    "occurrence" => Ok(ChargeTarget::Occurrence(id)),
    other => Err(Error::Decode { column: "payment_outbox.target_kind", value: other.to_owned() }),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const SERIES_COLUMNS: &str = "series_id, customer_id, staff_id, service_id, starts_at, timezone,
  duration_minutes, deposit_minor, payment_json, pattern_json, state,
  completed_count, skipped_count, cancelled_count, planned_count,
  last_materialized_seq, exhausted, next_occurrence_at, notes, tags,
  revision, created_at, updated_at";

/// Column values of a `series` row.
pub struct SeriesRow {
  pub series_id:             String,
  pub customer_id:           String,
  pub staff_id:              String,
  pub service_id:            String,
  pub starts_at:             String,
  pub timezone:              String,
  pub duration_minutes:      u32,
  pub deposit_minor:         i64,
  pub payment_json:          String,
  pub pattern_json:          String,
  pub state:                 String,
  pub completed_count:       u32,
  pub skipped_count:         u32,
  pub cancelled_count:       u32,
  pub planned_count:         Option<u32>,
  pub last_materialized_seq: u32,
  pub exhausted:             bool,
  pub next_occurrence_at:    Option<String>,
  pub notes:                 Option<String>,
  pub tags:                  String,
  pub revision:              u32,
  pub created_at:            String,
  pub updated_at:            String,
}

impl SeriesRow {
  /// Read a row selected with [`SERIES_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      series_id:             row.get(0)?,
      customer_id:           row.get(1)?,
      staff_id:              row.get(2)?,
      service_id:            row.get(3)?,
      starts_at:             row.get(4)?,
      timezone:              row.get(5)?,
      duration_minutes:      row.get(6)?,
      deposit_minor:         row.get(7)?,
      payment_json:          row.get(8)?,
      pattern_json:          row.get(9)?,
      state:                 row.get(10)?,
      completed_count:       row.get(11)?,
      skipped_count:         row.get(12)?,
      cancelled_count:       row.get(13)?,
      planned_count:         row.get(14)?,
      last_materialized_seq: row.get(15)?,
      exhausted:             row.get(16)?,
      next_occurrence_at:    row.get(17)?,
      notes:                 row.get(18)?,
      tags:                  row.get(19)?,
      revision:              row.get(20)?,
      created_at:            row.get(21)?,
      updated_at:            row.get(22)?,
    })
  }

  pub fn encode(s: &Series) -> Result<Self> {
    Ok(Self {
      series_id:             encode_uuid(s.series_id),
      customer_id:           s.customer_id.clone(),
      staff_id:              s.staff_id.clone(),
      service_id:            s.service_id.clone(),
      starts_at:             encode_local(s.starts_at),
      timezone:              s.timezone.clone(),
      duration_minutes:      s.duration_minutes,
      deposit_minor:         s.deposit_minor,
      payment_json:          serde_json::to_string(&s.payment)?,
      pattern_json:          serde_json::to_string(&s.pattern)?,
      state:                 s.state.as_str().to_owned(),
      completed_count:       s.progress.completed,
      skipped_count:         s.progress.skipped,
      cancelled_count:       s.progress.cancelled,
      planned_count:         s.progress.planned,
      last_materialized_seq: s.last_materialized_seq,
      exhausted:             s.exhausted,
      next_occurrence_at:    s.next_occurrence_at.map(encode_local),
      notes:                 s.notes.clone(),
      tags:                  serde_json::to_string(&s.tags)?,
      revision:              s.revision,
      created_at:            encode_dt(s.created_at),
      updated_at:            encode_dt(s.updated_at),
    })
  }

  pub fn into_series(self) -> Result<Series> {
    Ok(Series {
      series_id:             decode_uuid(&self.series_id)?,
      customer_id:           self.customer_id,
      staff_id:              self.staff_id,
      service_id:            self.service_id,
      starts_at:             decode_local(&self.starts_at)?,
      timezone:              self.timezone,
      duration_minutes:      self.duration_minutes,
      deposit_minor:         self.deposit_minor,
      payment:               serde_json::from_str(&self.payment_json)?,
      pattern:               serde_json::from_str(&self.pattern_json)?,
      state:                 decode_series_state(&self.state)?,
      progress:              Progress {
        completed: self.completed_count,
        skipped:   self.skipped_count,
        cancelled: self.cancelled_count,
        planned:   self.planned_count,
      },
      last_materialized_seq: self.last_materialized_seq,
      exhausted:             self.exhausted,
      next_occurrence_at:    self.next_occurrence_at.as_deref().map(decode_local).transpose()?,
      notes:                 self.notes,
      tags:                  serde_json::from_str(&self.tags)?,
      revision:              self.revision,
      created_at:            decode_dt(&self.created_at)?,
      updated_at:            decode_dt(&self.updated_at)?,
    })
  }
}

pub const OCCURRENCE_COLUMNS: &str = "occurrence_id, series_id, sequence, scheduled_at, actual_at,
  state, amount_minor, payment_status, payment_reference, staff_override,
  conflict, conflicting_booking, reschedule_count, reminder_sent_at,
  transition_count, revision, created_at, updated_at";

/// Column values of an `occurrences` row.
pub struct OccurrenceRow {
  pub occurrence_id:       String,
  pub series_id:           String,
  pub sequence:            u32,
  pub scheduled_at:        String,
  pub actual_at:           Option<String>,
  pub state:               String,
  pub amount_minor:        i64,
  pub payment_status:      String,
  pub payment_reference:   Option<String>,
  pub staff_override:      Option<String>,
  pub conflict:            bool,
  pub conflicting_booking: Option<String>,
  pub reschedule_count:    u32,
  pub reminder_sent_at:    Option<String>,
  pub transition_count:    u32,
  pub revision:            u32,
  pub created_at:          String,
  pub updated_at:          String,
}

impl OccurrenceRow {
  /// Read a row selected with [`OCCURRENCE_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      occurrence_id:       row.get(0)?,
      series_id:           row.get(1)?,
      sequence:            row.get(2)?,
      scheduled_at:        row.get(3)?,
      actual_at:           row.get(4)?,
      state:               row.get(5)?,
      amount_minor:        row.get(6)?,
      payment_status:      row.get(7)?,
      payment_reference:   row.get(8)?,
      staff_override:      row.get(9)?,
      conflict:            row.get(10)?,
      conflicting_booking: row.get(11)?,
      reschedule_count:    row.get(12)?,
      reminder_sent_at:    row.get(13)?,
      transition_count:    row.get(14)?,
      revision:            row.get(15)?,
      created_at:          row.get(16)?,
      updated_at:          row.get(17)?,
    })
  }

  pub fn encode(o: &Occurrence) -> Self {
    Self {
      occurrence_id:       encode_uuid(o.occurrence_id),
      series_id:           encode_uuid(o.series_id),
      sequence:            o.sequence,
      scheduled_at:        encode_local(o.scheduled_at),
      actual_at:           o.actual_at.map(encode_local),
      state:               o.state.as_str().to_owned(),
      amount_minor:        o.amount_minor,
      payment_status:      encode_payment_status(o.payment_status).to_owned(),
      payment_reference:   o.payment_reference.clone(),
      staff_override:      o.staff_override.clone(),
      conflict:            o.conflict,
      conflicting_booking: o.conflicting_booking.clone(),
      reschedule_count:    o.reschedule_count,
      reminder_sent_at:    o.reminder_sent_at.map(encode_dt),
      transition_count:    o.transition_count,
      revision:            o.revision,
      created_at:          encode_dt(o.created_at),
      updated_at:          encode_dt(o.updated_at),
    }
  }

  pub fn into_occurrence(self) -> Result<Occurrence> {
    Ok(Occurrence {
      occurrence_id:       decode_uuid(&self.occurrence_id)?,
      series_id:           decode_uuid(&self.series_id)?,
      sequence:            self.sequence,
      scheduled_at:        decode_local(&self.scheduled_at)?,
      actual_at:           self.actual_at.as_deref().map(decode_local).transpose()?,
      state:               decode_occurrence_state(&self.state)?,
      amount_minor:        self.amount_minor,
      payment_status:      decode_payment_status(&self.payment_status)?,
      payment_reference:   self.payment_reference,
      staff_override:      self.staff_override,
      conflict:            self.conflict,
      conflicting_booking: self.conflicting_booking,
      reschedule_count:    self.reschedule_count,
      reminder_sent_at:    self.reminder_sent_at.as_deref().map(decode_dt).transpose()?,
      transition_count:    self.transition_count,
      revision:            self.revision,
      created_at:          decode_dt(&self.created_at)?,
      updated_at:          decode_dt(&self.updated_at)?,
    })
  }
}

/// Column values of an `occurrence_transitions` row.
pub struct TransitionRow {
  pub occurrence_id:  String,
  pub transition_seq: u32,
  pub from_state:     Option<String>,
  pub to_state:       String,
  pub actor:          String,
  pub at:             String,
  pub note:           Option<String>,
}

impl TransitionRow {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      occurrence_id:  row.get(0)?,
      transition_seq: row.get(1)?,
      from_state:     row.get(2)?,
      to_state:       row.get(3)?,
      actor:          row.get(4)?,
      at:             row.get(5)?,
      note:           row.get(6)?,
    })
  }

  pub fn encode(t: &Transition) -> Result<Self> {
    Ok(Self {
      occurrence_id:  encode_uuid(t.occurrence_id),
      transition_seq: t.transition_seq,
      from_state:     t.from.map(|s| s.as_str().to_owned()),
      to_state:       t.to.as_str().to_owned(),
      actor:          serde_json::to_string(&t.actor)?,
      at:             encode_dt(t.at),
      note:           t.note.clone(),
    })
  }

  pub fn into_transition(self) -> Result<Transition> {
    Ok(Transition {
      occurrence_id:  decode_uuid(&self.occurrence_id)?,
      transition_seq: self.transition_seq,
      from:           self.from_state.as_deref().map(decode_occurrence_state).transpose()?,
      to:             decode_occurrence_state(&self.to_state)?,
      actor:          serde_json::from_str(&self.actor)?,
      at:             decode_dt(&self.at)?,
      note:           self.note,
    })
  }
}

/// Raw strings read directly from a `payment_outbox` row.
pub struct RawOutboxEntry {
  pub id:           i64,
  pub target_kind:  String,
  pub target_id:    String,
  pub amount_minor: i64,
  pub currency:     String,
  pub status:       String,
  pub created_at:   String,
}

impl RawOutboxEntry {
  pub fn into_entry(self) -> Result<OutboxEntry> {
    Ok(OutboxEntry {
      id:         self.id,
      request:    ChargeRequest {
        target:       decode_target(&self.target_kind, &self.target_id)?,
        amount_minor: self.amount_minor,
        currency:     self.currency,
      },
      status:     decode_charge_status(&self.status)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}
