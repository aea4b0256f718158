//! Interfaces to the collaborators the engine depends on but does not own:
//! availability checks, payment capture, and notification delivery.

use std::future::Future;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Availability Gate ───────────────────────────────────────────────────────

/// A slot the engine wants to commit an occurrence to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotQuery {
  pub staff_id:         String,
  pub service_id:       String,
  pub starts_at:        NaiveDateTime,
  pub duration_minutes: u32,
  /// An existing occurrence that must not count against the slot (the one
  /// being moved, when rescheduling).
  pub ignore:           Option<Uuid>,
}

impl SlotQuery {
  pub fn ends_at(&self) -> NaiveDateTime {
    self.starts_at + Duration::minutes(i64::from(self.duration_minutes))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Availability {
  Free,
  Conflict { booking_id: Option<String> },
}

impl Availability {
  pub fn is_free(&self) -> bool { matches!(self, Self::Free) }
}

/// Confirms that a staff member is free for a slot.
///
/// This is the only call the engine expects to block on external I/O. Callers
/// bound it with a timeout and treat expiry as a conflict.
pub trait AvailabilityGate: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn check<'a>(
    &'a self,
    slot: &'a SlotQuery,
  ) -> impl Future<Output = Result<Availability, Self::Error>> + Send + 'a;
}

/// An existing commitment on a staff member's calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
  pub occurrence_id:    Uuid,
  pub series_id:        Uuid,
  pub starts_at:        NaiveDateTime,
  pub duration_minutes: u32,
}

impl Booking {
  pub fn ends_at(&self) -> NaiveDateTime {
    self.starts_at + Duration::minutes(i64::from(self.duration_minutes))
  }

  /// Half-open interval overlap with `slot`.
  pub fn overlaps(&self, slot: &SlotQuery) -> bool {
    self.starts_at < slot.ends_at() && slot.starts_at < self.ends_at()
  }
}

// ─── Payment Collaborator ────────────────────────────────────────────────────

/// What a charge is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ChargeTarget {
  Series(Uuid),
  Occurrence(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeReceipt {
  pub success:   bool,
  pub reference: Option<String>,
}

/// Captures money. The engine calls it once per obligation and never
/// retries; retry policy belongs to the collaborator.
pub trait PaymentCollaborator: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn charge<'a>(
    &'a self,
    target: ChargeTarget,
    amount_minor: i64,
    currency: &'a str,
  ) -> impl Future<Output = Result<ChargeReceipt, Self::Error>> + Send + 'a;
}

// ─── Notification Collaborator ───────────────────────────────────────────────

/// Events published for customers and staff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
  SeriesCreated {
    series_id:   Uuid,
    customer_id: String,
  },
  OccurrenceScheduled {
    series_id:     Uuid,
    occurrence_id: Uuid,
    sequence:      u32,
    scheduled_at:  NaiveDateTime,
    conflict:      bool,
  },
  OccurrenceReminderDue {
    series_id:     Uuid,
    occurrence_id: Uuid,
    scheduled_at:  NaiveDateTime,
  },
  SeriesPaused {
    series_id: Uuid,
  },
  SeriesCancelled {
    series_id: Uuid,
  },
}

/// Fire-and-forget event sink. Implementations must not block.
pub trait Notifier: Send + Sync {
  fn notify(&self, event: Notification);
}
