//! Store-backed availability gate.
//!
//! Treats the schedule store as the staff calendar: a slot conflicts with any
//! non-terminal occurrence attended by the same staff member whose time range
//! overlaps it.

use std::sync::Arc;

use cadence_core::{
  collab::{Availability, AvailabilityGate, SlotQuery},
  store::ScheduleStore,
};

pub struct LocalCalendar<S> {
  store: Arc<S>,
}

impl<S> LocalCalendar<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }
}

impl<S: ScheduleStore> AvailabilityGate for LocalCalendar<S> {
  type Error = S::Error;

  async fn check(&self, slot: &SlotQuery) -> Result<Availability, S::Error> {
    let bookings = self
      .store
      .staff_bookings(&slot.staff_id, slot.starts_at, slot.ends_at())
      .await?;

    let clash = bookings
      .into_iter()
      .filter(|b| Some(b.occurrence_id) != slot.ignore)
      .find(|b| b.overlaps(slot));

    Ok(match clash {
      Some(b) => Availability::Conflict { booking_id: Some(b.occurrence_id.to_string()) },
      None => Availability::Free,
    })
  }
}
