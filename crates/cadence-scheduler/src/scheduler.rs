//! [`Scheduler`]: the Series and Occurrence Lifecycle Managers.
//!
//! Every mutation runs under a lease: series operations (including a
//! materialization batch) hold the series lease, occurrence transitions hold
//! the occurrence lease. A pause that races a batch therefore waits for the
//! batch to finish; there are no partial batches.

use std::sync::Arc;

use cadence_core::{
  ValidationError, ViolationKind,
  collab::{
    Availability, AvailabilityGate, ChargeReceipt, ChargeTarget, Notification, Notifier,
    PaymentCollaborator, SlotQuery,
  },
  generator::{self, Cadences, Candidate},
  occurrence::{Actor, Occurrence, OccurrenceState, Transition},
  payment::{ChargeStatus, PaymentStatus},
  series::{ProgressDelta, Series, SeriesDraft, SeriesEdit, SeriesState},
  store::{Changeset, ScheduleStore, SeriesWrite},
};
use chrono::{DateTime, Days, Local, NaiveDate, NaiveDateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Error, Result, SchedulerConfig, lease::Leases};

// ─── Collaborators ───────────────────────────────────────────────────────────

/// The external collaborators a scheduler talks to.
pub trait Collaborators: Send + Sync + 'static {
  type Gate: AvailabilityGate;
  type Payments: PaymentCollaborator;
  type Notifier: Notifier;

  fn gate(&self) -> &Self::Gate;
  fn payments(&self) -> &Self::Payments;
  fn notifier(&self) -> &Self::Notifier;
}

/// A plain bundle of collaborators.
pub struct Wiring<G, P, N> {
  pub gate:     G,
  pub payments: P,
  pub notifier: N,
}

impl<G, P, N> Collaborators for Wiring<G, P, N>
where
  G: AvailabilityGate + 'static,
  P: PaymentCollaborator + 'static,
  N: Notifier + 'static,
{
  type Gate = G;
  type Notifier = N;
  type Payments = P;

  fn gate(&self) -> &G { &self.gate }

  fn payments(&self) -> &P { &self.payments }

  fn notifier(&self) -> &N { &self.notifier }
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

/// Candidates for the next materialization batch.
#[derive(Debug, Default)]
struct Batch {
  candidates: Vec<Candidate>,
  /// The generator has nothing beyond these.
  exhausted:  bool,
}

pub struct Scheduler<S, C> {
  store:             Arc<S>,
  collab:            C,
  config:            SchedulerConfig,
  cadences:          Cadences,
  series_leases:     Leases,
  occurrence_leases: Leases,
}

impl<S: ScheduleStore, C: Collaborators> Scheduler<S, C> {
  pub fn new(store: Arc<S>, collab: C, config: SchedulerConfig) -> Self {
    Self {
      store,
      collab,
      config,
      cadences: Cadences::default(),
      series_leases: Leases::default(),
      occurrence_leases: Leases::default(),
    }
  }

  /// Replace the registered custom cadence strategies.
  pub fn with_cadences(mut self, cadences: Cadences) -> Self {
    self.cadences = cadences;
    self
  }

  pub fn config(&self) -> &SchedulerConfig { &self.config }

  // ── Series lifecycle ──────────────────────────────────────────────────────

  /// Validate `draft`, compute its payment schedule, persist it as `active`
  /// together with its first batch of occurrences, and take any upfront
  /// charge.
  ///
  /// Fails with a scheduling conflict if the very first occurrence does not
  /// clear the availability gate.
  pub async fn create(&self, draft: SeriesDraft) -> Result<Series> {
    let validated = draft.validate(self.config.materialization_cap, &self.cadences)?;
    let now = Utc::now();
    let mut series = draft.into_series(validated, now);

    let batch = self.next_batch(&series, today(), true)?;
    if batch.candidates.is_empty() {
      let mut errors = ValidationError::default();
      errors.push("pattern", ViolationKind::Invalid { reason: "yields no occurrences".into() });
      return Err(errors.into());
    }

    let (occurrences, transitions) = self.build_batch(&mut series, batch, now).await?;
    if let Some(first) = occurrences.first()
      && first.conflict
    {
      return Err(
        cadence_core::Error::SchedulingConflict {
          at:         first.scheduled_at,
          booking_id: first.conflicting_booking.clone(),
        }
        .into(),
      );
    }

    // The series is stored before anything is charged. The lease keeps the
    // horizon job off it until the charge is recorded.
    let _lease = self.series_leases.acquire(series.series_id).await;
    let upfront = series.payment.upfront.as_mut().map(|u| {
      u.status = if u.amount_minor > 0 { ChargeStatus::Submitted } else { ChargeStatus::Paid };
      u.amount_minor
    });
    self
      .commit(Changeset {
        series: Some(SeriesWrite::Insert(series.clone())),
        new_occurrences: occurrences.clone(),
        transitions,
        ..Default::default()
      })
      .await?;

    if let Some(amount) = upfront.filter(|&a| a > 0) {
      self.charge_upfront(&mut series, amount).await;
    }

    info!(
      series_id = %series.series_id,
      customer_id = %series.customer_id,
      planned = ?series.progress.planned,
      materialized = occurrences.len(),
      "series created"
    );
    self.collab.notifier().notify(Notification::SeriesCreated {
      series_id:   series.series_id,
      customer_id: series.customer_id.clone(),
    });
    self.announce(&occurrences);

    Ok(series)
  }

  /// `active → paused`. Already-materialized occurrences stay bookable.
  pub async fn pause(&self, series_id: Uuid) -> Result<Series> {
    let _lease = self.series_leases.acquire(series_id).await;
    let mut series = self.load_series(series_id).await?;
    series.pause(Utc::now())?;
    self.write_series(&mut series, Changeset::default()).await?;

    info!(%series_id, "series paused");
    self.collab.notifier().notify(Notification::SeriesPaused { series_id });
    Ok(series)
  }

  /// `paused → active`, then materialize from the last generated sequence.
  ///
  /// A failed top-up does not undo the resume; the horizon job retries it.
  pub async fn resume(&self, series_id: Uuid) -> Result<Series> {
    let _lease = self.series_leases.acquire(series_id).await;
    let mut series = self.load_series(series_id).await?;
    series.resume(Utc::now())?;
    self.write_series(&mut series, Changeset::default()).await?;
    info!(%series_id, "series resumed");

    if let Err(e) = self.materialize_locked(&mut series, today()).await {
      warn!(%series_id, error = %e, "materialization after resume failed");
    }
    Ok(series)
  }

  /// `active | paused → cancelled`, cancelling every non-terminal
  /// occurrence. Cancelling a cancelled series succeeds without change.
  pub async fn cancel(&self, series_id: Uuid, actor: Actor) -> Result<Series> {
    let _lease = self.series_leases.acquire(series_id).await;
    let mut series = self.load_series(series_id).await?;
    let now = Utc::now();
    if !series.cancel(now)? {
      return Ok(series);
    }

    let mut changes = Changeset::default();
    let mut held = Vec::new();
    for listed in self.list_occurrences(series_id).await? {
      if !listed.is_live() {
        continue;
      }
      held.push(self.occurrence_leases.acquire(listed.occurrence_id).await);
      let mut occ = self.load_occurrence(listed.occurrence_id).await?;
      if let Some(t) = occ.cancel(actor.clone(), Some("series cancelled".into()), now)? {
        // Only individual cancellations leave the plan.
        changes.record(occ, vec![t], ProgressDelta { series_id, ..ProgressDelta::default() });
      }
    }
    let cancelled = changes.updated_occurrences.len();

    series.next_occurrence_at = None;
    self.write_series(&mut series, changes).await?;
    drop(held);

    info!(%series_id, cancelled, "series cancelled");
    self.collab.notifier().notify(Notification::SeriesCancelled { series_id });
    Ok(series)
  }

  /// Change staff, duration, notes or tags. Only occurrences materialized
  /// afterwards pick up the new details.
  pub async fn edit(&self, series_id: Uuid, edit: SeriesEdit) -> Result<Series> {
    let _lease = self.series_leases.acquire(series_id).await;
    let mut series = self.load_series(series_id).await?;
    series.edit(edit, Utc::now())?;
    self.write_series(&mut series, Changeset::default()).await?;
    debug!(%series_id, "series edited");
    Ok(series)
  }

  /// On-demand horizon run for one active series. Returns the occurrences
  /// created.
  pub async fn materialize(&self, series_id: Uuid) -> Result<Vec<Occurrence>> {
    self.materialize_at(series_id, today(), true).await
  }

  /// Top up `series_id` as of `today`. Non-active series are an error when
  /// `strict`, and skipped otherwise.
  pub(crate) async fn materialize_at(
    &self,
    series_id: Uuid,
    today: NaiveDate,
    strict: bool,
  ) -> Result<Vec<Occurrence>> {
    let _lease = self.series_leases.acquire(series_id).await;
    let mut series = self.load_series(series_id).await?;
    if series.state != SeriesState::Active {
      if !strict {
        return Ok(Vec::new());
      }
      return Err(
        cadence_core::Error::InvalidStateTransition {
          entity: "series",
          id:     series_id,
          state:  series.state.as_str().to_owned(),
          action: "materialize",
        }
        .into(),
      );
    }
    self.materialize_locked(&mut series, today).await
  }

  /// Refresh `next_occurrence_at` and complete the series once nothing is
  /// left to do.
  pub async fn settle(&self, series_id: Uuid) -> Result<()> {
    let _lease = self.series_leases.acquire(series_id).await;
    self.settle_locked(series_id).await
  }

  // ── Occurrence lifecycle ──────────────────────────────────────────────────

  /// `scheduled → completed`, charging the occurrence under per-occurrence
  /// payment.
  pub async fn complete_occurrence(
    &self,
    occurrence_id: Uuid,
    actor: Actor,
    actual_at: Option<NaiveDateTime>,
    note: Option<String>,
  ) -> Result<Occurrence> {
    self
      .transition(occurrence_id, move |occ, now| occ.complete(actor, actual_at, note, now))
      .await
  }

  /// `scheduled → skipped`.
  pub async fn skip_occurrence(
    &self,
    occurrence_id: Uuid,
    actor: Actor,
    note: Option<String>,
  ) -> Result<Occurrence> {
    self
      .transition(occurrence_id, move |occ, now| occ.skip(actor, note, now))
      .await
  }

  /// `scheduled → cancelled`. The occurrence leaves the series plan.
  pub async fn cancel_occurrence(
    &self,
    occurrence_id: Uuid,
    actor: Actor,
    note: Option<String>,
  ) -> Result<Occurrence> {
    self
      .transition(occurrence_id, move |occ, now| occ.cancel(actor, note, now))
      .await
  }

  /// Move an occurrence to `to`, optionally with a different staff member.
  ///
  /// The new time must fall strictly between the neighbouring non-terminal
  /// occurrences (or the next candidate the pattern would produce). The new
  /// slot is checked against the gate and flagged on conflict.
  pub async fn reschedule_occurrence(
    &self,
    occurrence_id: Uuid,
    to: NaiveDateTime,
    staff_override: Option<String>,
    actor: Actor,
  ) -> Result<Occurrence> {
    let series_id = self.load_occurrence(occurrence_id).await?.series_id;
    let staff_override = staff_override.filter(|s| !s.trim().is_empty());
    let max = self.config.max_reschedules;

    // Ordering depends on the siblings, so the series lease is held too.
    let _series_lease = self.series_leases.acquire(series_id).await;
    let occ = {
      let _lease = self.occurrence_leases.acquire(occurrence_id).await;
      let mut occ = self.load_occurrence(occurrence_id).await?;
      occ.check_reschedule(max)?;

      let series = self.load_series(series_id).await?;
      let siblings = self.list_occurrences(series_id).await?;
      self.check_order(&series, &occ, &siblings, to)?;

      let staff = staff_override
        .as_deref()
        .unwrap_or_else(|| occ.staff(&series))
        .to_owned();
      let availability = self
        .check_slot(&SlotQuery {
          staff_id:         staff,
          service_id:       series.service_id.clone(),
          starts_at:        to,
          duration_minutes: series.duration_minutes,
          ignore:           Some(occurrence_id),
        })
        .await?;

      let transitions = occ.reschedule(to, staff_override, &availability, actor, max, Utc::now())?;
      self.write_occurrence(&mut occ, transitions).await?;
      occ
    };

    if occ.conflict {
      warn!(%occurrence_id, scheduled_at = %occ.scheduled_at, "rescheduled into a conflicting slot");
    } else {
      info!(%occurrence_id, scheduled_at = %occ.scheduled_at, "occurrence rescheduled");
    }
    self.settle_locked(series_id).await?;
    Ok(occ)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  pub async fn get_series(&self, series_id: Uuid) -> Result<Series> {
    self.load_series(series_id).await
  }

  pub async fn list_series(&self, state: Option<SeriesState>) -> Result<Vec<Series>> {
    self.store.list_series(state).await.map_err(Error::store)
  }

  /// Occurrences of an existing series, in sequence order.
  pub async fn occurrences(&self, series_id: Uuid) -> Result<Vec<Occurrence>> {
    self.load_series(series_id).await?;
    self.list_occurrences(series_id).await
  }

  pub async fn get_occurrence(&self, occurrence_id: Uuid) -> Result<Occurrence> {
    self.load_occurrence(occurrence_id).await
  }

  /// The audit log of an existing occurrence.
  pub async fn transitions(&self, occurrence_id: Uuid) -> Result<Vec<Transition>> {
    self.load_occurrence(occurrence_id).await?;
    self.store.transitions(occurrence_id).await.map_err(Error::store)
  }

  // ── Horizon support ───────────────────────────────────────────────────────

  /// Charge every installment of `series_id` due by `today`. Returns the
  /// number of charges attempted.
  pub(crate) async fn collect_installments(&self, series_id: Uuid, today: NaiveDate) -> Result<usize> {
    let _lease = self.series_leases.acquire(series_id).await;
    let mut series = self.load_series(series_id).await?;
    if series.state.is_terminal() {
      return Ok(0);
    }
    let due = series.payment.due_installments(today);
    if due.is_empty() {
      return Ok(0);
    }

    // Mark the batch submitted first; a submitted installment is never
    // charged again.
    for &idx in &due {
      series.payment.installments[idx].status = ChargeStatus::Submitted;
    }
    series.updated_at = Utc::now();
    self.write_series(&mut series, Changeset::default()).await?;

    for &idx in &due {
      let (number, amount) = {
        let i = &series.payment.installments[idx];
        (i.number, i.amount_minor)
      };
      let receipt = self
        .charge(ChargeTarget::Series(series_id), amount, &series.payment.currency)
        .await;
      let installment = &mut series.payment.installments[idx];
      (installment.status, installment.reference) = charge_status(receipt);
      debug!(%series_id, number, amount, status = ?installment.status, "installment charged");
    }

    series.updated_at = Utc::now();
    self.write_series(&mut series, Changeset::default()).await?;
    Ok(due.len())
  }

  /// Emit a reminder for every scheduled occurrence of an active series
  /// starting within the lead time of `now_local`. Returns how many were
  /// sent.
  pub(crate) async fn send_reminders(&self, now_local: NaiveDateTime) -> Result<usize> {
    let until = now_local + chrono::Duration::hours(i64::from(self.config.reminder_lead_hours));
    let due = self
      .store
      .due_reminders(now_local, until)
      .await
      .map_err(Error::store)?;

    let mut sent = 0;
    for listed in due {
      let occurrence_id = listed.occurrence_id;
      let _lease = self.occurrence_leases.acquire(occurrence_id).await;
      let mut occ = match self.load_occurrence(occurrence_id).await {
        Ok(occ) => occ,
        Err(e) => {
          warn!(%occurrence_id, error = %e, "cannot load occurrence for reminder");
          continue;
        }
      };
      if occ.state != OccurrenceState::Scheduled || occ.reminder_sent_at.is_some() {
        continue;
      }
      occ.reminder_sent_at = Some(Utc::now());
      let changes = Changeset { updated_occurrences: vec![occ.clone()], ..Default::default() };
      if let Err(e) = self.commit(changes).await {
        warn!(%occurrence_id, error = %e, "failed to record reminder");
        continue;
      }

      self.collab.notifier().notify(Notification::OccurrenceReminderDue {
        series_id:     occ.series_id,
        occurrence_id: occ.occurrence_id,
        scheduled_at:  occ.scheduled_at,
      });
      sent += 1;
    }
    Ok(sent)
  }

  pub(crate) fn prune_leases(&self) {
    self.series_leases.prune();
    self.occurrence_leases.prune();
  }

  // ── Internals ─────────────────────────────────────────────────────────────

  async fn load_series(&self, id: Uuid) -> Result<Series> {
    self
      .store
      .get_series(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| cadence_core::Error::SeriesNotFound(id).into())
  }

  async fn load_occurrence(&self, id: Uuid) -> Result<Occurrence> {
    self
      .store
      .get_occurrence(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| cadence_core::Error::OccurrenceNotFound(id).into())
  }

  async fn list_occurrences(&self, series_id: Uuid) -> Result<Vec<Occurrence>> {
    self.store.list_occurrences(series_id).await.map_err(Error::store)
  }

  async fn commit(&self, changes: Changeset) -> Result<usize> {
    self.store.commit(changes).await.map_err(Error::store)
  }

  /// Commit `changes` together with the current state of `series`, then
  /// bring the in-memory copy in line with what the store now holds.
  async fn write_series(&self, series: &mut Series, mut changes: Changeset) -> Result<usize> {
    let delta = changes.progress;
    changes.series = Some(SeriesWrite::Update(series.clone()));
    let inserted = self.commit(changes).await?;
    series.revision += 1;
    if let Some(delta) = delta.filter(|d| d.series_id == series.series_id) {
      series.progress.apply(&delta);
    }
    Ok(inserted)
  }

  async fn write_occurrence(&self, occ: &mut Occurrence, transitions: Vec<Transition>) -> Result<()> {
    let mut changes = Changeset::default();
    changes.record(occ.clone(), transitions, occ.progress_delta());
    self.commit(changes).await?;
    occ.revision += 1;
    Ok(())
  }

  /// Apply a terminal transition under the occurrence lease, then settle the
  /// owning series.
  async fn transition<F>(&self, occurrence_id: Uuid, apply: F) -> Result<Occurrence>
  where
    F: FnOnce(&mut Occurrence, DateTime<Utc>) -> cadence_core::Result<Option<Transition>> + Send,
  {
    let occ = {
      let _lease = self.occurrence_leases.acquire(occurrence_id).await;
      let mut occ = self.load_occurrence(occurrence_id).await?;
      let Some(t) = apply(&mut occ, Utc::now())? else {
        return Ok(occ);
      };
      self.write_occurrence(&mut occ, vec![t]).await?;
      // Charged only once the transition is stored; a retry finds the
      // occurrence already completed.
      if occ.state == OccurrenceState::Completed && occ.payment_status == PaymentStatus::Pending {
        self.charge_occurrence(&mut occ).await;
      }
      occ
    };

    info!(
      %occurrence_id,
      series_id = %occ.series_id,
      state = occ.state.as_str(),
      "occurrence transitioned"
    );
    self.settle(occ.series_id).await?;
    Ok(occ)
  }

  async fn settle_locked(&self, series_id: Uuid) -> Result<()> {
    let mut series = self.load_series(series_id).await?;
    if series.state.is_terminal() {
      return Ok(());
    }

    let next = self
      .list_occurrences(series_id)
      .await?
      .iter()
      .filter(|o| o.is_live())
      .map(|o| o.scheduled_at)
      .min();
    let now = Utc::now();
    let moved = series.next_occurrence_at != next;
    series.next_occurrence_at = next;
    let completed = series.complete(now)?;

    if moved || completed {
      series.updated_at = now;
      self.write_series(&mut series, Changeset::default()).await?;
    }
    if completed {
      info!(
        %series_id,
        completed = series.progress.completed,
        skipped = series.progress.skipped,
        "series completed"
      );
    }
    Ok(())
  }

  async fn materialize_locked(&self, series: &mut Series, today: NaiveDate) -> Result<Vec<Occurrence>> {
    if series.exhausted || series.outstanding() >= self.config.low_water_mark {
      return Ok(Vec::new());
    }
    let batch = self.next_batch(series, today, false)?;
    if batch.candidates.is_empty() && !batch.exhausted {
      return Ok(Vec::new());
    }

    let now = Utc::now();
    let (occurrences, transitions) = self.build_batch(series, batch, now).await?;
    series.complete(now)?;
    series.updated_at = now;

    let inserted = self
      .write_series(series, Changeset {
        new_occurrences: occurrences.clone(),
        transitions,
        ..Default::default()
      })
      .await?;

    debug!(
      series_id = %series.series_id,
      inserted,
      last_seq = series.last_materialized_seq,
      exhausted = series.exhausted,
      "batch materialized"
    );
    self.announce(&occurrences);
    Ok(occurrences)
  }

  /// The next candidates after `last_materialized_seq`, cut off at the
  /// horizon. With `force`, the first candidate is kept even beyond it.
  fn next_batch(&self, series: &Series, today: NaiveDate, force: bool) -> Result<Batch> {
    if series.exhausted {
      return Ok(Batch { candidates: Vec::new(), exhausted: true });
    }

    let want = self.config.batch_size.max(1);
    let mut candidates = generator::generate(
      &series.pattern,
      series.anchor_date(),
      series.last_materialized_seq + 1,
      want,
      &self.cadences,
    )?;
    let mut exhausted = (candidates.len() as u32) < want;

    let horizon = today
      .checked_add_days(Days::new(u64::from(self.config.horizon_days)))
      .unwrap_or(NaiveDate::MAX);
    if let Some(cut) = candidates.iter().position(|c| c.date > horizon) {
      let keep = if force { cut.max(1) } else { cut };
      if keep < candidates.len() {
        candidates.truncate(keep);
        exhausted = false;
      }
    }

    Ok(Batch { candidates, exhausted })
  }

  /// Check each candidate against the gate and build its occurrence,
  /// advancing the series cursor. Nothing is persisted; a gate failure
  /// discards the whole batch.
  async fn build_batch(
    &self,
    series: &mut Series,
    batch: Batch,
    now: DateTime<Utc>,
  ) -> Result<(Vec<Occurrence>, Vec<Transition>)> {
    let mut occurrences = Vec::with_capacity(batch.candidates.len());
    let mut transitions = Vec::with_capacity(batch.candidates.len());

    for candidate in batch.candidates {
      let slot = SlotQuery {
        staff_id:         series.staff_id.clone(),
        service_id:       series.service_id.clone(),
        starts_at:        candidate.at(series.start_time()),
        duration_minutes: series.duration_minutes,
        ignore:           None,
      };
      let availability = self.check_slot(&slot).await?;
      let (occ, t) = Occurrence::materialize(series, candidate, &availability, now);
      series.last_materialized_seq = occ.sequence;
      occurrences.push(occ);
      transitions.push(t);
    }

    let reached_plan = series
      .progress
      .planned
      .is_some_and(|p| series.last_materialized_seq >= p);
    if batch.exhausted || reached_plan {
      series.exhausted = true;
    }
    if series.next_occurrence_at.is_none() {
      series.next_occurrence_at = occurrences.first().map(|o| o.scheduled_at);
    }
    Ok((occurrences, transitions))
  }

  /// Time-bounded gate call. Expiry counts as a conflict, never as free.
  async fn check_slot(&self, slot: &SlotQuery) -> Result<Availability> {
    match tokio::time::timeout(self.config.gate_timeout(), self.collab.gate().check(slot)).await {
      Ok(Ok(availability)) => Ok(availability),
      Ok(Err(e)) => Err(Error::gate(e)),
      Err(_) => {
        warn!(
          staff_id = %slot.staff_id,
          starts_at = %slot.starts_at,
          "availability check timed out; flagging conflict"
        );
        Ok(Availability::Conflict { booking_id: None })
      }
    }
  }

  /// `to` must sit strictly between the neighbouring live occurrences.
  fn check_order(
    &self,
    series: &Series,
    occ: &Occurrence,
    siblings: &[Occurrence],
    to: NaiveDateTime,
  ) -> Result<()> {
    let live = siblings
      .iter()
      .filter(|o| o.is_live() && o.occurrence_id != occ.occurrence_id);
    let before = live
      .clone()
      .filter(|o| o.sequence < occ.sequence)
      .map(|o| o.scheduled_at)
      .max();
    let after = match live.filter(|o| o.sequence > occ.sequence).map(|o| o.scheduled_at).min() {
      Some(at) => Some(at),
      None if series.exhausted => None,
      None => generator::generate(
        &series.pattern,
        series.anchor_date(),
        series.last_materialized_seq + 1,
        1,
        &self.cadences,
      )?
      .first()
      .map(|c| c.at(series.start_time())),
    };

    let mut errors = ValidationError::default();
    if let Some(before) = before
      && to <= before
    {
      errors.push("scheduled_at", ViolationKind::Invalid {
        reason: format!("must be after the preceding occurrence at {before}"),
      });
    }
    if let Some(after) = after
      && to >= after
    {
      errors.push("scheduled_at", ViolationKind::Invalid {
        reason: format!("must be before the following occurrence at {after}"),
      });
    }
    Ok(errors.finish(())?)
  }

  /// Call the payment collaborator once. Failures are logged and reported
  /// as `None`; retrying is the collaborator's business.
  async fn charge(&self, target: ChargeTarget, amount_minor: i64, currency: &str) -> Option<ChargeReceipt> {
    match self.collab.payments().charge(target, amount_minor, currency).await {
      Ok(receipt) => {
        if !receipt.success {
          warn!(?target, amount_minor, reference = ?receipt.reference, "charge declined");
        }
        Some(receipt)
      }
      Err(e) => {
        warn!(?target, amount_minor, error = %e, "charge failed");
        None
      }
    }
  }

  /// Take the upfront charge of a freshly inserted series and record the
  /// outcome. A failed write leaves the charge `submitted`.
  async fn charge_upfront(&self, series: &mut Series, amount: i64) {
    let series_id = series.series_id;
    let receipt = self
      .charge(ChargeTarget::Series(series_id), amount, &series.payment.currency)
      .await;
    if let Some(upfront) = series.payment.upfront.as_mut() {
      (upfront.status, upfront.reference) = charge_status(receipt);
    }
    if let Err(e) = self.write_series(series, Changeset::default()).await {
      warn!(%series_id, error = %e, "failed to record upfront charge");
    }
  }

  /// Charge a completed occurrence and record the outcome. A failed write
  /// leaves the stored occurrence `pending`; it is not charged again.
  async fn charge_occurrence(&self, occ: &mut Occurrence) {
    let occurrence_id = occ.occurrence_id;
    if occ.amount_minor == 0 {
      occ.payment_status = PaymentStatus::Paid;
    } else {
      let currency = match self.load_series(occ.series_id).await {
        Ok(series) => series.payment.currency,
        Err(e) => {
          warn!(%occurrence_id, error = %e, "cannot charge occurrence");
          return;
        }
      };
      let receipt = self
        .charge(ChargeTarget::Occurrence(occurrence_id), occ.amount_minor, &currency)
        .await;
      occ.settle_payment(receipt.as_ref());
    }

    let changes = Changeset { updated_occurrences: vec![occ.clone()], ..Default::default() };
    match self.commit(changes).await {
      Ok(_) => occ.revision += 1,
      Err(e) => warn!(%occurrence_id, error = %e, "failed to record occurrence payment"),
    }
  }

  fn announce(&self, occurrences: &[Occurrence]) {
    for occ in occurrences {
      self.collab.notifier().notify(Notification::OccurrenceScheduled {
        series_id:     occ.series_id,
        occurrence_id: occ.occurrence_id,
        sequence:      occ.sequence,
        scheduled_at:  occ.scheduled_at,
        conflict:      occ.conflict,
      });
    }
  }
}

fn charge_status(receipt: Option<ChargeReceipt>) -> (ChargeStatus, Option<String>) {
  match receipt {
    Some(r) if r.success => (ChargeStatus::Paid, r.reference),
    Some(r) => (ChargeStatus::Failed, r.reference),
    None => (ChargeStatus::Failed, None),
  }
}

/// Local wall-clock date; series times are local.
pub(crate) fn today() -> NaiveDate { Local::now().date_naive() }
