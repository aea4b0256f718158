//! The horizon materialization job.
//!
//! Each tick tops up every active series below the low-water mark, charges
//! installments that have fallen due, and sends reminders. A series whose
//! batch fails is retried on later ticks with exponential backoff; one
//! series failing never stops the others.

use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex, PoisonError},
};

use cadence_core::{
  series::{Series, SeriesState},
  store::ScheduleStore,
};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Collaborators, Scheduler};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
  /// Occurrences created.
  pub materialized:         usize,
  /// Series whose batch failed this tick.
  pub failed:               usize,
  /// Series skipped because they are backing off.
  pub deferred:             usize,
  pub installments_charged: usize,
  pub reminders_sent:       usize,
}

#[derive(Debug, Clone, Copy)]
struct Backoff {
  attempts: u32,
  retry_at: DateTime<Utc>,
}

pub struct Horizon<S, C> {
  scheduler: Arc<Scheduler<S, C>>,
  backoff:   Mutex<HashMap<Uuid, Backoff>>,
}

impl<S: ScheduleStore + 'static, C: Collaborators> Horizon<S, C> {
  pub fn new(scheduler: Arc<Scheduler<S, C>>) -> Self {
    Self { scheduler, backoff: Mutex::new(HashMap::new()) }
  }

  /// Run one tick against the local wall clock.
  pub async fn tick(&self) -> TickReport { self.tick_at(Local::now().naive_local(), Utc::now()).await }

  /// Run one tick as of `local_now` (wall-clock time for series dates) and
  /// `now` (for backoff bookkeeping).
  pub async fn tick_at(&self, local_now: NaiveDateTime, now: DateTime<Utc>) -> TickReport {
    let mut report = TickReport::default();
    let today = local_now.date();

    let active = match self.scheduler.list_series(Some(SeriesState::Active)).await {
      Ok(series) => series,
      Err(e) => {
        warn!(error = %e, "horizon tick could not list series");
        return report;
      }
    };

    for series in &active {
      let id = series.series_id;
      if self.backing_off(id, now) {
        report.deferred += 1;
        continue;
      }
      match self.scheduler.materialize_at(id, today, false).await {
        Ok(created) => {
          report.materialized += created.len();
          self.clear(id);
        }
        Err(e) => {
          report.failed += 1;
          let (attempts, retry_at) = self.record_failure(id, now);
          warn!(series_id = %id, attempts, %retry_at, error = %e, "materialization failed; backing off");
        }
      }
    }
    self.forget_inactive(&active);

    let paused = match self.scheduler.list_series(Some(SeriesState::Paused)).await {
      Ok(series) => series,
      Err(e) => {
        warn!(error = %e, "horizon tick could not list paused series");
        Vec::new()
      }
    };
    for series in active.iter().chain(&paused) {
      if series.payment.due_installments(today).is_empty() {
        continue;
      }
      match self.scheduler.collect_installments(series.series_id, today).await {
        Ok(n) => report.installments_charged += n,
        Err(e) => warn!(series_id = %series.series_id, error = %e, "installment collection failed"),
      }
    }

    match self.scheduler.send_reminders(local_now).await {
      Ok(n) => report.reminders_sent = n,
      Err(e) => warn!(error = %e, "reminder dispatch failed"),
    }

    self.scheduler.prune_leases();
    debug!(?report, "horizon tick finished");
    report
  }

  /// Run [`Horizon::tick`] on the configured period until the returned
  /// handle is shut down. A tick in progress finishes before the loop
  /// exits.
  pub fn spawn(self: Arc<Self>) -> HorizonHandle {
    let period = self.scheduler.config().tick();
    let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();

    let join = tokio::spawn(async move {
      let mut interval = tokio::time::interval(period);
      info!(period_secs = period.as_secs(), "horizon job started");
      loop {
        tokio::select! {
          _ = &mut shutdown_rx => break,
          _ = interval.tick() => {
            self.tick().await;
          }
        }
      }
      info!("horizon job stopped");
    });

    HorizonHandle { shutdown, join }
  }

  fn backing_off(&self, id: Uuid, now: DateTime<Utc>) -> bool {
    let table = self.backoff.lock().unwrap_or_else(PoisonError::into_inner);
    table.get(&id).is_some_and(|b| b.retry_at > now)
  }

  fn record_failure(&self, id: Uuid, now: DateTime<Utc>) -> (u32, DateTime<Utc>) {
    let mut table = self.backoff.lock().unwrap_or_else(PoisonError::into_inner);
    let attempts = table.get(&id).map_or(1, |b| b.attempts + 1);
    let delay = self.scheduler.config().backoff(attempts);
    let retry_at = chrono::Duration::from_std(delay)
      .ok()
      .and_then(|d| now.checked_add_signed(d))
      .unwrap_or(DateTime::<Utc>::MAX_UTC);
    table.insert(id, Backoff { attempts, retry_at });
    (attempts, retry_at)
  }

  /// Drop backoff state for series that are no longer active.
  fn forget_inactive(&self, active: &[Series]) {
    let live: HashSet<Uuid> = active.iter().map(|s| s.series_id).collect();
    self
      .backoff
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .retain(|id, _| live.contains(id));
  }

  #[cfg(test)]
  pub(crate) fn backoff_len(&self) -> usize {
    self.backoff.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  fn clear(&self, id: Uuid) {
    self
      .backoff
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&id);
  }
}

/// Handle to stop a spawned horizon job.
#[derive(Debug)]
pub struct HorizonHandle {
  shutdown: oneshot::Sender<()>,
  join:     JoinHandle<()>,
}

impl HorizonHandle {
  /// Request shutdown and wait for the job to stop.
  pub async fn shutdown(self) {
    let _ = self.shutdown.send(());
    if let Err(e) = self.join.await {
      warn!(error = %e, "horizon job panicked");
    }
  }
}
