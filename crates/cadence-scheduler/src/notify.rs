//! Fire-and-forget notification delivery over a tokio channel.

use cadence_core::collab::{Notification, Notifier};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info};

/// Publishes events to an unbounded channel. Sending never blocks; events
/// are dropped once the receiving side is gone.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }

  /// A notifier whose events are written to the log by a background task.
  pub fn logging() -> (Self, JoinHandle<()>) {
    let (notifier, rx) = Self::new();
    (notifier, tokio::spawn(log_events(rx)))
  }
}

impl Notifier for ChannelNotifier {
  fn notify(&self, event: Notification) {
    if self.tx.send(event).is_err() {
      debug!("notification receiver closed; event dropped");
    }
  }
}

async fn log_events(mut rx: mpsc::UnboundedReceiver<Notification>) {
  while let Some(event) = rx.recv().await {
    match &event {
      Notification::SeriesCreated { series_id, customer_id } => {
        info!(%series_id, %customer_id, "series created");
      }
      Notification::OccurrenceScheduled { series_id, occurrence_id, sequence, scheduled_at, conflict } => {
        info!(%series_id, %occurrence_id, sequence, %scheduled_at, conflict, "occurrence scheduled");
      }
      Notification::OccurrenceReminderDue { series_id, occurrence_id, scheduled_at } => {
        info!(%series_id, %occurrence_id, %scheduled_at, "occurrence reminder due");
      }
      Notification::SeriesPaused { series_id } => info!(%series_id, "series paused"),
      Notification::SeriesCancelled { series_id } => info!(%series_id, "series cancelled"),
    }
  }
}
