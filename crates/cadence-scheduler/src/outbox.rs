//! Payment collaborator that hands charges to an external settlement
//! process through the store's payment outbox.

use std::sync::Arc;

use cadence_core::{
  collab::{ChargeReceipt, ChargeTarget, PaymentCollaborator},
  store::{ChargeRequest, ScheduleStore},
};
use tracing::debug;

pub struct OutboxPayments<S> {
  store: Arc<S>,
}

impl<S> OutboxPayments<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }
}

impl<S: ScheduleStore> PaymentCollaborator for OutboxPayments<S> {
  type Error = S::Error;

  /// Accepted once queued; settlement happens out of band.
  async fn charge(
    &self,
    target: ChargeTarget,
    amount_minor: i64,
    currency: &str,
  ) -> Result<ChargeReceipt, S::Error> {
    let id = self
      .store
      .enqueue_charge(ChargeRequest {
        target,
        amount_minor,
        currency: currency.to_owned(),
      })
      .await?;
    debug!(outbox_id = id, ?target, amount_minor, "charge queued");
    Ok(ChargeReceipt {
      success:   true,
      reference: Some(format!("outbox:{id}")),
    })
  }
}
