//! Exclusive in-process leases keyed by entity id.
//!
//! A lease is an async mutex per id, created on demand. Holding a series
//! lease serialises every mutation of that series (including a horizon
//! batch); occurrence leases serialise transitions of a single occurrence.
//! When both are needed, the series lease is always taken first.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct Leases {
  slots: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of an operation; released on drop.
#[derive(Debug)]
pub struct Lease {
  _guard: OwnedMutexGuard<()>,
}

impl Leases {
  pub async fn acquire(&self, id: Uuid) -> Lease {
    let slot = {
      let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
      slots.entry(id).or_default().clone()
    };
    Lease { _guard: slot.lock_owned().await }
  }

  /// Drop slots nobody holds or waits on.
  pub fn prune(&self) {
    let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
    slots.retain(|_, slot| Arc::strong_count(slot) > 1);
  }

  #[cfg(test)]
  fn len(&self) -> usize { self.slots.lock().unwrap_or_else(PoisonError::into_inner).len() }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  #[tokio::test]
  async fn second_holder_waits_for_release() {
    let leases = Arc::new(Leases::default());
    let id = Uuid::new_v4();

    let first = leases.acquire(id).await;
    let waiter = {
      let leases = leases.clone();
      tokio::spawn(async move {
        let _lease = leases.acquire(id).await;
      })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    drop(first);
    waiter.await.unwrap();
  }

  #[tokio::test]
  async fn distinct_ids_do_not_contend() {
    let leases = Leases::default();
    let _a = leases.acquire(Uuid::new_v4()).await;
    let _b = leases.acquire(Uuid::new_v4()).await;
    assert_eq!(leases.len(), 2);
  }

  #[tokio::test]
  async fn prune_keeps_held_slots() {
    let leases = Leases::default();
    let held = leases.acquire(Uuid::new_v4()).await;
    drop(leases.acquire(Uuid::new_v4()).await);
    leases.prune();
    assert_eq!(leases.len(), 1);
    drop(held);
    leases.prune();
    assert_eq!(leases.len(), 0);
  }
}
