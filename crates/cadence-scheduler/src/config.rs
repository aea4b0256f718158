//! Tunables for the scheduler and its horizon job.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  /// Upper bound on occurrences a bounded pattern may yield, and on
  /// installment counts.
  pub materialization_cap: u32,
  /// Candidates requested from the generator per batch.
  pub batch_size:          u32,
  /// A series is topped up once fewer than this many occurrences are
  /// outstanding.
  pub low_water_mark:      u32,
  /// Nothing further out than this is materialized.
  pub horizon_days:        u32,
  pub max_reschedules:     u32,
  pub gate_timeout_ms:     u64,
  pub tick_secs:           u64,
  pub backoff_base_secs:   u64,
  pub backoff_max_secs:    u64,
  pub reminder_lead_hours: u32,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      materialization_cap: 10_000,
      batch_size:          8,
      low_water_mark:      4,
      horizon_days:        90,
      max_reschedules:     3,
      gate_timeout_ms:     2_000,
      tick_secs:           60,
      backoff_base_secs:   30,
      backoff_max_secs:    3_600,
      reminder_lead_hours: 24,
    }
  }
}

impl SchedulerConfig {
  pub fn gate_timeout(&self) -> Duration { Duration::from_millis(self.gate_timeout_ms) }

  pub fn tick(&self) -> Duration { Duration::from_secs(self.tick_secs.max(1)) }

  /// Delay before retrying a series whose materialization failed `attempt`
  /// times in a row: `base · 2^(attempt−1)`, capped at the maximum.
  pub fn backoff(&self, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(32);
    let secs = self.backoff_base_secs.saturating_mul(1u64 << exp);
    Duration::from_secs(secs.min(self.backoff_max_secs))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn backoff_doubles_then_caps() {
    let c = SchedulerConfig::default();
    assert_eq!(c.backoff(1), Duration::from_secs(30));
    assert_eq!(c.backoff(2), Duration::from_secs(60));
    assert_eq!(c.backoff(4), Duration::from_secs(240));
    assert_eq!(c.backoff(8), Duration::from_secs(3_600));
    assert_eq!(c.backoff(100), Duration::from_secs(3_600));
  }

  #[test]
  fn partial_config_fills_defaults() {
    let c: SchedulerConfig = serde_json::from_str(r#"{"batch_size": 2}"#).unwrap();
    assert_eq!(c.batch_size, 2);
    assert_eq!(c.max_reschedules, 3);
  }
}
