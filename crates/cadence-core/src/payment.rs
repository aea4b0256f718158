//! The Payment Schedule Calculator.
//!
//! All amounts are integer minor units (cents). Nothing here ever touches
//! floating point: splits hand the remainder to the final share so the parts
//! always add back up to the whole.

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ViolationKind};

// ─── Models ──────────────────────────────────────────────────────────────────

/// How often an installment falls due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentFrequency {
  Weekly,
  Biweekly,
  Monthly,
}

impl InstallmentFrequency {
  /// Due date of the `index`-th (0-based) installment.
  pub fn due_date(self, start: NaiveDate, index: u32) -> Option<NaiveDate> {
    match self {
      Self::Weekly => start.checked_add_days(Days::new(7 * u64::from(index))),
      Self::Biweekly => start.checked_add_days(Days::new(14 * u64::from(index))),
      Self::Monthly => start.checked_add_months(Months::new(index)),
    }
  }
}

/// How the customer pays for a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PaymentModel {
  /// One charge of the full total at creation.
  FullUpfront,
  /// `count` charges on a fixed calendar, independent of occurrence dates.
  Installments {
    frequency: InstallmentFrequency,
    count:     u32,
  },
  /// Each occurrence is charged when it completes.
  PerOccurrence,
}

/// Payment state of a single occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
  /// Due on completion.
  Pending,
  /// Covered by the upfront charge.
  Prepaid,
  /// Covered by the installment plan.
  OnPlan,
  Paid,
  Failed,
  /// Skipped occurrences carry no obligation.
  Waived,
  /// Cancelled before anything was charged.
  Void,
}

/// Outcome of a single charge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
  Pending,
  /// Handed to the payment collaborator; the outcome is not recorded yet.
  /// Never charged again.
  Submitted,
  Paid,
  Failed,
}

/// A charge taken once, at series creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpfrontCharge {
  pub amount_minor: i64,
  pub status:       ChargeStatus,
  pub reference:    Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
  /// 1-based.
  pub number:       u32,
  pub due_on:       NaiveDate,
  pub amount_minor: i64,
  pub status:       ChargeStatus,
  pub reference:    Option<String>,
}

/// Per-occurrence amounts: every occurrence owes `base` except the last,
/// which owes `last` (base plus the remainder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceSplit {
  pub count: u32,
  pub base:  i64,
  pub last:  i64,
}

impl OccurrenceSplit {
  pub fn amount_for(&self, sequence: u32) -> i64 {
    match sequence {
      s if s == self.count => self.last,
      s if s >= 1 && s < self.count => self.base,
      _ => 0,
    }
  }
}

/// The payment schedule computed at series creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPlan {
  pub model:        PaymentModel,
  pub total_minor:  i64,
  pub currency:     String,
  pub upfront:      Option<UpfrontCharge>,
  pub split:        Option<OccurrenceSplit>,
  #[serde(default)]
  pub installments: Vec<Installment>,
}

// ─── Calculation ─────────────────────────────────────────────────────────────

/// Split `total` into `parts` shares whose sum is exactly `total`.
/// The remainder goes to the final share.
pub fn split_evenly(total: i64, parts: u32) -> Vec<i64> {
  if parts == 0 {
    return Vec::new();
  }
  let n = i64::from(parts);
  let base = total / n;
  let mut shares = vec![base; parts as usize];
  if let Some(last) = shares.last_mut() {
    *last += total - base * n;
  }
  shares
}

/// Inputs to [`compute_plan`].
#[derive(Debug, Clone)]
pub struct PaymentTerms {
  pub model:         PaymentModel,
  pub total_minor:   i64,
  pub deposit_minor: i64,
  pub currency:      String,
}

impl PaymentTerms {
  /// Check the terms against the pattern they will pay for.
  pub fn validate(&self, pattern_bounded: bool, cap: u32) -> Result<(), ValidationError> {
    let mut errors = ValidationError::default();

    if self.total_minor < 0 {
      errors.push("total_minor", ViolationKind::OutOfRange { min: 0, max: i64::MAX });
    }
    if self.deposit_minor < 0 || self.deposit_minor > self.total_minor.max(0) {
      errors.push("deposit_minor", ViolationKind::OutOfRange {
        min: 0,
        max: self.total_minor.max(0),
      });
    }
    if self.currency.len() != 3 || !self.currency.bytes().all(|b| b.is_ascii_uppercase()) {
      errors.push("currency", ViolationKind::Invalid {
        reason: "must be a three-letter ISO 4217 code".into(),
      });
    }

    match self.model {
      PaymentModel::FullUpfront if self.deposit_minor != 0 => {
        errors.push("deposit_minor", ViolationKind::NotAllowed);
      }
      PaymentModel::Installments { count, .. } if count == 0 => {
        errors.push("installments.count", ViolationKind::OutOfRange {
          min: 1,
          max: i64::from(cap),
        });
      }
      PaymentModel::Installments { count, .. } if count > cap => {
        errors.push("installments.count", ViolationKind::BoundExceeded { limit: cap });
      }
      PaymentModel::PerOccurrence if !pattern_bounded => {
        errors.push("payment_model", ViolationKind::Invalid {
          reason: "per-occurrence payment needs an end condition".into(),
        });
      }
      _ => {}
    }

    errors.finish(())
  }
}

/// Compute the schedule for `terms`.
///
/// `planned` is the number of occurrences the pattern yields (required for
/// per-occurrence payment); `start` is the series anchor date, from which
/// installment due dates are counted.
///
/// `upfront + Σ split + Σ installments` always equals `total_minor`.
pub fn compute_plan(terms: &PaymentTerms, planned: Option<u32>, start: NaiveDate) -> PaymentPlan {
  let remaining = terms.total_minor - terms.deposit_minor;
  let deposit = (terms.deposit_minor > 0).then(|| UpfrontCharge {
    amount_minor: terms.deposit_minor,
    status:       ChargeStatus::Pending,
    reference:    None,
  });

  let (upfront, split, installments) = match terms.model {
    PaymentModel::FullUpfront => {
      let upfront = UpfrontCharge {
        amount_minor: terms.total_minor,
        status:       ChargeStatus::Pending,
        reference:    None,
      };
      (Some(upfront), None, Vec::new())
    }
    PaymentModel::Installments { frequency, count } => {
      let installments = split_evenly(remaining, count)
        .into_iter()
        .enumerate()
        .map_while(|(i, amount)| {
          Some(Installment {
            number:       i as u32 + 1,
            due_on:       frequency.due_date(start, i as u32)?,
            amount_minor: amount,
            status:       ChargeStatus::Pending,
            reference:    None,
          })
        })
        .collect();
      (deposit, None, installments)
    }
    PaymentModel::PerOccurrence => {
      let split = planned.filter(|&n| n > 0).map(|count| {
        let shares = split_evenly(remaining, count);
        OccurrenceSplit {
          count,
          base: shares[0],
          last: shares[shares.len() - 1],
        }
      });
      (deposit, split, Vec::new())
    }
  };

  PaymentPlan {
    model: terms.model,
    total_minor: terms.total_minor,
    currency: terms.currency.clone(),
    upfront,
    split,
    installments,
  }
}

impl PaymentPlan {
  /// Amount due and initial payment status for occurrence `sequence`.
  pub fn occurrence_terms(&self, sequence: u32) -> (i64, PaymentStatus) {
    match self.model {
      PaymentModel::FullUpfront => (0, PaymentStatus::Prepaid),
      PaymentModel::Installments { .. } => (0, PaymentStatus::OnPlan),
      PaymentModel::PerOccurrence => (
        self.split.map_or(0, |s| s.amount_for(sequence)),
        PaymentStatus::Pending,
      ),
    }
  }

  /// Indices of installments that are pending and due on or before `today`.
  pub fn due_installments(&self, today: NaiveDate) -> Vec<usize> {
    self
      .installments
      .iter()
      .enumerate()
      .filter(|(_, i)| i.status == ChargeStatus::Pending && i.due_on <= today)
      .map(|(idx, _)| idx)
      .collect()
  }

  /// Sum of everything this plan will ever charge.
  pub fn scheduled_total(&self) -> i64 {
    let upfront = self.upfront.as_ref().map_or(0, |u| u.amount_minor);
    let split = self.split.map_or(0, |s| {
      s.base * i64::from(s.count.saturating_sub(1)) + s.last
    });
    let installments: i64 = self.installments.iter().map(|i| i.amount_minor).sum();
    upfront + split + installments
  }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;

  fn start() -> NaiveDate { NaiveDate::from_ymd_opt(2025, 1, 31).unwrap() }

  fn terms(model: PaymentModel, total: i64, deposit: i64) -> PaymentTerms {
    PaymentTerms {
      model,
      total_minor: total,
      deposit_minor: deposit,
      currency: "ZAR".into(),
    }
  }

  #[test]
  fn ten_cents_over_three_occurrences() {
    assert_eq!(split_evenly(10, 3), vec![3, 3, 4]);

    let plan = compute_plan(&terms(PaymentModel::PerOccurrence, 10, 0), Some(3), start());
    let amounts: Vec<i64> = (1..=3).map(|s| plan.occurrence_terms(s).0).collect();
    assert_eq!(amounts, vec![3, 3, 4]);
    assert_eq!(amounts.iter().sum::<i64>(), 10);
    assert!(plan.upfront.is_none());
  }

  #[test]
  fn full_upfront_prepays_every_occurrence() {
    let plan = compute_plan(&terms(PaymentModel::FullUpfront, 15_000, 0), None, start());
    assert_eq!(plan.upfront.as_ref().unwrap().amount_minor, 15_000);
    assert_eq!(plan.occurrence_terms(7), (0, PaymentStatus::Prepaid));
  }

  #[test]
  fn installments_follow_their_own_calendar() {
    let model = PaymentModel::Installments {
      frequency: InstallmentFrequency::Monthly,
      count:     3,
    };
    let plan = compute_plan(&terms(model, 25_000, 5_000), Some(26), start());
    let dues: Vec<_> = plan.installments.iter().map(|i| i.due_on.to_string()).collect();
    assert_eq!(dues, vec!["2025-01-31", "2025-02-28", "2025-03-31"]);
    let amounts: Vec<_> = plan.installments.iter().map(|i| i.amount_minor).collect();
    assert_eq!(amounts, vec![6_666, 6_666, 6_668]);
    assert_eq!(plan.upfront.as_ref().unwrap().amount_minor, 5_000);
    assert_eq!(plan.scheduled_total(), 25_000);
    assert_eq!(plan.occurrence_terms(1), (0, PaymentStatus::OnPlan));

    let due = plan.due_installments(NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
    assert_eq!(due, vec![0, 1]);
  }

  #[test]
  fn validation_collects_payment_violations() {
    let mut t = terms(PaymentModel::PerOccurrence, 100, 200);
    t.currency = "rand".into();
    let err = t.validate(false, 10_000).unwrap_err();
    let fields: Vec<_> = err.violations.iter().map(|v| v.field).collect();
    assert_eq!(fields, vec!["deposit_minor", "currency", "payment_model"]);
  }

  #[test]
  fn full_upfront_rejects_deposit() {
    let err = terms(PaymentModel::FullUpfront, 100, 10)
      .validate(true, 10_000)
      .unwrap_err();
    assert_eq!(err.violations[0].kind, ViolationKind::NotAllowed);
  }

  proptest! {
    #[test]
    fn per_occurrence_sum_is_exact(total in 0i64..10_000_000, count in 1u32..500, deposit_pct in 0i64..=100) {
      let deposit = total * deposit_pct / 100;
      let plan = compute_plan(&terms(PaymentModel::PerOccurrence, total, deposit), Some(count), start());
      let sum: i64 = (1..=count).map(|s| plan.occurrence_terms(s).0).sum();
      prop_assert_eq!(sum + deposit, total);
      prop_assert_eq!(plan.scheduled_total(), total);
    }

    #[test]
    fn split_never_drifts(total in -1_000_000i64..1_000_000, parts in 1u32..1000) {
      let shares = split_evenly(total, parts);
      prop_assert_eq!(shares.len(), parts as usize);
      prop_assert_eq!(shares.iter().sum::<i64>(), total);
    }
  }
}
