//! The Occurrence Generator.
//!
//! [`generate`] is a pure function of its inputs: the same pattern, anchor,
//! starting sequence number and count always produce the same candidates.
//! Horizon materialization relies on this to be safely re-runnable.
//!
//! Every rule can compute its `n`-th date directly, so generating from a late
//! sequence number never walks the series from the start.

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  pattern::{EndCondition, Recurrence, RecurrencePattern, WeekdaySet},
};

// ─── Custom cadences ─────────────────────────────────────────────────────────

/// A pluggable date rule for `custom` patterns.
///
/// Implementations must be pure and strictly increasing in `index`; the
/// generator rejects any strategy that is not.
pub trait Cadence: Send + Sync {
  /// The `index`-th (0-based) date on or after `anchor`, or `None` once the
  /// rule runs out of representable dates.
  fn nth(&self, anchor: NaiveDate, interval: u32, index: u32) -> Option<NaiveDate>;
}

/// Every `interval`-th business day (Monday to Friday).
#[derive(Debug, Clone, Copy, Default)]
pub struct BusinessDays;

impl Cadence for BusinessDays {
  fn nth(&self, anchor: NaiveDate, interval: u32, index: u32) -> Option<NaiveDate> {
    let mut first = anchor;
    while is_weekend(first.weekday()) {
      first = first.succ_opt()?;
    }
    add_business_days(first, u64::from(index) * u64::from(interval))
  }
}

fn is_weekend(day: Weekday) -> bool { matches!(day, Weekday::Sat | Weekday::Sun) }

fn add_business_days(start: NaiveDate, n: u64) -> Option<NaiveDate> {
  let mut date = start.checked_add_days(Days::new(n / 5 * 7))?;
  let mut rest = n % 5;
  while rest > 0 {
    date = date.succ_opt()?;
    if !is_weekend(date.weekday()) {
      rest -= 1;
    }
  }
  Some(date)
}

/// Registry of named [`Cadence`] strategies.
///
/// `Cadences::default()` contains the built-in `weekdays` strategy.
#[derive(Clone)]
pub struct Cadences {
  strategies: HashMap<String, Arc<dyn Cadence>>,
}

impl Cadences {
  pub fn empty() -> Self { Self { strategies: HashMap::new() } }

  pub fn register(&mut self, name: impl Into<String>, cadence: impl Cadence + 'static) {
    self.strategies.insert(name.into(), Arc::new(cadence));
  }

  pub fn get(&self, name: &str) -> Option<&dyn Cadence> {
    self.strategies.get(name).map(|c| c.as_ref())
  }

  pub fn contains(&self, name: &str) -> bool { self.strategies.contains_key(name) }
}

impl Default for Cadences {
  fn default() -> Self {
    let mut c = Self::empty();
    c.register("weekdays", BusinessDays);
    c
  }
}

impl fmt::Debug for Cadences {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut names: Vec<_> = self.strategies.keys().collect();
    names.sort();
    f.debug_struct("Cadences").field("strategies", &names).finish()
  }
}

// ─── Candidates ──────────────────────────────────────────────────────────────

/// A proposed occurrence date, numbered within its series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
  /// 1-based position in the series.
  pub sequence: u32,
  pub date:     NaiveDate,
}

impl Candidate {
  /// Combine with the series' start time.
  pub fn at(&self, time: NaiveTime) -> NaiveDateTime { self.date.and_time(time) }
}

/// Produce up to `count` candidates starting at sequence number `from_seq`.
///
/// Stops early when the end condition is reached. Sequence numbers start at
/// 1; a `from_seq` of 0 is treated as 1.
pub fn generate(
  pattern: &RecurrencePattern,
  anchor: NaiveDate,
  from_seq: u32,
  count: u32,
  cadences: &Cadences,
) -> Result<Vec<Candidate>> {
  let from_seq = from_seq.max(1);
  let mut out = Vec::with_capacity(count.min(64) as usize);

  let mut previous = if from_seq > 1 {
    nth_date(&pattern.rule, anchor, from_seq - 2, cadences)?
  } else {
    None
  };

  for sequence in from_seq..from_seq.saturating_add(count) {
    if let EndCondition::AfterCount { count: n } = pattern.end
      && sequence > n
    {
      break;
    }

    let Some(date) = nth_date(&pattern.rule, anchor, sequence - 1, cadences)? else {
      break;
    };

    if let EndCondition::OnDate { date: end } = pattern.end
      && date > end
    {
      break;
    }

    check_order(&pattern.rule, anchor, previous, date)?;
    previous = Some(date);
    out.push(Candidate { sequence, date });
  }

  Ok(out)
}

/// Total number of occurrences a pattern yields, or `None` when it is
/// open-ended.
///
/// Fails with [`Error::BoundExceeded`] when the total is larger than `cap`.
pub fn planned_count(
  pattern: &RecurrencePattern,
  anchor: NaiveDate,
  cap: u32,
  cadences: &Cadences,
) -> Result<Option<u32>> {
  let exceeded = || Error::BoundExceeded { what: "occurrence count", limit: cap };

  match pattern.end {
    EndCondition::Never => Ok(None),
    EndCondition::AfterCount { count } if count > cap => Err(exceeded()),
    EndCondition::AfterCount { count } => Ok(Some(count)),
    EndCondition::OnDate { date: end } => {
      let mut previous = None;
      let mut n = 0u32;
      while let Some(date) = nth_date(&pattern.rule, anchor, n, cadences)? {
        if date > end {
          break;
        }
        check_order(&pattern.rule, anchor, previous, date)?;
        previous = Some(date);
        n += 1;
        if n > cap {
          return Err(exceeded());
        }
      }
      Ok(Some(n))
    }
  }
}

/// Built-in rules are ordered by construction; only custom strategies can
/// violate the ordering invariant.
fn check_order(
  rule: &Recurrence,
  anchor: NaiveDate,
  previous: Option<NaiveDate>,
  date: NaiveDate,
) -> Result<()> {
  let Recurrence::Custom { cadence, .. } = rule else {
    return Ok(());
  };
  let floor_ok = date >= anchor;
  let order_ok = previous.is_none_or(|p| date > p);
  if floor_ok && order_ok {
    Ok(())
  } else {
    Err(Error::NonMonotonicCadence {
      name: cadence.clone(),
      date,
      previous: previous.unwrap_or(anchor),
    })
  }
}

// ─── Date arithmetic ─────────────────────────────────────────────────────────

/// The `index`-th (0-based) date of `rule` on or after `anchor`.
fn nth_date(
  rule: &Recurrence,
  anchor: NaiveDate,
  index: u32,
  cadences: &Cadences,
) -> Result<Option<NaiveDate>> {
  Ok(match rule {
    Recurrence::Daily { interval } => {
      anchor.checked_add_days(Days::new(u64::from(index) * u64::from(*interval)))
    }
    Recurrence::Weekly { interval, days_of_week } => {
      nth_weekly(anchor, *days_of_week, *interval, index)
    }
    Recurrence::Biweekly { interval, days_of_week } => {
      nth_weekly(anchor, *days_of_week, interval.saturating_mul(2), index)
    }
    Recurrence::Monthly { interval, day_of_month } => {
      nth_monthly(anchor, *day_of_month, *interval, index)
    }
    Recurrence::Custom { interval, cadence } => cadences
      .get(cadence)
      .ok_or_else(|| Error::UnknownCadence(cadence.clone()))?
      .nth(anchor, *interval, index),
  })
}

/// Windows of `span_weeks` weeks start on the Sunday of the anchor's week.
/// Matching days before the anchor in the first window are skipped.
fn nth_weekly(
  anchor: NaiveDate,
  days: WeekdaySet,
  span_weeks: u32,
  index: u32,
) -> Option<NaiveDate> {
  let offsets: Vec<u32> = days.indices().map(u32::from).collect();
  let anchor_offset = anchor.weekday().num_days_from_sunday();
  let window_start = anchor.checked_sub_days(Days::new(u64::from(anchor_offset)))?;

  let first: Vec<u32> = offsets
    .iter()
    .copied()
    .filter(|&o| o >= anchor_offset)
    .collect();

  let (window, offset) = if (index as usize) < first.len() {
    (0u64, first[index as usize])
  } else {
    let rest = index as usize - first.len();
    (1 + (rest / offsets.len()) as u64, offsets[rest % offsets.len()])
  };

  let days_ahead = window * u64::from(span_weeks) * 7 + u64::from(offset);
  window_start.checked_add_days(Days::new(days_ahead))
}

/// Months `anchor_month + j × interval`; month 0 is skipped when its
/// (clamped) day falls before the anchor.
fn nth_monthly(anchor: NaiveDate, day_of_month: u8, interval: u32, index: u32) -> Option<NaiveDate> {
  let month_start = anchor.with_day(1)?;
  let in_anchor_month = clamp_day(month_start, day_of_month)?;
  let skip = u32::from(in_anchor_month < anchor);

  let months = u64::from(index + skip) * u64::from(interval);
  let target = month_start.checked_add_months(Months::new(u32::try_from(months).ok()?))?;
  clamp_day(target, day_of_month)
}

/// `day` within the month of `month_start`, or the month's last day.
fn clamp_day(month_start: NaiveDate, day: u8) -> Option<NaiveDate> {
  let last = last_day_of_month(month_start)?;
  month_start.with_day(u32::from(day).min(last))
}

fn last_day_of_month(month_start: NaiveDate) -> Option<u32> {
  let next = month_start.checked_add_months(Months::new(1))?;
  Some(next.pred_opt()?.day())
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;

  fn d(y: i32, m: u32, day: u32) -> NaiveDate { NaiveDate::from_ymd_opt(y, m, day).unwrap() }

  fn pattern(rule: Recurrence, end: EndCondition) -> RecurrencePattern {
    RecurrencePattern { rule, end }
  }

  fn dates(c: &[Candidate]) -> Vec<NaiveDate> { c.iter().map(|c| c.date).collect() }

  fn weekly(days: &[u8]) -> Recurrence {
    Recurrence::Weekly {
      interval:     1,
      days_of_week: WeekdaySet::from_indices(days.iter().copied()).unwrap(),
    }
  }

  #[test]
  fn daily_with_interval() {
    let p = pattern(Recurrence::Daily { interval: 3 }, EndCondition::Never);
    let c = generate(&p, d(2025, 1, 30), 1, 3, &Cadences::default()).unwrap();
    assert_eq!(dates(&c), vec![d(2025, 1, 30), d(2025, 2, 2), d(2025, 2, 5)]);
    assert_eq!(c[2].sequence, 3);
  }

  #[test]
  fn weekly_multiple_days_ascending_within_window() {
    // 2025-01-15 is a Wednesday; Monday of that week is before the anchor.
    let p = pattern(weekly(&[1, 3, 5]), EndCondition::Never);
    let c = generate(&p, d(2025, 1, 15), 1, 5, &Cadences::default()).unwrap();
    assert_eq!(dates(&c), vec![
      d(2025, 1, 15),
      d(2025, 1, 17),
      d(2025, 1, 20),
      d(2025, 1, 22),
      d(2025, 1, 24),
    ]);
  }

  #[test]
  fn biweekly_skips_alternate_weeks() {
    let p = pattern(
      Recurrence::Biweekly {
        interval:     1,
        days_of_week: WeekdaySet::from_indices([2]).unwrap(),
      },
      EndCondition::Never,
    );
    let c = generate(&p, d(2025, 3, 4), 1, 3, &Cadences::default()).unwrap();
    assert_eq!(dates(&c), vec![d(2025, 3, 4), d(2025, 3, 18), d(2025, 4, 1)]);
  }

  #[test]
  fn monthly_clamps_to_month_end() {
    let p = pattern(
      Recurrence::Monthly { interval: 1, day_of_month: 31 },
      EndCondition::Never,
    );
    let c = generate(&p, d(2025, 1, 31), 1, 4, &Cadences::default()).unwrap();
    assert_eq!(dates(&c), vec![
      d(2025, 1, 31),
      d(2025, 2, 28),
      d(2025, 3, 31),
      d(2025, 4, 30),
    ]);

    let leap = generate(&p, d(2024, 1, 10), 2, 1, &Cadences::default()).unwrap();
    assert_eq!(dates(&leap), vec![d(2024, 2, 29)]);
  }

  #[test]
  fn monthly_skips_anchor_month_when_day_already_passed() {
    let p = pattern(
      Recurrence::Monthly { interval: 2, day_of_month: 5 },
      EndCondition::Never,
    );
    let c = generate(&p, d(2025, 1, 15), 1, 2, &Cadences::default()).unwrap();
    assert_eq!(dates(&c), vec![d(2025, 3, 5), d(2025, 5, 5)]);
  }

  #[test]
  fn after_count_stops_generation() {
    let p = pattern(
      Recurrence::Monthly { interval: 1, day_of_month: 15 },
      EndCondition::AfterCount { count: 3 },
    );
    let c = generate(&p, d(2025, 1, 15), 1, 10, &Cadences::default()).unwrap();
    assert_eq!(dates(&c), vec![d(2025, 1, 15), d(2025, 2, 15), d(2025, 3, 15)]);

    let rest = generate(&p, d(2025, 1, 15), 4, 10, &Cadences::default()).unwrap();
    assert!(rest.is_empty());
  }

  #[test]
  fn on_date_is_inclusive() {
    let p = pattern(
      Recurrence::Daily { interval: 1 },
      EndCondition::OnDate { date: d(2025, 1, 17) },
    );
    let c = generate(&p, d(2025, 1, 15), 1, 10, &Cadences::default()).unwrap();
    assert_eq!(c.len(), 3);
    assert_eq!(
      planned_count(&p, d(2025, 1, 15), 100, &Cadences::default()).unwrap(),
      Some(3)
    );
  }

  #[test]
  fn resuming_from_later_sequence_matches_full_run() {
    let p = pattern(weekly(&[0, 6]), EndCondition::Never);
    let all = generate(&p, d(2025, 6, 4), 1, 12, &Cadences::default()).unwrap();
    let tail = generate(&p, d(2025, 6, 4), 7, 6, &Cadences::default()).unwrap();
    assert_eq!(&all[6..], tail.as_slice());
  }

  #[test]
  fn business_days_skip_weekends() {
    let p = pattern(
      Recurrence::Custom { interval: 2, cadence: "weekdays".into() },
      EndCondition::Never,
    );
    // Saturday anchor: first business day is Monday the 6th.
    let c = generate(&p, d(2025, 1, 4), 1, 4, &Cadences::default()).unwrap();
    assert_eq!(dates(&c), vec![
      d(2025, 1, 6),
      d(2025, 1, 8),
      d(2025, 1, 10),
      d(2025, 1, 14),
    ]);
  }

  struct Backwards;

  impl Cadence for Backwards {
    fn nth(&self, anchor: NaiveDate, _: u32, index: u32) -> Option<NaiveDate> {
      anchor.checked_add_days(Days::new(u64::from(10 - index.min(10))))
    }
  }

  #[test]
  fn non_monotonic_cadence_is_rejected() {
    let mut cadences = Cadences::default();
    cadences.register("backwards", Backwards);
    let p = pattern(
      Recurrence::Custom { interval: 1, cadence: "backwards".into() },
      EndCondition::Never,
    );
    let err = generate(&p, d(2025, 1, 1), 1, 3, &cadences).unwrap_err();
    assert!(matches!(err, Error::NonMonotonicCadence { .. }));
  }

  #[test]
  fn unknown_cadence_errors() {
    let p = pattern(
      Recurrence::Custom { interval: 1, cadence: "nope".into() },
      EndCondition::Never,
    );
    let err = generate(&p, d(2025, 1, 1), 1, 1, &Cadences::empty()).unwrap_err();
    assert!(matches!(err, Error::UnknownCadence(_)));
  }

  #[test]
  fn planned_count_over_cap() {
    let p = pattern(
      Recurrence::Daily { interval: 1 },
      EndCondition::OnDate { date: d(2026, 1, 1) },
    );
    let err = planned_count(&p, d(2025, 1, 1), 30, &Cadences::default()).unwrap_err();
    assert!(matches!(err, Error::BoundExceeded { limit: 30, .. }));
  }

  proptest! {
    #[test]
    fn weekly_mondays_are_seven_days_apart(
      offset in 0u64..3650,
      from_seq in 1u32..500,
      count in 1u32..60,
    ) {
      let anchor = d(2020, 1, 1) + Days::new(offset);
      let p = pattern(weekly(&[1]), EndCondition::Never);
      let c = generate(&p, anchor, from_seq, count, &Cadences::default()).unwrap();
      prop_assert_eq!(c.len(), count as usize);
      for w in c.windows(2) {
        prop_assert_eq!((w[1].date - w[0].date).num_days(), 7);
        prop_assert_eq!(w[1].sequence, w[0].sequence + 1);
      }
      for cand in &c {
        prop_assert_eq!(cand.date.weekday(), Weekday::Mon);
        prop_assert!(cand.date >= anchor);
      }
    }

    #[test]
    fn generation_is_deterministic(
      offset in 0u64..3650,
      dom in 1u8..=31,
      interval in 1u32..6,
      from_seq in 1u32..100,
    ) {
      let anchor = d(2020, 1, 1) + Days::new(offset);
      let p = pattern(Recurrence::Monthly { interval, day_of_month: dom }, EndCondition::Never);
      let a = generate(&p, anchor, from_seq, 12, &Cadences::default()).unwrap();
      let b = generate(&p, anchor, from_seq, 12, &Cadences::default()).unwrap();
      prop_assert_eq!(serde_json::to_vec(&a).unwrap(), serde_json::to_vec(&b).unwrap());
      for w in a.windows(2) {
        prop_assert!(w[1].date > w[0].date);
      }
    }
  }
}
