//! Recurrence patterns and the Pattern Validator.
//!
//! A [`PatternDraft`] is the loosely-typed payload a booking front end sends:
//! every field is optional and any combination can be expressed. The
//! validator turns it into a [`RecurrencePattern`], whose shape makes invalid
//! combinations (weekdays on a monthly rule, a day-of-month on a daily rule)
//! unrepresentable.

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::{
  error::{ValidationError, ViolationKind},
  generator::{self, Cadences},
};

/// Upper bound on `interval`; anything larger is almost certainly a typo.
pub const MAX_INTERVAL: u32 = 1000;

// ─── Weekdays ────────────────────────────────────────────────────────────────

/// A non-empty set of weekdays, indexed 0 = Sunday … 6 = Saturday.
///
/// Serialised as an ascending array of indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<u8>", try_from = "Vec<u8>")]
pub struct WeekdaySet(u8);

impl WeekdaySet {
  /// Build a set from weekday indices. Returns `None` if the input is empty
  /// or any index is outside `0..=6`.
  pub fn from_indices(indices: impl IntoIterator<Item = u8>) -> Option<Self> {
    let mut bits = 0u8;
    for i in indices {
      if i > 6 {
        return None;
      }
      bits |= 1 << i;
    }
    (bits != 0).then_some(Self(bits))
  }

  pub fn contains(&self, day: Weekday) -> bool {
    self.0 & (1 << day.num_days_from_sunday()) != 0
  }

  /// Member indices in ascending order.
  pub fn indices(&self) -> impl Iterator<Item = u8> + '_ {
    (0..7u8).filter(|i| self.0 & (1 << i) != 0)
  }

  pub fn len(&self) -> u32 { self.0.count_ones() }

  pub fn is_empty(&self) -> bool { self.0 == 0 }
}

impl From<WeekdaySet> for Vec<u8> {
  fn from(set: WeekdaySet) -> Self { set.indices().collect() }
}

impl TryFrom<Vec<u8>> for WeekdaySet {
  type Error = String;

  fn try_from(v: Vec<u8>) -> Result<Self, Self::Error> {
    Self::from_indices(v)
      .ok_or_else(|| "days_of_week must be a non-empty list of 0..=6".to_owned())
  }
}

// ─── Canonical pattern ───────────────────────────────────────────────────────

/// The repetition rule, tagged by frequency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frequency", rename_all = "snake_case")]
pub enum Recurrence {
  Daily {
    interval: u32,
  },
  Weekly {
    interval:     u32,
    days_of_week: WeekdaySet,
  },
  /// Like weekly, but each window spans `2 × interval` weeks.
  Biweekly {
    interval:     u32,
    days_of_week: WeekdaySet,
  },
  /// Falls on `day_of_month`, or the month's last day when it is shorter.
  Monthly {
    interval:     u32,
    day_of_month: u8,
  },
  /// Delegates date arithmetic to a registered [`generator::Cadence`].
  Custom {
    interval: u32,
    cadence:  String,
  },
}

impl Recurrence {
  pub fn interval(&self) -> u32 {
    match self {
      Self::Daily { interval }
      | Self::Weekly { interval, .. }
      | Self::Biweekly { interval, .. }
      | Self::Monthly { interval, .. }
      | Self::Custom { interval, .. } => *interval,
    }
  }

  pub fn frequency(&self) -> &'static str {
    match self {
      Self::Daily { .. } => "daily",
      Self::Weekly { .. } => "weekly",
      Self::Biweekly { .. } => "biweekly",
      Self::Monthly { .. } => "monthly",
      Self::Custom { .. } => "custom",
    }
  }
}

/// When a series stops producing occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndCondition {
  /// Open-ended; bounded only by the materialization horizon.
  Never,
  AfterCount { count: u32 },
  /// Inclusive end date.
  OnDate { date: NaiveDate },
}

/// A validated, immutable recurrence definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePattern {
  #[serde(flatten)]
  pub rule: Recurrence,
  pub end:  EndCondition,
}

impl RecurrencePattern {
  pub fn is_bounded(&self) -> bool { !matches!(self.end, EndCondition::Never) }
}

// ─── Draft ───────────────────────────────────────────────────────────────────

/// The raw pattern payload, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternDraft {
  /// `daily` | `weekly` | `biweekly` | `monthly` | `custom`
  pub frequency:             String,
  /// Defaults to 1 when absent.
  pub interval:              Option<i64>,
  pub days_of_week:          Option<Vec<i64>>,
  pub day_of_month:          Option<i64>,
  /// Registered strategy name; custom patterns only.
  pub cadence:               Option<String>,
  /// `never` | `after_occurrences` | `on_date`
  pub end_type:              String,
  pub end_after_occurrences: Option<i64>,
  pub end_date:              Option<NaiveDate>,
}

impl PatternDraft {
  /// Validate the draft against the series `anchor` and return its canonical
  /// form.
  ///
  /// Every violated field is reported, not just the first one. `cap` bounds
  /// the number of occurrences a bounded pattern may produce.
  pub fn validate(
    &self,
    anchor: NaiveDate,
    cap: u32,
    cadences: &Cadences,
  ) -> Result<RecurrencePattern, ValidationError> {
    let mut errors = ValidationError::default();

    let interval = match self.interval {
      None => Some(1),
      Some(i) if (1..=i64::from(MAX_INTERVAL)).contains(&i) => Some(i as u32),
      Some(_) => {
        errors.push("interval", ViolationKind::OutOfRange {
          min: 1,
          max: i64::from(MAX_INTERVAL),
        });
        None
      }
    };

    let rule = self.validate_rule(interval, cadences, &mut errors);
    let end = self.validate_end(anchor, cap, &mut errors);

    let (Some(rule), Some(end)) = (rule, end) else {
      return Err(errors);
    };
    if !errors.is_empty() {
      return Err(errors);
    }

    let pattern = RecurrencePattern { rule, end };

    // Only now can an `on_date` pattern be counted.
    if let EndCondition::OnDate { .. } = pattern.end {
      match generator::planned_count(&pattern, anchor, cap, cadences) {
        Ok(_) => {}
        Err(crate::Error::BoundExceeded { limit, .. }) => {
          errors.push("end_date", ViolationKind::BoundExceeded { limit });
        }
        Err(e) => {
          errors.push("cadence", ViolationKind::Invalid { reason: e.to_string() });
        }
      }
    }

    errors.finish(pattern)
  }

  fn validate_rule(
    &self,
    interval: Option<u32>,
    cadences: &Cadences,
    errors: &mut ValidationError,
  ) -> Option<Recurrence> {
    let weekly = matches!(self.frequency.as_str(), "weekly" | "biweekly");
    let monthly = self.frequency == "monthly";
    let custom = self.frequency == "custom";

    if !weekly && self.days_of_week.is_some() {
      errors.push("days_of_week", ViolationKind::NotAllowed);
    }
    if !monthly && self.day_of_month.is_some() {
      errors.push("day_of_month", ViolationKind::NotAllowed);
    }
    if !custom && self.cadence.is_some() {
      errors.push("cadence", ViolationKind::NotAllowed);
    }

    match self.frequency.as_str() {
      "daily" => Some(Recurrence::Daily { interval: interval? }),
      "weekly" | "biweekly" => {
        let days = self.validate_days(errors);
        let (interval, days_of_week) = (interval?, days?);
        Some(if self.frequency == "weekly" {
          Recurrence::Weekly { interval, days_of_week }
        } else {
          Recurrence::Biweekly { interval, days_of_week }
        })
      }
      "monthly" => {
        let day = match self.day_of_month {
          None => {
            errors.push("day_of_month", ViolationKind::Required);
            None
          }
          Some(d) if (1..=31).contains(&d) => Some(d as u8),
          Some(_) => {
            errors.push("day_of_month", ViolationKind::OutOfRange { min: 1, max: 31 });
            None
          }
        };
        Some(Recurrence::Monthly { interval: interval?, day_of_month: day? })
      }
      "custom" => {
        let cadence = match &self.cadence {
          None => {
            errors.push("cadence", ViolationKind::Required);
            None
          }
          Some(name) if cadences.contains(name) => Some(name.clone()),
          Some(name) => {
            errors.push("cadence", ViolationKind::Unknown { value: name.clone() });
            None
          }
        };
        Some(Recurrence::Custom { interval: interval?, cadence: cadence? })
      }
      other => {
        errors.push("frequency", ViolationKind::Unknown { value: other.to_owned() });
        None
      }
    }
  }

  fn validate_days(&self, errors: &mut ValidationError) -> Option<WeekdaySet> {
    let days = match &self.days_of_week {
      Some(d) if !d.is_empty() => d,
      _ => {
        errors.push("days_of_week", ViolationKind::Required);
        return None;
      }
    };
    if days.iter().any(|d| !(0..=6).contains(d)) {
      errors.push("days_of_week", ViolationKind::OutOfRange { min: 0, max: 6 });
      return None;
    }
    WeekdaySet::from_indices(days.iter().map(|&d| d as u8))
  }

  fn validate_end(
    &self,
    anchor: NaiveDate,
    cap: u32,
    errors: &mut ValidationError,
  ) -> Option<EndCondition> {
    let by_count = self.end_type == "after_occurrences";
    let by_date = self.end_type == "on_date";

    if !by_count && self.end_after_occurrences.is_some() {
      errors.push("end_after_occurrences", ViolationKind::NotAllowed);
    }
    if !by_date && self.end_date.is_some() {
      errors.push("end_date", ViolationKind::NotAllowed);
    }

    match self.end_type.as_str() {
      "never" => Some(EndCondition::Never),
      "after_occurrences" => match self.end_after_occurrences {
        None => {
          errors.push("end_after_occurrences", ViolationKind::Required);
          None
        }
        Some(n) if n < 1 => {
          errors.push("end_after_occurrences", ViolationKind::OutOfRange {
            min: 1,
            max: i64::from(cap),
          });
          None
        }
        Some(n) if n > i64::from(cap) => {
          errors.push("end_after_occurrences", ViolationKind::BoundExceeded { limit: cap });
          None
        }
        Some(n) => Some(EndCondition::AfterCount { count: n as u32 }),
      },
      "on_date" => match self.end_date {
        None => {
          errors.push("end_date", ViolationKind::Required);
          None
        }
        Some(date) if date <= anchor => {
          errors.push("end_date", ViolationKind::NotAfterAnchor);
          None
        }
        Some(date) => Some(EndCondition::OnDate { date }),
      },
      other => {
        errors.push("end_type", ViolationKind::Unknown { value: other.to_owned() });
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn anchor() -> NaiveDate { NaiveDate::from_ymd_opt(2025, 1, 15).unwrap() }

  fn monthly_draft() -> PatternDraft {
    PatternDraft {
      frequency: "monthly".into(),
      day_of_month: Some(15),
      end_type: "after_occurrences".into(),
      end_after_occurrences: Some(3),
      ..Default::default()
    }
  }

  fn fields(err: &ValidationError) -> Vec<&'static str> {
    err.violations.iter().map(|v| v.field).collect()
  }

  #[test]
  fn valid_monthly_pattern() {
    let p = monthly_draft()
      .validate(anchor(), 10_000, &Cadences::default())
      .unwrap();
    assert_eq!(p.rule, Recurrence::Monthly { interval: 1, day_of_month: 15 });
    assert_eq!(p.end, EndCondition::AfterCount { count: 3 });
  }

  #[test]
  fn reports_every_violation() {
    let draft = PatternDraft {
      frequency: "weekly".into(),
      interval: Some(0),
      days_of_week: Some(vec![]),
      day_of_month: Some(3),
      end_type: "on_date".into(),
      end_date: Some(NaiveDate::from_ymd_opt(2024, 12, 1).unwrap()),
      ..Default::default()
    };
    let err = draft
      .validate(anchor(), 10_000, &Cadences::default())
      .unwrap_err();
    let f = fields(&err);
    assert!(f.contains(&"interval"));
    assert!(f.contains(&"days_of_week"));
    assert!(f.contains(&"day_of_month"));
    assert!(f.contains(&"end_date"));
    assert_eq!(err.violations.len(), 4);
  }

  #[test]
  fn weekday_out_of_range() {
    let draft = PatternDraft {
      frequency: "biweekly".into(),
      days_of_week: Some(vec![1, 7]),
      end_type: "never".into(),
      ..Default::default()
    };
    let err = draft
      .validate(anchor(), 10_000, &Cadences::default())
      .unwrap_err();
    assert_eq!(err.violations[0].field, "days_of_week");
    assert_eq!(err.violations[0].kind, ViolationKind::OutOfRange { min: 0, max: 6 });
  }

  #[test]
  fn absurd_count_is_bound_exceeded() {
    let mut draft = monthly_draft();
    draft.end_after_occurrences = Some(10_001);
    let err = draft
      .validate(anchor(), 10_000, &Cadences::default())
      .unwrap_err();
    assert!(err.is_bound_exceeded());
  }

  #[test]
  fn long_on_date_range_is_bound_exceeded() {
    let draft = PatternDraft {
      frequency: "daily".into(),
      end_type: "on_date".into(),
      end_date: Some(NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()),
      ..Default::default()
    };
    let err = draft.validate(anchor(), 100, &Cadences::default()).unwrap_err();
    assert!(err.is_bound_exceeded());
    assert_eq!(err.violations[0].field, "end_date");
  }

  #[test]
  fn unknown_frequency_and_end_type() {
    let draft = PatternDraft {
      frequency: "fortnightly".into(),
      end_type: "eventually".into(),
      ..Default::default()
    };
    let err = draft
      .validate(anchor(), 10_000, &Cadences::default())
      .unwrap_err();
    assert_eq!(fields(&err), vec!["frequency", "end_type"]);
  }

  #[test]
  fn custom_requires_registered_cadence() {
    let draft = PatternDraft {
      frequency: "custom".into(),
      cadence: Some("lunar".into()),
      end_type: "never".into(),
      ..Default::default()
    };
    let err = draft
      .validate(anchor(), 10_000, &Cadences::default())
      .unwrap_err();
    assert_eq!(err.violations[0].kind, ViolationKind::Unknown { value: "lunar".into() });

    let ok = PatternDraft { cadence: Some("weekdays".into()), ..draft }
      .validate(anchor(), 10_000, &Cadences::default())
      .unwrap();
    assert_eq!(ok.rule.frequency(), "custom");
  }

  #[test]
  fn pattern_json_shape() {
    let p = monthly_draft()
      .validate(anchor(), 10_000, &Cadences::default())
      .unwrap();
    let json = serde_json::to_value(&p).unwrap();
    assert_eq!(json["frequency"], "monthly");
    assert_eq!(json["day_of_month"], 15);
    assert_eq!(json["end"]["type"], "after_count");

    let back: RecurrencePattern = serde_json::from_value(json).unwrap();
    assert_eq!(back, p);
  }

  #[test]
  fn weekday_set_rejects_empty_and_large() {
    assert!(WeekdaySet::from_indices([]).is_none());
    assert!(WeekdaySet::from_indices([7]).is_none());
    let set = WeekdaySet::from_indices([5, 1, 3]).unwrap();
    assert_eq!(set.indices().collect::<Vec<_>>(), vec![1, 3, 5]);
    assert!(set.contains(Weekday::Mon));
    assert!(!set.contains(Weekday::Sun));
  }
}
