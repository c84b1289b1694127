//! The rule evaluator: `(RuleSet, instant) → Presence`.
//!
//! Each axis yields a `blocked` signal; the identity is absent if any axis is
//! blocked. An axis without a rule never blocks, so an empty rule set is
//! always present.

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{
  error::RuleError,
  schedule::{Axis, AxisRule, RuleMode, RuleSet},
};

// ─── Context ─────────────────────────────────────────────────────────────────

/// The instant a pass evaluates against, decomposed per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationContext {
  pub weekday: Weekday,
  pub date:    NaiveDate,
  /// Minute precision; seconds are dropped.
  pub time:    NaiveTime,
}

impl EvaluationContext {
  pub fn at(instant: NaiveDateTime) -> Self {
    let date = instant.date();
    let time = NaiveTime::from_hms_opt(instant.hour(), instant.minute(), 0)
      .unwrap_or(NaiveTime::MIN);
    Self { weekday: date.weekday(), date, time }
  }

  /// The current local wall-clock instant.
  pub fn now() -> Self { Self::at(Local::now().naive_local()) }

  /// `at` for an explicit instant, or `now` when none is given.
  pub fn at_or_now(raw: Option<&str>) -> Result<Self, RuleError> {
    raw.map(parse_instant).transpose().map(|instant| instant.map_or_else(Self::now, Self::at))
  }
}

/// Parse a local instant: `YYYY-MM-DDTHH:MM`, optionally with seconds, and
/// with either `T` or a space between date and time.
pub fn parse_instant(raw: &str) -> Result<NaiveDateTime, RuleError> {
  let raw = raw.trim();
  ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    .ok_or_else(|| RuleError::InvalidInstant(raw.to_owned()))
}

// ─── Result ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Presence {
  Present,
  Absent,
}

/// A presence decision together with the axes that forced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
  pub presence:   Presence,
  pub blocked_by: Vec<Axis>,
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

fn blocked<T>(rule: &AxisRule<T>, matches: bool) -> bool {
  match rule.mode {
    RuleMode::Deny => matches,
    RuleMode::Allow => !matches,
  }
}

/// Whether `axis` alone keeps the identity out at `ctx`.
///
/// An allow-set with no values can never match, so it always blocks.
pub fn axis_blocked(rules: &RuleSet, axis: Axis, ctx: &EvaluationContext) -> bool {
  match axis {
    Axis::Weekday => rules
      .weekday
      .as_ref()
      .is_some_and(|r| blocked(r, r.values.contains(ctx.weekday))),
    Axis::Date => rules
      .date
      .as_ref()
      .is_some_and(|r| blocked(r, r.values.contains(&ctx.date))),
    Axis::TimeOfDay => rules
      .time_of_day
      .as_ref()
      .is_some_and(|r| blocked(r, r.values.iter().any(|w| w.contains(ctx.time)))),
  }
}

pub fn evaluate(rules: &RuleSet, ctx: &EvaluationContext) -> Presence {
  if Axis::ALL.iter().any(|axis| axis_blocked(rules, *axis, ctx)) {
    Presence::Absent
  } else {
    Presence::Present
  }
}

/// Like [`evaluate`], but also names every blocking axis.
pub fn explain(rules: &RuleSet, ctx: &EvaluationContext) -> Evaluation {
  let blocked_by: Vec<Axis> = Axis::ALL
    .into_iter()
    .filter(|axis| axis_blocked(rules, *axis, ctx))
    .collect();
  let presence = if blocked_by.is_empty() {
    Presence::Present
  } else {
    Presence::Absent
  };
  Evaluation { presence, blocked_by }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schedule::{
    DateSet, RuleMode, ScheduleRule, TimeWindow, WeekdaySet, WindowList,
  };

  fn ctx(s: &str) -> EvaluationContext {
    EvaluationContext::at(
      NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap(),
    )
  }

  fn rules(list: &[(Axis, RuleMode, &str)]) -> RuleSet {
    list
      .iter()
      .map(|(axis, mode, values)| ScheduleRule::parse(*axis, *mode, &[*values]).unwrap())
      .collect()
  }

  #[test]
  fn context_decomposes_instant() {
    let c = EvaluationContext::at(
      NaiveDateTime::parse_from_str("2026-01-07 09:15:42", "%Y-%m-%d %H:%M:%S")
        .unwrap(),
    );
    assert_eq!(c.weekday, Weekday::Wed);
    assert_eq!(c.date, NaiveDate::from_ymd_opt(2026, 1, 7).unwrap());
    assert_eq!(c.time, NaiveTime::from_hms_opt(9, 15, 0).unwrap());
  }

  #[test]
  fn instants_accept_both_separators() {
    let expected = ctx("2026-01-07 09:15");
    for raw in ["2026-01-07T09:15", "2026-01-07 09:15:59", " 2026-01-07T09:15:00 "] {
      assert_eq!(EvaluationContext::at_or_now(Some(raw)).unwrap(), expected, "{raw}");
    }
    assert!(matches!(
      EvaluationContext::at_or_now(Some("tomorrow")),
      Err(RuleError::InvalidInstant(_))
    ));
  }

  #[test]
  fn empty_rule_set_is_always_present() {
    let empty = RuleSet::default();
    for instant in [
      "2026-01-05 00:00",
      "2026-01-10 12:30",
      "2026-12-31 23:59",
      "2027-02-28 07:00",
    ] {
      assert_eq!(evaluate(&empty, &ctx(instant)), Presence::Present);
    }
  }

  #[test]
  fn weekend_deny_set() {
    // Scenario A: deny Saturday and Sunday.
    let r = rules(&[(Axis::Weekday, RuleMode::Deny, "6,7")]);
    assert_eq!(evaluate(&r, &ctx("2026-01-07 10:00")), Presence::Present); // Wednesday
    assert_eq!(evaluate(&r, &ctx("2026-01-10 10:00")), Presence::Absent); // Saturday
  }

  #[test]
  fn office_hours_allow_set() {
    // Scenario B: present only between 08:00 and 18:00.
    let r = rules(&[(Axis::TimeOfDay, RuleMode::Allow, "08:00-18:00")]);
    assert_eq!(evaluate(&r, &ctx("2026-01-07 07:00")), Presence::Absent);
    assert_eq!(evaluate(&r, &ctx("2026-01-07 09:00")), Presence::Present);
    assert_eq!(evaluate(&r, &ctx("2026-01-07 18:00")), Presence::Present);
    assert_eq!(evaluate(&r, &ctx("2026-01-07 18:01")), Presence::Absent);
  }

  #[test]
  fn most_restrictive_axis_wins() {
    // Scenario C: the date axis admits 2026-01-05 but Mondays are denied.
    let r = rules(&[
      (Axis::Weekday, RuleMode::Deny, "1"),
      (Axis::Date, RuleMode::Allow, "2026-01-05"),
    ]);
    let e = explain(&r, &ctx("2026-01-05 10:00"));
    assert_eq!(e.presence, Presence::Absent);
    assert_eq!(e.blocked_by, vec![Axis::Weekday]);
  }

  #[test]
  fn any_blocked_axis_means_absent() {
    let r = rules(&[
      (Axis::Weekday, RuleMode::Allow, "1,2,3,4,5"),
      (Axis::Date, RuleMode::Deny, "2026-01-07"),
      (Axis::TimeOfDay, RuleMode::Deny, "12:00-13:00"),
    ]);
    for instant in [
      "2026-01-07 10:00", // denied date
      "2026-01-08 12:30", // lunch window
      "2026-01-10 10:00", // Saturday
    ] {
      let c = ctx(instant);
      let blocking = Axis::ALL.iter().filter(|a| axis_blocked(&r, **a, &c)).count();
      assert_eq!(blocking, 1, "{instant}");
      assert_eq!(evaluate(&r, &c), Presence::Absent, "{instant}");
    }
    assert_eq!(evaluate(&r, &ctx("2026-01-08 10:00")), Presence::Present);
  }

  #[test]
  fn matching_any_window_satisfies_the_axis() {
    let r = rules(&[(Axis::TimeOfDay, RuleMode::Allow, "08:00-12:00,14:00-18:00")]);
    assert_eq!(evaluate(&r, &ctx("2026-01-07 11:00")), Presence::Present);
    assert_eq!(evaluate(&r, &ctx("2026-01-07 13:00")), Presence::Absent);
    assert_eq!(evaluate(&r, &ctx("2026-01-07 15:00")), Presence::Present);
  }

  #[test]
  fn empty_allow_sets_always_block() {
    let degenerate = RuleSet {
      weekday:     Some(AxisRule::allow(WeekdaySet::EMPTY)),
      date:        Some(AxisRule::allow(DateSet::new())),
      time_of_day: Some(AxisRule::allow(WindowList::new())),
    };
    let e = explain(&degenerate, &ctx("2026-01-07 10:00"));
    assert_eq!(e.presence, Presence::Absent);
    assert_eq!(e.blocked_by, Axis::ALL.to_vec());
  }

  #[test]
  fn empty_deny_sets_never_block() {
    let harmless = RuleSet {
      weekday:     Some(AxisRule::deny(WeekdaySet::EMPTY)),
      date:        None,
      time_of_day: Some(AxisRule::deny(vec![TimeWindow {
        start: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
        end:   NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
      }])),
    };
    assert_eq!(evaluate(&harmless, &ctx("2026-01-07 10:00")), Presence::Present);
  }
}
