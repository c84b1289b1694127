//! Schedule rules: the per-axis allow/deny sets an identity can hold.
//!
//! An identity owns at most one rule per [`Axis`]. The exclusivity is
//! structural: a [`RuleSet`] has exactly one slot per axis, so writing an
//! allow-set into a slot replaces whatever deny-set sat there, and vice versa.
//!
//! All parsing and validation happens here, at rule-write time. The evaluator
//! only ever sees well-formed values.

use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::RuleError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

// ─── Identity ────────────────────────────────────────────────────────────────

/// The terminal's user slot number; the stable key of an identity.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Uid(pub u32);

impl fmt::Display for Uid {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(&self.0, f) }
}

impl FromStr for Uid {
  type Err = std::num::ParseIntError;

  fn from_str(s: &str) -> Result<Self, Self::Err> { s.trim().parse().map(Self) }
}

// ─── Axis and mode ───────────────────────────────────────────────────────────

/// One of the three independent scheduling dimensions.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Axis {
  Weekday,
  Date,
  TimeOfDay,
}

impl Axis {
  pub const ALL: [Axis; 3] = [Axis::Weekday, Axis::Date, Axis::TimeOfDay];
}

/// Whether matching values block the identity or are the only values that
/// admit it.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuleMode {
  /// Absent while a value matches.
  Deny,
  /// Present only while a value matches.
  Allow,
}

// ─── Weekdays ────────────────────────────────────────────────────────────────

/// Map an ISO weekday number (1 = Monday … 7 = Sunday) to a [`Weekday`].
pub fn iso_weekday(n: u8) -> Option<Weekday> {
  match n {
    1 => Some(Weekday::Mon),
    2 => Some(Weekday::Tue),
    3 => Some(Weekday::Wed),
    4 => Some(Weekday::Thu),
    5 => Some(Weekday::Fri),
    6 => Some(Weekday::Sat),
    7 => Some(Weekday::Sun),
    _ => None,
  }
}

/// A set of weekdays, serialised as a sorted list of ISO numbers.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct WeekdaySet(u8);

fn weekday_bit(day: Weekday) -> u8 { 1 << day.num_days_from_monday() }

impl WeekdaySet {
  pub const EMPTY: Self = Self(0);

  /// Build a set from ISO weekday numbers, rejecting anything outside 1–7.
  pub fn from_iso(days: impl IntoIterator<Item = u8>) -> Result<Self, RuleError> {
    let mut set = Self::EMPTY;
    for n in days {
      let day =
        iso_weekday(n).ok_or_else(|| RuleError::InvalidWeekday(n.to_string()))?;
      set.insert(day);
    }
    Ok(set)
  }

  pub fn contains(self, day: Weekday) -> bool { self.0 & weekday_bit(day) != 0 }

  pub fn insert(&mut self, day: Weekday) { self.0 |= weekday_bit(day); }

  pub fn union(self, other: Self) -> Self { Self(self.0 | other.0) }

  pub fn is_empty(self) -> bool { self.0 == 0 }

  pub fn len(self) -> usize { self.0.count_ones() as usize }

  /// Members in Monday-first order.
  pub fn iter(self) -> impl Iterator<Item = Weekday> {
    (1..=7u8)
      .filter_map(iso_weekday)
      .filter(move |day| self.contains(*day))
  }
}

impl FromIterator<Weekday> for WeekdaySet {
  fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
    let mut set = Self::EMPTY;
    for day in iter {
      set.insert(day);
    }
    set
  }
}

impl TryFrom<Vec<u8>> for WeekdaySet {
  type Error = RuleError;

  fn try_from(days: Vec<u8>) -> Result<Self, Self::Error> { Self::from_iso(days) }
}

impl From<WeekdaySet> for Vec<u8> {
  fn from(set: WeekdaySet) -> Self {
    set.iter().map(|d| d.number_from_monday() as u8).collect()
  }
}

impl fmt::Debug for WeekdaySet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_set().entries(self.iter()).finish()
  }
}

// ─── Time windows ────────────────────────────────────────────────────────────

/// An inclusive time-of-day interval, `start ≤ t ≤ end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
  #[serde(with = "hhmm")]
  pub start: NaiveTime,
  #[serde(with = "hhmm")]
  pub end:   NaiveTime,
}

impl TimeWindow {
  /// Windows never wrap past midnight; `start` must not be after `end`.
  pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, RuleError> {
    if start > end {
      return Err(RuleError::InvertedWindow {
        start: start.format(TIME_FORMAT).to_string(),
        end:   end.format(TIME_FORMAT).to_string(),
      });
    }
    Ok(Self { start, end })
  }

  pub fn contains(&self, t: NaiveTime) -> bool { self.start <= t && t <= self.end }
}

impl fmt::Display for TimeWindow {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}-{}",
      self.start.format(TIME_FORMAT),
      self.end.format(TIME_FORMAT)
    )
  }
}

impl FromStr for TimeWindow {
  type Err = RuleError;

  /// Parse `HH:MM-HH:MM`.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (start, end) = s
      .trim()
      .split_once('-')
      .ok_or_else(|| RuleError::InvalidWindow(s.trim().to_owned()))?;
    Self::new(parse_time(start)?, parse_time(end)?)
  }
}

mod hhmm {
  use chrono::NaiveTime;
  use serde::{Deserialize, Deserializer, Serializer, de};

  pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&t.format(super::TIME_FORMAT))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
    let raw = String::deserialize(d)?;
    super::parse_time(&raw).map_err(de::Error::custom)
  }
}

// ─── Value parsing ───────────────────────────────────────────────────────────

pub fn parse_weekday(raw: &str) -> Result<Weekday, RuleError> {
  let raw = raw.trim();
  raw
    .parse::<u8>()
    .ok()
    .and_then(iso_weekday)
    .ok_or_else(|| RuleError::InvalidWeekday(raw.to_owned()))
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, RuleError> {
  let raw = raw.trim();
  NaiveDate::parse_from_str(raw, DATE_FORMAT)
    .map_err(|_| RuleError::InvalidDate(raw.to_owned()))
}

pub fn parse_time(raw: &str) -> Result<NaiveTime, RuleError> {
  let raw = raw.trim();
  NaiveTime::parse_from_str(raw, TIME_FORMAT)
    .map_err(|_| RuleError::InvalidTime(raw.to_owned()))
}

/// Longest range `FROM..TO` may expand to, in days.
pub const MAX_RANGE_DAYS: i64 = 366;

/// Every date from `from` to `to`, both included.
pub fn expand_range(from: NaiveDate, to: NaiveDate) -> Result<Vec<NaiveDate>, RuleError> {
  if from > to {
    return Err(RuleError::InvertedRange {
      from: from.to_string(),
      to:   to.to_string(),
    });
  }
  if (to - from).num_days() >= MAX_RANGE_DAYS {
    return Err(RuleError::RangeTooLong {
      from: from.to_string(),
      to:   to.to_string(),
      max:  MAX_RANGE_DAYS,
    });
  }
  Ok(from.iter_days().take_while(|d| *d <= to).collect())
}

/// Parse a single date or an inclusive `FROM..TO` range.
pub fn parse_dates(raw: &str) -> Result<Vec<NaiveDate>, RuleError> {
  match raw.split_once("..") {
    Some((from, to)) => expand_range(parse_date(from)?, parse_date(to)?),
    None => Ok(vec![parse_date(raw)?]),
  }
}

// ─── Rules ───────────────────────────────────────────────────────────────────

pub type DateSet = BTreeSet<NaiveDate>;
pub type WindowList = Vec<TimeWindow>;

/// A deny-set or allow-set over one axis's value shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisRule<T> {
  pub mode:   RuleMode,
  pub values: T,
}

impl<T> AxisRule<T> {
  pub fn deny(values: T) -> Self { Self { mode: RuleMode::Deny, values } }

  pub fn allow(values: T) -> Self { Self { mode: RuleMode::Allow, values } }
}

/// A rule for exactly one axis. The variant name is the axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "axis", rename_all = "snake_case")]
pub enum ScheduleRule {
  Weekday(AxisRule<WeekdaySet>),
  Date(AxisRule<DateSet>),
  TimeOfDay(AxisRule<WindowList>),
}

impl ScheduleRule {
  pub fn axis(&self) -> Axis {
    match self {
      Self::Weekday(_) => Axis::Weekday,
      Self::Date(_) => Axis::Date,
      Self::TimeOfDay(_) => Axis::TimeOfDay,
    }
  }

  pub fn mode(&self) -> RuleMode {
    match self {
      Self::Weekday(r) => r.mode,
      Self::Date(r) => r.mode,
      Self::TimeOfDay(r) => r.mode,
    }
  }

  pub fn is_empty(&self) -> bool {
    match self {
      Self::Weekday(r) => r.values.is_empty(),
      Self::Date(r) => r.values.is_empty(),
      Self::TimeOfDay(r) => r.values.is_empty(),
    }
  }

  /// Validate operator input for `axis`.
  ///
  /// Each raw value may itself be a comma-separated list. Weekdays are ISO
  /// numbers, dates are `YYYY-MM-DD` or `FROM..TO`, windows are
  /// `HH:MM-HH:MM`. An empty value list is rejected.
  pub fn parse<S: AsRef<str>>(
    axis: Axis,
    mode: RuleMode,
    raw: &[S],
  ) -> Result<Self, RuleError> {
    let tokens: Vec<&str> = raw
      .iter()
      .flat_map(|r| r.as_ref().split(','))
      .map(str::trim)
      .filter(|t| !t.is_empty())
      .collect();

    if tokens.is_empty() {
      return Err(RuleError::EmptyValues(axis));
    }

    let rule = match axis {
      Axis::Weekday => Self::Weekday(AxisRule {
        mode,
        values: tokens
          .iter()
          .map(|t| parse_weekday(t))
          .collect::<Result<WeekdaySet, _>>()?,
      }),
      Axis::Date => {
        let mut values = DateSet::new();
        for token in &tokens {
          values.extend(parse_dates(token)?);
        }
        Self::Date(AxisRule { mode, values })
      }
      Axis::TimeOfDay => {
        let mut values = WindowList::new();
        for token in &tokens {
          let window: TimeWindow = token.parse()?;
          if !values.contains(&window) {
            values.push(window);
          }
        }
        Self::TimeOfDay(AxisRule { mode, values })
      }
    };
    Ok(rule)
  }

  /// Re-check what deserialisation cannot: every window runs forward.
  pub fn validate(&self) -> Result<(), RuleError> {
    if let Self::TimeOfDay(r) = self {
      for w in &r.values {
        TimeWindow::new(w.start, w.end)?;
      }
    }
    Ok(())
  }

  /// Fold `other` into `self` when both are the same kind on the same axis;
  /// otherwise `other` wins outright, as a plain write would.
  pub fn merge(self, other: Self) -> Self {
    match (self, other) {
      (Self::Weekday(a), Self::Weekday(b)) if a.mode == b.mode => {
        Self::Weekday(AxisRule { mode: a.mode, values: a.values.union(b.values) })
      }
      (Self::Date(mut a), Self::Date(b)) if a.mode == b.mode => {
        a.values.extend(b.values);
        Self::Date(a)
      }
      (Self::TimeOfDay(mut a), Self::TimeOfDay(b)) if a.mode == b.mode => {
        for window in b.values {
          if !a.values.contains(&window) {
            a.values.push(window);
          }
        }
        Self::TimeOfDay(a)
      }
      (_, other) => other,
    }
  }

  /// Human-readable value list, e.g. `Sat, Sun` or `08:00-12:00, 14:00-18:00`.
  pub fn describe_values(&self) -> String {
    match self {
      Self::Weekday(r) => r
        .values
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", "),
      Self::Date(r) => r
        .values
        .iter()
        .map(|d| d.format(DATE_FORMAT).to_string())
        .collect::<Vec<_>>()
        .join(", "),
      Self::TimeOfDay(r) => r
        .values
        .iter()
        .map(TimeWindow::to_string)
        .collect::<Vec<_>>()
        .join(", "),
    }
  }
}

impl fmt::Display for ScheduleRule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}: [{}]", self.axis(), self.mode(), self.describe_values())
  }
}

// ─── RuleSet ─────────────────────────────────────────────────────────────────

/// Every rule one identity holds; one slot per axis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub weekday:     Option<AxisRule<WeekdaySet>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub date:        Option<AxisRule<DateSet>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub time_of_day: Option<AxisRule<WindowList>>,
}

impl RuleSet {
  pub fn is_empty(&self) -> bool {
    self.weekday.is_none() && self.date.is_none() && self.time_of_day.is_none()
  }

  pub fn len(&self) -> usize { self.rules().count() }

  pub fn get(&self, axis: Axis) -> Option<ScheduleRule> {
    match axis {
      Axis::Weekday => self.weekday.clone().map(ScheduleRule::Weekday),
      Axis::Date => self.date.clone().map(ScheduleRule::Date),
      Axis::TimeOfDay => self.time_of_day.clone().map(ScheduleRule::TimeOfDay),
    }
  }

  /// Put `rule` in its axis slot and return whatever it displaced.
  pub fn set(&mut self, rule: ScheduleRule) -> Option<ScheduleRule> {
    let previous = self.clear(rule.axis());
    match rule {
      ScheduleRule::Weekday(r) => self.weekday = Some(r),
      ScheduleRule::Date(r) => self.date = Some(r),
      ScheduleRule::TimeOfDay(r) => self.time_of_day = Some(r),
    }
    previous
  }

  pub fn clear(&mut self, axis: Axis) -> Option<ScheduleRule> {
    match axis {
      Axis::Weekday => self.weekday.take().map(ScheduleRule::Weekday),
      Axis::Date => self.date.take().map(ScheduleRule::Date),
      Axis::TimeOfDay => self.time_of_day.take().map(ScheduleRule::TimeOfDay),
    }
  }

  /// Rules in axis order.
  pub fn rules(&self) -> impl Iterator<Item = ScheduleRule> + '_ {
    Axis::ALL.into_iter().filter_map(|axis| self.get(axis))
  }
}

impl FromIterator<ScheduleRule> for RuleSet {
  fn from_iter<I: IntoIterator<Item = ScheduleRule>>(iter: I) -> Self {
    let mut set = Self::default();
    for rule in iter {
      set.set(rule);
    }
    set
  }
}
