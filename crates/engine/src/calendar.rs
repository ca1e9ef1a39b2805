//! Calendar helpers over [`NaiveDate`].
//!
//! Everything here is pure: months are identified by [`MonthKey`] and month
//! arithmetic clamps the day to the length of the target month.

use std::{fmt, str::FromStr};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{EngineError, ResultEngine};

/// A calendar month, written as `yyyy-mm`.
///
/// The string form is zero padded, so sorting keys lexically gives the same
/// order as sorting them chronologically.
///
/// ```rust
/// use engine::MonthKey;
///
/// let month: MonthKey = "2024-02".parse().unwrap();
/// assert_eq!(month.last_day().unwrap().to_string(), "2024-02-29");
/// assert_eq!(month.next().unwrap().to_string(), "2024-03");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    /// Creates a key, rejecting months outside `1..=12` and years that do not
    /// fit the four digit form.
    pub fn new(year: i32, month: u32) -> ResultEngine<Self> {
        if !(1..=12).contains(&month) || !(0..=9999).contains(&year) {
            return Err(EngineError::InvalidMonth(format!("{year}-{month}")));
        }
        Ok(Self { year, month })
    }

    /// The month `date` falls in.
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The month `date` falls in, `None` outside the years `0000..=9999`.
    pub fn try_of(date: NaiveDate) -> Option<Self> {
        Self::new(date.year(), date.month()).ok()
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    pub fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn last_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, days_in_month(self.year, self.month))
    }

    pub fn next(self) -> Option<Self> {
        self.shift(1)
    }

    pub fn prev(self) -> Option<Self> {
        self.shift(-1)
    }

    /// Moves the key by `months` calendar months (negative goes back).
    ///
    /// Returns `None` when the result leaves the years `0000..=9999`.
    pub fn shift(self, months: i64) -> Option<Self> {
        let index = i64::from(self.year)
            .checked_mul(12)?
            .checked_add(i64::from(self.month) - 1)?
            .checked_add(months)?;
        let year = i32::try_from(index.div_euclid(12)).ok()?;
        Self::new(year, index.rem_euclid(12) as u32 + 1).ok()
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        Self::of(date) == self
    }

    /// Every month from `from` to `to`, both included. Empty when `from > to`.
    pub fn range(from: MonthKey, to: MonthKey) -> Vec<MonthKey> {
        let mut months = Vec::new();
        let mut current = from;
        while current <= to {
            months.push(current);
            match current.next() {
                Some(next) => current = next,
                None => break,
            }
        }
        months
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidMonth(s.to_string());
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4
            || month.len() != 2
            || !year.chars().all(|c| c.is_ascii_digit())
            || !month.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonthKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Number of days in `month` of `year`, leap years included.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ if is_leap_year(year) => 29,
        _ => 28,
    }
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Moves `date` forward by `months` calendar months and lands on `day`,
/// clamped to the last day of the target month.
///
/// The clamp only affects the returned date: calling again with the same
/// `day` from a clamped result aims for `day` again. Returns `None` when the
/// target month leaves the years `0000..=9999`.
pub fn shift_months(date: NaiveDate, months: u32, day: u32) -> Option<NaiveDate> {
    let target = MonthKey::of(date).shift(i64::from(months))?;
    let day = day.clamp(1, days_in_month(target.year, target.month));
    NaiveDate::from_ymd_opt(target.year, target.month, day)
}

/// Parses a strict `yyyy-mm-dd` date.
pub fn parse_date(raw: &str) -> ResultEngine<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.len() != 10 {
        return Err(EngineError::InvalidDate(raw.to_string()));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| EngineError::InvalidDate(raw.to_string()))
}
