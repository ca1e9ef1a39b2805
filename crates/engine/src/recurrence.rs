//! Recurring transactions.
//!
//! A [`RecurringSeries`] repeats a template [`Transaction`] following an
//! [`Interval`]. The [`Projector`] walks a series from its cursor (the last
//! materialized occurrence, or the template date when nothing was
//! materialized yet):
//!
//! - occurrences dated before "now" are materialized, one by one, and advance
//!   the cursor;
//! - occurrences from "now" on that fall in the requested month become
//!   previews, which are never persisted.
//!
//! Monthly rules keep their anchor day: a rule anchored on the 31st lands on
//! 2024-02-29 and then on 2024-03-31 again.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, MonthKey, ResultEngine, Transaction, calendar::shift_months};

/// Default bound on the occurrences visited for one series in one call.
pub const MAX_PROJECTION_STEPS: usize = 10;

/// A valid recurrence rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecurrenceRule {
    Weekly { weeks: u32 },
    Monthly { months: u32, anchor_day: u32 },
}

impl RecurrenceRule {
    /// The occurrence following `from`, `None` past the year 9999.
    ///
    /// Monthly rules aim for `anchor_day` in the target month, clamped to
    /// its last day; `from` may itself be a clamped date.
    pub fn next_occurrence(self, from: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::Weekly { weeks } => from
                .checked_add_days(Days::new(u64::from(weeks) * 7))
                .filter(|date| MonthKey::try_of(*date).is_some()),
            Self::Monthly { months, anchor_day } => shift_months(from, months, anchor_day),
        }
    }
}

/// Interval as stored in the registry. Only some combinations form a valid
/// [`RecurrenceRule`]; the others make the series inert.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interval {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub months: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weeks: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_day: Option<i64>,
}

impl Interval {
    pub fn weekly(weeks: i64) -> Self {
        Self {
            weeks: Some(weeks),
            ..Self::default()
        }
    }

    pub fn monthly(months: i64, anchor_day: Option<i64>) -> Self {
        Self {
            months: Some(months),
            anchor_day,
            ..Self::default()
        }
    }

    /// The rule this interval describes for a series starting on `start`.
    ///
    /// A positive month count wins over weeks. A monthly interval without
    /// anchor uses the day of `start`.
    pub fn rule(&self, start: NaiveDate) -> Option<RecurrenceRule> {
        if let Some(months) = self.months.filter(|m| *m > 0) {
            let anchor_day = self.anchor_day.unwrap_or(i64::from(start.day()));
            if !(1..=31).contains(&anchor_day) {
                return None;
            }
            return Some(RecurrenceRule::Monthly {
                months: u32::try_from(months).ok()?,
                anchor_day: anchor_day as u32,
            });
        }
        let weeks = self.weeks.filter(|w| *w > 0)?;
        Some(RecurrenceRule::Weekly {
            weeks: u32::try_from(weeks).ok()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecurringSeries {
    pub id: String,
    pub template: Transaction,
    pub interval: Interval,
    pub last_materialized: Option<NaiveDate>,
}

impl RecurringSeries {
    pub fn rule(&self) -> Option<RecurrenceRule> {
        self.interval.rule(self.template.date)
    }
}

/// Result of projecting one series.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Projection {
    /// Occurrences turned into actual transactions, oldest first.
    pub materialized: Vec<Transaction>,
    /// Upcoming occurrences in the requested month, oldest first.
    pub previews: Vec<Transaction>,
    /// The step bound stopped the walk before `through`.
    pub capped: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Projector {
    max_steps: usize,
}

impl Default for Projector {
    fn default() -> Self {
        Self::new(MAX_PROJECTION_STEPS)
    }
}

impl Projector {
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps: max_steps.max(1),
        }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Walks `series` up to `through`, materializing what is older than
    /// `now` and previewing what falls in `month`.
    ///
    /// A series with an invalid interval is skipped.
    pub fn project(
        &self,
        series: &mut RecurringSeries,
        through: NaiveDate,
        month: MonthKey,
        now: NaiveDate,
    ) -> Projection {
        let Some(rule) = series.rule() else {
            tracing::warn!(
                "recurring series {} has an invalid interval {:?}, skipping",
                series.id,
                series.interval
            );
            return Projection::default();
        };
        self.walk(series, through, month, now, |date| rule.next_occurrence(date))
    }

    fn walk(
        &self,
        series: &mut RecurringSeries,
        through: NaiveDate,
        month: MonthKey,
        now: NaiveDate,
        next: impl Fn(NaiveDate) -> Option<NaiveDate>,
    ) -> Projection {
        let mut projection = Projection::default();
        let start = match series.last_materialized {
            Some(date) => next(date),
            None => Some(series.template.date),
        };
        let Some(mut cursor) = start.filter(|date| MonthKey::try_of(*date).is_some()) else {
            tracing::warn!(
                "recurring series {} has no occurrence after {:?}, skipping",
                series.id,
                series.last_materialized
            );
            return projection;
        };

        let mut steps = 0;
        while cursor <= through {
            if steps == self.max_steps {
                tracing::error!(
                    "recurring series {} still behind {through} after {} steps, stopping at {cursor}",
                    series.id,
                    self.max_steps
                );
                projection.capped = true;
                break;
            }
            steps += 1;

            if cursor < now {
                tracing::debug!("materializing series {} on {cursor}", series.id);
                projection
                    .materialized
                    .push(series.template.occurrence(cursor, &series.id));
                series.last_materialized = Some(cursor);
            } else if month.contains(cursor) {
                projection
                    .previews
                    .push(series.template.occurrence(cursor, &series.id));
            }
            match next(cursor) {
                Some(date) => cursor = date,
                None => {
                    tracing::warn!("recurring series {} has no occurrence after {cursor}", series.id);
                    break;
                }
            }
        }

        projection.previews.sort_by_key(|tx| tx.date);
        projection
    }
}

/// Stored form of a series inside the registry document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeriesRecord {
    expense: Transaction,
    interval: Interval,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_materialized: Option<NaiveDate>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    order: Vec<String>,
    #[serde(default)]
    items: BTreeMap<String, SeriesRecord>,
}

/// Every recurring series, in user order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeriesRegistry {
    order: Vec<String>,
    items: BTreeMap<String, RecurringSeries>,
}

impl SeriesRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a series and returns its new id.
    pub fn insert(&mut self, template: Transaction, interval: Interval) -> String {
        let id = Uuid::new_v4().to_string();
        self.items.insert(
            id.clone(),
            RecurringSeries {
                id: id.clone(),
                template,
                interval,
                last_materialized: None,
            },
        );
        self.order.push(id.clone());
        id
    }

    /// Replaces template and interval. Occurrences already materialized stay
    /// materialized.
    pub fn update(&mut self, id: &str, template: Transaction, interval: Interval) -> ResultEngine<()> {
        let series = self
            .items
            .get_mut(id)
            .ok_or_else(|| EngineError::KeyNotFound(id.to_string()))?;
        series.template = template;
        series.interval = interval;
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> ResultEngine<RecurringSeries> {
        let series = self
            .items
            .remove(id)
            .ok_or_else(|| EngineError::KeyNotFound(id.to_string()))?;
        self.order.retain(|other| other != id);
        Ok(series)
    }

    pub fn get(&self, id: &str) -> Option<&RecurringSeries> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut RecurringSeries> {
        self.items.get_mut(id)
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecurringSeries> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn to_json(&self) -> ResultEngine<String> {
        let document = RegistryDocument {
            order: self.order.clone(),
            items: self
                .items
                .values()
                .map(|series| {
                    (
                        series.id.clone(),
                        SeriesRecord {
                            expense: series.template.clone(),
                            interval: series.interval.clone(),
                            last_materialized: series.last_materialized,
                        },
                    )
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Parses a registry document. Ids listed in `order` without an item are
    /// dropped; items missing from `order` are appended.
    pub fn from_json(content: &str) -> ResultEngine<Self> {
        let mut document: RegistryDocument = serde_json::from_str(content)?;
        let mut registry = Self::new();

        for id in document.order {
            let Some(record) = document.items.remove(&id) else {
                tracing::warn!("recurring series {id} listed without definition, dropping");
                continue;
            };
            registry.push(id, record);
        }
        for (id, record) in std::mem::take(&mut document.items) {
            registry.push(id, record);
        }
        Ok(registry)
    }

    fn push(&mut self, id: String, record: SeriesRecord) {
        if self.items.contains_key(&id) {
            return;
        }
        self.items.insert(
            id.clone(),
            RecurringSeries {
                id: id.clone(),
                template: record.expense,
                interval: record.interval,
                last_materialized: record.last_materialized,
            },
        );
        self.order.push(id);
    }
}
