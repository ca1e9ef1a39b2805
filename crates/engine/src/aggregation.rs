//! Per-category sums and counts over one or more months.
//!
//! Each month is reduced on its own snapshot of transactions. Amounts land on
//! the category they reference; every master category then rolls up its own
//! amounts plus those of its sub-categories. A window combines the months and
//! adds a grand total over the master categories.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    fmt,
    str::FromStr,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::{CategoryDirectory, EngineError, MoneyCents, MonthKey, Transaction, categories::CategoryNode};

/// Minimal accumulator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AggregateAtom {
    pub sum: MoneyCents,
    pub count: u32,
}

impl AggregateAtom {
    pub fn add(&mut self, amount: MoneyCents) {
        self.sum += amount;
        self.count += 1;
    }

    pub fn merge(&mut self, other: AggregateAtom) {
        self.sum += other.sum;
        self.count += other.count;
    }

    /// Average amount in major units, 0 when empty.
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum.as_major() / f64::from(self.count)
        }
    }
}

/// Aggregate of a category and, recursively, of its sub-categories.
///
/// `sum` and `count` include the category's own transactions and every
/// child's totals.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAggregate {
    pub category_id: String,
    pub sum: MoneyCents,
    pub count: u32,
    pub months_in_window: u32,
    pub children: Vec<CategoryAggregate>,
}

impl CategoryAggregate {
    fn empty(category_id: &str, months_in_window: u32) -> Self {
        Self {
            category_id: category_id.to_string(),
            sum: MoneyCents::ZERO,
            count: 0,
            months_in_window,
            children: Vec::new(),
        }
    }

    pub fn atom(&self) -> AggregateAtom {
        AggregateAtom {
            sum: self.sum,
            count: self.count,
        }
    }

    pub fn avg(&self) -> f64 {
        self.atom().avg()
    }

    /// Monthly average over the window, in major units.
    pub fn mavg(&self) -> f64 {
        if self.months_in_window == 0 {
            0.0
        } else {
            self.sum.as_major() / f64::from(self.months_in_window)
        }
    }

    /// The part of `sum`/`count` coming from the category itself.
    pub fn own(&self) -> AggregateAtom {
        let children_sum: MoneyCents = self.children.iter().map(|child| child.sum).sum();
        let children_count: u32 = self.children.iter().map(|child| child.count).sum();
        AggregateAtom {
            sum: self.sum - children_sum,
            count: self.count - children_count,
        }
    }

    fn merge(&mut self, other: &CategoryAggregate) {
        self.sum += other.sum;
        self.count += other.count;
        for child in &other.children {
            match self
                .children
                .iter_mut()
                .find(|mine| mine.category_id == child.category_id)
            {
                Some(mine) => mine.merge(child),
                None => {
                    let mut extra = child.clone();
                    extra.set_months_in_window(self.months_in_window);
                    self.children.push(extra);
                }
            }
        }
    }

    fn set_months_in_window(&mut self, months: u32) {
        self.months_in_window = months;
        for child in &mut self.children {
            child.set_months_in_window(months);
        }
    }

    fn sort_children(&mut self, key: SortKey) {
        for child in &mut self.children {
            child.sort_children(key);
        }
        // `sort_by` is stable: ties keep directory order.
        self.children
            .sort_by(|a, b| key.value(b).partial_cmp(&key.value(a)).unwrap_or(Ordering::Equal));
    }
}

/// Ordering applied to sub-categories, always descending.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Sum,
    Count,
    Avg,
    Mavg,
}

impl SortKey {
    pub fn value(self, aggregate: &CategoryAggregate) -> f64 {
        match self {
            Self::Sum => aggregate.sum.as_major(),
            Self::Count => f64::from(aggregate.count),
            Self::Avg => aggregate.avg(),
            Self::Mavg => aggregate.mavg(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Avg => "avg",
            Self::Mavg => "mavg",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "count" => Ok(Self::Count),
            "avg" => Ok(Self::Avg),
            "mavg" => Ok(Self::Mavg),
            other => Err(EngineError::InvalidSortKey(other.to_string())),
        }
    }
}

/// Which transactions take part in an aggregation. The default accepts all.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregationFilter {
    pub excluded_payment_methods: HashSet<String>,
    /// When set, only these categories are counted.
    pub categories: Option<HashSet<String>>,
}

impl AggregationFilter {
    pub fn accepts(&self, tx: &Transaction) -> bool {
        if self.excluded_payment_methods.contains(&tx.payment_method_id) {
            return false;
        }
        self.categories
            .as_ref()
            .is_none_or(|allowed| allowed.contains(&tx.category_id))
    }

    fn shows(&self, directory: &CategoryDirectory, node: &CategoryNode) -> bool {
        let Some(allowed) = &self.categories else {
            return true;
        };
        allowed.contains(&node.id)
            || directory
                .children_of(&node.id)
                .into_iter()
                .any(|child| self.shows(directory, child))
    }
}

/// Aggregates of one month, one entry per master category in directory order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthAggregate {
    pub categories: Vec<CategoryAggregate>,
    /// Category ids referenced by transactions but missing from the directory.
    pub unknown_categories: Vec<String>,
}

/// Reduces one month of transactions.
pub fn aggregate_month(
    transactions: &[Transaction],
    directory: &CategoryDirectory,
    filter: &AggregationFilter,
    sort_key: SortKey,
) -> MonthAggregate {
    aggregate(transactions, directory, filter, sort_key, 1)
}

fn aggregate(
    transactions: &[Transaction],
    directory: &CategoryDirectory,
    filter: &AggregationFilter,
    sort_key: SortKey,
    months_in_window: u32,
) -> MonthAggregate {
    let mut atoms: HashMap<&str, AggregateAtom> = HashMap::new();
    let mut unknown = BTreeSet::new();
    for tx in transactions.iter().filter(|tx| filter.accepts(tx)) {
        if !directory.contains(&tx.category_id) {
            unknown.insert(tx.category_id.clone());
            continue;
        }
        atoms.entry(tx.category_id.as_str()).or_default().add(tx.amount);
    }
    for id in &unknown {
        tracing::warn!("transactions reference unknown category {id}, counted as zero");
    }

    let categories = directory
        .masters_in_order()
        .into_iter()
        .filter(|master| filter.shows(directory, master))
        .map(|master| {
            let mut aggregate = rollup(master, directory, filter, &atoms, months_in_window);
            aggregate.sort_children(sort_key);
            aggregate
        })
        .collect();

    MonthAggregate {
        categories,
        unknown_categories: unknown.into_iter().collect(),
    }
}

fn rollup(
    node: &CategoryNode,
    directory: &CategoryDirectory,
    filter: &AggregationFilter,
    atoms: &HashMap<&str, AggregateAtom>,
    months_in_window: u32,
) -> CategoryAggregate {
    let mut aggregate = CategoryAggregate::empty(&node.id, months_in_window);
    if let Some(own) = atoms.get(node.id.as_str()) {
        aggregate.sum = own.sum;
        aggregate.count = own.count;
    }
    for child in directory.children_of(&node.id) {
        if !filter.shows(directory, child) {
            continue;
        }
        let child = rollup(child, directory, filter, atoms, months_in_window);
        aggregate.sum += child.sum;
        aggregate.count += child.count;
        aggregate.children.push(child);
    }
    aggregate
}

/// Aggregates of a window of months.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowReport {
    pub per_month: BTreeMap<MonthKey, Vec<CategoryAggregate>>,
    pub totals: Vec<CategoryAggregate>,
    pub grand_total: AggregateAtom,
    pub unknown_categories: Vec<String>,
    /// Months whose reduction failed; they contribute nothing.
    pub failed_months: Vec<MonthKey>,
}

/// Aggregates every month of `months` concurrently and combines the results
/// once all of them settled.
pub async fn compute_window(
    months: Vec<(MonthKey, Vec<Transaction>)>,
    directory: Arc<CategoryDirectory>,
    filter: Arc<AggregationFilter>,
    sort_key: SortKey,
) -> WindowReport {
    let mut seen = BTreeSet::new();
    let months: Vec<(MonthKey, Vec<Transaction>)> = months
        .into_iter()
        .filter(|(month, _)| {
            let fresh = seen.insert(*month);
            if !fresh {
                tracing::warn!("month {month} listed twice in the window, keeping the first");
            }
            fresh
        })
        .collect();
    if months.is_empty() {
        return WindowReport::default();
    }
    let window = months.len() as u32;

    let (results, failed) = {
        let directory = directory.clone();
        let filter = filter.clone();
        settle(months, move |transactions| {
            aggregate_month(&transactions, &directory, &filter, sort_key)
        })
        .await
    };

    let mut totals = aggregate(&[], &directory, &filter, sort_key, window).categories;
    let mut unknown = BTreeSet::new();
    let mut per_month = BTreeMap::new();
    for (month, outcome) in results {
        let aggregates = match outcome {
            Some(result) => {
                unknown.extend(result.unknown_categories);
                result.categories
            }
            None => Vec::new(),
        };
        for aggregate in &aggregates {
            if let Some(total) = totals
                .iter_mut()
                .find(|total| total.category_id == aggregate.category_id)
            {
                total.merge(aggregate);
            }
        }
        per_month.insert(month, aggregates);
    }

    let mut grand_total = AggregateAtom::default();
    for total in &mut totals {
        total.sort_children(sort_key);
        grand_total.merge(total.atom());
    }

    WindowReport {
        per_month,
        totals,
        grand_total,
        unknown_categories: unknown.into_iter().collect(),
        failed_months: failed,
    }
}

/// Runs `work` for every month on the blocking pool and waits for all of
/// them. A month whose task failed maps to `None`.
async fn settle<T, F>(
    months: Vec<(MonthKey, Vec<Transaction>)>,
    work: F,
) -> (Vec<(MonthKey, Option<T>)>, Vec<MonthKey>)
where
    T: Send + 'static,
    F: Fn(Vec<Transaction>) -> T + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let mut tasks = JoinSet::new();
    let mut task_months = HashMap::new();
    let mut outcomes: BTreeMap<MonthKey, Option<T>> = BTreeMap::new();

    for (month, transactions) in months {
        let work = work.clone();
        let handle = tasks.spawn_blocking(move || work(transactions));
        task_months.insert(handle.id(), month);
        outcomes.insert(month, None);
    }

    let mut failed = Vec::new();
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, value)) => {
                if let Some(month) = task_months.get(&id) {
                    outcomes.insert(*month, Some(value));
                }
            }
            Err(err) => {
                let month = task_months.get(&err.id()).copied();
                tracing::error!("aggregation of {month:?} failed: {err}");
                if let Some(month) = month {
                    failed.push(month);
                }
            }
        }
    }
    failed.sort();

    (outcomes.into_iter().collect(), failed)
}

#[cfg(test)]
mod tests {
    use crate::{CategoryRecord, calendar::parse_date};

    use super::*;

    fn directory() -> CategoryDirectory {
        let record = |id: &str, parent: Option<&str>| CategoryRecord {
            id: id.to_string(),
            name: id.to_string(),
            parent_id: parent.map(str::to_string),
        };
        CategoryDirectory::from_records(vec![
            record("food", None),
            record("groceries", Some("food")),
            record("restaurants", Some("food")),
            record("home", None),
            record("rent", Some("home")),
            record("utilities", Some("home")),
        ])
        .unwrap()
    }

    fn tx(date: &str, cents: i64, category: &str, method: &str) -> Transaction {
        Transaction::new(parse_date(date).unwrap(), MoneyCents::new(cents), category, method, "")
    }

    fn find<'a>(aggregates: &'a [CategoryAggregate], id: &str) -> &'a CategoryAggregate {
        aggregates.iter().find(|a| a.category_id == id).unwrap()
    }

    fn month(raw: &str) -> MonthKey {
        raw.parse().unwrap()
    }

    #[test]
    fn master_rolls_up_children() {
        let txs = vec![
            tx("2024-03-01", 3000, "restaurants", "card"),
            tx("2024-03-02", 4000, "groceries", "card"),
            tx("2024-03-03", 2000, "restaurants", "card"),
            tx("2024-03-04", 3000, "groceries", "card"),
            tx("2024-03-05", 3000, "groceries", "cash"),
        ];
        let result = aggregate_month(&txs, &directory(), &AggregationFilter::default(), SortKey::Sum);

        let food = find(&result.categories, "food");
        assert_eq!(food.sum, MoneyCents::new(15000));
        assert_eq!(food.count, 5);
        let sums: Vec<i64> = food.children.iter().map(|c| c.sum.cents()).collect();
        assert_eq!(sums, vec![10000, 5000]);
        assert_eq!(food.children[0].category_id, "groceries");
    }

    #[test]
    fn own_transactions_fold_into_the_master() {
        let txs = vec![
            tx("2024-03-01", 700, "home", "card"),
            tx("2024-03-02", 80000, "rent", "bank"),
        ];
        let result = aggregate_month(&txs, &directory(), &AggregationFilter::default(), SortKey::Sum);

        let home = find(&result.categories, "home");
        assert_eq!(home.sum, MoneyCents::new(80700));
        assert_eq!(home.own(), AggregateAtom {
            sum: MoneyCents::new(700),
            count: 1
        });
        assert_eq!(home.children.len(), 2);
        let children_sum: MoneyCents = home.children.iter().map(|c| c.sum).sum();
        assert_eq!(home.sum, home.own().sum + children_sum);
    }

    #[test]
    fn ties_keep_directory_order() {
        let txs = vec![
            tx("2024-03-01", 500, "restaurants", "card"),
            tx("2024-03-02", 500, "groceries", "card"),
        ];
        let result = aggregate_month(&txs, &directory(), &AggregationFilter::default(), SortKey::Sum);
        let ids: Vec<&str> = find(&result.categories, "food")
            .children
            .iter()
            .map(|c| c.category_id.as_str())
            .collect();
        assert_eq!(ids, vec!["groceries", "restaurants"]);
    }

    #[test]
    fn sorts_by_count() {
        let txs = vec![
            tx("2024-03-01", 9000, "groceries", "card"),
            tx("2024-03-02", 100, "restaurants", "card"),
            tx("2024-03-03", 100, "restaurants", "card"),
        ];
        let result = aggregate_month(&txs, &directory(), &AggregationFilter::default(), SortKey::Count);
        assert_eq!(find(&result.categories, "food").children[0].category_id, "restaurants");
    }

    #[test]
    fn average_is_zero_without_items() {
        let empty = AggregateAtom::default();
        assert_eq!(empty.avg(), 0.0);
        let atom = AggregateAtom {
            sum: MoneyCents::new(1000),
            count: 4,
        };
        assert_eq!(atom.avg(), 2.5);
    }

    #[test]
    fn filter_excludes_payment_methods_and_restricts_categories() {
        let txs = vec![
            tx("2024-03-01", 1000, "groceries", "cash"),
            tx("2024-03-02", 2000, "groceries", "card"),
            tx("2024-03-03", 80000, "rent", "bank"),
        ];
        let filter = AggregationFilter {
            excluded_payment_methods: HashSet::from(["cash".to_string()]),
            categories: Some(HashSet::from(["groceries".to_string()])),
        };
        let result = aggregate_month(&txs, &directory(), &filter, SortKey::Sum);

        assert_eq!(result.categories.len(), 1);
        let food = &result.categories[0];
        assert_eq!(food.sum, MoneyCents::new(2000));
        assert_eq!(food.children.len(), 1);
    }

    #[test]
    fn unknown_categories_are_reported_not_counted() {
        let txs = vec![
            tx("2024-03-01", 1000, "gone", "card"),
            tx("2024-03-02", 2000, "groceries", "card"),
        ];
        let result = aggregate_month(&txs, &directory(), &AggregationFilter::default(), SortKey::Sum);
        assert_eq!(result.unknown_categories, vec!["gone".to_string()]);
        let total: MoneyCents = result.categories.iter().map(|c| c.sum).sum();
        assert_eq!(total, MoneyCents::new(2000));
    }

    #[tokio::test]
    async fn window_sums_months_and_grand_total() {
        let months = vec![
            (month("2024-01"), vec![
                tx("2024-01-03", 1000, "groceries", "card"),
                tx("2024-01-04", 90000, "rent", "bank"),
            ]),
            (month("2024-02"), vec![tx("2024-02-03", 3000, "groceries", "card")]),
            (month("2024-03"), vec![]),
        ];
        let report = compute_window(
            months,
            Arc::new(directory()),
            Arc::new(AggregationFilter::default()),
            SortKey::Mavg,
        )
        .await;

        assert_eq!(report.per_month.len(), 3);
        assert!(report.per_month[&month("2024-03")].iter().all(|a| a.count == 0));
        let food = find(&report.totals, "food");
        assert_eq!(food.sum, MoneyCents::new(4000));
        assert_eq!(food.count, 2);
        assert_eq!(food.months_in_window, 3);
        assert_eq!(food.children[0].months_in_window, 3);
        assert!((food.mavg() - 40.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.grand_total, AggregateAtom {
            sum: MoneyCents::new(94000),
            count: 3
        });
        assert!(report.failed_months.is_empty());
    }

    #[tokio::test]
    async fn repeated_month_counts_once() {
        let january = vec![tx("2024-01-03", 1000, "groceries", "card")];
        let months = vec![
            (month("2024-01"), january.clone()),
            (month("2024-02"), vec![tx("2024-02-03", 3000, "groceries", "card")]),
            (month("2024-01"), january),
        ];
        let report = compute_window(
            months,
            Arc::new(directory()),
            Arc::new(AggregationFilter::default()),
            SortKey::Sum,
        )
        .await;

        assert_eq!(report.per_month.len(), 2);
        let food = find(&report.totals, "food");
        assert_eq!(food.sum, MoneyCents::new(4000));
        assert_eq!(food.count, 2);
        assert_eq!(food.months_in_window, 2);
        assert_eq!(report.grand_total.sum, MoneyCents::new(4000));
    }

    #[tokio::test]
    async fn empty_window_is_empty() {
        let report = compute_window(
            vec![],
            Arc::new(directory()),
            Arc::new(AggregationFilter::default()),
            SortKey::Sum,
        )
        .await;
        assert_eq!(report, WindowReport::default());
    }

    #[tokio::test]
    async fn failed_month_does_not_block_the_others() {
        let months = vec![
            (month("2024-01"), vec![tx("2024-01-03", 100, "groceries", "card")]),
            (month("2024-02"), vec![]),
            (month("2024-03"), vec![tx("2024-03-03", 300, "groceries", "card")]),
        ];
        let (outcomes, failed) = settle(months, |transactions: Vec<Transaction>| {
            assert!(!transactions.is_empty(), "no data");
            transactions.len()
        })
        .await;

        assert_eq!(failed, vec![month("2024-02")]);
        assert_eq!(outcomes, vec![
            (month("2024-01"), Some(1)),
            (month("2024-02"), None),
            (month("2024-03"), Some(1)),
        ]);
    }
}
