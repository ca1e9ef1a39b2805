//! The `Ledger` owns transactions, recurring series and the shard index, and
//! persists them through a [`Store`].

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
    AggregationFilter, CategoryDirectory, EngineError, Interval, MonthKey, Projector,
    RecurringSeries, ResultEngine, SeriesRegistry, ShardId, ShardIndex, SortKey, Store,
    Transaction, WindowReport,
    aggregation::compute_window,
    recurrence::MAX_PROJECTION_STEPS,
    shards::{MAX_MONTHS_PER_SHARD, ShardIndexDocument},
    transactions::{decode_shard, encode_shard},
};

/// Shard index document.
pub const SHARDS_DOCUMENT: &str = "shards.json";
/// Recurring series registry document.
pub const RECURRING_DOCUMENT: &str = "recurring.json";
/// Category directory document.
pub const CATEGORIES_DOCUMENT: &str = "categories.json";

#[derive(Debug)]
pub struct Ledger<S> {
    store: S,
    shards: ShardIndex,
    months: BTreeMap<MonthKey, Vec<Transaction>>,
    series: SeriesRegistry,
    categories: Arc<CategoryDirectory>,
    projector: Projector,
    dirty_shards: BTreeSet<ShardId>,
    index_dirty: bool,
    series_dirty: bool,
}

/// In-memory state of a [`Ledger`], used to discard edits.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerSnapshot {
    shards: ShardIndex,
    months: BTreeMap<MonthKey, Vec<Transaction>>,
    series: SeriesRegistry,
}

impl<S: Store> Ledger<S> {
    /// Return a builder for `Ledger`. Help to build the struct.
    pub fn builder() -> LedgerBuilder<S> {
        LedgerBuilder::default()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn shard_index(&self) -> &ShardIndex {
        &self.shards
    }

    pub fn categories(&self) -> &CategoryDirectory {
        &self.categories
    }

    pub fn set_categories(&mut self, categories: CategoryDirectory) {
        self.categories = Arc::new(categories);
    }

    /// Every month known to the ledger, ascending.
    pub fn months(&self) -> Vec<MonthKey> {
        self.shards.all_months()
    }

    /// Transactions of `month`, sorted by date.
    pub fn transactions_in(&self, month: MonthKey) -> &[Transaction] {
        self.months.get(&month).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn transaction(&self, id: Uuid) -> Option<&Transaction> {
        self.months.values().flatten().find(|tx| tx.id == id)
    }

    /// Adds `tx` to its month, assigning the month to a shard if needed.
    pub fn add_transaction(&mut self, tx: Transaction) -> Uuid {
        let id = tx.id;
        let month = tx.month();
        if self.shards.shard_of(month).is_none() {
            self.index_dirty = true;
        }
        let shard = self.shards.resolve(month);
        self.dirty_shards.insert(shard);

        let list = self.months.entry(month).or_default();
        let position = list.partition_point(|other| other.date <= tx.date);
        list.insert(position, tx);
        id
    }

    /// Replaces the transaction `id`, keeping its id. The record moves when
    /// the date changes month.
    pub fn edit_transaction(&mut self, id: Uuid, mut tx: Transaction) -> ResultEngine<()> {
        self.delete_transaction(id)?;
        tx.id = id;
        self.add_transaction(tx);
        Ok(())
    }

    pub fn delete_transaction(&mut self, id: Uuid) -> ResultEngine<Transaction> {
        let (month, position) = self
            .months
            .iter()
            .find_map(|(month, list)| {
                list.iter()
                    .position(|tx| tx.id == id)
                    .map(|position| (*month, position))
            })
            .ok_or_else(|| EngineError::KeyNotFound(id.to_string()))?;

        let removed = match self.months.get_mut(&month) {
            Some(list) => list.remove(position),
            None => return Err(EngineError::KeyNotFound(id.to_string())),
        };
        if let Some(shard) = self.shards.shard_of(month) {
            self.dirty_shards.insert(shard);
        }
        Ok(removed)
    }

    /// Recurring series, in user order.
    pub fn series(&self) -> impl Iterator<Item = &RecurringSeries> {
        self.series.iter()
    }

    pub fn add_series(&mut self, template: Transaction, interval: Interval) -> String {
        if interval.rule(template.date).is_none() {
            tracing::warn!("recurring series starting {} has an invalid interval", template.date);
        }
        self.series_dirty = true;
        self.series.insert(template, interval)
    }

    pub fn edit_series(&mut self, id: &str, template: Transaction, interval: Interval) -> ResultEngine<()> {
        self.series.update(id, template, interval)?;
        self.series_dirty = true;
        Ok(())
    }

    /// Removes a series. Transactions it already materialized stay.
    pub fn remove_series(&mut self, id: &str) -> ResultEngine<RecurringSeries> {
        let removed = self.series.remove(id)?;
        self.series_dirty = true;
        Ok(removed)
    }

    /// Brings every recurring series up to date for `month`.
    ///
    /// Occurrences dated before `today` become transactions and are persisted
    /// together with the advanced series. Returns the upcoming occurrences of
    /// `month`, sorted by date.
    pub async fn project_month(&mut self, month: MonthKey, today: NaiveDate) -> ResultEngine<Vec<Transaction>> {
        let through = month
            .last_day()
            .ok_or_else(|| EngineError::InvalidMonth(month.to_string()))?;
        let mut previews = Vec::new();
        let mut materialized = Vec::new();

        let ids = self.series.ids().to_vec();
        for id in ids {
            let Some(series) = self.series.get_mut(&id) else {
                continue;
            };
            let projection = self.projector.project(series, through, month, today);
            materialized.extend(projection.materialized);
            previews.extend(projection.previews);
        }

        if !materialized.is_empty() {
            tracing::info!(
                "materialized {} recurring transactions through {through}",
                materialized.len()
            );
            self.series_dirty = true;
            for tx in materialized {
                self.add_transaction(tx);
            }
            self.flush().await?;
        }

        previews.sort_by_key(|tx| tx.date);
        Ok(previews)
    }

    /// Aggregates `months`, projecting recurring series first. Previews are
    /// counted only when `include_previews` is set.
    pub async fn report(
        &mut self,
        months: &[MonthKey],
        filter: AggregationFilter,
        sort_key: SortKey,
        today: NaiveDate,
        include_previews: bool,
    ) -> ResultEngine<WindowReport> {
        let mut snapshot = Vec::with_capacity(months.len());
        for month in months {
            let previews = self.project_month(*month, today).await?;
            let mut transactions = self.transactions_in(*month).to_vec();
            if include_previews {
                transactions.extend(previews);
            }
            snapshot.push((*month, transactions));
        }

        Ok(compute_window(snapshot, self.categories.clone(), Arc::new(filter), sort_key).await)
    }

    /// Loads shards and recurring series from the store, replacing the
    /// in-memory state.
    pub async fn load(&mut self) -> ResultEngine<()> {
        let capacity = self.shards.capacity();
        let (index, probe) = match self.store.load(SHARDS_DOCUMENT).await? {
            Some(content) => {
                let document: ShardIndexDocument = serde_json::from_str(&content)?;
                (ShardIndex::from_document(capacity, document), false)
            }
            None => (ShardIndex::new(capacity), true),
        };
        self.shards = index;
        self.months.clear();
        self.dirty_shards.clear();
        self.index_dirty = false;

        if probe {
            // No index yet: pick up shard files in sequence.
            let mut id = ShardId(1);
            while let Some(content) = self.store.load(&id.file_name()).await? {
                self.load_shard(id, &content)?;
                id = ShardId(id.0 + 1);
            }
            self.index_dirty = !self.shards.shards().is_empty();
        } else {
            let shard_ids: Vec<ShardId> = self.shards.shards().iter().map(|s| s.id).collect();
            for id in shard_ids {
                if let Some(content) = self.store.load(&id.file_name()).await? {
                    self.load_shard(id, &content)?;
                }
            }
        }

        self.series = match self.store.load(RECURRING_DOCUMENT).await? {
            Some(content) => SeriesRegistry::from_json(&content)?,
            None => SeriesRegistry::new(),
        };
        self.series_dirty = false;

        tracing::info!(
            "loaded {} transactions in {} months, {} recurring series",
            self.months.values().map(Vec::len).sum::<usize>(),
            self.months.len(),
            self.series.len()
        );
        Ok(())
    }

    fn load_shard(&mut self, id: ShardId, content: &str) -> ResultEngine<()> {
        for tx in decode_shard(&id.file_name(), content)? {
            let month = tx.month();
            let placed = self.shards.register(month, Some(id));
            if placed != id {
                // Month found in two shards: rewrite both on next flush.
                self.dirty_shards.insert(placed);
                self.dirty_shards.insert(id);
            }
            let list = self.months.entry(month).or_default();
            let position = list.partition_point(|other| other.date <= tx.date);
            list.insert(position, tx);
        }
        Ok(())
    }

    /// Saves every changed shard, the shard index and the series registry.
    ///
    /// A shard stays dirty until its save succeeds, and the index and the
    /// registry are only written once every shard is saved.
    pub async fn flush(&mut self) -> ResultEngine<()> {
        let dirty: Vec<ShardId> = self.dirty_shards.iter().copied().collect();
        for shard in dirty {
            let months = self.shards.months_in(shard);
            let mut records: Vec<&Transaction> = months
                .iter()
                .filter_map(|month| self.months.get(month))
                .flatten()
                .collect();
            records.sort_by_key(|tx| tx.date);
            let content = encode_shard(records)?;
            self.store.save(&shard.file_name(), content).await?;
            self.dirty_shards.remove(&shard);
            tracing::debug!("saved shard {shard} ({} months)", months.len());
        }

        if self.index_dirty {
            let content = serde_json::to_string_pretty(&self.shards.to_document())?;
            self.store.save(SHARDS_DOCUMENT, content).await?;
            self.index_dirty = false;
        }

        if self.series_dirty {
            self.store.save(RECURRING_DOCUMENT, self.series.to_json()?).await?;
            self.series_dirty = false;
        }
        Ok(())
    }

    pub fn has_unsaved_changes(&self) -> bool {
        !self.dirty_shards.is_empty() || self.index_dirty || self.series_dirty
    }

    /// Captures transactions, shard assignment and recurring series.
    pub fn capture(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            shards: self.shards.clone(),
            months: self.months.clone(),
            series: self.series.clone(),
        }
    }

    /// Returns to a captured state. Everything is rewritten on next flush.
    pub fn restore(&mut self, snapshot: LedgerSnapshot) {
        self.shards = snapshot.shards;
        self.months = snapshot.months;
        self.series = snapshot.series;
        self.dirty_shards = self.shards.shards().iter().map(|s| s.id).collect();
        self.index_dirty = true;
        self.series_dirty = true;
    }
}

/// The builder for `Ledger`
pub struct LedgerBuilder<S> {
    store: Option<S>,
    shard_capacity: usize,
    max_projection_steps: usize,
    categories: CategoryDirectory,
}

impl<S> Default for LedgerBuilder<S> {
    fn default() -> Self {
        Self {
            store: None,
            shard_capacity: MAX_MONTHS_PER_SHARD,
            max_projection_steps: MAX_PROJECTION_STEPS,
            categories: CategoryDirectory::default(),
        }
    }
}

impl<S: Store> LedgerBuilder<S> {
    /// Pass the required store
    pub fn store(mut self, store: S) -> Self {
        self.store = Some(store);
        self
    }

    /// Months per shard for newly assigned months
    pub fn shard_capacity(mut self, capacity: usize) -> Self {
        self.shard_capacity = capacity;
        self
    }

    /// Occurrences visited per series in a single projection
    pub fn max_projection_steps(mut self, steps: usize) -> Self {
        self.max_projection_steps = steps;
        self
    }

    pub fn categories(mut self, categories: CategoryDirectory) -> Self {
        self.categories = categories;
        self
    }

    /// Construct `Ledger` and load its documents from the store
    pub async fn build(self) -> ResultEngine<Ledger<S>> {
        let store = self
            .store
            .ok_or_else(|| EngineError::Storage("missing store".to_string()))?;
        let mut ledger = Ledger {
            store,
            shards: ShardIndex::new(self.shard_capacity),
            months: BTreeMap::new(),
            series: SeriesRegistry::new(),
            categories: Arc::new(self.categories),
            projector: Projector::new(self.max_projection_steps),
            dirty_shards: BTreeSet::new(),
            index_dirty: false,
            series_dirty: false,
        };
        ledger.load().await?;
        Ok(ledger)
    }
}
