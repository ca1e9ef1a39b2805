//! Month to shard bookkeeping.
//!
//! Months are stored in shards (partitions) holding at most `capacity`
//! freshly assigned months each. A month, once placed, is never moved.
//! Months registered explicitly while loading persisted data keep the shard
//! they were found in, even if that shard is already over capacity.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::MonthKey;

/// Default number of months per shard.
pub const MAX_MONTHS_PER_SHARD: usize = 12;

/// Identifier of a shard, starting from 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(pub u32);

impl ShardId {
    /// Name of the document holding the shard's transactions.
    pub fn file_name(self) -> String {
        format!("shard-{}.tsv", self.0)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub id: ShardId,
    pub months: Vec<MonthKey>,
}

/// The assignment of months to shards, in shard creation order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardIndex {
    capacity: usize,
    shards: Vec<Shard>,
    by_month: BTreeMap<MonthKey, ShardId>,
}

/// Persisted form of [`ShardIndex`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ShardIndexDocument {
    pub shards: Vec<Shard>,
}

impl Default for ShardIndex {
    fn default() -> Self {
        Self::new(MAX_MONTHS_PER_SHARD)
    }
}

impl ShardIndex {
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            shards: Vec::new(),
            by_month: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shard for `month`, assigning it to the newest shard (or a new one when
    /// the newest is full) if the month was never seen before.
    pub fn resolve(&mut self, month: MonthKey) -> ShardId {
        if let Some(id) = self.by_month.get(&month) {
            return *id;
        }

        let id = match self.shards.last_mut() {
            Some(shard) if shard.months.len() < self.capacity => {
                shard.months.push(month);
                shard.id
            }
            _ => {
                let id = self.next_id();
                self.shards.push(Shard {
                    id,
                    months: vec![month],
                });
                tracing::debug!("created shard {id} for {month}");
                id
            }
        };
        self.by_month.insert(month, id);
        id
    }

    /// Records that `month` lives in `shard` (or resolves it when `None`).
    ///
    /// A month already placed keeps its shard; the call then returns the
    /// existing assignment.
    pub fn register(&mut self, month: MonthKey, shard: Option<ShardId>) -> ShardId {
        let Some(id) = shard else {
            return self.resolve(month);
        };
        if let Some(existing) = self.by_month.get(&month) {
            if *existing != id {
                tracing::warn!("{month} already assigned to shard {existing}, ignoring shard {id}");
            }
            return *existing;
        }

        match self.shards.iter_mut().find(|shard| shard.id == id) {
            Some(shard) => shard.months.push(month),
            None => {
                self.shards.push(Shard {
                    id,
                    months: vec![month],
                });
                self.shards.sort_by_key(|shard| shard.id);
            }
        }
        self.by_month.insert(month, id);
        id
    }

    pub fn shard_of(&self, month: MonthKey) -> Option<ShardId> {
        self.by_month.get(&month).copied()
    }

    /// Months of `shard`, in assignment order.
    pub fn months_in(&self, shard: ShardId) -> Vec<MonthKey> {
        self.shards
            .iter()
            .find(|s| s.id == shard)
            .map(|s| s.months.clone())
            .unwrap_or_default()
    }

    /// Every registered month, ascending.
    pub fn all_months(&self) -> Vec<MonthKey> {
        self.by_month.keys().copied().collect()
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn to_document(&self) -> ShardIndexDocument {
        ShardIndexDocument {
            shards: self.shards.clone(),
        }
    }

    /// Rebuilds an index from its persisted form.
    pub fn from_document(capacity: usize, document: ShardIndexDocument) -> Self {
        let mut index = Self::new(capacity);
        for shard in document.shards {
            for month in shard.months {
                index.register(month, Some(shard.id));
            }
        }
        index
    }

    fn next_id(&self) -> ShardId {
        ShardId(self.shards.iter().map(|s| s.id.0).max().unwrap_or(0) + 1)
    }
}
