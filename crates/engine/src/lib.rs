//! Bookkeeping core of the ledger: month shards, recurring transactions and
//! per-category aggregation.
//!
//! The [`Ledger`] ties the pieces together and persists through a [`Store`].

pub use aggregation::{
    AggregateAtom, AggregationFilter, CategoryAggregate, MonthAggregate, SortKey, WindowReport,
    aggregate_month, compute_window,
};
pub use calendar::{MonthKey, days_in_month, parse_date, shift_months};
pub use categories::{CategoryDirectory, CategoryNode, CategoryRecord};
pub use error::EngineError;
pub use ledger::{
    CATEGORIES_DOCUMENT, Ledger, LedgerBuilder, LedgerSnapshot, RECURRING_DOCUMENT,
    SHARDS_DOCUMENT,
};
pub use money::MoneyCents;
pub use recurrence::{
    Interval, MAX_PROJECTION_STEPS, Projection, Projector, RecurrenceRule, RecurringSeries,
    SeriesRegistry,
};
pub use shards::{MAX_MONTHS_PER_SHARD, Shard, ShardId, ShardIndex};
pub use store::{FsStore, MemoryStore, Store};
pub use transactions::{Transaction, decode_shard, encode_shard};

mod aggregation;
mod calendar;
mod categories;
mod error;
mod ledger;
mod money;
mod recurrence;
mod shards;
mod store;
mod transactions;

type ResultEngine<T> = Result<T, EngineError>;
