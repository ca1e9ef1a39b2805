use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;

use engine::{
    AggregationFilter, CategoryDirectory, CategoryRecord, EngineError, Interval, Ledger,
    MemoryStore, MoneyCents, MonthKey, RECURRING_DOCUMENT, SHARDS_DOCUMENT, ShardId, SortKey,
    Store, Transaction,
};

fn date(raw: &str) -> NaiveDate {
    engine::parse_date(raw).unwrap()
}

fn month(raw: &str) -> MonthKey {
    raw.parse().unwrap()
}

fn tx(day: &str, cents: i64, category: &str, method: &str) -> Transaction {
    Transaction::new(date(day), MoneyCents::new(cents), category, method, "")
}

fn categories() -> CategoryDirectory {
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
    ])
    .unwrap()
}

async fn ledger_with(store: MemoryStore, capacity: usize) -> Ledger<MemoryStore> {
    Ledger::builder()
        .store(store)
        .shard_capacity(capacity)
        .categories(categories())
        .build()
        .await
        .unwrap()
}

async fn reopen(ledger: &Ledger<MemoryStore>, capacity: usize) -> Ledger<MemoryStore> {
    reopen_store(ledger.store(), capacity).await
}

async fn reopen_store(store: &MemoryStore, capacity: usize) -> Ledger<MemoryStore> {
    let mut documents = Vec::new();
    for name in store.names().await {
        let content = store.load(&name).await.unwrap().unwrap();
        documents.push((name, content));
    }
    ledger_with(MemoryStore::with_documents(documents), capacity).await
}

/// Memory store whose first shard save fails.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    failed: AtomicBool,
}

impl Store for FlakyStore {
    async fn load(&self, name: &str) -> Result<Option<String>, EngineError> {
        self.inner.load(name).await
    }

    async fn save(&self, name: &str, content: String) -> Result<(), EngineError> {
        if name.ends_with(".tsv") && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Storage("disk full".to_string()));
        }
        self.inner.save(name, content).await
    }
}

#[tokio::test]
async fn months_fill_shards_in_order() {
    let mut ledger = ledger_with(MemoryStore::new(), 5).await;
    for m in MonthKey::range(month("2024-01"), month("2024-06")) {
        ledger.add_transaction(tx(&m.first_day().unwrap().to_string(), 100, "groceries", "card"));
    }
    ledger.flush().await.unwrap();

    let index = ledger.shard_index();
    assert_eq!(index.months_in(ShardId(1)).len(), 5);
    assert_eq!(index.months_in(ShardId(2)), vec![month("2024-06")]);

    let names = ledger.store().names().await;
    assert!(names.contains(&"shard-1.tsv".to_string()));
    assert!(names.contains(&"shard-2.tsv".to_string()));
    assert!(names.contains(&SHARDS_DOCUMENT.to_string()));
}

#[tokio::test]
async fn flushed_ledger_reloads_identically() {
    let mut ledger = ledger_with(MemoryStore::new(), 2).await;
    ledger.add_transaction(tx("2024-02-10", -2550, "groceries", "card"));
    ledger.add_transaction(tx("2024-01-05", -1200, "restaurants", "cash"));
    ledger.add_transaction(tx("2024-03-01", -80000, "rent", "bank"));
    ledger.flush().await.unwrap();
    assert!(!ledger.has_unsaved_changes());

    let shard = ledger.store().load("shard-1.tsv").await.unwrap().unwrap();
    assert_eq!(
        shard,
        "2024-01-05\t-12.00\trestaurants\t\tcash\t\n2024-02-10\t-25.50\tgroceries\t\tcard\t\n"
    );

    let reloaded = reopen(&ledger, 2).await;
    assert_eq!(reloaded.months(), ledger.months());
    assert_eq!(reloaded.shard_index(), ledger.shard_index());
    let amounts: Vec<i64> = reloaded
        .transactions_in(month("2024-02"))
        .iter()
        .map(|tx| tx.amount.cents())
        .collect();
    assert_eq!(amounts, vec![-2550]);
}

#[tokio::test]
async fn loads_shards_without_index() {
    let store = MemoryStore::with_documents([
        ("shard-1.tsv", "2024-01-05\t10\tgroceries\t\tcard\t\n2024-02-05\t20\tgroceries\t\tcard\t\n"),
        ("shard-2.tsv", "2024-03-05\t30\tgroceries\t\tcard\t\n"),
    ]);
    let ledger = ledger_with(store, 12).await;

    assert_eq!(ledger.shard_index().shard_of(month("2024-02")), Some(ShardId(1)));
    assert_eq!(ledger.shard_index().shard_of(month("2024-03")), Some(ShardId(2)));
    assert!(ledger.has_unsaved_changes());
}

#[tokio::test]
async fn malformed_shard_fails_loading() {
    let store = MemoryStore::with_documents([
        (SHARDS_DOCUMENT, r#"{ "shards": [{ "id": 1, "months": ["2024-01"] }] }"#),
        ("shard-1.tsv", "2024-01-05\tten\tgroceries\t\tcard\t\n"),
    ]);
    let result = Ledger::builder().store(store).build().await;
    assert!(matches!(
        result,
        Err(EngineError::InvalidRecord { line: 1, .. })
    ));
}

#[tokio::test]
async fn edit_moves_between_months_and_delete_checks_ids() {
    let mut ledger = ledger_with(MemoryStore::new(), 12).await;
    let id = ledger.add_transaction(tx("2024-01-31", -500, "groceries", "card"));

    ledger
        .edit_transaction(id, tx("2024-02-01", -700, "groceries", "card"))
        .unwrap();
    assert!(ledger.transactions_in(month("2024-01")).is_empty());
    assert_eq!(ledger.transaction(id).unwrap().amount, MoneyCents::new(-700));

    let removed = ledger.delete_transaction(id).unwrap();
    assert_eq!(removed.date, date("2024-02-01"));
    assert_eq!(
        ledger.delete_transaction(id),
        Err(EngineError::KeyNotFound(id.to_string()))
    );
}

#[tokio::test]
async fn projection_catches_up_and_persists_series() {
    let mut ledger = ledger_with(MemoryStore::new(), 12).await;
    let series_id = ledger.add_series(
        tx("2024-01-31", -80000, "rent", "bank"),
        Interval::monthly(1, Some(31)),
    );

    let previews = ledger
        .project_month(month("2024-03"), date("2024-03-15"))
        .await
        .unwrap();

    assert_eq!(previews.len(), 1);
    assert_eq!(previews[0].date, date("2024-03-31"));
    assert!(ledger.transactions_in(month("2024-03")).is_empty());
    let january = ledger.transactions_in(month("2024-01"));
    let february = ledger.transactions_in(month("2024-02"));
    assert_eq!(january[0].series_id.as_deref(), Some(series_id.as_str()));
    assert_eq!(february[0].date, date("2024-02-29"));

    let registry = ledger.store().load(RECURRING_DOCUMENT).await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&registry).unwrap();
    assert_eq!(value["items"][&series_id]["lastMaterialized"], "2024-02-29");
    assert!(ledger.store().load("shard-1.tsv").await.unwrap().is_some());

    // Nothing is materialized twice.
    ledger
        .project_month(month("2024-03"), date("2024-03-15"))
        .await
        .unwrap();
    assert_eq!(ledger.transactions_in(month("2024-02")).len(), 1);
}

#[tokio::test]
async fn invalid_series_never_blocks_projection() {
    let mut ledger = ledger_with(MemoryStore::new(), 12).await;
    ledger.add_series(tx("2024-01-01", -100, "groceries", "card"), Interval::default());
    ledger.add_series(tx("2024-03-20", -900, "groceries", "card"), Interval::weekly(1));

    let previews = ledger
        .project_month(month("2024-03"), date("2024-03-15"))
        .await
        .unwrap();
    let dates: Vec<NaiveDate> = previews.iter().map(|tx| tx.date).collect();
    assert_eq!(dates, vec![date("2024-03-20"), date("2024-03-27")]);
    assert!(ledger.months().is_empty());
}

#[tokio::test]
async fn report_rolls_up_and_optionally_counts_previews() {
    let mut ledger = ledger_with(MemoryStore::new(), 12).await;
    ledger.add_transaction(tx("2024-03-01", 4000, "groceries", "card"));
    ledger.add_transaction(tx("2024-03-02", 3000, "groceries", "card"));
    ledger.add_transaction(tx("2024-03-03", 3000, "groceries", "card"));
    ledger.add_transaction(tx("2024-03-04", 2500, "restaurants", "card"));
    ledger.add_transaction(tx("2024-03-05", 2500, "restaurants", "cash"));
    ledger.add_series(tx("2024-03-20", 1000, "restaurants", "card"), Interval::monthly(1, None));

    let today = date("2024-03-15");
    let report = ledger
        .report(&[month("2024-03")], AggregationFilter::default(), SortKey::Sum, today, false)
        .await
        .unwrap();

    let food = &report.totals[0];
    assert_eq!(food.category_id, "food");
    assert_eq!(food.sum, MoneyCents::new(15000));
    assert_eq!(food.count, 5);
    let sums: Vec<i64> = food.children.iter().map(|c| c.sum.cents()).collect();
    assert_eq!(sums, vec![10000, 5000]);
    assert_eq!(report.grand_total.count, 5);

    let with_previews = ledger
        .report(&[month("2024-03")], AggregationFilter::default(), SortKey::Sum, today, true)
        .await
        .unwrap();
    assert_eq!(with_previews.totals[0].sum, MoneyCents::new(16000));
    assert_eq!(ledger.transactions_in(month("2024-03")).len(), 5);
}

#[tokio::test]
async fn snapshot_restores_discarded_edits() {
    let mut ledger = ledger_with(MemoryStore::new(), 12).await;
    ledger.add_transaction(tx("2024-01-05", 100, "groceries", "card"));
    ledger.flush().await.unwrap();

    let snapshot = ledger.capture();
    ledger.add_transaction(tx("2024-05-05", 100, "groceries", "card"));
    ledger.add_series(tx("2024-05-05", 100, "groceries", "card"), Interval::weekly(2));
    ledger.restore(snapshot.clone());

    assert_eq!(ledger.months(), vec![month("2024-01")]);
    assert_eq!(ledger.series().count(), 0);
    assert_eq!(ledger.capture(), snapshot);
}

#[tokio::test]
async fn failed_shard_save_keeps_transactions_pending() {
    let mut ledger = Ledger::builder()
        .store(FlakyStore::default())
        .shard_capacity(1)
        .build()
        .await
        .unwrap();
    let series_id = ledger.add_series(
        tx("2024-01-31", -80000, "rent", "bank"),
        Interval::monthly(1, Some(31)),
    );

    let result = ledger.project_month(month("2024-03"), date("2024-03-15")).await;
    assert!(matches!(result, Err(EngineError::Storage(_))));
    assert!(ledger.has_unsaved_changes());
    let store = &ledger.store().inner;
    assert!(store.load("shard-1.tsv").await.unwrap().is_none());
    assert!(store.load(RECURRING_DOCUMENT).await.unwrap().is_none());

    ledger.flush().await.unwrap();
    assert!(!ledger.has_unsaved_changes());

    let reloaded = reopen_store(&ledger.store().inner, 1).await;
    assert_eq!(reloaded.months(), vec![month("2024-01"), month("2024-02")]);
    assert_eq!(
        reloaded.series().next().unwrap().last_materialized,
        Some(date("2024-02-29"))
    );
    assert_eq!(reloaded.series().next().unwrap().id, series_id);
}

#[tokio::test]
async fn oversized_steps_never_write_unloadable_months() {
    let mut ledger = ledger_with(MemoryStore::new(), 12).await;
    ledger.add_series(
        tx("2024-01-31", -100, "rent", "bank"),
        Interval::monthly(4_000_000, None),
    );
    ledger.add_series(tx("2024-02-01", -100, "rent", "bank"), Interval::weekly(100_000_000));

    let previews = ledger
        .project_month(month("2024-03"), date("2024-03-15"))
        .await
        .unwrap();
    assert!(previews.is_empty());
    assert_eq!(ledger.months(), vec![month("2024-01"), month("2024-02")]);

    let reloaded = reopen(&ledger, 12).await;
    assert_eq!(reloaded.months(), ledger.months());

    // The next pass leaves both series alone.
    ledger
        .project_month(month("2024-04"), date("2024-04-15"))
        .await
        .unwrap();
    assert_eq!(ledger.months(), vec![month("2024-01"), month("2024-02")]);
}
