use clap::Parser;
use engine::{CATEGORIES_DOCUMENT, CategoryDirectory, CategoryRecord, FsStore, Ledger, Store};

mod cli;
mod commands;
mod error;
mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = cli::Cli::parse();
    let settings = settings::Settings::new(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "ledgerbook={level},engine={level}",
            level = settings.app.level
        ))
        .with_writer(std::io::stderr)
        .init();

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| settings.storage.data_dir.clone());
    tracing::debug!("using data directory {data_dir}");
    let store = FsStore::new(data_dir);
    let categories = load_categories(&store).await?;

    let mut ledger = Ledger::builder()
        .store(store)
        .shard_capacity(settings.storage.shard_capacity)
        .max_projection_steps(settings.storage.max_projection_steps)
        .categories(categories)
        .build()
        .await?;

    let today = cli
        .today
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    let output = commands::run(cli.command, &mut ledger, today).await?;
    ledger.flush().await?;

    print!("{output}");
    if !output.is_empty() && !output.ends_with('\n') {
        println!();
    }
    Ok(())
}

async fn load_categories(store: &FsStore) -> error::Result<CategoryDirectory> {
    match store.load(CATEGORIES_DOCUMENT).await? {
        Some(content) => {
            let records: Vec<CategoryRecord> = serde_json::from_str(&content)?;
            Ok(CategoryDirectory::from_records(records)?)
        }
        None => {
            tracing::warn!("no {CATEGORIES_DOCUMENT} found, reports will list no categories");
            Ok(CategoryDirectory::new())
        }
    }
}
