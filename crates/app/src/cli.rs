use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use engine::{MoneyCents, MonthKey, SortKey};

#[derive(Parser, Debug)]
#[command(name = "ledgerbook")]
#[command(about = "Personal ledger: transactions, recurring series and category reports")]
pub struct Cli {
    /// Optional settings file (TOML, extension may be omitted).
    #[arg(long)]
    pub config: Option<String>,

    /// Directory holding shard files and registries (overrides settings).
    #[arg(long, env = "LEDGERBOOK_DATA_DIR")]
    pub data_dir: Option<String>,

    /// Date used as "now" for recurring transactions (defaults to today).
    #[arg(long, value_parser = parse_date)]
    pub today: Option<NaiveDate>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record a transaction.
    Add(TransactionArgs),
    /// Manage recurring transactions.
    Recurring(Recurring),
    /// Show the upcoming recurring transactions of a month.
    Preview(PreviewArgs),
    /// Per-category totals over a range of months.
    Report(ReportArgs),
}

#[derive(Args, Debug)]
pub struct TransactionArgs {
    #[arg(long, value_parser = parse_date)]
    pub date: NaiveDate,
    #[arg(long, value_parser = parse_amount, allow_hyphen_values = true)]
    pub amount: MoneyCents,
    #[arg(long)]
    pub category: String,
    #[arg(long)]
    pub method: String,
    #[arg(long, default_value = "")]
    pub note: String,
}

#[derive(Args, Debug)]
pub struct Recurring {
    #[command(subcommand)]
    pub command: RecurringCommand,
}

#[derive(Subcommand, Debug)]
pub enum RecurringCommand {
    Add(RecurringAddArgs),
    List,
    Remove { id: String },
}

#[derive(Args, Debug)]
pub struct RecurringAddArgs {
    #[command(flatten)]
    pub template: TransactionArgs,
    /// Repeat every N weeks.
    #[arg(long, conflicts_with = "months")]
    pub weeks: Option<i64>,
    /// Repeat every N months.
    #[arg(long)]
    pub months: Option<i64>,
    /// Day of month for monthly series (defaults to the start date's day).
    #[arg(long, requires = "months")]
    pub anchor_day: Option<i64>,
}

#[derive(Args, Debug)]
pub struct PreviewArgs {
    #[arg(long, value_parser = parse_month)]
    pub month: MonthKey,
}

#[derive(Args, Debug)]
pub struct ReportArgs {
    #[arg(long, value_parser = parse_month)]
    pub from: MonthKey,
    #[arg(long, value_parser = parse_month)]
    pub to: MonthKey,
    #[arg(long, value_parser = parse_sort_key, default_value = "sum")]
    pub sort: SortKey,
    /// Payment methods to leave out (repeatable).
    #[arg(long = "exclude-method")]
    pub exclude_methods: Vec<String>,
    /// Only count these categories (repeatable).
    #[arg(long = "category")]
    pub categories: Vec<String>,
    /// Count upcoming recurring transactions too.
    #[arg(long)]
    pub with_previews: bool,
    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    engine::parse_date(raw).map_err(|err| err.to_string())
}

fn parse_month(raw: &str) -> Result<MonthKey, String> {
    raw.parse().map_err(|err: engine::EngineError| err.to_string())
}

fn parse_amount(raw: &str) -> Result<MoneyCents, String> {
    raw.parse().map_err(|err: engine::EngineError| err.to_string())
}

fn parse_sort_key(raw: &str) -> Result<SortKey, String> {
    raw.parse().map_err(|err: engine::EngineError| err.to_string())
}
