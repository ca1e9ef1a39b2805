//! Execution of the CLI commands against a loaded ledger.

use std::{collections::HashSet, fmt::Write};

use chrono::NaiveDate;
use engine::{
    AggregationFilter, CategoryAggregate, CategoryDirectory, Interval, Ledger, MonthKey, Store,
    Transaction, WindowReport,
};

use crate::{
    cli::{Command, PreviewArgs, RecurringAddArgs, RecurringCommand, ReportArgs, TransactionArgs},
    error::{AppError, Result},
};

/// Runs `command` and returns what should be printed.
pub async fn run<S: Store>(command: Command, ledger: &mut Ledger<S>, today: NaiveDate) -> Result<String> {
    match command {
        Command::Add(args) => {
            let tx = template(args);
            if !ledger.categories().contains(&tx.category_id) {
                tracing::warn!("category {} is not defined", tx.category_id);
            }
            let line = format!("added {} {} {}", tx.date, tx.amount, tx.category_id);
            ledger.add_transaction(tx);
            Ok(line)
        }
        Command::Recurring(recurring) => match recurring.command {
            RecurringCommand::Add(args) => add_series(ledger, args),
            RecurringCommand::List => Ok(list_series(ledger)),
            RecurringCommand::Remove { id } => {
                ledger.remove_series(&id)?;
                Ok(format!("removed {id}"))
            }
        },
        Command::Preview(args) => preview(ledger, args, today).await,
        Command::Report(args) => report(ledger, args, today).await,
    }
}

fn template(args: TransactionArgs) -> Transaction {
    Transaction::new(args.date, args.amount, args.category, args.method, args.note)
}

fn add_series<S: Store>(ledger: &mut Ledger<S>, args: RecurringAddArgs) -> Result<String> {
    let interval = match (args.weeks, args.months) {
        (Some(weeks), None) => Interval::weekly(weeks),
        (None, Some(months)) => Interval::monthly(months, args.anchor_day),
        _ => {
            return Err(AppError::Usage(
                "exactly one of --weeks or --months is required".to_string(),
            ));
        }
    };
    let template = template(args.template);
    if interval.rule(template.date).is_none() {
        return Err(AppError::Usage(format!("invalid interval {interval:?}")));
    }
    Ok(ledger.add_series(template, interval))
}

fn list_series<S: Store>(ledger: &Ledger<S>) -> String {
    let mut out = String::new();
    for series in ledger.series() {
        let rule = match series.rule() {
            Some(rule) => format!("{rule:?}"),
            None => "inactive".to_string(),
        };
        let last = series
            .last_materialized
            .map(|date| date.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{}  {} {:>10} {:<16} {rule} (last {last})",
            series.id, series.template.date, series.template.amount, series.template.category_id
        );
    }
    out
}

async fn preview<S: Store>(ledger: &mut Ledger<S>, args: PreviewArgs, today: NaiveDate) -> Result<String> {
    let previews = ledger.project_month(args.month, today).await?;
    let mut out = String::new();
    for tx in &previews {
        let _ = writeln!(
            out,
            "{} {:>10} {:<16} {:<10} {}",
            tx.date, tx.amount, tx.category_id, tx.payment_method_id, tx.note
        );
    }
    if previews.is_empty() {
        let _ = writeln!(out, "nothing scheduled in {}", args.month);
    }
    Ok(out)
}

async fn report<S: Store>(ledger: &mut Ledger<S>, args: ReportArgs, today: NaiveDate) -> Result<String> {
    let months = MonthKey::range(args.from, args.to);
    let filter = AggregationFilter {
        excluded_payment_methods: args.exclude_methods.into_iter().collect(),
        categories: (!args.categories.is_empty())
            .then(|| args.categories.into_iter().collect::<HashSet<_>>()),
    };
    let report = ledger
        .report(&months, filter, args.sort, today, args.with_previews)
        .await?;

    if args.json {
        return Ok(serde_json::to_string_pretty(&report)?);
    }
    Ok(render_report(&report, ledger.categories(), &months, args.sort))
}

fn render_report(
    report: &WindowReport,
    categories: &CategoryDirectory,
    months: &[MonthKey],
    sort: engine::SortKey,
) -> String {
    let mut out = String::new();
    match (months.first(), months.last()) {
        (Some(first), Some(last)) => {
            let _ = writeln!(
                out,
                "{first} .. {last} ({} months, children by {sort})",
                months.len()
            );
        }
        _ => return "empty range\n".to_string(),
    }
    let _ = writeln!(
        out,
        "{:<24} {:>12} {:>6} {:>10} {:>10}",
        "category", "sum", "count", "avg", "mavg"
    );
    for total in &report.totals {
        render_row(&mut out, total, categories, 0);
    }
    let _ = writeln!(
        out,
        "{:<24} {:>12} {:>6} {:>10.2}",
        "TOTAL",
        report.grand_total.sum,
        report.grand_total.count,
        report.grand_total.avg()
    );
    if !report.unknown_categories.is_empty() {
        let _ = writeln!(
            out,
            "warning: unknown categories ignored: {}",
            report.unknown_categories.join(", ")
        );
    }
    if !report.failed_months.is_empty() {
        let failed: Vec<String> = report.failed_months.iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "warning: months not aggregated: {}", failed.join(", "));
    }
    out
}

fn render_row(out: &mut String, aggregate: &CategoryAggregate, categories: &CategoryDirectory, depth: usize) {
    let name = categories
        .get(&aggregate.category_id)
        .map(|node| node.name.as_str())
        .filter(|name| !name.is_empty())
        .unwrap_or(aggregate.category_id.as_str());
    let label = format!("{}{name}", "  ".repeat(depth));
    let _ = writeln!(
        out,
        "{label:<24} {:>12} {:>6} {:>10.2} {:>10.2}",
        aggregate.sum,
        aggregate.count,
        aggregate.avg(),
        aggregate.mavg()
    );
    for child in &aggregate.children {
        render_row(out, child, categories, depth + 1);
    }
}
