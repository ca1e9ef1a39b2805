//! Transaction records and the shard file codec.
//!
//! A shard file is a headerless, tab separated list of transactions, one per
//! line, with the fields in this order:
//!
//! ```text
//! date    amount  category_id  note  payment_method_id  series_id
//! ```
//!
//! `note` and `series_id` may be empty. The file ends with a newline.

use chrono::NaiveDate;
use csv::{QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, MoneyCents, MonthKey, ResultEngine, calendar::parse_date};

const FIELD_COUNT: usize = 6;

/// A single movement in the ledger.
///
/// `id` only identifies the record inside the running process (edit/delete);
/// it is never written to a shard file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(skip, default = "Uuid::new_v4")]
    pub id: Uuid,
    pub date: NaiveDate,
    pub amount: MoneyCents,
    pub category_id: String,
    pub payment_method_id: String,
    #[serde(default)]
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_id: Option<String>,
}

impl Transaction {
    pub fn new(
        date: NaiveDate,
        amount: MoneyCents,
        category_id: impl Into<String>,
        payment_method_id: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            date,
            amount,
            category_id: category_id.into(),
            payment_method_id: payment_method_id.into(),
            note: note.into(),
            series_id: None,
        }
    }

    pub fn month(&self) -> MonthKey {
        MonthKey::of(self.date)
    }

    /// A fresh copy of `self` dated `date`, with a new id and tagged with
    /// `series_id`.
    pub fn occurrence(&self, date: NaiveDate, series_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            date,
            series_id: Some(series_id.to_string()),
            ..self.clone()
        }
    }
}

/// Encodes transactions as a shard file, in the given order.
pub fn encode_shard<'a>(transactions: impl IntoIterator<Item = &'a Transaction>) -> ResultEngine<String> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quote_style(QuoteStyle::Never)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(vec![]);

    for tx in transactions {
        writer.write_record([
            tx.date.to_string(),
            tx.amount.to_string(),
            clean_field(&tx.category_id),
            clean_field(&tx.note),
            clean_field(&tx.payment_method_id),
            tx.series_id.as_deref().map(clean_field).unwrap_or_default(),
        ])?;
    }

    let data = writer
        .into_inner()
        .map_err(|err| EngineError::Storage(format!("failed to finalize shard: {err}")))?;
    String::from_utf8(data).map_err(|err| EngineError::Storage(err.to_string()))
}

/// Decodes the shard file `name`. Blank lines are ignored; any other
/// malformed line fails the whole file.
pub fn decode_shard(name: &str, content: &str) -> ResultEngine<Vec<Transaction>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quoting(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut transactions = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let line = record
            .position()
            .map(|pos| pos.line() as usize)
            .unwrap_or(index + 1);
        let invalid = |reason: String| EngineError::InvalidRecord {
            name: name.to_string(),
            line,
            reason,
        };

        if record.len() == 1 && record.get(0).is_some_and(|field| field.trim().is_empty()) {
            continue;
        }
        if record.len() != FIELD_COUNT && record.len() != FIELD_COUNT - 1 {
            return Err(invalid(format!(
                "expected {FIELD_COUNT} fields, got {}",
                record.len()
            )));
        }

        let field = |i: usize| record.get(i).unwrap_or_default();
        let date = parse_date(field(0)).map_err(|err| invalid(err.to_string()))?;
        let amount: MoneyCents = field(1).parse().map_err(|err: EngineError| invalid(err.to_string()))?;
        let series_id = Some(field(5).trim()).filter(|s| !s.is_empty()).map(str::to_string);

        transactions.push(Transaction {
            id: Uuid::new_v4(),
            date,
            amount,
            category_id: field(2).to_string(),
            note: field(3).to_string(),
            payment_method_id: field(4).to_string(),
            series_id,
        });
    }
    Ok(transactions)
}

fn clean_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}
