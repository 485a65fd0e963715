//! Statement models.

use super::EntryType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Persisted statement record. Never mutated after creation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Statement {
    pub statement_id: Uuid,
    pub account_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub opening_balance: Decimal,
    pub closing_balance: Decimal,
    pub generated_utc: DateTime<Utc>,
    pub content: Option<String>,
}

/// Input for persisting a statement.
#[derive(Debug, Clone)]
pub struct NewStatement {
    pub statement_id: Uuid,
    pub account_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub opening_balance: Decimal,
    pub closing_balance: Decimal,
    pub generated_utc: DateTime<Utc>,
    pub content: Option<String>,
}

/// Statement line with running balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementLine {
    pub entry_id: Uuid,
    pub journal_id: Uuid,
    pub value_date: DateTime<Utc>,
    pub narration: String,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub running_balance: Decimal,
}

/// A statement together with its ordered transaction lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementReport {
    pub statement: Statement,
    pub lines: Vec<StatementLine>,
}
