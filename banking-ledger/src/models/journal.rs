//! Journal and journal entry models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Entry type (debit or credit) of a single journal leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    /// Convert to proto enum value.
    pub fn to_proto(self) -> i32 {
        match self {
            Self::Debit => 1,
            Self::Credit => 2,
        }
    }

    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "DEBIT",
            Self::Credit => "CREDIT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DEBIT" => Some(Self::Debit),
            "CREDIT" => Some(Self::Credit),
            _ => None,
        }
    }

    /// Signed effect of `amount` on an account balance (credit adds, debit subtracts).
    pub fn apply(self, amount: Decimal) -> Decimal {
        match self {
            Self::Credit => amount,
            Self::Debit => -amount,
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Journal status. Only `Posted` journals are produced today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalStatus {
    Posted,
    Reversed,
}

impl JournalStatus {
    /// Convert to proto enum value.
    pub fn to_proto(self) -> i32 {
        match self {
            Self::Posted => 1,
            Self::Reversed => 2,
        }
    }

    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posted => "posted",
            Self::Reversed => "reversed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "posted" => Some(Self::Posted),
            "reversed" => Some(Self::Reversed),
            _ => None,
        }
    }
}

/// Journal header: one logical money movement keyed by its reference id.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Journal {
    pub journal_id: Uuid,
    pub reference_id: String,
    pub narration: String,
    pub value_date: DateTime<Utc>,
    pub status: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Journal {
    /// Get parsed status.
    pub fn parsed_status(&self) -> Option<JournalStatus> {
        JournalStatus::parse(&self.status)
    }
}

/// A single debit or credit leg against one account.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JournalEntry {
    pub entry_id: Uuid,
    pub journal_id: Uuid,
    pub account_id: Uuid,
    pub entry_type: String,
    pub amount: Decimal,
    /// Store-assigned creation order.
    pub entry_seq: i64,
    pub created_utc: DateTime<Utc>,
}

impl JournalEntry {
    /// Get parsed entry type.
    pub fn parsed_type(&self) -> Option<EntryType> {
        EntryType::parse(&self.entry_type)
    }
}

/// Input for creating a journal header.
#[derive(Debug, Clone)]
pub struct NewJournal {
    pub journal_id: Uuid,
    pub reference_id: String,
    pub narration: String,
    pub value_date: DateTime<Utc>,
}

/// Input for creating a journal entry.
#[derive(Debug, Clone)]
pub struct NewJournalEntry {
    pub entry_id: Uuid,
    pub journal_id: Uuid,
    pub account_id: Uuid,
    pub entry_type: EntryType,
    pub amount: Decimal,
}

/// Journal entry joined with its journal header, as read for statements.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PostedEntry {
    pub entry_id: Uuid,
    pub journal_id: Uuid,
    pub account_id: Uuid,
    pub entry_type: String,
    pub amount: Decimal,
    pub entry_seq: i64,
    pub value_date: DateTime<Utc>,
    pub narration: String,
}

impl PostedEntry {
    /// Get parsed entry type.
    pub fn parsed_type(&self) -> Option<EntryType> {
        EntryType::parse(&self.entry_type)
    }

    /// Signed effect on the account balance. Unknown types contribute nothing.
    pub fn signed_amount(&self) -> Decimal {
        self.parsed_type()
            .map(|t| t.apply(self.amount))
            .unwrap_or(Decimal::ZERO)
    }
}
