//! Customer account as seen by the ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Account lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Frozen,
    Closed,
}

impl AccountStatus {
    /// Convert to proto enum value.
    pub fn to_proto(self) -> i32 {
        match self {
            Self::Active => 1,
            Self::Frozen => 2,
            Self::Closed => 3,
        }
    }

    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Frozen => "frozen",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "frozen" => Some(Self::Frozen),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Customer account row. `balance` is only written by the transaction engine.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub account_id: Uuid,
    pub account_number: String,
    pub customer_id: Uuid,
    pub currency: String,
    pub account_type: String,
    pub status: String,
    pub balance: Decimal,
    pub opened_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Account {
    /// Get parsed status.
    pub fn parsed_status(&self) -> Option<AccountStatus> {
        AccountStatus::parse(&self.status)
    }

    /// Whether money may move in or out of this account.
    pub fn is_active(&self) -> bool {
        self.parsed_status() == Some(AccountStatus::Active)
    }
}

/// Input for opening an account with a zero balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAccount {
    pub customer_id: Uuid,
    pub account_number: String,
    pub currency: String,
    pub account_type: String,
}

impl OpenAccount {
    /// Savings account in the given currency with a generated account number.
    pub fn savings(customer_id: Uuid, currency: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            customer_id,
            account_number: format!("SAV-{}", &suffix[..12].to_uppercase()),
            currency: currency.to_uppercase(),
            account_type: "savings".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_string() {
        for status in [
            AccountStatus::Active,
            AccountStatus::Frozen,
            AccountStatus::Closed,
        ] {
            assert_eq!(AccountStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AccountStatus::parse("dormant"), None);
    }

    #[test]
    fn savings_account_number_is_prefixed() {
        let input = OpenAccount::savings(Uuid::new_v4(), "npr");
        assert!(input.account_number.starts_with("SAV-"));
        assert_eq!(input.account_number.len(), 16);
        assert_eq!(input.currency, "NPR");
    }
}
