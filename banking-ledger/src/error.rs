//! Domain errors returned by the ledger engine and its stores.

use rust_decimal::Decimal;
use service_core::grpc::IntoStatus;
use std::time::Duration;
use thiserror::Error;
use tonic::Status;
use uuid::Uuid;

/// gRPC metadata key carrying the stable error kind.
pub const ERROR_KIND_KEY: &str = "x-error-kind";

/// Stable, client-visible classification of a [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    InsufficientFunds,
    DuplicateReference,
    PersistenceFailure,
    ScopeUnavailable,
    Cancelled,
    DeadlineExceeded,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::FailedPrecondition => "failed_precondition",
            Self::InsufficientFunds => "insufficient_funds",
            Self::DuplicateReference => "duplicate_reference",
            Self::PersistenceFailure => "persistence_failure",
            Self::ScopeUnavailable => "scope_unavailable",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Account {0} not found")]
    AccountNotFound(Uuid),

    #[error("Account {account_id} is {status}")]
    AccountNotActive { account_id: Uuid, status: String },

    #[error("Insufficient funds in account {account_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        account_id: Uuid,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Duplicate reference_id '{0}'")]
    DuplicateReference(String),

    #[error("Journal {0} not found")]
    JournalNotFound(String),

    #[error("Statement {0} not found")]
    StatementNotFound(Uuid),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(anyhow::Error),

    #[error("Atomic scope unavailable: {0}")]
    ScopeUnavailable(anyhow::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::AccountNotFound(_) | Self::JournalNotFound(_) | Self::StatementNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::AccountNotActive { .. } => ErrorKind::FailedPrecondition,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::DuplicateReference(_) => ErrorKind::DuplicateReference,
            Self::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
            Self::ScopeUnavailable(_) => ErrorKind::ScopeUnavailable,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Wrap a store error with the operation that failed.
    pub(crate) fn persistence(context: &str, err: impl std::fmt::Display) -> Self {
        Self::PersistenceFailure(anyhow::anyhow!("{}: {}", context, err))
    }
}

impl IntoStatus for LedgerError {
    fn into_status(self) -> Status {
        let kind = self.kind();
        let mut status = match &self {
            Self::InvalidArgument(_) => Status::invalid_argument(self.to_string()),
            Self::AccountNotFound(_) | Self::JournalNotFound(_) | Self::StatementNotFound(_) => {
                Status::not_found(self.to_string())
            }
            Self::AccountNotActive { .. } | Self::InsufficientFunds { .. } => {
                Status::failed_precondition(self.to_string())
            }
            Self::DuplicateReference(_) => Status::already_exists(self.to_string()),
            Self::PersistenceFailure(err) => {
                // Log the full error but don't expose it to clients
                tracing::error!(error = %err, "Persistence failure");
                Status::internal("Persistence failure; re-query state before retrying")
            }
            Self::ScopeUnavailable(err) => {
                tracing::error!(error = %err, "Atomic scope unavailable");
                Status::unavailable("Ledger store unavailable")
            }
            Self::Cancelled => Status::cancelled(self.to_string()),
            Self::DeadlineExceeded(_) => Status::deadline_exceeded(self.to_string()),
        };

        if let Ok(value) = kind.as_str().parse() {
            status.metadata_mut().insert(ERROR_KIND_KEY, value);
        }
        status
    }
}

impl From<LedgerError> for Status {
    fn from(err: LedgerError) -> Self {
        err.into_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    fn kind_metadata(status: &Status) -> &str {
        status
            .metadata()
            .get(ERROR_KIND_KEY)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    #[test]
    fn insufficient_funds_maps_to_failed_precondition() {
        let err = LedgerError::InsufficientFunds {
            account_id: Uuid::nil(),
            available: Decimal::new(1000, 2),
            requested: Decimal::new(2000, 2),
        };
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);

        let status: Status = err.into();
        assert_eq!(status.code(), Code::FailedPrecondition);
        assert_eq!(kind_metadata(&status), "insufficient_funds");
        assert!(status.message().contains("available 10.00"));
    }

    #[test]
    fn duplicate_reference_maps_to_already_exists() {
        let status: Status = LedgerError::DuplicateReference("r1".to_string()).into();
        assert_eq!(status.code(), Code::AlreadyExists);
        assert_eq!(kind_metadata(&status), "duplicate_reference");
    }

    #[test]
    fn persistence_failure_hides_details() {
        let err = LedgerError::persistence("Failed to update balance", "connection reset");
        let status: Status = err.into();
        assert_eq!(status.code(), Code::Internal);
        assert!(!status.message().contains("connection reset"));
        assert_eq!(kind_metadata(&status), "persistence_failure");
    }

    #[test]
    fn not_found_variants_share_a_kind() {
        assert_eq!(
            LedgerError::AccountNotFound(Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            LedgerError::StatementNotFound(Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            LedgerError::JournalNotFound("r9".to_string()).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn cancellation_and_deadline_codes() {
        let cancelled: Status = LedgerError::Cancelled.into();
        assert_eq!(cancelled.code(), Code::Cancelled);

        let deadline: Status = LedgerError::DeadlineExceeded(Duration::from_millis(5)).into();
        assert_eq!(deadline.code(), Code::DeadlineExceeded);
    }
}
