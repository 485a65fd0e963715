//! Banking Ledger - deposits, withdrawals, transfers and statements over a
//! journal of debit and credit entries.

pub mod config;
pub mod error;
pub mod grpc;
pub mod models;
pub mod services;
pub mod startup;

pub use error::{ErrorKind, LedgerError};
