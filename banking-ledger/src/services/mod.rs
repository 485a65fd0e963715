//! Ledger services: storage, engine and metrics.

pub mod database;
pub mod engine;
pub mod memory;
pub mod metrics;
pub mod statement_builder;
pub mod store;

pub use database::{Database, PgScope};
pub use engine::{
    JournalLookup, JournalRecord, PostingCommand, PostingReceipt, Reconciliation,
    StatementPeriod, TransactionEngine, TransferCommand, TransferReceipt,
};
pub use memory::{FailPoint, Fault, MemoryLedger, MemoryScope};
pub use store::{AccountAccessor, LedgerScope, LedgerStore};
