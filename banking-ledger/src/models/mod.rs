//! Domain models for banking-ledger.

mod account;
mod journal;
mod statement;

pub use account::{Account, AccountStatus, OpenAccount};
pub use journal::{
    EntryType, Journal, JournalEntry, JournalStatus, NewJournal, NewJournalEntry, PostedEntry,
};
pub use statement::{NewStatement, Statement, StatementLine, StatementReport};
