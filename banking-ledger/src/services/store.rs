//! Storage contracts consumed by the transaction engine.
//!
//! A [`LedgerStore`] hands out atomic scopes. Every read and write the engine
//! performs for one logical operation goes through the same [`LedgerScope`],
//! and the scope ends exactly once, by [`LedgerScope::commit`] or
//! [`LedgerScope::rollback`]. Dropping a scope without ending it discards its
//! writes.

use crate::error::LedgerError;
use crate::models::{
    Account, Journal, JournalEntry, NewJournal, NewJournalEntry, NewStatement, PostedEntry,
    Statement,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Source of atomic scopes.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Scope: LedgerScope;

    /// Open a new atomic scope. Fails with [`LedgerError::ScopeUnavailable`].
    async fn begin(&self) -> Result<Self::Scope, LedgerError>;
}

/// Unit of work over journals, entries and statements.
///
/// Methods return a domain error on failure and never partially apply.
#[async_trait]
pub trait LedgerScope: Send {
    async fn create_journal(&mut self, journal: &NewJournal) -> Result<Journal, LedgerError>;

    async fn create_journal_entry(
        &mut self,
        entry: &NewJournalEntry,
    ) -> Result<JournalEntry, LedgerError>;

    async fn journal_exists_by_reference(&mut self, reference_id: &str)
        -> Result<bool, LedgerError>;

    async fn create_statement(&mut self, statement: &NewStatement)
        -> Result<Statement, LedgerError>;

    /// Posted entries for the account with value date strictly before `date`.
    async fn entries_before_date(
        &mut self,
        account_id: Uuid,
        date: DateTime<Utc>,
    ) -> Result<Vec<PostedEntry>, LedgerError>;

    /// Posted entries for the account with value date in `[start, end]`,
    /// ordered by value date then creation order.
    async fn entries_between_dates(
        &mut self,
        account_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PostedEntry>, LedgerError>;

    /// Signed sum (CREDIT - DEBIT) of every posted entry for the account.
    async fn net_posted_amount(&mut self, account_id: Uuid) -> Result<Decimal, LedgerError>;

    async fn journal_by_id(&mut self, journal_id: Uuid) -> Result<Option<Journal>, LedgerError>;

    async fn journal_by_reference(
        &mut self,
        reference_id: &str,
    ) -> Result<Option<Journal>, LedgerError>;

    /// Entries of a journal in creation order.
    async fn entries_for_journal(
        &mut self,
        journal_id: Uuid,
    ) -> Result<Vec<JournalEntry>, LedgerError>;

    async fn statement_by_id(
        &mut self,
        statement_id: Uuid,
    ) -> Result<Option<Statement>, LedgerError>;

    /// Statements of an account, newest first.
    async fn statements_for_account(
        &mut self,
        account_id: Uuid,
    ) -> Result<Vec<Statement>, LedgerError>;

    /// Make every write of the scope visible. A failure leaves the outcome
    /// unknown to the caller.
    async fn commit(self) -> Result<(), LedgerError>;

    /// Discard every write of the scope.
    async fn rollback(self) -> Result<(), LedgerError>;
}

/// Read and update of account balances inside a caller's scope.
#[async_trait]
pub trait AccountAccessor<S: LedgerScope>: Send + Sync {
    /// Plain read, no row lock.
    async fn find_by_id(&self, scope: &mut S, account_id: Uuid) -> Result<Account, LedgerError>;

    /// Read and lock the account row until the scope ends.
    async fn find_for_update(
        &self,
        scope: &mut S,
        account_id: Uuid,
    ) -> Result<Account, LedgerError>;

    async fn update_balance(
        &self,
        scope: &mut S,
        account_id: Uuid,
        new_balance: Decimal,
    ) -> Result<(), LedgerError>;
}
