//! In-process ledger store used by tests and local tooling.
//!
//! A scope holds the ledger-wide lock for its whole lifetime and works on a
//! copy of the state; commit swaps the copy in, rollback or drop discards it.
//! Scopes are therefore fully serialized, which is the strongest isolation a
//! relational store could offer.

use crate::error::LedgerError;
use crate::models::{
    Account, AccountStatus, Journal, JournalEntry, JournalStatus, NewJournal, NewJournalEntry,
    NewStatement, OpenAccount, PostedEntry, Statement,
};
use crate::services::store::{AccountAccessor, LedgerScope, LedgerStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Where an injected fault fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Begin,
    CreateJournal,
    CreateJournalEntry,
    UpdateBalance,
    Commit,
}

/// One-shot fault, consumed the first time its point is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Return a store error.
    Fail(FailPoint),
    /// Never complete. Only useful where the engine races a deadline.
    Stall(FailPoint),
}

impl Fault {
    fn point(&self) -> FailPoint {
        match self {
            Self::Fail(p) | Self::Stall(p) => *p,
        }
    }
}

/// Counts of how scopes ended.
#[derive(Debug, Default)]
pub struct ScopeStats {
    opened: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl ScopeStats {
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }

    /// Explicit rollbacks plus scopes dropped without ending.
    pub fn rolled_back(&self) -> u64 {
        self.rolled_back.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    accounts: HashMap<Uuid, Account>,
    journals: HashMap<Uuid, Journal>,
    entries: Vec<JournalEntry>,
    statements: Vec<Statement>,
    next_seq: i64,
}

impl LedgerState {
    fn posted_entries<F>(&self, account_id: Uuid, in_range: F) -> Vec<PostedEntry>
    where
        F: Fn(DateTime<Utc>) -> bool,
    {
        let mut posted: Vec<PostedEntry> = self
            .entries
            .iter()
            .filter(|e| e.account_id == account_id)
            .filter_map(|e| {
                let journal = self.journals.get(&e.journal_id)?;
                if journal.parsed_status() != Some(JournalStatus::Posted)
                    || !in_range(journal.value_date)
                {
                    return None;
                }
                Some(PostedEntry {
                    entry_id: e.entry_id,
                    journal_id: e.journal_id,
                    account_id: e.account_id,
                    entry_type: e.entry_type.clone(),
                    amount: e.amount,
                    entry_seq: e.entry_seq,
                    value_date: journal.value_date,
                    narration: journal.narration.clone(),
                })
            })
            .collect();
        posted.sort_by(|a, b| {
            a.value_date
                .cmp(&b.value_date)
                .then(a.entry_seq.cmp(&b.entry_seq))
        });
        posted
    }
}

type FaultSlot = Arc<std::sync::Mutex<Option<Fault>>>;

async fn trip(faults: &FaultSlot, point: FailPoint) -> Result<(), LedgerError> {
    let fault = {
        let mut slot = faults.lock().unwrap_or_else(PoisonError::into_inner);
        match *slot {
            Some(f) if f.point() == point => slot.take(),
            _ => None,
        }
    };

    match fault {
        Some(Fault::Fail(FailPoint::Begin)) => Err(LedgerError::ScopeUnavailable(
            anyhow::anyhow!("injected failure at {:?}", point),
        )),
        Some(Fault::Fail(_)) => Err(LedgerError::PersistenceFailure(anyhow::anyhow!(
            "injected failure at {:?}",
            point
        ))),
        Some(Fault::Stall(_)) => {
            std::future::pending::<()>().await;
            Ok(())
        }
        None => Ok(()),
    }
}

/// Shared handle to an in-memory ledger. Clones see the same state.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    faults: FaultSlot,
    stats: Arc<ScopeStats>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot fault, replacing any armed one.
    pub fn inject(&self, fault: Fault) {
        *self.faults.lock().unwrap_or_else(PoisonError::into_inner) = Some(fault);
    }

    pub fn stats(&self) -> &ScopeStats {
        &self.stats
    }

    /// Open an active account with a zero balance.
    pub async fn open_account(&self, input: &OpenAccount) -> Account {
        let now = Utc::now();
        let account = Account {
            account_id: Uuid::new_v4(),
            account_number: input.account_number.clone(),
            customer_id: input.customer_id,
            currency: input.currency.clone(),
            account_type: input.account_type.clone(),
            status: AccountStatus::Active.as_str().to_string(),
            balance: Decimal::ZERO,
            opened_utc: now,
            created_utc: now,
            updated_utc: now,
        };
        self.state
            .lock()
            .await
            .accounts
            .insert(account.account_id, account.clone());
        account
    }

    pub async fn set_status(&self, account_id: Uuid, status: AccountStatus) {
        if let Some(account) = self.state.lock().await.accounts.get_mut(&account_id) {
            account.status = status.as_str().to_string();
        }
    }

    /// Overwrite a balance without a journal. Only for corrupting state in tests.
    pub async fn force_balance(&self, account_id: Uuid, balance: Decimal) {
        if let Some(account) = self.state.lock().await.accounts.get_mut(&account_id) {
            account.balance = balance;
        }
    }

    pub async fn account(&self, account_id: Uuid) -> Option<Account> {
        self.state.lock().await.accounts.get(&account_id).cloned()
    }

    pub async fn journal_count(&self) -> usize {
        self.state.lock().await.journals.len()
    }

    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn statement_count(&self) -> usize {
        self.state.lock().await.statements.len()
    }

    /// Net of all posted entries for the account.
    pub async fn ledger_balance(&self, account_id: Uuid) -> Decimal {
        let state = self.state.lock().await;
        state
            .posted_entries(account_id, |_| true)
            .iter()
            .map(PostedEntry::signed_amount)
            .sum()
    }
}

/// Atomic scope over a [`MemoryLedger`].
pub struct MemoryScope {
    guard: OwnedMutexGuard<LedgerState>,
    work: LedgerState,
    faults: FaultSlot,
    stats: Arc<ScopeStats>,
    ended: bool,
}

impl Drop for MemoryScope {
    fn drop(&mut self) {
        if !self.ended {
            self.stats.rolled_back.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    type Scope = MemoryScope;

    async fn begin(&self) -> Result<MemoryScope, LedgerError> {
        trip(&self.faults, FailPoint::Begin).await?;
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryScope {
            guard,
            work,
            faults: self.faults.clone(),
            stats: self.stats.clone(),
            ended: false,
        })
    }
}

#[async_trait]
impl LedgerScope for MemoryScope {
    async fn create_journal(&mut self, journal: &NewJournal) -> Result<Journal, LedgerError> {
        trip(&self.faults, FailPoint::CreateJournal).await?;
        if self
            .work
            .journals
            .values()
            .any(|j| j.reference_id == journal.reference_id)
        {
            return Err(LedgerError::DuplicateReference(journal.reference_id.clone()));
        }
        let now = Utc::now();
        let created = Journal {
            journal_id: journal.journal_id,
            reference_id: journal.reference_id.clone(),
            narration: journal.narration.clone(),
            value_date: journal.value_date,
            status: JournalStatus::Posted.as_str().to_string(),
            created_utc: now,
            updated_utc: now,
        };
        self.work
            .journals
            .insert(created.journal_id, created.clone());
        Ok(created)
    }

    async fn create_journal_entry(
        &mut self,
        entry: &NewJournalEntry,
    ) -> Result<JournalEntry, LedgerError> {
        trip(&self.faults, FailPoint::CreateJournalEntry).await?;
        if !self.work.journals.contains_key(&entry.journal_id) {
            return Err(LedgerError::persistence(
                "Failed to create journal entry",
                format!("journal {} does not exist", entry.journal_id),
            ));
        }
        if !self.work.accounts.contains_key(&entry.account_id) {
            return Err(LedgerError::persistence(
                "Failed to create journal entry",
                format!("account {} does not exist", entry.account_id),
            ));
        }
        if entry.amount <= Decimal::ZERO {
            return Err(LedgerError::persistence(
                "Failed to create journal entry",
                "amount must be positive",
            ));
        }
        self.work.next_seq += 1;
        let created = JournalEntry {
            entry_id: entry.entry_id,
            journal_id: entry.journal_id,
            account_id: entry.account_id,
            entry_type: entry.entry_type.as_str().to_string(),
            amount: entry.amount,
            entry_seq: self.work.next_seq,
            created_utc: Utc::now(),
        };
        self.work.entries.push(created.clone());
        Ok(created)
    }

    async fn journal_exists_by_reference(
        &mut self,
        reference_id: &str,
    ) -> Result<bool, LedgerError> {
        Ok(self
            .work
            .journals
            .values()
            .any(|j| j.reference_id == reference_id))
    }

    async fn create_statement(
        &mut self,
        statement: &NewStatement,
    ) -> Result<Statement, LedgerError> {
        if !self.work.accounts.contains_key(&statement.account_id) {
            return Err(LedgerError::persistence(
                "Failed to create statement",
                format!("account {} does not exist", statement.account_id),
            ));
        }
        let created = Statement {
            statement_id: statement.statement_id,
            account_id: statement.account_id,
            period_start: statement.period_start,
            period_end: statement.period_end,
            opening_balance: statement.opening_balance,
            closing_balance: statement.closing_balance,
            generated_utc: statement.generated_utc,
            content: statement.content.clone(),
        };
        self.work.statements.push(created.clone());
        Ok(created)
    }

    async fn entries_before_date(
        &mut self,
        account_id: Uuid,
        date: DateTime<Utc>,
    ) -> Result<Vec<PostedEntry>, LedgerError> {
        Ok(self.work.posted_entries(account_id, |d| d < date))
    }

    async fn entries_between_dates(
        &mut self,
        account_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PostedEntry>, LedgerError> {
        Ok(self
            .work
            .posted_entries(account_id, |d| d >= start && d <= end))
    }

    async fn net_posted_amount(&mut self, account_id: Uuid) -> Result<Decimal, LedgerError> {
        Ok(self
            .work
            .posted_entries(account_id, |_| true)
            .iter()
            .map(PostedEntry::signed_amount)
            .sum())
    }

    async fn journal_by_id(&mut self, journal_id: Uuid) -> Result<Option<Journal>, LedgerError> {
        Ok(self.work.journals.get(&journal_id).cloned())
    }

    async fn journal_by_reference(
        &mut self,
        reference_id: &str,
    ) -> Result<Option<Journal>, LedgerError> {
        Ok(self
            .work
            .journals
            .values()
            .find(|j| j.reference_id == reference_id)
            .cloned())
    }

    async fn entries_for_journal(
        &mut self,
        journal_id: Uuid,
    ) -> Result<Vec<JournalEntry>, LedgerError> {
        Ok(self
            .work
            .entries
            .iter()
            .filter(|e| e.journal_id == journal_id)
            .cloned()
            .collect())
    }

    async fn statement_by_id(
        &mut self,
        statement_id: Uuid,
    ) -> Result<Option<Statement>, LedgerError> {
        Ok(self
            .work
            .statements
            .iter()
            .find(|s| s.statement_id == statement_id)
            .cloned())
    }

    async fn statements_for_account(
        &mut self,
        account_id: Uuid,
    ) -> Result<Vec<Statement>, LedgerError> {
        // Later inserts win ties on generation time.
        let mut statements: Vec<Statement> = self
            .work
            .statements
            .iter()
            .rev()
            .filter(|s| s.account_id == account_id)
            .cloned()
            .collect();
        statements.sort_by(|a, b| b.generated_utc.cmp(&a.generated_utc));
        Ok(statements)
    }

    async fn commit(mut self) -> Result<(), LedgerError> {
        if let Err(e) = trip(&self.faults, FailPoint::Commit).await {
            self.ended = true;
            self.stats.rolled_back.fetch_add(1, Ordering::SeqCst);
            return Err(e);
        }
        *self.guard = std::mem::take(&mut self.work);
        self.ended = true;
        self.stats.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), LedgerError> {
        self.ended = true;
        self.stats.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl AccountAccessor<MemoryScope> for MemoryLedger {
    async fn find_by_id(
        &self,
        scope: &mut MemoryScope,
        account_id: Uuid,
    ) -> Result<Account, LedgerError> {
        scope
            .work
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    async fn find_for_update(
        &self,
        scope: &mut MemoryScope,
        account_id: Uuid,
    ) -> Result<Account, LedgerError> {
        // The scope already holds the ledger-wide lock.
        self.find_by_id(scope, account_id).await
    }

    async fn update_balance(
        &self,
        scope: &mut MemoryScope,
        account_id: Uuid,
        new_balance: Decimal,
    ) -> Result<(), LedgerError> {
        trip(&scope.faults, FailPoint::UpdateBalance).await?;
        if new_balance < Decimal::ZERO {
            return Err(LedgerError::persistence(
                "Failed to update balance",
                "balance must not be negative",
            ));
        }
        let account = scope.work.accounts.get_mut(&account_id).ok_or_else(|| {
            LedgerError::persistence(
                "Failed to update balance",
                format!("account {} not updated", account_id),
            )
        })?;
        account.balance = new_balance;
        account.updated_utc = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryType;

    async fn seeded() -> (MemoryLedger, Account) {
        let ledger = MemoryLedger::new();
        let account = ledger
            .open_account(&OpenAccount::savings(Uuid::new_v4(), "NPR"))
            .await;
        (ledger, account)
    }

    fn journal(reference: &str) -> NewJournal {
        NewJournal {
            journal_id: Uuid::new_v4(),
            reference_id: reference.to_string(),
            narration: "test".to_string(),
            value_date: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rollback_discards_scope_writes() {
        let (ledger, account) = seeded().await;

        let mut scope = ledger.begin().await.unwrap();
        scope.create_journal(&journal("r1")).await.unwrap();
        ledger
            .update_balance(&mut scope, account.account_id, Decimal::TEN)
            .await
            .unwrap();
        scope.rollback().await.unwrap();

        assert_eq!(ledger.journal_count().await, 0);
        assert_eq!(
            ledger.account(account.account_id).await.unwrap().balance,
            Decimal::ZERO
        );
        assert_eq!(ledger.stats().rolled_back(), 1);
    }

    #[tokio::test]
    async fn dropped_scope_counts_as_rollback() {
        let (ledger, _) = seeded().await;
        {
            let mut scope = ledger.begin().await.unwrap();
            scope.create_journal(&journal("r1")).await.unwrap();
        }
        assert_eq!(ledger.journal_count().await, 0);
        assert_eq!(ledger.stats().rolled_back(), 1);
        assert_eq!(ledger.stats().committed(), 0);
    }

    #[tokio::test]
    async fn commit_publishes_entries_in_creation_order() {
        let (ledger, account) = seeded().await;

        let mut scope = ledger.begin().await.unwrap();
        let j = scope.create_journal(&journal("r1")).await.unwrap();
        for entry_type in [EntryType::Credit, EntryType::Debit] {
            scope
                .create_journal_entry(&NewJournalEntry {
                    entry_id: Uuid::new_v4(),
                    journal_id: j.journal_id,
                    account_id: account.account_id,
                    entry_type,
                    amount: Decimal::ONE,
                })
                .await
                .unwrap();
        }
        scope.commit().await.unwrap();

        let mut scope = ledger.begin().await.unwrap();
        let entries = scope.entries_for_journal(j.journal_id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].entry_seq < entries[1].entry_seq);
        assert!(scope.journal_exists_by_reference("r1").await.unwrap());
        scope.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_reference_is_rejected_by_store() {
        let (ledger, _) = seeded().await;
        let mut scope = ledger.begin().await.unwrap();
        scope.create_journal(&journal("r1")).await.unwrap();
        let err = scope.create_journal(&journal("r1")).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateReference(_)));
    }

    #[tokio::test]
    async fn injected_fault_fires_once() {
        let (ledger, _) = seeded().await;
        ledger.inject(Fault::Fail(FailPoint::Begin));

        assert!(matches!(
            ledger.begin().await,
            Err(LedgerError::ScopeUnavailable(_))
        ));
        assert!(ledger.begin().await.is_ok());
    }
}
