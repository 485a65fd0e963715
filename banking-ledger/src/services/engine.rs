//! Transaction engine: money movement and statements over a ledger store.
//!
//! Every operation runs inside exactly one atomic scope. The in-scope work is
//! raced against the caller's cancellation token and the operation deadline;
//! whichever way it ends, the scope is committed only on success and rolled
//! back otherwise. Commit itself is never interrupted.

use crate::error::LedgerError;
use crate::models::{
    Account, EntryType, Journal, JournalEntry, NewJournal, NewJournalEntry, NewStatement,
    Statement, StatementReport,
};
use crate::services::metrics::{
    AMOUNT_TOTAL, ERRORS_TOTAL, OPERATIONS_TOTAL, SCOPE_OUTCOMES_TOTAL, STATEMENTS_GENERATED,
};
use crate::services::statement_builder;
use crate::services::store::{AccountAccessor, LedgerScope, LedgerStore};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Largest amount or balance representable in `NUMERIC(18, 2)`.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xA763_FFFF, 0x0DE0_B6B3, 0, false, 2);

pub const MAX_REFERENCE_LEN: usize = 255;

/// Deposit or withdrawal request.
#[derive(Debug, Clone)]
pub struct PostingCommand {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub narration: String,
    /// Idempotency key. `None` or blank generates one.
    pub reference_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransferCommand {
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub amount: Decimal,
    pub narration: String,
    pub reference_id: Option<String>,
}

/// Inclusive statement period.
#[derive(Debug, Clone, Copy)]
pub struct StatementPeriod {
    pub account_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostingReceipt {
    pub journal_id: Uuid,
    pub reference_id: String,
    pub new_balance: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferReceipt {
    pub journal_id: Uuid,
    pub reference_id: String,
    pub from_balance: Decimal,
    pub to_balance: Decimal,
    pub currency: String,
}

/// Recorded balance against the net of posted entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub account_id: Uuid,
    pub recorded_balance: Decimal,
    pub ledger_balance: Decimal,
}

impl Reconciliation {
    pub fn difference(&self) -> Decimal {
        self.recorded_balance - self.ledger_balance
    }

    pub fn is_consistent(&self) -> bool {
        self.difference().is_zero()
    }
}

#[derive(Debug, Clone)]
pub enum JournalLookup {
    Id(Uuid),
    Reference(String),
}

/// A journal header with its entries in creation order.
#[derive(Debug, Clone)]
pub struct JournalRecord {
    pub journal: Journal,
    pub entries: Vec<JournalEntry>,
}

/// Orchestrates ledger operations over a store and an account accessor
/// sharing the same scope type.
pub struct TransactionEngine<S, A> {
    store: S,
    accounts: A,
    operation_timeout: Duration,
}

impl<S, A> TransactionEngine<S, A>
where
    S: LedgerStore,
    A: AccountAccessor<S::Scope>,
{
    pub fn new(store: S, accounts: A, operation_timeout: Duration) -> Self {
        Self {
            store,
            accounts,
            operation_timeout,
        }
    }

    /// Credit `amount` to the account.
    #[instrument(skip(self, cmd, cancel), fields(account_id = %cmd.account_id, amount = %cmd.amount))]
    pub async fn deposit(
        &self,
        cmd: PostingCommand,
        cancel: &CancellationToken,
    ) -> Result<PostingReceipt, LedgerError> {
        const OP: &str = "deposit";
        let deadline = self.deadline();
        let mut scope = self.open(OP, cancel, deadline).await?;
        let outcome = self
            .guarded(cancel, deadline, self.post_single(&mut scope, &cmd, EntryType::Credit))
            .await;
        let receipt = self.settle(OP, scope, outcome).await?;

        record_amount(OP, &receipt.currency, cmd.amount);
        info!(
            journal_id = %receipt.journal_id,
            reference_id = %receipt.reference_id,
            new_balance = %receipt.new_balance,
            "Deposit posted"
        );
        Ok(receipt)
    }

    /// Debit `amount` from the account. The balance may not go below zero.
    #[instrument(skip(self, cmd, cancel), fields(account_id = %cmd.account_id, amount = %cmd.amount))]
    pub async fn withdraw(
        &self,
        cmd: PostingCommand,
        cancel: &CancellationToken,
    ) -> Result<PostingReceipt, LedgerError> {
        const OP: &str = "withdraw";
        let deadline = self.deadline();
        let mut scope = self.open(OP, cancel, deadline).await?;
        let outcome = self
            .guarded(cancel, deadline, self.post_single(&mut scope, &cmd, EntryType::Debit))
            .await;
        let receipt = self.settle(OP, scope, outcome).await?;

        record_amount(OP, &receipt.currency, cmd.amount);
        info!(
            journal_id = %receipt.journal_id,
            reference_id = %receipt.reference_id,
            new_balance = %receipt.new_balance,
            "Withdrawal posted"
        );
        Ok(receipt)
    }

    /// Move `amount` between two accounts under one journal.
    #[instrument(skip(self, cmd, cancel), fields(from_account_id = %cmd.from_account_id, to_account_id = %cmd.to_account_id, amount = %cmd.amount))]
    pub async fn transfer(
        &self,
        cmd: TransferCommand,
        cancel: &CancellationToken,
    ) -> Result<TransferReceipt, LedgerError> {
        const OP: &str = "transfer";
        let deadline = self.deadline();
        let mut scope = self.open(OP, cancel, deadline).await?;
        let outcome = self
            .guarded(cancel, deadline, self.transfer_in_scope(&mut scope, &cmd))
            .await;
        let receipt = self.settle(OP, scope, outcome).await?;

        record_amount(OP, &receipt.currency, cmd.amount);
        info!(
            journal_id = %receipt.journal_id,
            reference_id = %receipt.reference_id,
            from_balance = %receipt.from_balance,
            to_balance = %receipt.to_balance,
            "Transfer posted"
        );
        Ok(receipt)
    }

    /// Derive and persist a statement for `[start, end]`.
    #[instrument(skip(self, cancel), fields(account_id = %period.account_id))]
    pub async fn generate_statement(
        &self,
        period: StatementPeriod,
        cancel: &CancellationToken,
    ) -> Result<StatementReport, LedgerError> {
        const OP: &str = "generate_statement";
        let deadline = self.deadline();
        let mut scope = self.open(OP, cancel, deadline).await?;
        let outcome = self
            .guarded(cancel, deadline, self.statement_in_scope(&mut scope, &period))
            .await;
        let report = self.settle(OP, scope, outcome).await?;

        STATEMENTS_GENERATED.inc();
        info!(
            statement_id = %report.statement.statement_id,
            lines = report.lines.len(),
            "Statement generated"
        );
        Ok(report)
    }

    /// Load a persisted statement and re-derive its lines from the stored
    /// opening balance.
    #[instrument(skip(self, cancel), fields(statement_id = %statement_id))]
    pub async fn get_statement(
        &self,
        statement_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<StatementReport, LedgerError> {
        const OP: &str = "get_statement";
        let deadline = self.deadline();
        let mut scope = self.open(OP, cancel, deadline).await?;
        let outcome = self
            .guarded(cancel, deadline, async {
                let statement = scope
                    .statement_by_id(statement_id)
                    .await?
                    .ok_or(LedgerError::StatementNotFound(statement_id))?;
                let entries = scope
                    .entries_between_dates(
                        statement.account_id,
                        statement.period_start,
                        statement.period_end,
                    )
                    .await?;
                let built = statement_builder::build(statement.opening_balance, entries);
                Ok(StatementReport {
                    statement,
                    lines: built.lines,
                })
            })
            .await;
        self.settle(OP, scope, outcome).await
    }

    /// Persisted statements of an account, newest first.
    #[instrument(skip(self, cancel), fields(account_id = %account_id))]
    pub async fn list_statements(
        &self,
        account_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Vec<Statement>, LedgerError> {
        const OP: &str = "list_statements";
        let deadline = self.deadline();
        let mut scope = self.open(OP, cancel, deadline).await?;
        let outcome = self
            .guarded(cancel, deadline, async {
                self.accounts.find_by_id(&mut scope, account_id).await?;
                scope.statements_for_account(account_id).await
            })
            .await;
        self.settle(OP, scope, outcome).await
    }

    #[instrument(skip(self, cancel), fields(account_id = %account_id))]
    pub async fn account(
        &self,
        account_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Account, LedgerError> {
        const OP: &str = "get_account";
        let deadline = self.deadline();
        let mut scope = self.open(OP, cancel, deadline).await?;
        let outcome = self
            .guarded(
                cancel,
                deadline,
                self.accounts.find_by_id(&mut scope, account_id),
            )
            .await;
        self.settle(OP, scope, outcome).await
    }

    #[instrument(skip(self, cancel))]
    pub async fn journal(
        &self,
        lookup: JournalLookup,
        cancel: &CancellationToken,
    ) -> Result<JournalRecord, LedgerError> {
        const OP: &str = "get_journal";
        let deadline = self.deadline();
        let mut scope = self.open(OP, cancel, deadline).await?;
        let outcome = self
            .guarded(cancel, deadline, async {
                let journal = match &lookup {
                    JournalLookup::Id(id) => scope
                        .journal_by_id(*id)
                        .await?
                        .ok_or_else(|| LedgerError::JournalNotFound(id.to_string()))?,
                    JournalLookup::Reference(reference) => scope
                        .journal_by_reference(reference)
                        .await?
                        .ok_or_else(|| LedgerError::JournalNotFound(reference.clone()))?,
                };
                let entries = scope.entries_for_journal(journal.journal_id).await?;
                Ok(JournalRecord { journal, entries })
            })
            .await;
        self.settle(OP, scope, outcome).await
    }

    /// Compare the recorded balance with the net of posted entries.
    #[instrument(skip(self, cancel), fields(account_id = %account_id))]
    pub async fn reconcile(
        &self,
        account_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Reconciliation, LedgerError> {
        const OP: &str = "reconcile";
        let deadline = self.deadline();
        let mut scope = self.open(OP, cancel, deadline).await?;
        let outcome = self
            .guarded(cancel, deadline, async {
                let account = self.accounts.find_by_id(&mut scope, account_id).await?;
                let ledger_balance = scope.net_posted_amount(account_id).await?;
                Ok(Reconciliation {
                    account_id,
                    recorded_balance: account.balance,
                    ledger_balance,
                })
            })
            .await;
        let reconciliation = self.settle(OP, scope, outcome).await?;

        if !reconciliation.is_consistent() {
            warn!(
                recorded_balance = %reconciliation.recorded_balance,
                ledger_balance = %reconciliation.ledger_balance,
                "Account balance does not match its journal entries"
            );
        }
        Ok(reconciliation)
    }

    // -------------------------------------------------------------------------
    // In-scope work
    // -------------------------------------------------------------------------

    async fn post_single(
        &self,
        scope: &mut S::Scope,
        cmd: &PostingCommand,
        entry_type: EntryType,
    ) -> Result<PostingReceipt, LedgerError> {
        validate_amount(cmd.amount)?;
        let reference_id = resolve_reference(cmd.reference_id.as_deref())?;

        let account = self.accounts.find_for_update(scope, cmd.account_id).await?;
        ensure_active(&account)?;

        if scope.journal_exists_by_reference(&reference_id).await? {
            return Err(LedgerError::DuplicateReference(reference_id));
        }

        let new_balance = match entry_type {
            EntryType::Credit => credited(account.balance, cmd.amount)?,
            EntryType::Debit => debited(&account, cmd.amount)?,
        };

        let journal = scope
            .create_journal(&NewJournal {
                journal_id: Uuid::new_v4(),
                reference_id,
                narration: cmd.narration.clone(),
                value_date: Utc::now(),
            })
            .await?;

        scope
            .create_journal_entry(&NewJournalEntry {
                entry_id: Uuid::new_v4(),
                journal_id: journal.journal_id,
                account_id: account.account_id,
                entry_type,
                amount: cmd.amount,
            })
            .await?;

        self.accounts
            .update_balance(scope, account.account_id, new_balance)
            .await?;

        Ok(PostingReceipt {
            journal_id: journal.journal_id,
            reference_id: journal.reference_id,
            new_balance,
            currency: account.currency,
        })
    }

    async fn transfer_in_scope(
        &self,
        scope: &mut S::Scope,
        cmd: &TransferCommand,
    ) -> Result<TransferReceipt, LedgerError> {
        validate_amount(cmd.amount)?;
        let reference_id = resolve_reference(cmd.reference_id.as_deref())?;
        if cmd.from_account_id == cmd.to_account_id {
            return Err(LedgerError::invalid(
                "from_account_id and to_account_id must differ",
            ));
        }

        // Lock rows in ascending id order so opposing transfers cannot deadlock.
        let (from, to) = if cmd.from_account_id < cmd.to_account_id {
            let from = self.accounts.find_for_update(scope, cmd.from_account_id).await?;
            let to = self.accounts.find_for_update(scope, cmd.to_account_id).await?;
            (from, to)
        } else {
            let to = self.accounts.find_for_update(scope, cmd.to_account_id).await?;
            let from = self.accounts.find_for_update(scope, cmd.from_account_id).await?;
            (from, to)
        };

        ensure_active(&from)?;
        ensure_active(&to)?;
        if from.currency != to.currency {
            return Err(LedgerError::invalid(format!(
                "currency mismatch: {} -> {}",
                from.currency, to.currency
            )));
        }

        if scope.journal_exists_by_reference(&reference_id).await? {
            return Err(LedgerError::DuplicateReference(reference_id));
        }

        let from_balance = debited(&from, cmd.amount)?;
        let to_balance = credited(to.balance, cmd.amount)?;

        let journal = scope
            .create_journal(&NewJournal {
                journal_id: Uuid::new_v4(),
                reference_id,
                narration: cmd.narration.clone(),
                value_date: Utc::now(),
            })
            .await?;

        for (account_id, entry_type) in [
            (to.account_id, EntryType::Credit),
            (from.account_id, EntryType::Debit),
        ] {
            scope
                .create_journal_entry(&NewJournalEntry {
                    entry_id: Uuid::new_v4(),
                    journal_id: journal.journal_id,
                    account_id,
                    entry_type,
                    amount: cmd.amount,
                })
                .await?;
        }

        self.accounts
            .update_balance(scope, from.account_id, from_balance)
            .await?;
        self.accounts
            .update_balance(scope, to.account_id, to_balance)
            .await?;

        Ok(TransferReceipt {
            journal_id: journal.journal_id,
            reference_id: journal.reference_id,
            from_balance,
            to_balance,
            currency: from.currency,
        })
    }

    async fn statement_in_scope(
        &self,
        scope: &mut S::Scope,
        period: &StatementPeriod,
    ) -> Result<StatementReport, LedgerError> {
        if period.start > period.end {
            return Err(LedgerError::invalid(
                "start_date must not be after end_date",
            ));
        }

        let account = self.accounts.find_by_id(scope, period.account_id).await?;

        let before = scope
            .entries_before_date(account.account_id, period.start)
            .await?;
        let opening_balance = statement_builder::net_movement(&before);

        let entries = scope
            .entries_between_dates(account.account_id, period.start, period.end)
            .await?;
        let built = statement_builder::build(opening_balance, entries);

        let content = statement_builder::render(
            &account.account_number,
            &account.currency,
            period.start,
            period.end,
            &built,
        );

        let statement = scope
            .create_statement(&NewStatement {
                statement_id: Uuid::new_v4(),
                account_id: account.account_id,
                period_start: period.start,
                period_end: period.end,
                opening_balance: built.opening_balance,
                closing_balance: built.closing_balance,
                generated_utc: Utc::now(),
                content: Some(content),
            })
            .await?;

        Ok(StatementReport {
            statement,
            lines: built.lines,
        })
    }

    // -------------------------------------------------------------------------
    // Scope lifecycle
    // -------------------------------------------------------------------------

    fn deadline(&self) -> Instant {
        Instant::now() + self.operation_timeout
    }

    async fn open(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<S::Scope, LedgerError> {
        self.guarded(cancel, deadline, self.store.begin())
            .await
            .inspect_err(|err| record_failure(operation, err))
    }

    async fn guarded<T, F>(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        work: F,
    ) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LedgerError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                Err(LedgerError::DeadlineExceeded(self.operation_timeout))
            }
            result = work => result,
        }
    }

    /// Commit on success, roll back on failure. Exactly one of the two runs.
    async fn settle<T>(
        &self,
        operation: &'static str,
        scope: S::Scope,
        outcome: Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        match outcome {
            Ok(value) => match scope.commit().await {
                Ok(()) => {
                    SCOPE_OUTCOMES_TOTAL.with_label_values(&["committed"]).inc();
                    OPERATIONS_TOTAL.with_label_values(&[operation, "ok"]).inc();
                    Ok(value)
                }
                Err(err) => {
                    SCOPE_OUTCOMES_TOTAL
                        .with_label_values(&["commit_failed"])
                        .inc();
                    error!(operation, error = %err, "Commit failed; outcome unknown");
                    record_failure(operation, &err);
                    Err(err)
                }
            },
            Err(err) => {
                if let Err(rollback_err) = scope.rollback().await {
                    error!(operation, error = %rollback_err, "Rollback failed");
                }
                SCOPE_OUTCOMES_TOTAL
                    .with_label_values(&["rolled_back"])
                    .inc();
                record_failure(operation, &err);
                Err(err)
            }
        }
    }
}

fn record_failure(operation: &'static str, err: &LedgerError) {
    let kind = err.kind();
    OPERATIONS_TOTAL
        .with_label_values(&[operation, "error"])
        .inc();
    ERRORS_TOTAL.with_label_values(&[kind.as_str()]).inc();
    match err {
        LedgerError::PersistenceFailure(_) | LedgerError::ScopeUnavailable(_) => {
            error!(operation, error_kind = %kind, error = %err, "Operation failed");
        }
        _ => warn!(operation, error_kind = %kind, error = %err, "Operation rejected"),
    }
}

fn record_amount(operation: &'static str, currency: &str, amount: Decimal) {
    AMOUNT_TOTAL
        .with_label_values(&[operation, currency])
        .inc_by(amount.to_f64().unwrap_or_default());
}

/// Positive, at most two fraction digits, within column range.
pub fn validate_amount(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::invalid("amount must be greater than zero"));
    }
    if amount.normalize().scale() > 2 {
        return Err(LedgerError::invalid(
            "amount must have at most two fraction digits",
        ));
    }
    if amount > MAX_AMOUNT {
        return Err(LedgerError::invalid(format!(
            "amount must not exceed {}",
            MAX_AMOUNT
        )));
    }
    Ok(())
}

/// Trimmed caller key, or a fresh UUID when absent or blank.
pub fn resolve_reference(reference_id: Option<&str>) -> Result<String, LedgerError> {
    match reference_id.map(str::trim) {
        Some(reference) if !reference.is_empty() => {
            if reference.chars().count() > MAX_REFERENCE_LEN {
                return Err(LedgerError::invalid(format!(
                    "reference_id must be at most {} characters",
                    MAX_REFERENCE_LEN
                )));
            }
            Ok(reference.to_string())
        }
        _ => Ok(Uuid::new_v4().to_string()),
    }
}

fn ensure_active(account: &Account) -> Result<(), LedgerError> {
    if account.is_active() {
        Ok(())
    } else {
        Err(LedgerError::AccountNotActive {
            account_id: account.account_id,
            status: account.status.clone(),
        })
    }
}

fn credited(balance: Decimal, amount: Decimal) -> Result<Decimal, LedgerError> {
    balance
        .checked_add(amount)
        .filter(|b| *b <= MAX_AMOUNT)
        .ok_or_else(|| LedgerError::invalid("resulting balance exceeds the maximum"))
}

fn debited(account: &Account, amount: Decimal) -> Result<Decimal, LedgerError> {
    if amount > account.balance {
        return Err(LedgerError::InsufficientFunds {
            account_id: account.account_id,
            available: account.balance,
            requested: amount,
        });
    }
    Ok(account.balance - amount)
}
