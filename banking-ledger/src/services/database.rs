//! PostgreSQL ledger store.

use crate::error::LedgerError;
use crate::models::{
    Account, AccountStatus, Journal, JournalEntry, JournalStatus, NewJournal, NewJournalEntry,
    NewStatement, OpenAccount, PostedEntry, Statement,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{AccountAccessor, LedgerScope, LedgerStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const ACCOUNT_COLUMNS: &str = "account_id, account_number, customer_id, currency, account_type, \
     status, balance, opened_utc, created_utc, updated_utc";

const JOURNAL_COLUMNS: &str =
    "journal_id, reference_id, narration, value_date, status, created_utc, updated_utc";

const ENTRY_COLUMNS: &str =
    "entry_id, journal_id, account_id, entry_type, amount, entry_seq, created_utc";

const STATEMENT_COLUMNS: &str = "statement_id, account_id, period_start, period_end, \
     opening_balance, closing_balance, generated_utc, content";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "banking-ledger"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Open an active account with a zero balance.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id, account_number = %input.account_number))]
    pub async fn open_account(&self, input: &OpenAccount) -> Result<Account, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["open_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO accounts (account_id, account_number, customer_id, currency, account_type, status, balance)
            VALUES ($1, $2, $3, $4, $5, $6, 0)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&input.account_number)
        .bind(input.customer_id)
        .bind(&input.currency)
        .bind(&input.account_type)
        .bind(AccountStatus::Active.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Account number '{}' already exists",
                    input.account_number
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to open account: {}", e)),
        })?;

        timer.observe_duration();

        info!(account_id = %account.account_id, "Account opened");

        Ok(account)
    }

    /// Change an account's lifecycle status.
    #[instrument(skip(self), fields(account_id = %account_id, status = %status))]
    pub async fn set_account_status(
        &self,
        account_id: Uuid,
        status: AccountStatus,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE accounts SET status = $2, updated_utc = NOW() WHERE account_id = $1",
        )
        .bind(account_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update account status: {}", e))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Account {} not found",
                account_id
            )));
        }
        Ok(())
    }
}

/// Atomic scope backed by a PostgreSQL transaction. Dropping it rolls back.
pub struct PgScope {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerStore for Database {
    type Scope = PgScope;

    async fn begin(&self) -> Result<PgScope, LedgerError> {
        let tx = self.pool.begin().await.map_err(|e| {
            LedgerError::ScopeUnavailable(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;
        Ok(PgScope { tx })
    }
}

#[async_trait]
impl LedgerScope for PgScope {
    #[instrument(skip(self, journal), fields(journal_id = %journal.journal_id, reference_id = %journal.reference_id))]
    async fn create_journal(&mut self, journal: &NewJournal) -> Result<Journal, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_journal"])
            .start_timer();

        let created = sqlx::query_as::<_, Journal>(&format!(
            r#"
            INSERT INTO journals (journal_id, reference_id, narration, value_date, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {JOURNAL_COLUMNS}
            "#
        ))
        .bind(journal.journal_id)
        .bind(&journal.reference_id)
        .bind(&journal.narration)
        .bind(journal.value_date)
        .bind(JournalStatus::Posted.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                LedgerError::DuplicateReference(journal.reference_id.clone())
            }
            _ => LedgerError::persistence("Failed to create journal", e),
        })?;

        timer.observe_duration();
        Ok(created)
    }

    #[instrument(skip(self, entry), fields(entry_id = %entry.entry_id, account_id = %entry.account_id, entry_type = %entry.entry_type))]
    async fn create_journal_entry(
        &mut self,
        entry: &NewJournalEntry,
    ) -> Result<JournalEntry, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_journal_entry"])
            .start_timer();

        let created = sqlx::query_as::<_, JournalEntry>(&format!(
            r#"
            INSERT INTO journal_entries (entry_id, journal_id, account_id, entry_type, amount)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(entry.entry_id)
        .bind(entry.journal_id)
        .bind(entry.account_id)
        .bind(entry.entry_type.as_str())
        .bind(entry.amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::persistence("Failed to create journal entry", e))?;

        timer.observe_duration();
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn journal_exists_by_reference(
        &mut self,
        reference_id: &str,
    ) -> Result<bool, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["journal_exists"])
            .start_timer();

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM journals WHERE reference_id = $1)")
                .bind(reference_id)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(|e| LedgerError::persistence("Failed to check journal reference", e))?;

        timer.observe_duration();
        Ok(exists)
    }

    #[instrument(skip(self, statement), fields(statement_id = %statement.statement_id, account_id = %statement.account_id))]
    async fn create_statement(
        &mut self,
        statement: &NewStatement,
    ) -> Result<Statement, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_statement"])
            .start_timer();

        let created = sqlx::query_as::<_, Statement>(&format!(
            r#"
            INSERT INTO statements (statement_id, account_id, period_start, period_end,
                                    opening_balance, closing_balance, generated_utc, content)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {STATEMENT_COLUMNS}
            "#
        ))
        .bind(statement.statement_id)
        .bind(statement.account_id)
        .bind(statement.period_start)
        .bind(statement.period_end)
        .bind(statement.opening_balance)
        .bind(statement.closing_balance)
        .bind(statement.generated_utc)
        .bind(&statement.content)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::persistence("Failed to create statement", e))?;

        timer.observe_duration();
        Ok(created)
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn entries_before_date(
        &mut self,
        account_id: Uuid,
        date: DateTime<Utc>,
    ) -> Result<Vec<PostedEntry>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["entries_before_date"])
            .start_timer();

        let entries = sqlx::query_as::<_, PostedEntry>(
            r#"
            SELECT e.entry_id, e.journal_id, e.account_id, e.entry_type, e.amount, e.entry_seq,
                   j.value_date, j.narration
            FROM journal_entries e
            JOIN journals j ON j.journal_id = e.journal_id
            WHERE e.account_id = $1
              AND j.status = 'posted'
              AND j.value_date < $2
            ORDER BY j.value_date, e.entry_seq
            "#,
        )
        .bind(account_id)
        .bind(date)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::persistence("Failed to fetch entries before period", e))?;

        timer.observe_duration();
        Ok(entries)
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn entries_between_dates(
        &mut self,
        account_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PostedEntry>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["entries_between_dates"])
            .start_timer();

        let entries = sqlx::query_as::<_, PostedEntry>(
            r#"
            SELECT e.entry_id, e.journal_id, e.account_id, e.entry_type, e.amount, e.entry_seq,
                   j.value_date, j.narration
            FROM journal_entries e
            JOIN journals j ON j.journal_id = e.journal_id
            WHERE e.account_id = $1
              AND j.status = 'posted'
              AND j.value_date BETWEEN $2 AND $3
            ORDER BY j.value_date, e.entry_seq
            "#,
        )
        .bind(account_id)
        .bind(start)
        .bind(end)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::persistence("Failed to fetch entries for period", e))?;

        timer.observe_duration();
        Ok(entries)
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn net_posted_amount(&mut self, account_id: Uuid) -> Result<Decimal, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["net_posted_amount"])
            .start_timer();

        let net: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(CASE WHEN e.entry_type = 'CREDIT' THEN e.amount
                                     WHEN e.entry_type = 'DEBIT' THEN -e.amount
                                     ELSE 0 END), 0)
            FROM journal_entries e
            JOIN journals j ON j.journal_id = e.journal_id
            WHERE e.account_id = $1 AND j.status = 'posted'
            "#,
        )
        .bind(account_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::persistence("Failed to sum posted entries", e))?;

        timer.observe_duration();
        Ok(net)
    }

    #[instrument(skip(self), fields(journal_id = %journal_id))]
    async fn journal_by_id(&mut self, journal_id: Uuid) -> Result<Option<Journal>, LedgerError> {
        sqlx::query_as::<_, Journal>(&format!(
            "SELECT {JOURNAL_COLUMNS} FROM journals WHERE journal_id = $1"
        ))
        .bind(journal_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::persistence("Failed to get journal", e))
    }

    #[instrument(skip(self))]
    async fn journal_by_reference(
        &mut self,
        reference_id: &str,
    ) -> Result<Option<Journal>, LedgerError> {
        sqlx::query_as::<_, Journal>(&format!(
            "SELECT {JOURNAL_COLUMNS} FROM journals WHERE reference_id = $1"
        ))
        .bind(reference_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::persistence("Failed to get journal by reference", e))
    }

    #[instrument(skip(self), fields(journal_id = %journal_id))]
    async fn entries_for_journal(
        &mut self,
        journal_id: Uuid,
    ) -> Result<Vec<JournalEntry>, LedgerError> {
        sqlx::query_as::<_, JournalEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE journal_id = $1 ORDER BY entry_seq"
        ))
        .bind(journal_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::persistence("Failed to get journal entries", e))
    }

    #[instrument(skip(self), fields(statement_id = %statement_id))]
    async fn statement_by_id(
        &mut self,
        statement_id: Uuid,
    ) -> Result<Option<Statement>, LedgerError> {
        sqlx::query_as::<_, Statement>(&format!(
            "SELECT {STATEMENT_COLUMNS} FROM statements WHERE statement_id = $1"
        ))
        .bind(statement_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::persistence("Failed to get statement", e))
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn statements_for_account(
        &mut self,
        account_id: Uuid,
    ) -> Result<Vec<Statement>, LedgerError> {
        sqlx::query_as::<_, Statement>(&format!(
            "SELECT {STATEMENT_COLUMNS} FROM statements WHERE account_id = $1 \
             ORDER BY generated_utc DESC, statement_seq DESC"
        ))
        .bind(account_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::persistence("Failed to list statements", e))
    }

    async fn commit(self) -> Result<(), LedgerError> {
        self.tx
            .commit()
            .await
            .map_err(|e| LedgerError::persistence("Failed to commit transaction", e))
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| LedgerError::persistence("Failed to roll back transaction", e))
    }
}

#[async_trait]
impl AccountAccessor<PgScope> for Database {
    #[instrument(skip(self, scope), fields(account_id = %account_id))]
    async fn find_by_id(
        &self,
        scope: &mut PgScope,
        account_id: Uuid,
    ) -> Result<Account, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = $1"
        ))
        .bind(account_id)
        .fetch_optional(&mut *scope.tx)
        .await
        .map_err(|e| LedgerError::persistence("Failed to get account", e))?;

        timer.observe_duration();
        account.ok_or(LedgerError::AccountNotFound(account_id))
    }

    #[instrument(skip(self, scope), fields(account_id = %account_id))]
    async fn find_for_update(
        &self,
        scope: &mut PgScope,
        account_id: Uuid,
    ) -> Result<Account, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = $1 FOR UPDATE"
        ))
        .bind(account_id)
        .fetch_optional(&mut *scope.tx)
        .await
        .map_err(|e| LedgerError::persistence("Failed to lock account", e))?;

        timer.observe_duration();
        account.ok_or(LedgerError::AccountNotFound(account_id))
    }

    #[instrument(skip(self, scope), fields(account_id = %account_id, new_balance = %new_balance))]
    async fn update_balance(
        &self,
        scope: &mut PgScope,
        account_id: Uuid,
        new_balance: Decimal,
    ) -> Result<(), LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_balance"])
            .start_timer();

        let result = sqlx::query(
            "UPDATE accounts SET balance = $2, updated_utc = NOW() WHERE account_id = $1",
        )
        .bind(account_id)
        .bind(new_balance)
        .execute(&mut *scope.tx)
        .await
        .map_err(|e| LedgerError::persistence("Failed to update balance", e))?;

        timer.observe_duration();

        if result.rows_affected() != 1 {
            return Err(LedgerError::persistence(
                "Failed to update balance",
                format!("{} rows affected", result.rows_affected()),
            ));
        }
        Ok(())
    }
}
