//! Common test utilities for banking-ledger integration tests.
#![allow(dead_code)]

use banking_ledger::config::{DatabaseConfig, EngineConfig, LedgerConfig};
use banking_ledger::grpc::proto::transaction_service_client::TransactionServiceClient;
use banking_ledger::models::{Account, NewStatement, OpenAccount};
use banking_ledger::services::{
    Database, LedgerScope, LedgerStore, MemoryLedger, PostingCommand, PostingReceipt,
    TransactionEngine,
};
use banking_ledger::startup::Application;
use banking_ledger::LedgerError;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use service_core::config::Config as CommonConfig;
use std::str::FromStr;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,banking_ledger=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub type MemoryEngine = TransactionEngine<MemoryLedger, MemoryLedger>;

/// In-memory ledger plus an engine over it.
pub struct MemoryHarness {
    pub ledger: MemoryLedger,
    pub engine: Arc<MemoryEngine>,
    pub cancel: CancellationToken,
}

pub fn memory_engine() -> MemoryHarness {
    memory_engine_with_timeout(Duration::from_secs(5))
}

pub fn memory_engine_with_timeout(timeout: Duration) -> MemoryHarness {
    init_tracing();
    let ledger = MemoryLedger::new();
    let engine = Arc::new(TransactionEngine::new(ledger.clone(), ledger.clone(), timeout));
    MemoryHarness {
        ledger,
        engine,
        cancel: CancellationToken::new(),
    }
}

impl MemoryHarness {
    pub async fn open_account(&self, currency: &str) -> Account {
        self.ledger
            .open_account(&OpenAccount::savings(Uuid::new_v4(), currency))
            .await
    }

    pub async fn balance(&self, account_id: Uuid) -> Decimal {
        self.ledger
            .account(account_id)
            .await
            .expect("account should exist")
            .balance
    }

    pub async fn deposit(
        &self,
        account_id: Uuid,
        amount: &str,
        reference_id: Option<&str>,
    ) -> Result<PostingReceipt, LedgerError> {
        self.engine
            .deposit(posting(account_id, amount, reference_id), &self.cancel)
            .await
    }

    pub async fn withdraw(
        &self,
        account_id: Uuid,
        amount: &str,
        reference_id: Option<&str>,
    ) -> Result<PostingReceipt, LedgerError> {
        self.engine
            .withdraw(posting(account_id, amount, reference_id), &self.cancel)
            .await
    }
}

/// Parse a decimal literal.
pub fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).expect("valid decimal literal")
}

pub fn posting(account_id: Uuid, amount: &str, reference_id: Option<&str>) -> PostingCommand {
    PostingCommand {
        account_id,
        amount: dec(amount),
        narration: format!("test posting of {amount}"),
        reference_id: reference_id.map(str::to_string),
    }
}

/// Store two statements with the same generation time, in order, and
/// return their ids.
pub async fn store_same_instant_statements<S: LedgerStore>(
    store: &S,
    account_id: Uuid,
) -> (Uuid, Uuid) {
    let generated_utc = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap();
    let mut ids = Vec::new();
    for _ in 0..2 {
        let mut scope = store.begin().await.expect("begin scope");
        let statement = scope
            .create_statement(&NewStatement {
                statement_id: Uuid::new_v4(),
                account_id,
                period_start: generated_utc - chrono::Duration::days(1),
                period_end: generated_utc,
                opening_balance: Decimal::ZERO,
                closing_balance: Decimal::ZERO,
                generated_utc,
                content: None,
            })
            .await
            .expect("create statement");
        scope.commit().await.expect("commit statement");
        ids.push(statement.statement_id);
    }
    (ids[0], ids[1])
}

/// Running Postgres-backed application.
pub struct TestApp {
    pub client: TransactionServiceClient<Channel>,
    pub db: Database,
    pub http_port: u16,
    pub shutdown: CancellationToken,
}

impl TestApp {
    pub async fn open_account(&self, currency: &str) -> Account {
        self.db
            .open_account(&OpenAccount::savings(Uuid::new_v4(), currency))
            .await
            .expect("Failed to open account")
    }
}

/// Apply the schema once up front so the application itself skips it.
async fn migrate(database: &DatabaseConfig) {
    let db = Database::new(&database.url, 1, 1, database.acquire_timeout)
        .await
        .expect("Failed to connect for migrations");
    db.run_migrations()
        .await
        .expect("Failed to run migrations");
}

/// Spawn a test application backed by `TEST_DATABASE_URL`.
pub async fn spawn_app() -> TestApp {
    init_tracing();

    let database_url =
        std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");

    let config = LedgerConfig {
        common: CommonConfig { port: 0 },
        service_name: "banking-ledger-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: database_url,
            max_connections: 8,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(10),
        },
        engine: EngineConfig {
            operation_timeout: Duration::from_secs(5),
        },
    };

    migrate(&config.database).await;

    let app = Application::build_without_migrations(config)
        .await
        .expect("Failed to build application");

    let grpc_addr = format!("http://127.0.0.1:{}", app.grpc_port());
    let http_port = app.http_port();
    let db = app.db().clone();
    let shutdown = app.shutdown_token();

    // Start the application in the background
    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    // Wait for server to be ready with retry
    let client = {
        let mut attempts = 0;
        loop {
            match TransactionServiceClient::connect(grpc_addr.clone()).await {
                Ok(client) => break client,
                Err(_) if attempts < 20 => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => panic!("Failed to connect gRPC client after 20 attempts: {}", e),
            }
        }
    };

    TestApp {
        client,
        db,
        http_port,
        shutdown,
    }
}
