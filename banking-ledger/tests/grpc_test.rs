//! TransactionService handlers over the in-memory ledger.

mod common;

use banking_ledger::error::ERROR_KIND_KEY;
use banking_ledger::grpc::proto::{
    transaction_service_server::TransactionService, EntryType, GenerateStatementRequest,
    GetAccountRequest, GetJournalRequest, GetStatementRequest, ListStatementsRequest,
    ReconcileAccountRequest, TransactionRequest, TransferMoneyRequest,
};
use banking_ledger::grpc::TransactionServiceImpl;
use banking_ledger::services::MemoryLedger;
use common::{memory_engine, MemoryHarness};
use tokio_util::sync::CancellationToken;
use tonic::{Code, Request, Status};
use uuid::Uuid;

type Service = TransactionServiceImpl<MemoryLedger, MemoryLedger>;

fn service(h: &MemoryHarness) -> Service {
    TransactionServiceImpl::new(h.engine.clone(), h.cancel.clone())
}

fn posting(account_id: &str, amount: &str, reference_id: &str) -> Request<TransactionRequest> {
    Request::new(TransactionRequest {
        account_id: account_id.to_string(),
        amount: amount.to_string(),
        narration: "grpc posting".to_string(),
        reference_id: reference_id.to_string(),
    })
}

fn error_kind(status: &Status) -> &str {
    status
        .metadata()
        .get(ERROR_KIND_KEY)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn postings_report_formatted_balances() {
    let h = memory_engine();
    let svc = service(&h);
    let x = h.open_account("NPR").await.account_id.to_string();
    let y = h.open_account("NPR").await.account_id.to_string();

    let deposit = svc
        .deposit(posting(&x, "100", "g-1"))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(deposit.message, "Deposit Success");
    assert_eq!(deposit.new_balance, "100.00");
    assert_eq!(deposit.reference_id, "g-1");

    let withdrawal = svc
        .withdraw(posting(&x, "40.5", "g-2"))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(withdrawal.message, "Withdraw Success");
    assert_eq!(withdrawal.new_balance, "59.50");

    let transfer = svc
        .transfer_money(Request::new(TransferMoneyRequest {
            from_account_id: x.clone(),
            to_account_id: y.clone(),
            amount: "9.50".to_string(),
            narration: "rent".to_string(),
            reference_id: String::new(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(transfer.message, "Transfer Success");
    assert_eq!(transfer.from_account_balance, "50.00");
    assert_eq!(transfer.to_account_balance, "9.50");
    assert!(Uuid::parse_str(&transfer.reference_id).is_ok());
}

#[tokio::test]
async fn malformed_input_is_invalid_argument() {
    let h = memory_engine();
    let svc = service(&h);
    let account = h.open_account("NPR").await.account_id.to_string();

    let status = svc.deposit(posting("not-a-uuid", "1.00", "")).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = svc.deposit(posting(&account, "ten", "")).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = svc.deposit(posting(&account, "0.001", "")).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(error_kind(&status), "invalid_argument");
}

#[tokio::test]
async fn business_failures_carry_their_kind() {
    let h = memory_engine();
    let svc = service(&h);
    let account = h.open_account("NPR").await.account_id.to_string();
    svc.deposit(posting(&account, "5.00", "seed")).await.unwrap();

    let status = svc.withdraw(posting(&account, "6.00", "")).await.unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);
    assert_eq!(error_kind(&status), "insufficient_funds");

    let status = svc.deposit(posting(&account, "5.00", "seed")).await.unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);
    assert_eq!(error_kind(&status), "duplicate_reference");

    let missing = Uuid::new_v4().to_string();
    let status = svc.deposit(posting(&missing, "1.00", "")).await.unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(error_kind(&status), "not_found");
}

#[tokio::test]
async fn statements_use_wire_formats() {
    let h = memory_engine();
    let svc = service(&h);
    let account = h.open_account("NPR").await;
    let id = account.account_id.to_string();
    svc.deposit(posting(&id, "100", "s-1")).await.unwrap();
    svc.withdraw(posting(&id, "25", "s-2")).await.unwrap();

    let start = (account.opened_utc - chrono::Duration::seconds(1)).to_rfc3339();
    let end = (chrono::Utc::now() + chrono::Duration::seconds(1)).to_rfc3339();
    let generated = svc
        .generate_statement(Request::new(GenerateStatementRequest {
            account_id: id.clone(),
            start_date: start,
            end_date: end,
        }))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(generated.opening_balance, "0.00");
    assert_eq!(generated.closing_balance, "75.00");
    assert_eq!(generated.transactions.len(), 2);
    assert_eq!(generated.transactions[0].entry_type, EntryType::Credit as i32);
    assert_eq!(generated.transactions[0].balance, "100.00");
    assert_eq!(generated.transactions[1].entry_type, EntryType::Debit as i32);
    assert_eq!(generated.transactions[1].amount, "25.00");
    assert!(generated.generated_at.ends_with('Z'));

    let fetched = svc
        .get_statement(Request::new(GetStatementRequest {
            statement_id: generated.statement_id.clone(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(fetched.transactions, generated.transactions);
    assert!(fetched.content.contains("Closing balance: 75.00"));

    let listed = svc
        .list_statements(Request::new(ListStatementsRequest { account_id: id }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(listed.statements.len(), 1);
    assert_eq!(listed.statements[0].statement_id, generated.statement_id);
}

#[tokio::test]
async fn statement_bounds_echo_fractional_seconds() {
    let h = memory_engine();
    let svc = service(&h);
    let id = h.open_account("NPR").await.account_id.to_string();

    let generated = svc
        .generate_statement(Request::new(GenerateStatementRequest {
            account_id: id.clone(),
            start_date: "2026-01-01T00:00:00.500Z".to_string(),
            end_date: "2026-01-01T00:00:00.900Z".to_string(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(generated.start_date, "2026-01-01T00:00:00.500Z");
    assert_eq!(generated.end_date, "2026-01-01T00:00:00.900Z");

    let fetched = svc
        .get_statement(Request::new(GetStatementRequest {
            statement_id: generated.statement_id.clone(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(fetched.start_date, generated.start_date);
    assert_eq!(fetched.end_date, generated.end_date);

    let listed = svc
        .list_statements(Request::new(ListStatementsRequest { account_id: id }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(listed.statements[0].start_date, generated.start_date);
    assert_eq!(listed.statements[0].end_date, generated.end_date);
}

#[tokio::test]
async fn statement_dates_must_be_rfc3339() {
    let h = memory_engine();
    let svc = service(&h);
    let id = h.open_account("NPR").await.account_id.to_string();

    let status = svc
        .generate_statement(Request::new(GenerateStatementRequest {
            account_id: id,
            start_date: "2026-01-01".to_string(),
            end_date: "2026-01-31T00:00:00Z".to_string(),
        }))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().contains("start_date"));
}

#[tokio::test]
async fn journal_lookup_needs_exactly_one_key() {
    let h = memory_engine();
    let svc = service(&h);
    let id = h.open_account("NPR").await.account_id.to_string();
    let receipt = svc
        .deposit(posting(&id, "3.00", "j-1"))
        .await
        .unwrap()
        .into_inner();

    for (journal_id, reference_id) in [("", ""), (receipt.journal_id.as_str(), "j-1")] {
        let status = svc
            .get_journal(Request::new(GetJournalRequest {
                journal_id: journal_id.to_string(),
                reference_id: reference_id.to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    let journal = svc
        .get_journal(Request::new(GetJournalRequest {
            journal_id: String::new(),
            reference_id: "j-1".to_string(),
        }))
        .await
        .unwrap()
        .into_inner()
        .journal
        .expect("journal present");
    assert_eq!(journal.journal_id, receipt.journal_id);
    assert_eq!(journal.entries.len(), 1);
    assert_eq!(journal.entries[0].entry_type, EntryType::Credit as i32);
    assert_eq!(journal.entries[0].amount, "3.00");
}

#[tokio::test]
async fn account_and_reconciliation_views() {
    let h = memory_engine();
    let svc = service(&h);
    let id = h.open_account("NPR").await.account_id.to_string();
    svc.deposit(posting(&id, "42", "")).await.unwrap();

    let account = svc
        .get_account(Request::new(GetAccountRequest {
            account_id: id.clone(),
        }))
        .await
        .unwrap()
        .into_inner()
        .account
        .expect("account present");
    assert_eq!(account.balance, "42.00");
    assert_eq!(account.currency, "NPR");

    let rec = svc
        .reconcile_account(Request::new(ReconcileAccountRequest { account_id: id }))
        .await
        .unwrap()
        .into_inner();
    assert!(rec.consistent);
    assert_eq!(rec.difference, "0.00");
    assert_eq!(rec.ledger_balance, "42.00");
}

#[tokio::test]
async fn shutdown_cancels_requests() {
    let h = memory_engine();
    let shutdown = CancellationToken::new();
    let svc = TransactionServiceImpl::new(h.engine.clone(), shutdown.clone());
    let id = h.open_account("NPR").await.account_id.to_string();
    shutdown.cancel();

    let status = svc.deposit(posting(&id, "1.00", "")).await.unwrap_err();

    assert_eq!(status.code(), Code::Cancelled);
    assert_eq!(h.ledger.journal_count().await, 0);
}
