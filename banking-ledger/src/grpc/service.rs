//! TransactionService gRPC implementation.

use crate::error::LedgerError;
use crate::grpc::proto::{
    transaction_service_server::TransactionService, Account as ProtoAccount,
    GenerateStatementRequest, GenerateStatementResponse, GetAccountRequest, GetAccountResponse,
    GetJournalRequest, GetJournalResponse, GetStatementRequest, GetStatementResponse,
    Journal as ProtoJournal, JournalEntry as ProtoJournalEntry, ListStatementsRequest,
    ListStatementsResponse, ReconcileAccountRequest, ReconcileAccountResponse,
    StatementSummary, StatementTransaction, TransactionRequest, TransactionResponse,
    TransferMoneyRequest, TransferMoneyResponse,
};
use crate::models::{Account, JournalEntry, Statement, StatementLine};
use crate::services::metrics::{GRPC_REQUESTS_TOTAL, GRPC_REQUEST_DURATION};
use crate::services::statement_builder::{format_amount, format_timestamp};
use crate::services::{
    AccountAccessor, JournalLookup, JournalRecord, LedgerStore, PostingCommand, StatementPeriod,
    TransactionEngine, TransferCommand,
};
use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use prometheus::HistogramTimer;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// TransactionService implementation over any ledger store.
pub struct TransactionServiceImpl<S, A> {
    engine: Arc<TransactionEngine<S, A>>,
    shutdown: CancellationToken,
}

impl<S, A> TransactionServiceImpl<S, A> {
    /// `shutdown` cancels in-flight operations when the server stops.
    pub fn new(engine: Arc<TransactionEngine<S, A>>, shutdown: CancellationToken) -> Self {
        Self { engine, shutdown }
    }
}

fn to_timestamp(ts: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: ts.timestamp(),
        nanos: ts.timestamp_subsec_nanos() as i32,
    }
}

fn invalid(method: &'static str, message: impl Into<String>) -> Status {
    GRPC_REQUESTS_TOTAL
        .with_label_values(&[method, "invalid_argument"])
        .inc();
    Status::invalid_argument(message.into())
}

fn parse_uuid(method: &'static str, field: &str, value: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(value.trim()).map_err(|_| invalid(method, format!("Invalid {field} format")))
}

fn parse_amount(method: &'static str, value: &str) -> Result<Decimal, Status> {
    Decimal::from_str(value.trim()).map_err(|_| invalid(method, "Invalid amount format"))
}

fn parse_date(method: &'static str, field: &str, value: &str) -> Result<DateTime<Utc>, Status> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| invalid(method, format!("Invalid {field} format (expected RFC 3339)")))
}

fn optional_reference(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Record the outcome of a handler and convert domain errors.
fn respond<T>(
    method: &'static str,
    timer: HistogramTimer,
    result: Result<T, LedgerError>,
) -> Result<Response<T>, Status> {
    timer.observe_duration();
    match result {
        Ok(body) => {
            GRPC_REQUESTS_TOTAL.with_label_values(&[method, "ok"]).inc();
            Ok(Response::new(body))
        }
        Err(err) => {
            GRPC_REQUESTS_TOTAL
                .with_label_values(&[method, err.kind().as_str()])
                .inc();
            warn!(method, error = %err, "Request failed");
            Err(err.into())
        }
    }
}

fn line_to_proto(line: &StatementLine) -> StatementTransaction {
    StatementTransaction {
        entry_id: line.entry_id.to_string(),
        journal_id: line.journal_id.to_string(),
        date: format_timestamp(line.value_date),
        description: line.narration.clone(),
        entry_type: line.entry_type.to_proto(),
        amount: format_amount(line.amount),
        balance: format_amount(line.running_balance),
    }
}

fn summary_to_proto(statement: &Statement) -> StatementSummary {
    StatementSummary {
        statement_id: statement.statement_id.to_string(),
        account_id: statement.account_id.to_string(),
        start_date: format_timestamp(statement.period_start),
        end_date: format_timestamp(statement.period_end),
        opening_balance: format_amount(statement.opening_balance),
        closing_balance: format_amount(statement.closing_balance),
        generated_at: format_timestamp(statement.generated_utc),
    }
}

fn account_to_proto(account: &Account) -> ProtoAccount {
    ProtoAccount {
        account_id: account.account_id.to_string(),
        account_number: account.account_number.clone(),
        customer_id: account.customer_id.to_string(),
        account_type: account.account_type.clone(),
        currency: account.currency.clone(),
        status: account.parsed_status().map(|s| s.to_proto()).unwrap_or(0),
        balance: format_amount(account.balance),
        opened_at: Some(to_timestamp(account.opened_utc)),
        updated_at: Some(to_timestamp(account.updated_utc)),
    }
}

fn entry_to_proto(entry: &JournalEntry) -> ProtoJournalEntry {
    ProtoJournalEntry {
        entry_id: entry.entry_id.to_string(),
        account_id: entry.account_id.to_string(),
        entry_type: entry.parsed_type().map(|t| t.to_proto()).unwrap_or(0),
        amount: format_amount(entry.amount),
        created_at: Some(to_timestamp(entry.created_utc)),
    }
}

fn journal_to_proto(record: &JournalRecord) -> ProtoJournal {
    let journal = &record.journal;
    ProtoJournal {
        journal_id: journal.journal_id.to_string(),
        reference_id: journal.reference_id.clone(),
        narration: journal.narration.clone(),
        value_date: Some(to_timestamp(journal.value_date)),
        status: journal.parsed_status().map(|s| s.to_proto()).unwrap_or(0),
        entries: record.entries.iter().map(entry_to_proto).collect(),
        created_at: Some(to_timestamp(journal.created_utc)),
    }
}

#[tonic::async_trait]
impl<S, A> TransactionService for TransactionServiceImpl<S, A>
where
    S: LedgerStore + 'static,
    A: AccountAccessor<S::Scope> + 'static,
{
    #[instrument(
        skip(self, request),
        fields(service = "banking-ledger", method = "Deposit")
    )]
    async fn deposit(
        &self,
        request: Request<TransactionRequest>,
    ) -> Result<Response<TransactionResponse>, Status> {
        const METHOD: &str = "Deposit";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let cmd = PostingCommand {
            account_id: parse_uuid(METHOD, "account_id", &req.account_id)?,
            amount: parse_amount(METHOD, &req.amount)?,
            narration: req.narration,
            reference_id: optional_reference(req.reference_id),
        };

        let result = self
            .engine
            .deposit(cmd, &self.shutdown)
            .await
            .map(|receipt| TransactionResponse {
                journal_id: receipt.journal_id.to_string(),
                message: "Deposit Success".to_string(),
                new_balance: format_amount(receipt.new_balance),
                reference_id: receipt.reference_id,
            });

        respond(METHOD, timer, result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "banking-ledger", method = "Withdraw")
    )]
    async fn withdraw(
        &self,
        request: Request<TransactionRequest>,
    ) -> Result<Response<TransactionResponse>, Status> {
        const METHOD: &str = "Withdraw";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let cmd = PostingCommand {
            account_id: parse_uuid(METHOD, "account_id", &req.account_id)?,
            amount: parse_amount(METHOD, &req.amount)?,
            narration: req.narration,
            reference_id: optional_reference(req.reference_id),
        };

        let result = self
            .engine
            .withdraw(cmd, &self.shutdown)
            .await
            .map(|receipt| TransactionResponse {
                journal_id: receipt.journal_id.to_string(),
                message: "Withdraw Success".to_string(),
                new_balance: format_amount(receipt.new_balance),
                reference_id: receipt.reference_id,
            });

        respond(METHOD, timer, result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "banking-ledger", method = "TransferMoney")
    )]
    async fn transfer_money(
        &self,
        request: Request<TransferMoneyRequest>,
    ) -> Result<Response<TransferMoneyResponse>, Status> {
        const METHOD: &str = "TransferMoney";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let cmd = TransferCommand {
            from_account_id: parse_uuid(METHOD, "from_account_id", &req.from_account_id)?,
            to_account_id: parse_uuid(METHOD, "to_account_id", &req.to_account_id)?,
            amount: parse_amount(METHOD, &req.amount)?,
            narration: req.narration,
            reference_id: optional_reference(req.reference_id),
        };

        let result = self
            .engine
            .transfer(cmd, &self.shutdown)
            .await
            .map(|receipt| TransferMoneyResponse {
                journal_id: receipt.journal_id.to_string(),
                message: "Transfer Success".to_string(),
                from_account_balance: format_amount(receipt.from_balance),
                to_account_balance: format_amount(receipt.to_balance),
                reference_id: receipt.reference_id,
            });

        respond(METHOD, timer, result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "banking-ledger", method = "GenerateStatement")
    )]
    async fn generate_statement(
        &self,
        request: Request<GenerateStatementRequest>,
    ) -> Result<Response<GenerateStatementResponse>, Status> {
        const METHOD: &str = "GenerateStatement";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let period = StatementPeriod {
            account_id: parse_uuid(METHOD, "account_id", &req.account_id)?,
            start: parse_date(METHOD, "start_date", &req.start_date)?,
            end: parse_date(METHOD, "end_date", &req.end_date)?,
        };

        let result = self
            .engine
            .generate_statement(period, &self.shutdown)
            .await
            .map(|report| {
                let statement = &report.statement;
                GenerateStatementResponse {
                    statement_id: statement.statement_id.to_string(),
                    account_id: statement.account_id.to_string(),
                    start_date: format_timestamp(statement.period_start),
                    end_date: format_timestamp(statement.period_end),
                    opening_balance: format_amount(statement.opening_balance),
                    closing_balance: format_amount(statement.closing_balance),
                    transactions: report.lines.iter().map(line_to_proto).collect(),
                    generated_at: format_timestamp(statement.generated_utc),
                }
            });

        respond(METHOD, timer, result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "banking-ledger", method = "GetStatement")
    )]
    async fn get_statement(
        &self,
        request: Request<GetStatementRequest>,
    ) -> Result<Response<GetStatementResponse>, Status> {
        const METHOD: &str = "GetStatement";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let statement_id = parse_uuid(METHOD, "statement_id", &req.statement_id)?;

        let result = self
            .engine
            .get_statement(statement_id, &self.shutdown)
            .await
            .map(|report| {
                let statement = &report.statement;
                GetStatementResponse {
                    statement_id: statement.statement_id.to_string(),
                    account_id: statement.account_id.to_string(),
                    start_date: format_timestamp(statement.period_start),
                    end_date: format_timestamp(statement.period_end),
                    opening_balance: format_amount(statement.opening_balance),
                    closing_balance: format_amount(statement.closing_balance),
                    transactions: report.lines.iter().map(line_to_proto).collect(),
                    generated_at: format_timestamp(statement.generated_utc),
                    content: statement.content.clone().unwrap_or_default(),
                }
            });

        respond(METHOD, timer, result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "banking-ledger", method = "ListStatements")
    )]
    async fn list_statements(
        &self,
        request: Request<ListStatementsRequest>,
    ) -> Result<Response<ListStatementsResponse>, Status> {
        const METHOD: &str = "ListStatements";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let account_id = parse_uuid(METHOD, "account_id", &req.account_id)?;

        let result = self
            .engine
            .list_statements(account_id, &self.shutdown)
            .await
            .map(|statements| ListStatementsResponse {
                statements: statements.iter().map(summary_to_proto).collect(),
            });

        respond(METHOD, timer, result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "banking-ledger", method = "GetAccount")
    )]
    async fn get_account(
        &self,
        request: Request<GetAccountRequest>,
    ) -> Result<Response<GetAccountResponse>, Status> {
        const METHOD: &str = "GetAccount";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let account_id = parse_uuid(METHOD, "account_id", &req.account_id)?;

        let result = self
            .engine
            .account(account_id, &self.shutdown)
            .await
            .map(|account| GetAccountResponse {
                account: Some(account_to_proto(&account)),
            });

        respond(METHOD, timer, result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "banking-ledger", method = "GetJournal")
    )]
    async fn get_journal(
        &self,
        request: Request<GetJournalRequest>,
    ) -> Result<Response<GetJournalResponse>, Status> {
        const METHOD: &str = "GetJournal";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let lookup = match (req.journal_id.trim(), req.reference_id.trim()) {
            (id, "") if !id.is_empty() => JournalLookup::Id(parse_uuid(METHOD, "journal_id", id)?),
            ("", reference) if !reference.is_empty() => {
                JournalLookup::Reference(reference.to_string())
            }
            _ => {
                return Err(invalid(
                    METHOD,
                    "Exactly one of journal_id or reference_id must be set",
                ))
            }
        };

        let result = self
            .engine
            .journal(lookup, &self.shutdown)
            .await
            .map(|record| GetJournalResponse {
                journal: Some(journal_to_proto(&record)),
            });

        respond(METHOD, timer, result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "banking-ledger", method = "ReconcileAccount")
    )]
    async fn reconcile_account(
        &self,
        request: Request<ReconcileAccountRequest>,
    ) -> Result<Response<ReconcileAccountResponse>, Status> {
        const METHOD: &str = "ReconcileAccount";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let account_id = parse_uuid(METHOD, "account_id", &req.account_id)?;

        let result = self
            .engine
            .reconcile(account_id, &self.shutdown)
            .await
            .map(|rec| {
                info!(
                    account_id = %rec.account_id,
                    consistent = rec.is_consistent(),
                    "Account reconciled"
                );
                ReconcileAccountResponse {
                    account_id: rec.account_id.to_string(),
                    recorded_balance: format_amount(rec.recorded_balance),
                    ledger_balance: format_amount(rec.ledger_balance),
                    difference: format_amount(rec.difference()),
                    consistent: rec.is_consistent(),
                }
            });

        respond(METHOD, timer, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_reference_is_omitted() {
        assert_eq!(optional_reference("  ".to_string()), None);
        assert_eq!(optional_reference("r1".to_string()), Some("r1".to_string()));
    }

    #[test]
    fn dates_must_be_rfc3339() {
        let parsed = parse_date("Test", "start_date", "2026-01-01T00:00:00+05:45").unwrap();
        assert_eq!(format_timestamp(parsed), "2025-12-31T18:15:00Z");

        let err = parse_date("Test", "start_date", "2026-01-01").unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn malformed_amount_is_invalid_argument() {
        let err = parse_amount("Test", "ten").unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert_eq!(parse_amount("Test", " 10.50 ").unwrap(), Decimal::new(1050, 2));
    }
}
