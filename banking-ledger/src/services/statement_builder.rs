//! Running-balance statement derivation.
//!
//! Everything here is pure: the same entries always produce the same lines,
//! which lets `GetStatement` re-derive a persisted statement's transactions.

use crate::models::{PostedEntry, StatementLine};
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use std::fmt::Write;

/// Lines of a period plus its bounding balances.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltStatement {
    pub opening_balance: Decimal,
    pub closing_balance: Decimal,
    pub lines: Vec<StatementLine>,
}

/// Signed sum of entries (CREDIT adds, DEBIT subtracts).
pub fn net_movement(entries: &[PostedEntry]) -> Decimal {
    entries.iter().map(PostedEntry::signed_amount).sum()
}

/// Annotate `entries` with running balances starting at `opening_balance`.
///
/// Entries are ordered by journal value date with ties broken by creation
/// order, regardless of the order they were passed in. Entries with an
/// unrecognised type are skipped.
pub fn build(opening_balance: Decimal, mut entries: Vec<PostedEntry>) -> BuiltStatement {
    entries.sort_by(|a, b| {
        a.value_date
            .cmp(&b.value_date)
            .then(a.entry_seq.cmp(&b.entry_seq))
    });

    let mut running = opening_balance;
    let mut lines = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(entry_type) = entry.parsed_type() else {
            tracing::warn!(
                entry_id = %entry.entry_id,
                entry_type = %entry.entry_type,
                "Skipping entry with unknown type"
            );
            continue;
        };
        running += entry_type.apply(entry.amount);
        lines.push(StatementLine {
            entry_id: entry.entry_id,
            journal_id: entry.journal_id,
            value_date: entry.value_date,
            narration: entry.narration,
            entry_type,
            amount: entry.amount,
            running_balance: running,
        });
    }

    BuiltStatement {
        opening_balance,
        closing_balance: running,
        lines,
    }
}

/// Two-fraction-digit decimal string.
pub fn format_amount(amount: Decimal) -> String {
    let mut amount = amount;
    amount.rescale(2);
    amount.to_string()
}

/// RFC 3339 in UTC, keeping any sub-second part.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Plain-text rendering stored as the statement's content.
pub fn render(
    account_number: &str,
    currency: &str,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    built: &BuiltStatement,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Statement for account {account_number} ({currency})");
    let _ = writeln!(
        out,
        "Period: {} to {}",
        format_timestamp(period_start),
        format_timestamp(period_end)
    );
    let _ = writeln!(out, "Opening balance: {}", format_amount(built.opening_balance));
    for line in &built.lines {
        let _ = writeln!(
            out,
            "{}  {:<6}  {:>20}  {:>20}  {}",
            format_timestamp(line.value_date),
            line.entry_type.as_str(),
            format_amount(line.amount),
            format_amount(line.running_balance),
            line.narration
        );
    }
    let _ = writeln!(out, "Closing balance: {}", format_amount(built.closing_balance));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryType;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn entry(entry_type: EntryType, cents: i64, day: u32, seq: i64) -> PostedEntry {
        PostedEntry {
            entry_id: Uuid::new_v4(),
            journal_id: Uuid::new_v4(),
            account_id: Uuid::nil(),
            entry_type: entry_type.as_str().to_string(),
            amount: Decimal::new(cents, 2),
            entry_seq: seq,
            value_date: Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap(),
            narration: format!("entry {seq}"),
        }
    }

    #[test]
    fn running_balance_follows_value_date_then_creation_order() {
        let entries = vec![
            entry(EntryType::Debit, 4000, 2, 2),
            entry(EntryType::Credit, 10000, 1, 1),
            entry(EntryType::Debit, 2000, 2, 3),
        ];

        let built = build(Decimal::ZERO, entries);

        let balances: Vec<_> = built.lines.iter().map(|l| l.running_balance).collect();
        assert_eq!(
            balances,
            vec![Decimal::new(10000, 2), Decimal::new(6000, 2), Decimal::new(4000, 2)]
        );
        assert_eq!(built.closing_balance, Decimal::new(4000, 2));
        assert_eq!(built.lines[1].narration, "entry 2");
    }

    #[test]
    fn empty_period_keeps_opening_balance() {
        let built = build(Decimal::new(1234, 2), Vec::new());
        assert!(built.lines.is_empty());
        assert_eq!(built.opening_balance, built.closing_balance);
    }

    #[test]
    fn net_movement_sums_signed_amounts() {
        let entries = vec![
            entry(EntryType::Credit, 5000, 1, 1),
            entry(EntryType::Debit, 1250, 1, 2),
        ];
        assert_eq!(net_movement(&entries), Decimal::new(3750, 2));
    }

    #[test]
    fn unknown_entry_types_are_skipped() {
        let mut odd = entry(EntryType::Credit, 100, 1, 1);
        odd.entry_type = "MEMO".to_string();
        let built = build(Decimal::ZERO, vec![odd]);
        assert!(built.lines.is_empty());
        assert_eq!(built.closing_balance, Decimal::ZERO);
    }

    #[test]
    fn timestamps_keep_sub_second_precision() {
        let whole = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(format_timestamp(whole), "2026-01-01T00:00:00Z");

        let half = whole + chrono::Duration::milliseconds(500);
        assert_eq!(format_timestamp(half), "2026-01-01T00:00:00.500Z");

        let micros = whole + chrono::Duration::microseconds(123_456);
        assert_eq!(format_timestamp(micros), "2026-01-01T00:00:00.123456Z");
    }

    #[test]
    fn amounts_always_have_two_fraction_digits() {
        assert_eq!(format_amount(Decimal::new(100, 0)), "100.00");
        assert_eq!(format_amount(Decimal::new(405, 1)), "40.50");
        assert_eq!(format_amount(Decimal::ZERO), "0.00");
    }

    #[test]
    fn render_includes_bounds_and_lines() {
        let built = build(Decimal::ZERO, vec![entry(EntryType::Credit, 10000, 1, 1)]);
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 31, 0, 0, 0).unwrap();

        let text = render("SAV-1", "NPR", start, end, &built);

        assert!(text.contains("Opening balance: 0.00"));
        assert!(text.contains("CREDIT"));
        assert!(text.contains("Closing balance: 100.00"));
        assert!(text.contains("2026-03-01T00:00:00Z"));
    }
}
