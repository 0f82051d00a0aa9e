//! Posting engine: the only writer of journal entries.
//!
//! Idempotency is enforced by entry-count parity per document: an odd
//! number of entries means the document is currently posted (its latest
//! entry is a forward posting), an even number means unposted or reversed.
//! The ledger itself stays the single source of truth for posting status;
//! there is no separate posted flag, and journal rows must never be edited
//! outside this module. The parity check is a correctness check, not a
//! lock: callers hold a row lock on the target document for the duration
//! of a post-or-reverse operation.

use crate::config::AccountCodes;
use crate::error::BillingError;
use crate::models::{
    Account, DocumentRef, Invoice, JournalEntry, JournalEntrySpec, JournalLine, LineSpec,
    Payment, PostingIntent,
};
use crate::services::ledger;
use crate::services::metrics::JOURNAL_ENTRIES_TOTAL;
use chrono::NaiveTime;
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Count the journal entries recorded for a document.
pub async fn posted_entry_count(
    conn: &mut PgConnection,
    document: DocumentRef,
) -> Result<i64, BillingError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM journal_entries WHERE document_kind = $1 AND document_id = $2",
    )
    .bind(document.kind.as_str())
    .bind(document.id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to count entries: {}", e)))?;

    Ok(count)
}

/// Whether the document's latest entry is a forward posting.
pub async fn currently_posted(
    conn: &mut PgConnection,
    document: DocumentRef,
) -> Result<bool, BillingError> {
    Ok(posted_entry_count(conn, document).await? % 2 == 1)
}

fn already_in_target_state(entry_count: i64, intent: PostingIntent) -> bool {
    let posted = entry_count % 2 == 1;
    match intent {
        PostingIntent::Forward => posted,
        PostingIntent::Reverse => !posted,
    }
}

/// Post a forward entry for a document.
///
/// Returns `None` (a no-op success, not an error) when parity shows the
/// document is already posted.
#[instrument(skip(conn, posted_by, lines), fields(document_kind = %document.kind, document_id = %document.id))]
pub async fn post(
    conn: &mut PgConnection,
    document: DocumentRef,
    description: String,
    posted_by: Option<String>,
    posted_at: Option<chrono::DateTime<chrono::Utc>>,
    lines: Vec<LineSpec>,
) -> Result<Option<Uuid>, BillingError> {
    let count = posted_entry_count(conn, document).await?;
    if already_in_target_state(count, PostingIntent::Forward) {
        debug!("Document already posted, skipping");
        return Ok(None);
    }

    let entry_id = ledger::record(
        conn,
        &JournalEntrySpec {
            description,
            posted_by,
            posted_at,
            document,
            lines,
        },
    )
    .await?;

    JOURNAL_ENTRIES_TOTAL
        .with_label_values(&[document.kind.as_str(), "forward"])
        .inc();

    Ok(Some(entry_id))
}

/// Reverse the most recent forward entry for a document: every line is
/// mirrored (debit and credit swapped, account and order preserved) and
/// recorded as a new entry through the same parity check.
///
/// Returns `None` when parity shows there is nothing to reverse.
#[instrument(skip(conn, posted_by), fields(document_kind = %document.kind, document_id = %document.id))]
pub async fn reverse(
    conn: &mut PgConnection,
    document: DocumentRef,
    description: String,
    posted_by: Option<String>,
) -> Result<Option<Uuid>, BillingError> {
    let count = posted_entry_count(conn, document).await?;
    if already_in_target_state(count, PostingIntent::Reverse) {
        debug!("Document not currently posted, nothing to reverse");
        return Ok(None);
    }

    // Parity is odd, so the latest entry is the forward posting to mirror.
    let latest = sqlx::query_as::<_, JournalEntry>(
        r#"
        SELECT entry_id, entry_seq, posted_at, posted_by, description, document_kind, document_id
        FROM journal_entries
        WHERE document_kind = $1 AND document_id = $2
        ORDER BY entry_seq DESC
        LIMIT 1
        "#,
    )
    .bind(document.kind.as_str())
    .bind(document.id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get latest entry: {}", e)))?;

    let forward_lines = sqlx::query_as::<_, JournalLine>(
        r#"
        SELECT line_id, entry_id, account_id, line_no, debit, credit
        FROM journal_lines
        WHERE entry_id = $1
        ORDER BY line_no
        "#,
    )
    .bind(latest.entry_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get entry lines: {}", e)))?;

    let mirrored = forward_lines
        .iter()
        .map(|l| LineSpec {
            account_id: l.account_id,
            debit: l.credit,
            credit: l.debit,
        })
        .collect();

    let entry_id = ledger::record(
        conn,
        &JournalEntrySpec {
            description,
            posted_by,
            posted_at: None,
            document,
            lines: mirrored,
        },
    )
    .await?;

    JOURNAL_ENTRIES_TOTAL
        .with_label_values(&[document.kind.as_str(), "reverse"])
        .inc();

    Ok(Some(entry_id))
}

/// Resolve a configured account code to exactly one active account.
pub async fn resolve_account(
    conn: &mut PgConnection,
    code: &str,
) -> Result<Account, BillingError> {
    ledger::account_by_code(conn, code)
        .await?
        .ok_or_else(|| BillingError::AccountNotConfigured {
            code: code.to_string(),
        })
}

// -------------------------------------------------------------------------
// Fixed posting rules
// -------------------------------------------------------------------------

/// Invoice issuance: Dr Accounts Receivable, Cr Revenue, for the total.
pub async fn post_invoice(
    conn: &mut PgConnection,
    codes: &AccountCodes,
    invoice: &Invoice,
    actor: Option<String>,
) -> Result<Option<Uuid>, BillingError> {
    let ar = resolve_account(conn, &codes.accounts_receivable).await?;
    let revenue = resolve_account(conn, &codes.revenue).await?;

    let number = invoice.invoice_number.as_deref().unwrap_or("(unnumbered)");

    post(
        conn,
        DocumentRef::invoice(invoice.invoice_id),
        format!("Invoice {} posted", number),
        actor,
        None,
        vec![
            LineSpec::debit(ar.account_id, invoice.total),
            LineSpec::credit(revenue.account_id, invoice.total),
        ],
    )
    .await
}

/// Invoice void/revert: mirrored reversal of the issuance entry.
pub async fn reverse_invoice(
    conn: &mut PgConnection,
    invoice: &Invoice,
    actor: Option<String>,
) -> Result<Option<Uuid>, BillingError> {
    let number = invoice.invoice_number.as_deref().unwrap_or("(unnumbered)");

    reverse(
        conn,
        DocumentRef::invoice(invoice.invoice_id),
        format!("Invoice {} reversed", number),
        actor,
    )
    .await
}

/// Payment receipt: Dr Cash for the full amount; Cr Accounts Receivable
/// for the applied sum; Cr Unapplied Payments for the remainder. The AR
/// and clearing lines are omitted when their amount is zero.
pub async fn post_payment(
    conn: &mut PgConnection,
    codes: &AccountCodes,
    payment: &Payment,
    client_name: &str,
    actor: Option<String>,
) -> Result<Option<Uuid>, BillingError> {
    let cash = resolve_account(conn, &codes.cash).await?;

    let applied_total: Option<Decimal> = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM payment_applications WHERE payment_id = $1",
    )
    .bind(payment.payment_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to sum applications: {}", e)))?;

    let applied_total = applied_total.unwrap_or(Decimal::ZERO);
    let unapplied = payment.amount - applied_total;

    let mut lines = vec![LineSpec::debit(cash.account_id, payment.amount)];
    if applied_total > Decimal::ZERO {
        let ar = resolve_account(conn, &codes.accounts_receivable).await?;
        lines.push(LineSpec::credit(ar.account_id, applied_total));
    }
    if unapplied > Decimal::ZERO {
        let clearing = resolve_account(conn, &codes.unapplied_payments).await?;
        lines.push(LineSpec::credit(clearing.account_id, unapplied));
    }

    post(
        conn,
        DocumentRef::payment(payment.payment_id),
        format!("Payment received from {}", client_name),
        actor,
        Some(payment.date.and_time(NaiveTime::MIN).and_utc()),
        lines,
    )
    .await
}
