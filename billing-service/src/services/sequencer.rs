//! Year-scoped invoice number sequencing.

use crate::error::BillingError;
use sqlx::postgres::PgConnection;
use tracing::instrument;

// Advisory lock class for invoice sequencing; paired with the year it
// serializes concurrent issuers of the same year without blocking others.
const INVOICE_SEQUENCE_LOCK: i32 = 4201;

/// Compute the next invoice number for a year, formatted "YYYY-NNN".
///
/// Takes a transaction-scoped advisory lock on the year before scanning,
/// so two concurrent issuers cannot both read the same maximum; default
/// isolation alone would leave that window open to phantom reads. The scan
/// goes over issued invoices rather than a counter table, tolerating
/// manual corrections. Sequence numbers are never reused, even when an
/// invoice is later voided; a new year starts back at 1.
///
/// Must be called inside the same transaction that persists the invoice
/// row, so the lock holds until the new number commits.
#[instrument(skip(conn))]
pub async fn next_number(
    conn: &mut PgConnection,
    year: i32,
) -> Result<(i32, String), BillingError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
        .bind(INVOICE_SEQUENCE_LOCK)
        .bind(year)
        .execute(&mut *conn)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to take sequence lock: {}", e)))?;

    let max: Option<i32> = sqlx::query_scalar(
        "SELECT MAX(sequence_number) FROM invoices WHERE sequence_year = $1",
    )
    .bind(year)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to scan sequence: {}", e)))?;

    let seq = max.unwrap_or(0) + 1;
    Ok((seq, format!("{}-{:03}", year, seq)))
}
