//! Invoice lifecycle controller.
//!
//! State machine over DRAFT/ISSUED/PAID/VOID. Every operation here runs in
//! one transaction holding a `FOR UPDATE` lock on the invoice row, so
//! forward/reverse posting pairs for a document are serialized and a
//! failure rolls back invoice state, journal entries and item status flips
//! together.

use crate::config::AccountCodes;
use crate::error::BillingError;
use crate::models::{
    AttachResult, BillableStatus, CreateDraftInvoice, CreateLine, Invoice, InvoiceLine,
    InvoiceStatus, IssueOptions, IssueResult, ItemKind, ItemRef, LineType, RejectedItem,
};
use crate::services::metrics::INVOICE_TRANSITIONS_TOTAL;
use crate::services::{posting, sequencer, Database};
use chrono::{Datelike, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "invoice_id, client_id, invoice_number, sequence_year, \
     sequence_number, status, issue_date, due_date, notes, subtotal, tax_amount, total, \
     created_utc, issued_utc, voided_utc";

/// Lock and fetch an invoice row for the duration of the transaction.
async fn lock_invoice(
    conn: &mut PgConnection,
    invoice_id: Uuid,
) -> Result<Invoice, BillingError> {
    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {} FROM invoices WHERE invoice_id = $1 FOR UPDATE",
        INVOICE_COLUMNS
    ))
    .bind(invoice_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to lock invoice: {}", e)))?;

    invoice.ok_or_else(|| BillingError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))
}

fn ensure_draft(invoice: &Invoice) -> Result<(), BillingError> {
    if invoice.parsed_status() != InvoiceStatus::Draft {
        return Err(BillingError::InvoiceNotDraft {
            invoice_id: invoice.invoice_id,
            status: invoice.status.clone(),
        });
    }
    Ok(())
}

fn ensure_issued(invoice: &Invoice) -> Result<(), BillingError> {
    if invoice.parsed_status() != InvoiceStatus::Issued {
        return Err(BillingError::InvoiceNotIssued {
            invoice_id: invoice.invoice_id,
            status: invoice.status.clone(),
        });
    }
    Ok(())
}

/// Recompute the cached totals from the line set. Must run after every
/// change to an invoice's lines so the cache never drifts from their sum.
async fn recalculate_totals(
    conn: &mut PgConnection,
    invoice_id: Uuid,
) -> Result<Invoice, BillingError> {
    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        r#"
        UPDATE invoices
        SET subtotal = t.line_sum, tax_amount = 0, total = t.line_sum
        FROM (
            SELECT COALESCE(SUM(line_total), 0) AS line_sum
            FROM invoice_lines
            WHERE invoice_id = $1
        ) t
        WHERE invoice_id = $1
        RETURNING {}
        "#,
        INVOICE_COLUMNS
    ))
    .bind(invoice_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to recalculate totals: {}", e)))?;

    Ok(invoice)
}

/// Sum of payments applied to an invoice.
async fn applied_total(
    conn: &mut PgConnection,
    invoice_id: Uuid,
) -> Result<Decimal, BillingError> {
    let total: Option<Decimal> = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM payment_applications WHERE invoice_id = $1",
    )
    .bind(invoice_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to sum payments: {}", e)))?;

    Ok(total.unwrap_or(Decimal::ZERO))
}

/// Revert the source items of an invoice's lines to UNBILLED. When
/// `clear_links` is set the `invoice_line_id` side of the link is cleared
/// as well (void/delete); otherwise the link is kept (return to draft).
async fn unbill_source_items(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    clear_links: bool,
) -> Result<(), BillingError> {
    let link = if clear_links { ", invoice_line_id = NULL" } else { "" };

    sqlx::query(&format!(
        r#"
        UPDATE time_entries
        SET status = 'unbilled'{}
        WHERE invoice_line_id IN (SELECT line_id FROM invoice_lines WHERE invoice_id = $1)
        "#,
        link
    ))
    .bind(invoice_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to unbill time entries: {}", e)))?;

    sqlx::query(&format!(
        r#"
        UPDATE expenses
        SET status = 'unbilled'{}
        WHERE invoice_line_id IN (SELECT line_id FROM invoice_lines WHERE invoice_id = $1)
        "#,
        link
    ))
    .bind(invoice_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to unbill expenses: {}", e)))?;

    Ok(())
}

async fn client_has_other_draft(
    conn: &mut PgConnection,
    client_id: Uuid,
    exclude_invoice: Option<Uuid>,
) -> Result<bool, BillingError> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM invoices
            WHERE client_id = $1 AND status = 'draft'
              AND ($2::uuid IS NULL OR invoice_id <> $2)
        )
        "#,
    )
    .bind(client_id)
    .bind(exclude_invoice)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to check drafts: {}", e)))?;

    Ok(exists)
}

// -------------------------------------------------------------------------
// Draft Operations
// -------------------------------------------------------------------------

/// Create a new draft invoice with zero lines. At most one draft exists
/// per client; the partial unique index backstops the pre-check against
/// concurrent creation.
#[instrument(skip(db, input), fields(client_id = %input.client_id))]
pub async fn create_draft(
    db: &Database,
    input: &CreateDraftInvoice,
) -> Result<Invoice, BillingError> {
    let client = db
        .get_client(input.client_id)
        .await?
        .ok_or_else(|| BillingError::NotFound(anyhow::anyhow!("Client {} not found", input.client_id)))?;

    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        r#"
        INSERT INTO invoices (invoice_id, client_id, status, notes)
        VALUES ($1, $2, 'draft', $3)
        RETURNING {}
        "#,
        INVOICE_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(client.client_id)
    .bind(&input.notes)
    .fetch_one(db.pool())
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            BillingError::DraftAlreadyExists {
                client_id: input.client_id,
            }
        }
        _ => BillingError::Database(anyhow::anyhow!("Failed to create draft: {}", e)),
    })?;

    info!(invoice_id = %invoice.invoice_id, "Draft invoice created");

    Ok(invoice)
}

/// Attach unbilled time entries and expenses to a draft invoice.
///
/// Either every requested item attaches or none do: any ineligible item
/// fails the whole batch with the full rejection list. For each accepted
/// item an invoice line is created (time: quantity = hours, price = rate
/// snapshot; expense: quantity = 1, price = amount) and both sides of the
/// item-line link are set in the same transaction.
#[instrument(skip(db, items), fields(invoice_id = %invoice_id, item_count = items.len()))]
pub async fn attach_items(
    db: &Database,
    invoice_id: Uuid,
    items: &[ItemRef],
) -> Result<AttachResult, BillingError> {
    let mut tx = db.pool().begin().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    ensure_draft(&invoice)?;

    // Validate the whole batch before touching anything.
    let mut rejected = Vec::new();
    let mut accepted = Vec::with_capacity(items.len());
    let mut seen = std::collections::HashSet::new();

    for item in items {
        if !seen.insert((item.kind, item.id)) {
            rejected.push(RejectedItem {
                item: *item,
                reason: "duplicated in request".to_string(),
            });
            continue;
        }
        match check_eligibility(&mut tx, &invoice, *item).await? {
            Ok(line) => accepted.push((*item, line)),
            Err(reason) => rejected.push(RejectedItem { item: *item, reason }),
        }
    }

    if !rejected.is_empty() {
        return Err(BillingError::ItemNotEligible { rejected });
    }

    for (item, line) in &accepted {
        let line_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO invoice_lines (line_id, invoice_id, line_type, description,
                quantity, unit_price, line_total, time_entry_id, expense_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(line_id)
        .bind(invoice_id)
        .bind(line.line_type.as_str())
        .bind(&line.description)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.quantity * line.unit_price)
        .bind((item.kind == ItemKind::Time).then_some(item.id))
        .bind((item.kind == ItemKind::Expense).then_some(item.id))
        .execute(&mut *tx)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to insert line: {}", e)))?;

        let table = match item.kind {
            ItemKind::Time => "time_entries",
            ItemKind::Expense => "expenses",
        };
        let key = match item.kind {
            ItemKind::Time => "time_entry_id",
            ItemKind::Expense => "expense_id",
        };
        sqlx::query(&format!(
            "UPDATE {} SET invoice_line_id = $1 WHERE {} = $2",
            table, key
        ))
        .bind(line_id)
        .bind(item.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to link item: {}", e)))?;
    }

    let invoice = recalculate_totals(&mut tx, invoice_id).await?;

    tx.commit().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    info!(
        invoice_id = %invoice_id,
        attached = accepted.len(),
        total = %invoice.total,
        "Items attached"
    );

    Ok(AttachResult {
        attached: accepted.len(),
        invoice,
    })
}

/// Pending line data for an accepted item.
struct PendingLine {
    line_type: LineType,
    description: String,
    quantity: Decimal,
    unit_price: Decimal,
}

/// Check one item's eligibility, locking its row. Returns the line to
/// create on success, the rejection reason otherwise.
async fn check_eligibility(
    conn: &mut PgConnection,
    invoice: &Invoice,
    item: ItemRef,
) -> Result<Result<PendingLine, String>, BillingError> {
    match item.kind {
        ItemKind::Time => {
            let entry = sqlx::query_as::<_, crate::models::TimeEntry>(
                r#"
                SELECT time_entry_id, client_id, work_date, hours, billing_rate, description,
                    status, invoice_line_id, created_utc
                FROM time_entries
                WHERE time_entry_id = $1
                FOR UPDATE
                "#,
            )
            .bind(item.id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get time entry: {}", e)))?;

            let Some(entry) = entry else {
                return Ok(Err("not found".to_string()));
            };
            if entry.client_id != invoice.client_id {
                return Ok(Err("belongs to a different client".to_string()));
            }
            if entry.status != BillableStatus::Unbilled.as_str() {
                return Ok(Err(format!("status is {}", entry.status)));
            }
            if entry.invoice_line_id.is_some() {
                return Ok(Err("already attached to an invoice".to_string()));
            }

            Ok(Ok(PendingLine {
                line_type: LineType::Time,
                description: format!("{} {}", entry.work_date, entry.description),
                quantity: entry.hours,
                unit_price: entry.billing_rate,
            }))
        }
        ItemKind::Expense => {
            let expense = sqlx::query_as::<_, crate::models::Expense>(
                r#"
                SELECT expense_id, client_id, expense_date, amount, description, billable,
                    status, invoice_line_id, created_utc
                FROM expenses
                WHERE expense_id = $1
                FOR UPDATE
                "#,
            )
            .bind(item.id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get expense: {}", e)))?;

            let Some(expense) = expense else {
                return Ok(Err("not found".to_string()));
            };
            if expense.client_id != invoice.client_id {
                return Ok(Err("belongs to a different client".to_string()));
            }
            if !expense.billable {
                return Ok(Err("not billable".to_string()));
            }
            if expense.status != BillableStatus::Unbilled.as_str() {
                return Ok(Err(format!("status is {}", expense.status)));
            }
            if expense.invoice_line_id.is_some() {
                return Ok(Err("already attached to an invoice".to_string()));
            }

            Ok(Ok(PendingLine {
                line_type: LineType::Expense,
                description: format!("{} {}", expense.expense_date, expense.description),
                quantity: Decimal::ONE,
                unit_price: expense.amount,
            }))
        }
    }
}

/// Add a free-form adjustment/general line to a draft.
#[instrument(skip(db, input), fields(invoice_id = %invoice_id))]
pub async fn add_line(
    db: &Database,
    invoice_id: Uuid,
    input: &CreateLine,
) -> Result<InvoiceLine, BillingError> {
    if !matches!(input.line_type, LineType::Adjustment | LineType::General) {
        return Err(BillingError::Validation(anyhow::anyhow!(
            "Only adjustment and general lines can be added directly; time and expense lines come from attach"
        )));
    }

    let mut tx = db.pool().begin().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    ensure_draft(&invoice)?;

    let line = sqlx::query_as::<_, InvoiceLine>(
        r#"
        INSERT INTO invoice_lines (line_id, invoice_id, line_type, description,
            quantity, unit_price, line_total)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING line_id, invoice_id, line_type, description, quantity, unit_price, line_total,
            time_entry_id, expense_id, created_utc
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(invoice_id)
    .bind(input.line_type.as_str())
    .bind(&input.description)
    .bind(input.quantity)
    .bind(input.unit_price)
    .bind(input.quantity * input.unit_price)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to add line: {}", e)))?;

    recalculate_totals(&mut tx, invoice_id).await?;

    tx.commit().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    Ok(line)
}

/// Detach one line from a draft invoice: clear both sides of the source
/// item link, revert the item to UNBILLED, delete the line and recompute
/// totals.
#[instrument(skip(db), fields(line_id = %line_id))]
pub async fn detach_item(db: &Database, line_id: Uuid) -> Result<Invoice, BillingError> {
    let mut tx = db.pool().begin().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    let line = sqlx::query_as::<_, InvoiceLine>(
        r#"
        SELECT line_id, invoice_id, line_type, description, quantity, unit_price, line_total,
            time_entry_id, expense_id, created_utc
        FROM invoice_lines
        WHERE line_id = $1
        "#,
    )
    .bind(line_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get line: {}", e)))?
    .ok_or_else(|| BillingError::NotFound(anyhow::anyhow!("Invoice line {} not found", line_id)))?;

    let invoice = lock_invoice(&mut tx, line.invoice_id).await?;
    ensure_draft(&invoice)?;

    // Unset the item side first, then delete the line.
    sqlx::query(
        "UPDATE time_entries SET invoice_line_id = NULL, status = 'unbilled' WHERE invoice_line_id = $1",
    )
    .bind(line_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to unlink time entry: {}", e)))?;

    sqlx::query(
        "UPDATE expenses SET invoice_line_id = NULL, status = 'unbilled' WHERE invoice_line_id = $1",
    )
    .bind(line_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to unlink expense: {}", e)))?;

    sqlx::query("DELETE FROM invoice_lines WHERE line_id = $1")
        .bind(line_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to delete line: {}", e)))?;

    let invoice = recalculate_totals(&mut tx, line.invoice_id).await?;

    tx.commit().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    Ok(invoice)
}

/// Delete a draft invoice: detach every line (items back to UNBILLED with
/// links cleared on both sides), then delete lines and invoice.
#[instrument(skip(db), fields(invoice_id = %invoice_id))]
pub async fn delete_draft(db: &Database, invoice_id: Uuid) -> Result<(), BillingError> {
    let mut tx = db.pool().begin().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    ensure_draft(&invoice)?;

    unbill_source_items(&mut tx, invoice_id, true).await?;

    sqlx::query("DELETE FROM invoices WHERE invoice_id = $1")
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to delete invoice: {}", e)))?;

    tx.commit().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    INVOICE_TRANSITIONS_TOTAL.with_label_values(&["delete"]).inc();

    info!(invoice_id = %invoice_id, "Draft invoice deleted");

    Ok(())
}

// -------------------------------------------------------------------------
// Status Transitions
// -------------------------------------------------------------------------

/// Issue a draft invoice.
///
/// Assigns the next year-scoped number (kept when the invoice was issued
/// before and returned to draft), sets issue/due dates, marks attached
/// source items BILLED and forward-posts Dr AR / Cr Revenue for the total.
#[instrument(skip(db, codes, opts), fields(invoice_id = %invoice_id))]
pub async fn issue_invoice(
    db: &Database,
    codes: &AccountCodes,
    invoice_id: Uuid,
    opts: IssueOptions,
) -> Result<IssueResult, BillingError> {
    let mut tx = db.pool().begin().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    ensure_draft(&invoice)?;

    let line_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM invoice_lines WHERE invoice_id = $1")
            .bind(invoice_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to count lines: {}", e)))?;

    if line_count == 0 && !opts.allow_empty {
        return Err(BillingError::NoLinesAttached { invoice_id });
    }

    let invoice = recalculate_totals(&mut tx, invoice_id).await?;
    if invoice.total < Decimal::ZERO {
        return Err(BillingError::Validation(anyhow::anyhow!(
            "Invoice total cannot be negative"
        )));
    }

    let issue_date = opts.issue_date.unwrap_or_else(|| Utc::now().date_naive());
    let due_date = match opts.due_date {
        Some(d) => d,
        None => {
            let terms: i32 =
                sqlx::query_scalar("SELECT payment_terms_days FROM clients WHERE client_id = $1")
                    .bind(invoice.client_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| {
                        BillingError::Database(anyhow::anyhow!("Failed to get payment terms: {}", e))
                    })?;
            issue_date + Duration::days(terms as i64)
        }
    };

    // A re-issued invoice keeps the number from its first issuance;
    // sequence numbers are never reused.
    let (sequence_year, sequence_number, invoice_number) = match &invoice.invoice_number {
        Some(number) => (invoice.sequence_year, invoice.sequence_number, number.clone()),
        None => {
            let (seq, number) = sequencer::next_number(&mut tx, issue_date.year()).await?;
            (Some(issue_date.year()), Some(seq), number)
        }
    };

    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        r#"
        UPDATE invoices
        SET invoice_number = $2,
            sequence_year = $3,
            sequence_number = $4,
            status = 'issued',
            issue_date = $5,
            due_date = $6,
            issued_utc = NOW()
        WHERE invoice_id = $1
        RETURNING {}
        "#,
        INVOICE_COLUMNS
    ))
    .bind(invoice_id)
    .bind(&invoice_number)
    .bind(sequence_year)
    .bind(sequence_number)
    .bind(issue_date)
    .bind(due_date)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to issue invoice: {}", e)))?;

    sqlx::query(
        r#"
        UPDATE time_entries SET status = 'billed'
        WHERE invoice_line_id IN (SELECT line_id FROM invoice_lines WHERE invoice_id = $1)
        "#,
    )
    .bind(invoice_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to bill time entries: {}", e)))?;

    sqlx::query(
        r#"
        UPDATE expenses SET status = 'billed'
        WHERE invoice_line_id IN (SELECT line_id FROM invoice_lines WHERE invoice_id = $1)
        "#,
    )
    .bind(invoice_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to bill expenses: {}", e)))?;

    // Nothing to post for a zero-value invoice.
    let entry_id = if invoice.total > Decimal::ZERO {
        posting::post_invoice(&mut tx, codes, &invoice, opts.actor.clone()).await?
    } else {
        None
    };

    tx.commit().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    INVOICE_TRANSITIONS_TOTAL.with_label_values(&["issue"]).inc();

    info!(
        invoice_id = %invoice_id,
        invoice_number = %invoice_number,
        total = %invoice.total,
        "Invoice issued"
    );

    Ok(IssueResult { invoice, entry_id })
}

/// Void an issued invoice.
///
/// Reverse-posts the issuance entry and reverts attached source items to
/// UNBILLED with their links cleared, but only when no payments have been
/// applied; invoice lines are preserved as history either way.
#[instrument(skip(db, actor), fields(invoice_id = %invoice_id))]
pub async fn void_invoice(
    db: &Database,
    invoice_id: Uuid,
    actor: Option<String>,
) -> Result<Invoice, BillingError> {
    let mut tx = db.pool().begin().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    ensure_issued(&invoice)?;

    posting::reverse_invoice(&mut tx, &invoice, actor).await?;

    if applied_total(&mut tx, invoice_id).await? == Decimal::ZERO {
        unbill_source_items(&mut tx, invoice_id, true).await?;
    }

    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        r#"
        UPDATE invoices
        SET status = 'void', voided_utc = NOW()
        WHERE invoice_id = $1
        RETURNING {}
        "#,
        INVOICE_COLUMNS
    ))
    .bind(invoice_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to void invoice: {}", e)))?;

    tx.commit().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    INVOICE_TRANSITIONS_TOTAL.with_label_values(&["void"]).inc();

    info!(invoice_id = %invoice_id, "Invoice voided");

    Ok(invoice)
}

/// Return an issued invoice to draft so it can be edited again.
///
/// Refused once any payment has been applied. Reverse-posts the issuance
/// entry; source items revert to UNBILLED but keep their line links, and
/// the invoice keeps its number.
#[instrument(skip(db, actor), fields(invoice_id = %invoice_id))]
pub async fn revert_to_draft(
    db: &Database,
    invoice_id: Uuid,
    actor: Option<String>,
) -> Result<Invoice, BillingError> {
    let mut tx = db.pool().begin().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    ensure_issued(&invoice)?;

    if applied_total(&mut tx, invoice_id).await? > Decimal::ZERO {
        return Err(BillingError::HasPayments { invoice_id });
    }

    if client_has_other_draft(&mut tx, invoice.client_id, Some(invoice_id)).await? {
        return Err(BillingError::DraftAlreadyExists {
            client_id: invoice.client_id,
        });
    }

    posting::reverse_invoice(&mut tx, &invoice, actor).await?;

    unbill_source_items(&mut tx, invoice_id, false).await?;

    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        r#"
        UPDATE invoices
        SET status = 'draft', issued_utc = NULL
        WHERE invoice_id = $1
        RETURNING {}
        "#,
        INVOICE_COLUMNS
    ))
    .bind(invoice_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to revert invoice: {}", e)))?;

    tx.commit().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    INVOICE_TRANSITIONS_TOTAL.with_label_values(&["revert"]).inc();

    info!(invoice_id = %invoice_id, "Invoice returned to draft");

    Ok(invoice)
}
