//! Payment allocator.
//!
//! Distributes a received payment across invoices, tracks the unapplied
//! remainder, and triggers the single payment journal entry. Allocation is
//! atomic: either every requested target applies or none do.

use crate::config::AccountCodes;
use crate::error::BillingError;
use crate::models::{AllocationTarget, Invoice, InvoiceStatus, Payment, RecordPayment};
use crate::services::metrics::{ALLOCATIONS_TOTAL, PAYMENTS_TOTAL};
use crate::services::{posting, Database};
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use tracing::{info, instrument};
use uuid::Uuid;

const PAYMENT_COLUMNS: &str =
    "payment_id, client_id, date, amount, method, memo, unapplied_amount, created_utc";

/// Record a received payment and post it to the ledger, optionally
/// allocating it to invoices in the same transaction. The journal entry is
/// written once for the whole payment: Dr Cash for the full amount, Cr AR
/// for the applied sum, Cr Unapplied Payments for the remainder.
#[instrument(skip(db, codes, input, targets), fields(client_id = %input.client_id, amount = %input.amount))]
pub async fn record_payment(
    db: &Database,
    codes: &AccountCodes,
    input: &RecordPayment,
    targets: &[AllocationTarget],
) -> Result<Payment, BillingError> {
    if input.amount <= Decimal::ZERO {
        return Err(BillingError::Validation(anyhow::anyhow!(
            "Payment amount must be positive"
        )));
    }

    let client = db
        .get_client(input.client_id)
        .await?
        .ok_or_else(|| BillingError::NotFound(anyhow::anyhow!("Client {} not found", input.client_id)))?;

    let mut tx = db.pool().begin().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    let mut payment = sqlx::query_as::<_, Payment>(&format!(
        r#"
        INSERT INTO payments (payment_id, client_id, date, amount, method, memo, unapplied_amount)
        VALUES ($1, $2, $3, $4, $5, $6, $4)
        RETURNING {}
        "#,
        PAYMENT_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(input.client_id)
    .bind(input.date)
    .bind(input.amount)
    .bind(input.method.as_str())
    .bind(&input.memo)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to insert payment: {}", e)))?;

    if !targets.is_empty() {
        payment = apply_targets(&mut tx, payment, targets).await?;
    }

    posting::post_payment(&mut tx, codes, &payment, &client.name, input.actor.clone()).await?;

    tx.commit().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    PAYMENTS_TOTAL.with_label_values(&[payment.method.as_str()]).inc();

    info!(
        payment_id = %payment.payment_id,
        amount = %payment.amount,
        unapplied = %payment.unapplied_amount,
        "Payment recorded"
    );

    Ok(payment)
}

/// Allocate an existing payment's unapplied balance across invoices.
///
/// Validates every target before applying any: amounts must be positive,
/// each invoice must belong to the payment's client and be issued, the
/// requested total must fit within the unapplied balance and each amount
/// within that invoice's outstanding balance. Invoices whose applications
/// now cover their total flip to PAID. The posting engine is invoked once
/// for the whole payment afterwards; its parity check makes that a no-op
/// for a payment already posted at receipt.
#[instrument(skip(db, codes, targets), fields(payment_id = %payment_id, target_count = targets.len()))]
pub async fn allocate_payment(
    db: &Database,
    codes: &AccountCodes,
    payment_id: Uuid,
    targets: &[AllocationTarget],
) -> Result<Payment, BillingError> {
    let mut tx = db.pool().begin().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    let payment = sqlx::query_as::<_, Payment>(&format!(
        "SELECT {} FROM payments WHERE payment_id = $1 FOR UPDATE",
        PAYMENT_COLUMNS
    ))
    .bind(payment_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to lock payment: {}", e)))?
    .ok_or_else(|| BillingError::NotFound(anyhow::anyhow!("Payment {} not found", payment_id)))?;

    let client_name: String =
        sqlx::query_scalar("SELECT name FROM clients WHERE client_id = $1")
            .bind(payment.client_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get client: {}", e)))?;

    let payment = apply_targets(&mut tx, payment, targets).await?;

    posting::post_payment(&mut tx, codes, &payment, &client_name, None).await?;

    tx.commit().await.map_err(|e| {
        BillingError::Database(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    info!(
        payment_id = %payment_id,
        unapplied = %payment.unapplied_amount,
        "Payment allocated"
    );

    Ok(payment)
}

/// Apply allocation targets to a locked payment row. Validation happens
/// for the whole batch before the first write; an error here rolls the
/// enclosing transaction back with zero new applications.
async fn apply_targets(
    conn: &mut PgConnection,
    payment: Payment,
    targets: &[AllocationTarget],
) -> Result<Payment, BillingError> {
    let mut requested = Decimal::ZERO;
    for target in targets {
        if target.amount <= Decimal::ZERO {
            ALLOCATIONS_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(BillingError::Validation(anyhow::anyhow!(
                "Allocation amount must be positive"
            )));
        }
        requested += target.amount;
    }

    if requested > payment.unapplied_amount {
        ALLOCATIONS_TOTAL.with_label_values(&["rejected"]).inc();
        return Err(BillingError::OverAllocation {
            requested,
            available: payment.unapplied_amount,
        });
    }

    // Lock and validate every target invoice before creating anything.
    // `pending` accounts for earlier targets of this batch hitting the
    // same invoice.
    let mut pending: std::collections::HashMap<Uuid, Decimal> = std::collections::HashMap::new();
    let mut invoices: Vec<Invoice> = Vec::with_capacity(targets.len());
    for target in targets {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, client_id, invoice_number, sequence_year, sequence_number, status,
                issue_date, due_date, notes, subtotal, tax_amount, total,
                created_utc, issued_utc, voided_utc
            FROM invoices
            WHERE invoice_id = $1
            FOR UPDATE
            "#,
        )
        .bind(target.invoice_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to lock invoice: {}", e)))?
        .ok_or_else(|| {
            BillingError::NotFound(anyhow::anyhow!("Invoice {} not found", target.invoice_id))
        })?;

        if invoice.client_id != payment.client_id {
            ALLOCATIONS_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(BillingError::ClientMismatch {
                invoice_id: invoice.invoice_id,
            });
        }
        if invoice.parsed_status() != InvoiceStatus::Issued {
            ALLOCATIONS_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(BillingError::Validation(anyhow::anyhow!(
                "Invoice {} is {}, only issued invoices can receive payments",
                invoice.invoice_id,
                invoice.status
            )));
        }

        let already_pending = pending.get(&invoice.invoice_id).copied().unwrap_or(Decimal::ZERO);
        let outstanding = outstanding_balance(conn, &invoice).await? - already_pending;
        if target.amount > outstanding {
            ALLOCATIONS_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(BillingError::OverAllocation {
                requested: target.amount,
                available: outstanding,
            });
        }

        pending.insert(invoice.invoice_id, already_pending + target.amount);
        invoices.push(invoice);
    }

    let mut unapplied = payment.unapplied_amount;
    for (target, invoice) in targets.iter().zip(&invoices) {
        sqlx::query(
            r#"
            INSERT INTO payment_applications (application_id, payment_id, invoice_id, amount)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(payment.payment_id)
        .bind(target.invoice_id)
        .bind(target.amount)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            BillingError::Database(anyhow::anyhow!("Failed to create application: {}", e))
        })?;

        unapplied -= target.amount;

        // PAID is set here, never by a direct user action.
        let applied = applied_to_invoice(conn, invoice.invoice_id).await?;
        if applied >= invoice.total {
            sqlx::query("UPDATE invoices SET status = 'paid' WHERE invoice_id = $1")
                .bind(invoice.invoice_id)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    BillingError::Database(anyhow::anyhow!("Failed to mark invoice paid: {}", e))
                })?;
        }

        ALLOCATIONS_TOTAL.with_label_values(&["applied"]).inc();
    }

    let payment = sqlx::query_as::<_, Payment>(&format!(
        r#"
        UPDATE payments
        SET unapplied_amount = $2
        WHERE payment_id = $1
        RETURNING {}
        "#,
        PAYMENT_COLUMNS
    ))
    .bind(payment.payment_id)
    .bind(unapplied)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to update payment: {}", e)))?;

    Ok(payment)
}

/// Sum of applications against an invoice.
async fn applied_to_invoice(
    conn: &mut PgConnection,
    invoice_id: Uuid,
) -> Result<Decimal, BillingError> {
    let total: Option<Decimal> = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM payment_applications WHERE invoice_id = $1",
    )
    .bind(invoice_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to sum applications: {}", e)))?;

    Ok(total.unwrap_or(Decimal::ZERO))
}

/// Outstanding balance of an invoice: total minus applied payments.
pub async fn outstanding_balance(
    conn: &mut PgConnection,
    invoice: &Invoice,
) -> Result<Decimal, BillingError> {
    Ok(invoice.total - applied_to_invoice(conn, invoice.invoice_id).await?)
}
