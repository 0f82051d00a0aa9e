//! Domain error taxonomy for the posting and lifecycle engine.
//!
//! Every variant is reported synchronously and implies the enclosing
//! transaction rolled back with no partial state change.

use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::RejectedItem;

#[derive(Debug, Error)]
pub enum BillingError {
    // -- Validation errors --------------------------------------------------
    #[error("Unbalanced entry: debits ({debits}) != credits ({credits})")]
    UnbalancedEntry { debits: Decimal, credits: Decimal },

    #[error("Invalid journal line {line_no}: exactly one of debit/credit must be non-zero")]
    InvalidLine { line_no: usize },

    #[error("Items not eligible for attachment: {}", format_rejected(.rejected))]
    ItemNotEligible { rejected: Vec<RejectedItem> },

    #[error("Over-allocation: requested {requested} exceeds available {available}")]
    OverAllocation { requested: Decimal, available: Decimal },

    #[error("Invoice {invoice_id} does not belong to the payment's client")]
    ClientMismatch { invoice_id: Uuid },

    #[error("Validation error: {0}")]
    Validation(anyhow::Error),

    // -- State errors -------------------------------------------------------
    #[error("Invoice {invoice_id} is {status}, not draft")]
    InvoiceNotDraft { invoice_id: Uuid, status: String },

    #[error("Invoice {invoice_id} is {status}, not issued")]
    InvoiceNotIssued { invoice_id: Uuid, status: String },

    #[error("Invoice {invoice_id} has payments applied")]
    HasPayments { invoice_id: Uuid },

    #[error("Invoice {invoice_id} has no lines attached")]
    NoLinesAttached { invoice_id: Uuid },

    #[error("Client {client_id} already has a draft invoice")]
    DraftAlreadyExists { client_id: Uuid },

    // -- Configuration errors -----------------------------------------------
    #[error("No active account configured for code '{code}'")]
    AccountNotConfigured { code: String },

    // -- Infrastructure -----------------------------------------------------
    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Database error: {0}")]
    Database(anyhow::Error),

    #[error(transparent)]
    Infra(#[from] AppError),
}

fn format_rejected(rejected: &[RejectedItem]) -> String {
    rejected
        .iter()
        .map(|r| format!("{} ({})", r.item, r.reason))
        .collect::<Vec<_>>()
        .join(", ")
}
