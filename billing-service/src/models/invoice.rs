//! Invoice and invoice-line models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Paid,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Void => "void",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "issued" => InvoiceStatus::Issued,
            "paid" => InvoiceStatus::Paid,
            "void" => InvoiceStatus::Void,
            _ => InvoiceStatus::Draft,
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Invoice line type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    Time,
    Expense,
    Adjustment,
    General,
}

impl LineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineType::Time => "time",
            LineType::Expense => "expense",
            LineType::Adjustment => "adjustment",
            LineType::General => "general",
        }
    }
}

/// Invoice document. The number and sequence fields stay NULL until
/// issuance assigns them; cached totals are recomputed whenever the line
/// set changes.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub client_id: Uuid,
    pub invoice_number: Option<String>,
    pub sequence_year: Option<i32>,
    pub sequence_number: Option<i32>,
    pub status: String,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: String,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub created_utc: DateTime<Utc>,
    pub issued_utc: Option<DateTime<Utc>>,
    pub voided_utc: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn parsed_status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }
}

/// Single invoice line. `line_total` is always quantity * unit_price,
/// recomputed on every write. TIME/EXPENSE lines carry the source-item
/// side of the bidirectional link.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub line_id: Uuid,
    pub invoice_id: Uuid,
    pub line_type: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub time_entry_id: Option<Uuid>,
    pub expense_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a draft invoice.
#[derive(Debug, Clone)]
pub struct CreateDraftInvoice {
    pub client_id: Uuid,
    pub notes: String,
}

/// Input for a free-form (adjustment/general) line on a draft.
#[derive(Debug, Clone)]
pub struct CreateLine {
    pub line_type: LineType,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

/// Options for issuing a draft.
#[derive(Debug, Clone, Default)]
pub struct IssueOptions {
    /// Defaults to today.
    pub issue_date: Option<NaiveDate>,
    /// Defaults to issue_date + the client's payment terms.
    pub due_date: Option<NaiveDate>,
    /// Explicit confirmation for issuing a zero-line invoice.
    pub allow_empty: bool,
    pub actor: Option<String>,
}

/// Result of issuing an invoice.
#[derive(Debug, Clone)]
pub struct IssueResult {
    pub invoice: Invoice,
    /// None when the invoice total was zero and nothing was posted.
    pub entry_id: Option<Uuid>,
}

/// Result of attaching a batch of billable items.
#[derive(Debug, Clone)]
pub struct AttachResult {
    pub attached: usize,
    pub invoice: Invoice,
}
