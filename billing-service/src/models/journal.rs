//! Journal entry model for double-entry accounting.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Kind of business document a journal entry originates from.
///
/// Replaces the generic "anything" reference some ledgers use with a tagged
/// pair: one ledger, a closed set of document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Invoice,
    Payment,
}

impl DocumentKind {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Payment => "payment",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference to the business document an entry posts or reverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub kind: DocumentKind,
    pub id: Uuid,
}

impl DocumentRef {
    pub fn invoice(id: Uuid) -> Self {
        Self { kind: DocumentKind::Invoice, id }
    }

    pub fn payment(id: Uuid) -> Self {
        Self { kind: DocumentKind::Payment, id }
    }
}

/// Direction a posting moves a document in.
///
/// Callers state the transition they intend; the engine validates the
/// ledger's entry-count parity against it before writing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingIntent {
    Forward,
    Reverse,
}

/// One atomic financial event. Immutable once created; corrections are new
/// reversing entries, never edits.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JournalEntry {
    pub entry_id: Uuid,
    pub entry_seq: i64,
    pub posted_at: DateTime<Utc>,
    pub posted_by: Option<String>,
    pub description: String,
    pub document_kind: String,
    pub document_id: Uuid,
}

/// Single line of a journal entry. Exactly one of debit/credit is non-zero.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JournalLine {
    pub line_id: Uuid,
    pub entry_id: Uuid,
    pub account_id: Uuid,
    pub line_no: i32,
    pub debit: Decimal,
    pub credit: Decimal,
}

impl JournalLine {
    /// Signed amount: positive for debit, negative for credit.
    pub fn signed_amount(&self) -> Decimal {
        self.debit - self.credit
    }
}

/// Input for a single line in an entry to be recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSpec {
    pub account_id: Uuid,
    pub debit: Decimal,
    pub credit: Decimal,
}

impl LineSpec {
    pub fn debit(account_id: Uuid, amount: Decimal) -> Self {
        Self { account_id, debit: amount, credit: Decimal::ZERO }
    }

    pub fn credit(account_id: Uuid, amount: Decimal) -> Self {
        Self { account_id, debit: Decimal::ZERO, credit: amount }
    }
}

/// Input for recording a complete journal entry.
#[derive(Debug, Clone)]
pub struct JournalEntrySpec {
    pub description: String,
    pub posted_by: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub document: DocumentRef,
    pub lines: Vec<LineSpec>,
}
