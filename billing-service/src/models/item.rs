//! Clients and billable source items (time entries and expenses).
//!
//! These records are owned by the billing workflow outside the core; the
//! lifecycle controller only reads them for eligibility and rate snapshots
//! and mutates their `status` and `invoice_line_id` fields.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Billing status of a source item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillableStatus {
    Unbilled,
    Billed,
    WrittenOff,
}

impl BillableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillableStatus::Unbilled => "unbilled",
            BillableStatus::Billed => "billed",
            BillableStatus::WrittenOff => "written_off",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Client {
    pub client_id: Uuid,
    pub name: String,
    pub default_hourly_rate: Option<Decimal>,
    pub payment_terms_days: i32,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TimeEntry {
    pub time_entry_id: Uuid,
    pub client_id: Uuid,
    pub work_date: NaiveDate,
    pub hours: Decimal,
    pub billing_rate: Decimal,
    pub description: String,
    pub status: String,
    pub invoice_line_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Expense {
    pub expense_id: Uuid,
    pub client_id: Uuid,
    pub expense_date: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    pub billable: bool,
    pub status: String,
    pub invoice_line_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

/// Kind of billable item referenced in an attach request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Time,
    Expense,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Time => "time",
            ItemKind::Expense => "expense",
        }
    }
}

/// Reference to a billable item in an attach request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub kind: ItemKind,
    pub id: Uuid,
}

impl ItemRef {
    pub fn time(id: Uuid) -> Self {
        Self { kind: ItemKind::Time, id }
    }

    pub fn expense(id: Uuid) -> Self {
        Self { kind: ItemKind::Expense, id }
    }
}

impl std::fmt::Display for ItemRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.id)
    }
}

/// An item rejected by an attach request, with the reason it was refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedItem {
    pub item: ItemRef,
    pub reason: String,
}

/// Input for creating a time entry (test and import tooling surface).
#[derive(Debug, Clone)]
pub struct CreateTimeEntry {
    pub client_id: Uuid,
    pub work_date: NaiveDate,
    pub hours: Decimal,
    pub billing_rate: Decimal,
    pub description: String,
}

/// Input for creating an expense.
#[derive(Debug, Clone)]
pub struct CreateExpense {
    pub client_id: Uuid,
    pub expense_date: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    pub billable: bool,
}
