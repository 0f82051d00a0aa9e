//! Payment and payment-application models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How a payment was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Check,
    Ach,
    Cash,
    Card,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Check => "check",
            PaymentMethod::Ach => "ach",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Other => "other",
        }
    }
}

/// A payment received from a client. `unapplied_amount` starts equal to
/// `amount` and decreases as allocations are made; it never goes negative,
/// and applications + unapplied always sum back to `amount`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub client_id: Uuid,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub method: String,
    pub memo: String,
    pub unapplied_amount: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Portion of one payment allocated to one invoice.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentApplication {
    pub application_id: Uuid,
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Input for recording a received payment.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    pub client_id: Uuid,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub memo: String,
    pub actor: Option<String>,
}

/// One (invoice, amount) target of an allocation request.
#[derive(Debug, Clone, Copy)]
pub struct AllocationTarget {
    pub invoice_id: Uuid,
    pub amount: Decimal,
}
