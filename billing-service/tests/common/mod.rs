//! Common test utilities for billing-service integration tests.

use billing_service::config::AccountCodes;
use billing_service::models::{
    Client, CreateDraftInvoice, CreateExpense, CreateTimeEntry, Expense, Invoice, ItemRef,
    TimeEntry,
};
use billing_service::services::{ledger, lifecycle, Database};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,billing_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Connect to the test database and run migrations.
pub async fn setup_db() -> Database {
    init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set - use scripts/integ-tests.sh to run tests");

    let db = Database::new(&database_url, 5, 1)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");
    db
}

/// The shipped default account codes, matching the seeded chart.
pub fn test_codes() -> AccountCodes {
    AccountCodes::default()
}

/// Parse a decimal literal.
pub fn dec(s: &str) -> Decimal {
    s.parse().expect("invalid decimal literal")
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("invalid date")
}

/// Create a client with a unique name.
pub async fn create_test_client(db: &Database) -> Client {
    db.create_client(&format!("Test Client {}", Uuid::new_v4()), Some(dec("150.00")), 30)
        .await
        .expect("Failed to create client")
}

/// Create an unbilled time entry for a client.
pub async fn create_test_time_entry(
    db: &Database,
    client_id: Uuid,
    hours: &str,
    rate: &str,
) -> TimeEntry {
    db.create_time_entry(&CreateTimeEntry {
        client_id,
        work_date: date(2025, 3, 10),
        hours: dec(hours),
        billing_rate: dec(rate),
        description: "Consulting work".to_string(),
    })
    .await
    .expect("Failed to create time entry")
}

/// Create an unbilled billable expense for a client.
pub async fn create_test_expense(db: &Database, client_id: Uuid, amount: &str) -> Expense {
    db.create_expense(&CreateExpense {
        client_id,
        expense_date: date(2025, 3, 12),
        amount: dec(amount),
        description: "Travel".to_string(),
        billable: true,
    })
    .await
    .expect("Failed to create expense")
}

/// Create a draft invoice for a client.
pub async fn create_test_draft(db: &Database, client_id: Uuid) -> Invoice {
    lifecycle::create_draft(
        db,
        &CreateDraftInvoice {
            client_id,
            notes: String::new(),
        },
    )
    .await
    .expect("Failed to create draft")
}

/// Create a client with a draft invoice holding one attached time entry.
pub async fn draft_with_time(
    db: &Database,
    hours: &str,
    rate: &str,
) -> (Client, Invoice, TimeEntry) {
    let client = create_test_client(db).await;
    let invoice = create_test_draft(db, client.client_id).await;
    let entry = create_test_time_entry(db, client.client_id, hours, rate).await;

    let result = lifecycle::attach_items(db, invoice.invoice_id, &[ItemRef::time(entry.time_entry_id)])
        .await
        .expect("Failed to attach time entry");

    (client, result.invoice, entry)
}

/// Look up a seeded account id by code.
pub async fn account_id(db: &Database, code: &str) -> Uuid {
    let mut conn = db.pool().acquire().await.expect("Failed to acquire connection");
    ledger::account_by_code(&mut conn, code)
        .await
        .expect("Failed to look up account")
        .unwrap_or_else(|| panic!("account {} not seeded", code))
        .account_id
}

/// Balance of an account signed by its normal side.
pub async fn balance(db: &Database, account_id: Uuid) -> Decimal {
    ledger::account_balance(db.pool(), account_id, None)
        .await
        .expect("Failed to get balance")
        .expect("account missing")
}
