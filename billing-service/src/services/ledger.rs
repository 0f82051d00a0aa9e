//! Ledger store: the only persistence boundary for journal entries.
//!
//! `record` refuses anything that would leave the ledger unbalanced; the
//! schema CHECK constraints back the same invariants so a bug here cannot
//! silently coerce values into the tables.

use crate::error::BillingError;
use crate::models::{Account, CreateAccount, JournalEntry, JournalEntrySpec, JournalLine};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool};
use tracing::{info, instrument};
use uuid::Uuid;

/// Record a complete journal entry inside the caller's transaction.
///
/// All lines persist together or none do. Line input order is preserved as
/// `line_no` for display; it has no bearing on correctness.
#[instrument(skip(conn, spec), fields(document_kind = %spec.document.kind, document_id = %spec.document.id))]
pub async fn record(
    conn: &mut PgConnection,
    spec: &JournalEntrySpec,
) -> Result<Uuid, BillingError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["record_entry"])
        .start_timer();

    if spec.lines.len() < 2 {
        return Err(BillingError::Validation(anyhow::anyhow!(
            "Journal entry must have at least 2 lines"
        )));
    }

    let mut debit_sum = Decimal::ZERO;
    let mut credit_sum = Decimal::ZERO;

    for (i, line) in spec.lines.iter().enumerate() {
        let debit_set = line.debit > Decimal::ZERO;
        let credit_set = line.credit > Decimal::ZERO;
        if line.debit < Decimal::ZERO
            || line.credit < Decimal::ZERO
            || debit_set == credit_set
        {
            return Err(BillingError::InvalidLine { line_no: i });
        }
        debit_sum += line.debit;
        credit_sum += line.credit;
    }

    if debit_sum != credit_sum {
        return Err(BillingError::UnbalancedEntry {
            debits: debit_sum,
            credits: credit_sum,
        });
    }

    let entry_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO journal_entries (entry_id, posted_at, posted_by, description, document_kind, document_id)
        VALUES ($1, COALESCE($2, NOW()), $3, $4, $5, $6)
        "#,
    )
    .bind(entry_id)
    .bind(spec.posted_at)
    .bind(&spec.posted_by)
    .bind(&spec.description)
    .bind(spec.document.kind.as_str())
    .bind(spec.document.id)
    .execute(&mut *conn)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to insert entry: {}", e)))?;

    for (i, line) in spec.lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO journal_lines (line_id, entry_id, account_id, line_no, debit, credit)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry_id)
        .bind(line.account_id)
        .bind(i as i32)
        .bind(line.debit)
        .bind(line.credit)
        .execute(&mut *conn)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to insert line: {}", e)))?;
    }

    timer.observe_duration();

    info!(
        entry_id = %entry_id,
        line_count = spec.lines.len(),
        total_amount = %debit_sum,
        "Journal entry recorded"
    );

    Ok(entry_id)
}

// -------------------------------------------------------------------------
// Account Operations
// -------------------------------------------------------------------------

/// Create a new account. Accounts are created administratively and never
/// deleted, only deactivated.
#[instrument(skip(pool, input), fields(code = %input.code))]
pub async fn create_account(
    pool: &PgPool,
    input: &CreateAccount,
) -> Result<Account, BillingError> {
    let account = sqlx::query_as::<_, Account>(
        r#"
        INSERT INTO accounts (account_id, code, name, account_type)
        VALUES ($1, $2, $3, $4)
        RETURNING account_id, code, name, account_type, is_active, created_utc
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&input.code)
    .bind(&input.name)
    .bind(input.account_type.as_str())
    .fetch_one(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            BillingError::Validation(anyhow::anyhow!(
                "Account with code '{}' already exists",
                input.code
            ))
        }
        _ => BillingError::Database(anyhow::anyhow!("Failed to create account: {}", e)),
    })?;

    info!(account_id = %account.account_id, code = %account.code, "Account created");

    Ok(account)
}

/// Look up the single active account with the given code.
pub async fn account_by_code(
    conn: &mut PgConnection,
    code: &str,
) -> Result<Option<Account>, BillingError> {
    let account = sqlx::query_as::<_, Account>(
        r#"
        SELECT account_id, code, name, account_type, is_active, created_utc
        FROM accounts
        WHERE code = $1 AND is_active = TRUE
        "#,
    )
    .bind(code)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get account: {}", e)))?;

    Ok(account)
}

// -------------------------------------------------------------------------
// Journal Reads
// -------------------------------------------------------------------------

/// Get all entries for a document in recording order.
pub async fn entries_for_document(
    pool: &PgPool,
    document_kind: &str,
    document_id: Uuid,
) -> Result<Vec<JournalEntry>, BillingError> {
    let entries = sqlx::query_as::<_, JournalEntry>(
        r#"
        SELECT entry_id, entry_seq, posted_at, posted_by, description, document_kind, document_id
        FROM journal_entries
        WHERE document_kind = $1 AND document_id = $2
        ORDER BY entry_seq
        "#,
    )
    .bind(document_kind)
    .bind(document_id)
    .fetch_all(pool)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get entries: {}", e)))?;

    Ok(entries)
}

/// Get the lines of an entry in display order.
pub async fn lines_for_entry(
    pool: &PgPool,
    entry_id: Uuid,
) -> Result<Vec<JournalLine>, BillingError> {
    let lines = sqlx::query_as::<_, JournalLine>(
        r#"
        SELECT line_id, entry_id, account_id, line_no, debit, credit
        FROM journal_lines
        WHERE entry_id = $1
        ORDER BY line_no
        "#,
    )
    .bind(entry_id)
    .fetch_all(pool)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get lines: {}", e)))?;

    Ok(lines)
}

/// Get the lines touching an account within a posted-at date range, oldest
/// first. Used by reporting and bank-balance computation outside the core.
#[instrument(skip(pool), fields(account_id = %account_id))]
pub async fn lines_for_account(
    pool: &PgPool,
    account_id: Uuid,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Result<Vec<JournalLine>, BillingError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["lines_for_account"])
        .start_timer();

    let lines = sqlx::query_as::<_, JournalLine>(
        r#"
        SELECT l.line_id, l.entry_id, l.account_id, l.line_no, l.debit, l.credit
        FROM journal_lines l
        JOIN journal_entries e ON e.entry_id = l.entry_id
        WHERE l.account_id = $1
          AND ($2::date IS NULL OR e.posted_at::date >= $2)
          AND ($3::date IS NULL OR e.posted_at::date <= $3)
        ORDER BY e.entry_seq, l.line_no
        "#,
    )
    .bind(account_id)
    .bind(start_date)
    .bind(end_date)
    .fetch_all(pool)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get account lines: {}", e)))?;

    timer.observe_duration();

    Ok(lines)
}

/// Get the balance of an account, signed by its normal balance side
/// (debit-normal accounts read positive when debits exceed credits,
/// credit-normal the other way around). Returns None for an unknown
/// account.
#[instrument(skip(pool), fields(account_id = %account_id))]
pub async fn account_balance(
    pool: &PgPool,
    account_id: Uuid,
    as_of_date: Option<NaiveDate>,
) -> Result<Option<Decimal>, BillingError> {
    let account = sqlx::query_as::<_, Account>(
        r#"
        SELECT account_id, code, name, account_type, is_active, created_utc
        FROM accounts
        WHERE account_id = $1
        "#,
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get account: {}", e)))?;

    let account = match account {
        Some(a) => a,
        None => return Ok(None),
    };

    let raw: Option<Decimal> = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(l.debit - l.credit), 0)
        FROM journal_lines l
        JOIN journal_entries e ON e.entry_id = l.entry_id
        WHERE l.account_id = $1
          AND ($2::date IS NULL OR e.posted_at::date <= $2)
        "#,
    )
    .bind(account_id)
    .bind(as_of_date)
    .fetch_one(pool)
    .await
    .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get balance: {}", e)))?;

    let raw = raw.unwrap_or(Decimal::ZERO);

    let is_debit_normal = account
        .parsed_type()
        .map(|t| t.is_debit_normal())
        .unwrap_or(true);

    Ok(Some(if is_debit_normal { raw } else { -raw }))
}
