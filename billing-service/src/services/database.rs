//! Database service for billing-service.
//!
//! Pool wrapper plus row-level operations on the collaborator records
//! (clients, time entries, expenses) and plain reads of invoices and
//! payments. All lifecycle and posting writes go through the service
//! modules, which run inside a single transaction per operation.

use crate::error::BillingError;
use crate::models::{
    Client, CreateExpense, CreateTimeEntry, Expense, Invoice, InvoiceLine, Payment,
    PaymentApplication, TimeEntry,
};
use crate::services::metrics::DB_QUERY_DURATION;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, BillingError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), BillingError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| BillingError::Database(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), BillingError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| BillingError::Database(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Client Operations
    // -------------------------------------------------------------------------

    /// Create a new client.
    #[instrument(skip(self), fields(name = %name))]
    pub async fn create_client(
        &self,
        name: &str,
        default_hourly_rate: Option<Decimal>,
        payment_terms_days: i32,
    ) -> Result<Client, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_client"])
            .start_timer();

        let client = sqlx::query_as::<_, Client>(
            r#"
            INSERT INTO clients (client_id, name, default_hourly_rate, payment_terms_days)
            VALUES ($1, $2, $3, $4)
            RETURNING client_id, name, default_hourly_rate, payment_terms_days, is_active, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(default_hourly_rate)
        .bind(payment_terms_days)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                BillingError::Validation(anyhow::anyhow!("Client '{}' already exists", name))
            }
            _ => BillingError::Database(anyhow::anyhow!("Failed to create client: {}", e)),
        })?;

        timer.observe_duration();

        info!(client_id = %client.client_id, "Client created");

        Ok(client)
    }

    /// Get a client by ID.
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, BillingError> {
        let client = sqlx::query_as::<_, Client>(
            r#"
            SELECT client_id, name, default_hourly_rate, payment_terms_days, is_active, created_utc
            FROM clients
            WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get client: {}", e)))?;

        Ok(client)
    }

    // -------------------------------------------------------------------------
    // Billable Item Operations
    // -------------------------------------------------------------------------

    /// Create a new unbilled time entry.
    #[instrument(skip(self, input), fields(client_id = %input.client_id))]
    pub async fn create_time_entry(
        &self,
        input: &CreateTimeEntry,
    ) -> Result<TimeEntry, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_time_entry"])
            .start_timer();

        let entry = sqlx::query_as::<_, TimeEntry>(
            r#"
            INSERT INTO time_entries (time_entry_id, client_id, work_date, hours, billing_rate, description)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING time_entry_id, client_id, work_date, hours, billing_rate, description,
                status, invoice_line_id, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.client_id)
        .bind(input.work_date)
        .bind(input.hours)
        .bind(input.billing_rate)
        .bind(&input.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to create time entry: {}", e)))?;

        timer.observe_duration();

        Ok(entry)
    }

    /// Get a time entry by ID.
    #[instrument(skip(self), fields(time_entry_id = %time_entry_id))]
    pub async fn get_time_entry(
        &self,
        time_entry_id: Uuid,
    ) -> Result<Option<TimeEntry>, BillingError> {
        let entry = sqlx::query_as::<_, TimeEntry>(
            r#"
            SELECT time_entry_id, client_id, work_date, hours, billing_rate, description,
                status, invoice_line_id, created_utc
            FROM time_entries
            WHERE time_entry_id = $1
            "#,
        )
        .bind(time_entry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get time entry: {}", e)))?;

        Ok(entry)
    }

    /// Create a new unbilled expense.
    #[instrument(skip(self, input), fields(client_id = %input.client_id))]
    pub async fn create_expense(&self, input: &CreateExpense) -> Result<Expense, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_expense"])
            .start_timer();

        let expense = sqlx::query_as::<_, Expense>(
            r#"
            INSERT INTO expenses (expense_id, client_id, expense_date, amount, description, billable)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING expense_id, client_id, expense_date, amount, description, billable,
                status, invoice_line_id, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.client_id)
        .bind(input.expense_date)
        .bind(input.amount)
        .bind(&input.description)
        .bind(input.billable)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to create expense: {}", e)))?;

        timer.observe_duration();

        Ok(expense)
    }

    /// Get an expense by ID.
    #[instrument(skip(self), fields(expense_id = %expense_id))]
    pub async fn get_expense(&self, expense_id: Uuid) -> Result<Option<Expense>, BillingError> {
        let expense = sqlx::query_as::<_, Expense>(
            r#"
            SELECT expense_id, client_id, expense_date, amount, description, billable,
                status, invoice_line_id, created_utc
            FROM expenses
            WHERE expense_id = $1
            "#,
        )
        .bind(expense_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get expense: {}", e)))?;

        Ok(expense)
    }

    // -------------------------------------------------------------------------
    // Invoice Reads
    // -------------------------------------------------------------------------

    /// Get an invoice by ID.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, client_id, invoice_number, sequence_year, sequence_number, status,
                issue_date, due_date, notes, subtotal, tax_amount, total,
                created_utc, issued_utc, voided_utc
            FROM invoices
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Get the lines of an invoice in display order.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice_lines(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceLine>, BillingError> {
        let lines = sqlx::query_as::<_, InvoiceLine>(
            r#"
            SELECT line_id, invoice_id, line_type, description, quantity, unit_price, line_total,
                time_entry_id, expense_id, created_utc
            FROM invoice_lines
            WHERE invoice_id = $1
            ORDER BY created_utc, line_id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get invoice lines: {}", e)))?;

        Ok(lines)
    }

    // -------------------------------------------------------------------------
    // Payment Reads
    // -------------------------------------------------------------------------

    /// Get a payment by ID.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, BillingError> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, client_id, date, amount, method, memo, unapplied_amount, created_utc
            FROM payments
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        Ok(payment)
    }

    /// Get the applications of a payment, oldest first.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn applications_for_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<Vec<PaymentApplication>, BillingError> {
        let applications = sqlx::query_as::<_, PaymentApplication>(
            r#"
            SELECT application_id, payment_id, invoice_id, amount, created_utc
            FROM payment_applications
            WHERE payment_id = $1
            ORDER BY created_utc, application_id
            "#,
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to get applications: {}", e)))?;

        Ok(applications)
    }
}
