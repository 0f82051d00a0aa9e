//! Bootstrap entry point: load configuration, connect, run migrations and
//! verify the chart of accounts. The serving surfaces (CRUD views, import
//! commands, mobile endpoints) live outside this crate and call into the
//! service modules directly.

use billing_service::config::BillingConfig;
use billing_service::services::{init_metrics, posting, Database};
use service_core::observability::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BillingConfig::load()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    init_metrics();

    let db = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await?;

    db.run_migrations().await?;
    db.health_check().await?;

    // Fail fast on a misconfigured chart instead of at first posting.
    let mut conn = db.pool().acquire().await?;
    for code in [
        &config.accounts.accounts_receivable,
        &config.accounts.revenue,
        &config.accounts.cash,
        &config.accounts.unapplied_payments,
    ] {
        posting::resolve_account(&mut conn, code).await?;
    }

    info!(service = %config.service_name, "billing-service ready");

    Ok(())
}
