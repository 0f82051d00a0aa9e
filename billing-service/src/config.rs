//! Configuration for billing-service.

use serde::Deserialize;
use service_core::error::AppError;

#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub accounts: AccountCodes,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Chart-of-accounts codes the posting engine resolves its fixed mappings
/// against. Codes are configuration; each must resolve to exactly one
/// active account at posting time.
#[derive(Debug, Deserialize, Clone)]
pub struct AccountCodes {
    #[serde(default = "default_accounts_receivable")]
    pub accounts_receivable: String,
    #[serde(default = "default_revenue")]
    pub revenue: String,
    #[serde(default = "default_cash")]
    pub cash: String,
    #[serde(default = "default_unapplied_payments")]
    pub unapplied_payments: String,
}

impl Default for AccountCodes {
    fn default() -> Self {
        Self {
            accounts_receivable: default_accounts_receivable(),
            revenue: default_revenue(),
            cash: default_cash(),
            unapplied_payments: default_unapplied_payments(),
        }
    }
}

impl BillingConfig {
    pub fn load() -> Result<Self, AppError> {
        service_core::config::load("BILLING")
    }
}

fn default_service_name() -> String {
    "billing-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_accounts_receivable() -> String {
    "1100".to_string()
}

fn default_revenue() -> String {
    "4000".to_string()
}

fn default_cash() -> String {
    "1000".to_string()
}

fn default_unapplied_payments() -> String {
    "2200".to_string()
}
