//! Chart-of-accounts model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Account types following standard accounting categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl AccountType {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::Liability => "liability",
            Self::Equity => "equity",
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "asset" => Some(Self::Asset),
            "liability" => Some(Self::Liability),
            "equity" => Some(Self::Equity),
            "income" => Some(Self::Income),
            "expense" => Some(Self::Expense),
            _ => None,
        }
    }

    /// Side an account of this type normally carries its balance on.
    /// A display and reporting convention only; individual postings are
    /// never validated against it.
    pub fn is_debit_normal(&self) -> bool {
        matches!(self, Self::Asset | Self::Expense)
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ledger account.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: String,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

impl Account {
    /// Get parsed account type.
    pub fn parsed_type(&self) -> Option<AccountType> {
        AccountType::from_str(&self.account_type)
    }
}

/// Input for creating a new account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccount {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
}
