use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::StoreEnvironment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Subscription,
    NonConsumable,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Subscription => "subscription",
            TransactionKind::NonConsumable => "non_consumable",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription" => Ok(TransactionKind::Subscription),
            "non_consumable" => Ok(TransactionKind::NonConsumable),
            other => Err(format!("unknown transaction kind: {}", other)),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only projection of every processed store event, keyed by
/// `transaction_id`. Answers "does this user have a lifetime purchase?".
#[derive(Debug, Clone, Serialize)]
pub struct StoreTransaction {
    pub id: String,
    pub project_id: String,
    pub app_account_token: String,
    pub transaction_id: String,
    pub original_transaction_id: String,
    pub product_id: String,
    pub kind: TransactionKind,
    pub environment: StoreEnvironment,
    pub purchased_at: i64,
    pub created_at: i64,
}
