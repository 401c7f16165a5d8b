use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreEnvironment {
    Sandbox,
    Production,
}

impl StoreEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreEnvironment::Sandbox => "sandbox",
            StoreEnvironment::Production => "production",
        }
    }

    /// Apple sends "Production"/"Sandbox"; anything unrecognised is sandbox.
    pub fn parse_lenient(s: &str) -> Self {
        if s.eq_ignore_ascii_case("production") {
            StoreEnvironment::Production
        } else {
            StoreEnvironment::Sandbox
        }
    }
}

impl FromStr for StoreEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sandbox" => Ok(StoreEnvironment::Sandbox),
            "production" => Ok(StoreEnvironment::Production),
            other => Err(format!("unknown environment: {}", other)),
        }
    }
}

impl fmt::Display for StoreEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Failed,
    Cancelled,
    Refunded,
    Expired,
    GracePeriod,
    BillingRetry,
    OnHold,
    Paused,
    Revoked,
    Deferred,
    Inactive,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Failed => "failed",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Refunded => "refunded",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::GracePeriod => "grace_period",
            SubscriptionStatus::BillingRetry => "billing_retry",
            SubscriptionStatus::OnHold => "on_hold",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Revoked => "revoked",
            SubscriptionStatus::Deferred => "deferred",
            SubscriptionStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "failed" => Ok(SubscriptionStatus::Failed),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "refunded" => Ok(SubscriptionStatus::Refunded),
            "expired" => Ok(SubscriptionStatus::Expired),
            "grace_period" => Ok(SubscriptionStatus::GracePeriod),
            "billing_retry" => Ok(SubscriptionStatus::BillingRetry),
            "on_hold" => Ok(SubscriptionStatus::OnHold),
            "paused" => Ok(SubscriptionStatus::Paused),
            "revoked" => Ok(SubscriptionStatus::Revoked),
            "deferred" => Ok(SubscriptionStatus::Deferred),
            "inactive" => Ok(SubscriptionStatus::Inactive),
            other => Err(format!("unknown subscription status: {}", other)),
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable subscription projection. One row per
/// `(project_id, original_transaction_id)`, mutated by every subsequent
/// event for the same original transaction.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: String,
    pub project_id: String,
    /// UUID supplied by the client at purchase time; empty until bound.
    /// Once bound to a non-empty value it is immutable.
    pub app_account_token: String,
    pub platform: Platform,
    pub plan: String,
    pub status: SubscriptionStatus,
    pub start_date: i64,
    pub end_date: i64,
    pub product_id: String,
    pub transaction_id: String,
    pub original_transaction_id: String,
    pub environment: StoreEnvironment,
    pub purchase_date: i64,
    pub expires_date: i64,
    pub auto_renew: bool,
    /// Opaque receipt: iOS base64 receipt / signed transaction, Android
    /// purchase token.
    #[serde(skip_serializing)]
    pub latest_receipt: String,
    /// Raw store response retained for audit.
    #[serde(skip_serializing)]
    pub latest_receipt_info: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Subscription {
    /// Liveness as observed by readers: active status and unexpired.
    pub fn is_live(&self, now: i64) -> bool {
        self.status == SubscriptionStatus::Active && self.expires_date > now
    }
}

/// Absolute field values derived from a single store event, ready to be
/// applied by `upsert_by_original`. Events from different sources commute
/// because every field here is absolute, never a delta.
#[derive(Debug, Clone)]
pub struct NormalizedTransaction {
    pub app_account_token: String,
    pub platform: Platform,
    pub plan: String,
    pub status: SubscriptionStatus,
    pub start_date: i64,
    pub end_date: i64,
    pub product_id: String,
    pub transaction_id: String,
    pub original_transaction_id: String,
    pub environment: StoreEnvironment,
    pub purchase_date: i64,
    pub expires_date: i64,
    pub auto_renew: bool,
    /// Empty means "leave the stored receipt untouched".
    pub latest_receipt: String,
    pub latest_receipt_info: String,
}
