//! Transaction normalizer and status machine.
//!
//! Store events from every source (client verify, ASSN, RTDN) are reduced to
//! a `NormalizedTransaction` carrying absolute field values, so events for
//! the same purchase identity commute to the same final row regardless of
//! arrival order.

use chrono::Utc;

use crate::appstore::TransactionClaims;
use crate::models::{
    NormalizedTransaction, Platform, StoreEnvironment, SubscriptionStatus,
};

/// The status-machine edge an ASSN notification type drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppleTransition {
    /// INITIAL_BUY, SUBSCRIBED: create-or-update, bind token if empty.
    Subscribe,
    /// DID_RENEW, RENEWAL_EXTENDED: refresh expiry and auto-renew.
    Renew,
    /// DID_FAIL_TO_RENEW
    FailToRenew,
    /// DID_CANCEL
    Cancel,
    /// DID_REFUND, REVOKE
    Refund,
    /// EXPIRED, GRACE_PERIOD_EXPIRED
    Expire,
}

impl AppleTransition {
    pub fn target_status(&self) -> SubscriptionStatus {
        match self {
            AppleTransition::Subscribe | AppleTransition::Renew => SubscriptionStatus::Active,
            AppleTransition::FailToRenew => SubscriptionStatus::Failed,
            AppleTransition::Cancel => SubscriptionStatus::Cancelled,
            AppleTransition::Refund => SubscriptionStatus::Refunded,
            AppleTransition::Expire => SubscriptionStatus::Expired,
        }
    }

    /// Only a subscribe event may create the row; every other event refers
    /// to a subscription the store already told us about.
    pub fn creates(&self) -> bool {
        matches!(self, AppleTransition::Subscribe)
    }

    pub fn clears_auto_renew(&self) -> bool {
        matches!(
            self,
            AppleTransition::FailToRenew
                | AppleTransition::Cancel
                | AppleTransition::Refund
                | AppleTransition::Expire
        )
    }
}

/// Map an ASSN `notificationType` to its transition. Unknown types are
/// no-ops for the caller to log and acknowledge.
pub fn apple_transition(notification_type: &str) -> Option<AppleTransition> {
    match notification_type {
        "INITIAL_BUY" | "SUBSCRIBED" => Some(AppleTransition::Subscribe),
        "DID_RENEW" | "RENEWAL_EXTENDED" => Some(AppleTransition::Renew),
        "DID_FAIL_TO_RENEW" => Some(AppleTransition::FailToRenew),
        "DID_CANCEL" => Some(AppleTransition::Cancel),
        "DID_REFUND" | "REVOKE" => Some(AppleTransition::Refund),
        "EXPIRED" | "GRACE_PERIOD_EXPIRED" => Some(AppleTransition::Expire),
        _ => None,
    }
}

/// Build the absolute projection of an ASSN event.
pub fn normalize_apple_event(
    transition: AppleTransition,
    claims: &TransactionClaims,
    plan: String,
    app_account_token: String,
    environment: StoreEnvironment,
) -> NormalizedTransaction {
    let auto_renew = if transition.clears_auto_renew() {
        false
    } else {
        claims.auto_renew_status == 1
    };

    NormalizedTransaction {
        app_account_token,
        platform: Platform::Ios,
        plan,
        status: transition.target_status(),
        start_date: claims.purchase_date_ms / 1000,
        end_date: claims.expires_date_ms / 1000,
        product_id: claims.product_id.clone(),
        transaction_id: claims.transaction_id.clone(),
        original_transaction_id: claims.original_transaction_id.clone(),
        environment,
        purchase_date: claims.purchase_date_ms / 1000,
        expires_date: claims.expires_date_ms / 1000,
        auto_renew,
        // Webhook events carry no receipt; leave the stored one untouched.
        latest_receipt: String::new(),
        latest_receipt_info: String::new(),
    }
}

/// Status of a transaction fetched from the App Store Server API: billing
/// retry and grace period flags win, otherwise liveness comes from the
/// expiry.
pub fn derive_verified_status(claims: &TransactionClaims) -> SubscriptionStatus {
    if claims.is_in_grace_period {
        return SubscriptionStatus::GracePeriod;
    }
    if claims.is_in_billing_retry {
        return SubscriptionStatus::BillingRetry;
    }
    if claims.expires_date_ms / 1000 > Utc::now().timestamp() {
        SubscriptionStatus::Active
    } else {
        SubscriptionStatus::Expired
    }
}
