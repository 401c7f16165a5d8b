//! App Store Server API client.
//!
//! The modern path authenticates with a short-lived ES256 JWT minted from
//! the project's App Store Connect key and fetches the authoritative signed
//! transaction. The legacy path posts an opaque base64 receipt to
//! verifyReceipt, falling back from production to sandbox on status 21007.

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::AppStoreConfig;
use crate::error::{AppError, Result};
use crate::models::StoreEnvironment;

const SERVER_API_BASE: &str = "https://api.storekit.itunes.apple.com/inApps/v1";
const VERIFY_RECEIPT_PRODUCTION: &str = "https://buy.itunes.apple.com/verifyReceipt";
const VERIFY_RECEIPT_SANDBOX: &str = "https://sandbox.itunes.apple.com/verifyReceipt";

/// Apple status code meaning "this is a sandbox receipt, retry the sandbox
/// endpoint".
const STATUS_SANDBOX_RECEIPT: i64 = 21007;

/// Bearer tokens are valid for at most 20 minutes.
const TOKEN_LIFETIME_SECS: i64 = 20 * 60;

#[derive(Serialize)]
struct ConnectClaims<'a> {
    iss: &'a str,
    iat: i64,
    exp: i64,
    aud: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    bid: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    #[serde(rename = "signedTransactionInfo", default)]
    signed_transaction_info: String,
}

/// Legacy verifyReceipt response. Apple has shipped `latest_receipt_info`
/// both nested under `receipt` and at the top level; accept either.
#[derive(Debug, Default, Deserialize)]
pub struct AppleReceiptResponse {
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub receipt: AppleReceipt,
    #[serde(rename = "latest_receipt", default)]
    pub latest_receipt: String,
    #[serde(rename = "latest_receipt_info", default)]
    pub latest_receipt_info: Vec<AppleLatestReceiptInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppleReceipt {
    #[serde(rename = "bundle_id", default)]
    pub bundle_id: String,
    #[serde(rename = "latest_receipt_info", default)]
    pub latest_receipt_info: Vec<AppleLatestReceiptInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppleLatestReceiptInfo {
    #[serde(rename = "transaction_id", default)]
    pub transaction_id: String,
    #[serde(rename = "original_transaction_id", default)]
    pub original_transaction_id: String,
    #[serde(rename = "product_id", default)]
    pub product_id: String,
    #[serde(rename = "purchase_date_ms", default)]
    pub purchase_date_ms: String,
    #[serde(rename = "expires_date_ms", default)]
    pub expires_date_ms: String,
}

impl AppleReceiptResponse {
    /// The last entry of `latest_receipt_info` is the most recent renewal.
    pub fn latest_entry(&self) -> Option<&AppleLatestReceiptInfo> {
        self.latest_receipt_info
            .last()
            .or_else(|| self.receipt.latest_receipt_info.last())
    }
}

/// Receipt verification result: the parsed response, the raw body kept for
/// audit, and which environment finally accepted the receipt.
pub struct ReceiptVerification {
    pub response: AppleReceiptResponse,
    pub raw_body: String,
    pub environment: StoreEnvironment,
}

pub struct AppStoreClient {
    http: Client,
    config: AppStoreConfig,
}

impl AppStoreClient {
    pub fn new(config: AppStoreConfig, http: Client) -> Self {
        Self { http, config }
    }

    /// Mint the short-lived App Store Connect bearer token. The bundle id
    /// is optional; Apple allows omitting `bid`.
    fn mint_token(&self, bundle_id: Option<&str>) -> Result<String> {
        if !self.config.is_configured() {
            return Err(AppError::Internal(
                "App Store API credentials not configured".to_string(),
            ));
        }
        let pem = self.config.private_key_pem.as_deref().unwrap();

        let now = Utc::now().timestamp();
        let claims = ConnectClaims {
            iss: &self.config.issuer_id,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
            aud: "appstoreconnect-v1",
            bid: bundle_id.filter(|b| !b.is_empty()),
        };

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.config.key_id.clone());

        let key = EncodingKey::from_ec_pem(pem.as_bytes())
            .map_err(|e| AppError::Internal(format!("failed to load App Store key: {}", e)))?;

        encode(&header, &claims, &key)
            .map_err(|e| AppError::Internal(format!("failed to sign bearer token: {}", e)))
    }

    /// Fetch the authoritative signed transaction for a transaction id.
    /// Returns the `signedTransactionInfo` JWS.
    pub async fn fetch_signed_transaction(
        &self,
        transaction_id: &str,
        bundle_id: Option<&str>,
    ) -> Result<String> {
        let token = self.mint_token(bundle_id)?;
        let url = format!("{}/transactions/{}", SERVER_API_BASE, transaction_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AppError::Upstream(format!(
                "App Store Server API returned status {}: {}",
                status, body
            )));
        }

        let parsed: TransactionResponse = serde_json::from_str(&body)
            .map_err(|e| AppError::Upstream(format!("invalid transaction response: {}", e)))?;
        if parsed.signed_transaction_info.is_empty() {
            return Err(AppError::Upstream(
                "transaction response carried no signedTransactionInfo".to_string(),
            ));
        }

        Ok(parsed.signed_transaction_info)
    }

    /// Legacy receipt verification: production first, sandbox on 21007.
    pub async fn verify_receipt(&self, receipt_data: &str) -> Result<ReceiptVerification> {
        let production = self
            .verify_receipt_against(VERIFY_RECEIPT_PRODUCTION, receipt_data)
            .await?;

        if production.0.status == STATUS_SANDBOX_RECEIPT {
            tracing::info!("Receipt is from sandbox, retrying with sandbox endpoint");
            let sandbox = self
                .verify_receipt_against(VERIFY_RECEIPT_SANDBOX, receipt_data)
                .await?;
            return check_receipt_status(sandbox, StoreEnvironment::Sandbox);
        }

        check_receipt_status(production, StoreEnvironment::Production)
    }

    async fn verify_receipt_against(
        &self,
        url: &str,
        receipt_data: &str,
    ) -> Result<(AppleReceiptResponse, String)> {
        let mut request_body = serde_json::json!({ "receipt-data": receipt_data });
        if !self.config.shared_secret.is_empty() {
            request_body["password"] = serde_json::Value::String(self.config.shared_secret.clone());
        }

        let response = self.http.post(url).json(&request_body).send().await?;
        let body = response.text().await?;

        let parsed: AppleReceiptResponse = serde_json::from_str(&body)
            .map_err(|e| AppError::Upstream(format!("invalid verifyReceipt response: {}", e)))?;

        Ok((parsed, body))
    }
}

fn check_receipt_status(
    (response, raw_body): (AppleReceiptResponse, String),
    environment: StoreEnvironment,
) -> Result<ReceiptVerification> {
    if response.status != 0 {
        return Err(AppError::Upstream(format!(
            "Apple verification failed with status: {}",
            response.status
        )));
    }
    Ok(ReceiptVerification {
        response,
        raw_body,
        environment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_client_cannot_mint_tokens() {
        let client = AppStoreClient::new(AppStoreConfig::default(), Client::new());
        assert!(client.mint_token(None).is_err());
    }

    #[test]
    fn latest_entry_prefers_top_level_list() {
        let response: AppleReceiptResponse = serde_json::from_str(
            r#"{
                "status": 0,
                "environment": "Production",
                "receipt": {
                    "bundle_id": "com.example.app",
                    "latest_receipt_info": [{"transaction_id": "nested"}]
                },
                "latest_receipt_info": [
                    {"transaction_id": "old"},
                    {"transaction_id": "newest"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(response.latest_entry().unwrap().transaction_id, "newest");
    }

    #[test]
    fn latest_entry_falls_back_to_nested_list() {
        let response: AppleReceiptResponse = serde_json::from_str(
            r#"{
                "status": 0,
                "receipt": {
                    "latest_receipt_info": [{"transaction_id": "nested"}]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(response.latest_entry().unwrap().transaction_id, "nested");
    }
}
