//! External mail gateway interface.
//!
//! E-mail composition and the verification-code endpoints live outside this
//! service; this module defines the gateway contract they depend on, with
//! the Brevo transactional API as the shipped implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::error::{AppError, Result};

const BREVO_API_URL: &str = "https://api.brevo.com/v3/smtp/email";

#[async_trait]
pub trait MailGateway: Send + Sync {
    /// Send a message on behalf of a project's configured sender.
    async fn send(&self, from_name: &str, to: &str, subject: &str, body: &str) -> Result<()>;
}

#[derive(Serialize)]
struct BrevoSender<'a> {
    name: &'a str,
    email: &'a str,
}

#[derive(Serialize)]
struct BrevoRecipient<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct BrevoEmail<'a> {
    sender: BrevoSender<'a>,
    to: Vec<BrevoRecipient<'a>>,
    subject: &'a str,
    #[serde(rename = "textContent")]
    text_content: &'a str,
}

pub struct BrevoMailer {
    http: Client,
    api_key: String,
    from_email: String,
}

impl BrevoMailer {
    pub fn new(http: Client, api_key: String, from_email: String) -> Self {
        Self {
            http,
            api_key,
            from_email,
        }
    }
}

#[async_trait]
impl MailGateway for BrevoMailer {
    async fn send(&self, from_name: &str, to: &str, subject: &str, body: &str) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(AppError::Internal("mail gateway not configured".to_string()));
        }

        let email = BrevoEmail {
            sender: BrevoSender {
                name: from_name,
                email: &self.from_email,
            },
            to: vec![BrevoRecipient { email: to }],
            subject,
            text_content: body,
        };

        let response = self
            .http
            .post(BREVO_API_URL)
            .header("api-key", &self.api_key)
            .json(&email)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Internal(format!(
                "mail gateway error: status {}",
                status
            )));
        }

        Ok(())
    }
}
