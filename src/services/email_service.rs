use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::errors::DeliveryError;
use crate::models::otp::OTP_TTL_MINUTES;

/// Outbound email capability. Returns the provider's message id.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<String, DeliveryError>;
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderErrorBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Maps a provider error payload onto a `DeliveryError`. An unverified sending
/// domain is a setup problem and is kept apart from transient failures.
fn classify_provider_error(status: reqwest::StatusCode, body: &str) -> DeliveryError {
    let parsed: ProviderErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .unwrap_or_else(|| format!("provider responded with status {}", status));

    let lowered = message.to_lowercase();
    if lowered.contains("domain") && (lowered.contains("not verified") || lowered.contains("verify")) {
        return DeliveryError::DomainNotVerified(message);
    }

    match parsed.name {
        Some(name) => DeliveryError::Provider(format!("{} ({})", message, name)),
        None => DeliveryError::Provider(message),
    }
}

/// Sends mail through a Resend-compatible HTTP API.
#[derive(Clone)]
pub struct ResendEmailService {
    api_key: String,
    from: String,
    base_url: String,
    client: Client,
}

impl ResendEmailService {
    pub fn new(api_key: String, from: String, base_url: String) -> Self {
        Self {
            api_key,
            from,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl EmailSender for ResendEmailService {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<String, DeliveryError> {
        let url = format!("{}/emails", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": [to],
                "subject": subject,
                "html": html,
            }))
            .send()
            .await
            .map_err(|e| DeliveryError::Provider(format!("Email API error: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DeliveryError::Provider(format!("Email API error: {}", e)))?;

        if !status.is_success() {
            return Err(classify_provider_error(status, &body));
        }

        let sent: SendEmailResponse = serde_json::from_str(&body)
            .map_err(|e| DeliveryError::Provider(format!("Unexpected email API response: {}", e)))?;
        Ok(sent.id)
    }
}

/// Composes verification mail and hands it to the configured sender.
#[derive(Clone)]
pub struct EmailService {
    sender: Arc<dyn EmailSender>,
}

impl EmailService {
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self { sender }
    }

    pub async fn send_verification_code(&self, to: &str, code: &str) -> Result<String, DeliveryError> {
        let html = format!(
            "<div style=\"font-family: sans-serif\">\
             <h2>Verify your email address</h2>\
             <p>Use the following code to finish setting up your account:</p>\
             <p style=\"font-size: 28px; font-weight: bold; letter-spacing: 6px\">{}</p>\
             <p>This code is valid for {} minutes. If you did not request it, you can ignore this email.</p>\
             </div>",
            code, OTP_TTL_MINUTES
        );

        self.sender.send_email(to, "Your verification code", &html).await
    }
}
