use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::PaymentConfig;
use crate::error::{PaymentError, WebhookError};
use crate::model::{PaymentHandle, PaymentStatus};
use crate::webhook::verify_hmac_sha256;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PaymentRequest {
    pub amount: u64,
    pub currency: String,
    pub phone: String,
    pub reference: String,
    pub callback_url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentHandle, PaymentError>;

    async fn payment_status(&self, payment_id: &str) -> Result<PaymentStatus, PaymentError>;
}

#[derive(Debug, Deserialize)]
struct PaymentData {
    payment_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct PaymentApiResponse {
    success: bool,
    data: Option<PaymentData>,
    message: Option<String>,
}

/// Asynchronous status update posted by the provider.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PaymentCallback {
    pub event_id: String,
    pub payment_id: String,
    #[serde(default)]
    pub reference: Option<String>,
    pub status: String,
}

impl PaymentCallback {
    /// Verifies the `X-Signature` header before decoding the body.
    pub fn verify_and_parse(
        secret: &str,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<Self, WebhookError> {
        let signature = signature.ok_or(WebhookError::MissingSignature)?;
        verify_hmac_sha256(secret.as_bytes(), body, signature)?;
        serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))
    }

    pub fn status(&self) -> PaymentStatus {
        PaymentStatus::from_provider(&self.status)
    }
}

/// HTTP client for the mobile-money collection API.
pub struct MobileMoneyClient {
    client: reqwest::Client,
    config: PaymentConfig,
}

impl MobileMoneyClient {
    pub fn new(config: PaymentConfig, timeout: Duration) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    async fn decode(res: reqwest::Response) -> Result<PaymentData, PaymentError> {
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(PaymentError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed = res.json::<PaymentApiResponse>().await?;
        if !parsed.success {
            return Err(PaymentError::InvalidResponse(
                parsed
                    .message
                    .unwrap_or_else(|| "provider reported failure".to_string()),
            ));
        }
        parsed
            .data
            .ok_or_else(|| PaymentError::InvalidResponse("missing data".to_string()))
    }
}

#[async_trait]
impl PaymentGateway for MobileMoneyClient {
    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentHandle, PaymentError> {
        let url = format!("{}/payments", self.config.api_base.trim_end_matches('/'));
        let res = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("x-service", "whatsapp-bot")
            .json(&serde_json::json!({
                "amount": request.amount,
                "currency": request.currency,
                "phone": request.phone.trim_start_matches('+'),
                "reference": request.reference,
                "callback_url": request.callback_url,
                "channel": self.config.channel,
            }))
            .send()
            .await?;

        let data = Self::decode(res).await?;
        log::info!(
            "Payment {} requested for reference {} ({} {})",
            data.payment_id,
            request.reference,
            request.amount,
            request.currency
        );
        Ok(PaymentHandle {
            id: data.payment_id,
            status: PaymentStatus::from_provider(&data.status),
        })
    }

    async fn payment_status(&self, payment_id: &str) -> Result<PaymentStatus, PaymentError> {
        let url = format!(
            "{}/payments/{}/status",
            self.config.api_base.trim_end_matches('/'),
            payment_id
        );
        let res = self
            .client
            .get(&url)
            .header("x-api-key", &self.config.api_key)
            .header("x-service", "whatsapp-bot")
            .send()
            .await?;

        let data = Self::decode(res).await?;
        Ok(PaymentStatus::from_provider(&data.status))
    }
}
