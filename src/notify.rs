use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as Engine};
use std::{sync::Arc, time::Duration};
use thiserror::Error;

use crate::channel::MessageChannel;
use crate::config::NotifyConfig;
use crate::model::Booking;
use crate::replies;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification provider returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait NotificationProvider: Send + Sync {
    async fn send_sms(&self, recipient: &str, content: &str) -> Result<(), NotifyError>;

    async fn voice_call(&self, receiver: &str, text: &str) -> Result<(), NotifyError>;
}

/// SMS and text-to-speech provider using basic auth.
pub struct SmsGatewayClient {
    client: reqwest::Client,
    config: NotifyConfig,
}

impl SmsGatewayClient {
    pub fn new(config: NotifyConfig, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    fn auth_header(&self) -> String {
        let encoded = Engine.encode(format!("{}:{}", self.config.api_key, self.config.api_secret));
        format!("Basic {}", encoded)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), NotifyError> {
        let url = format!("{}{}", self.config.api_base.trim_end_matches('/'), path);
        let res = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await?;
        if res.status().is_success() {
            Ok(())
        } else {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            Err(NotifyError::Status { status, body })
        }
    }
}

#[async_trait]
impl NotificationProvider for SmsGatewayClient {
    async fn send_sms(&self, recipient: &str, content: &str) -> Result<(), NotifyError> {
        self.post(
            "/v1/send",
            serde_json::json!({
                "source_addr": self.config.sender_id,
                "encoding": 0,
                "message": content,
                "recipients": [{
                    "recipient_id": 1,
                    "dest_addr": recipient.trim_start_matches('+'),
                }],
            }),
        )
        .await
    }

    async fn voice_call(&self, receiver: &str, text: &str) -> Result<(), NotifyError> {
        self.post(
            "/v1/voice",
            serde_json::json!({
                "receiver": receiver.trim_start_matches('+'),
                "text": text,
            }),
        )
        .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Sent,
    Failed(String),
    Skipped,
}

impl ChannelOutcome {
    fn from_result<E: std::fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => ChannelOutcome::Sent,
            Err(err) => ChannelOutcome::Failed(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationReport {
    pub sms: ChannelOutcome,
    pub voice: ChannelOutcome,
    pub whatsapp: ChannelOutcome,
}

impl NotificationReport {
    pub fn delivered(&self) -> usize {
        [&self.sms, &self.voice, &self.whatsapp]
            .iter()
            .filter(|o| ***o == ChannelOutcome::Sent)
            .count()
    }
}

/// Fans a payment confirmation out to every channel. Channels are
/// independent: one failing does not affect the others.
pub struct Notifier {
    provider: Option<Arc<dyn NotificationProvider>>,
    whatsapp: Arc<dyn MessageChannel>,
    currency: String,
}

impl Notifier {
    pub fn new(
        provider: Option<Arc<dyn NotificationProvider>>,
        whatsapp: Arc<dyn MessageChannel>,
        currency: &str,
    ) -> Self {
        Self {
            provider,
            whatsapp,
            currency: currency.to_string(),
        }
    }

    pub async fn notify_payment_confirmed(&self, booking: &Booking) -> NotificationReport {
        let receipt = replies::receipt_text(booking, &self.currency);
        let voice_text = format!(
            "Hello {}. Your payment for booking {} has been received. Your {} will be ready for pickup on {}. Thank you.",
            booking.customer_name, booking.id, booking.vehicle_name, booking.pickup
        );
        let phone = booking.customer_id.as_str();

        let sms = async {
            match &self.provider {
                Some(provider) => ChannelOutcome::from_result(provider.send_sms(phone, &receipt).await),
                None => ChannelOutcome::Skipped,
            }
        };
        let voice = async {
            match &self.provider {
                Some(provider) => {
                    ChannelOutcome::from_result(provider.voice_call(phone, &voice_text).await)
                }
                None => ChannelOutcome::Skipped,
            }
        };
        let whatsapp = async {
            let outcome = self.whatsapp.send_text(phone, &format!("🧾 {}", receipt)).await;
            if outcome.success {
                ChannelOutcome::Sent
            } else {
                ChannelOutcome::Failed(outcome.error.unwrap_or_default())
            }
        };

        let (sms, voice, whatsapp) = tokio::join!(sms, voice, whatsapp);
        let report = NotificationReport {
            sms,
            voice,
            whatsapp,
        };

        for (channel, outcome) in [
            ("sms", &report.sms),
            ("voice", &report.voice),
            ("whatsapp", &report.whatsapp),
        ] {
            if let ChannelOutcome::Failed(err) = outcome {
                log::warn!(
                    "Payment confirmation via {} failed for booking {}: {}",
                    channel,
                    booking.id,
                    err
                );
            }
        }
        log::info!(
            "Payment confirmation for booking {} delivered on {}/3 channels",
            booking.id,
            report.delivered()
        );
        report
    }
}
