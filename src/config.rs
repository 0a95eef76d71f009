use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagingConfig {
    /// WhatsApp Business Cloud API, JSON over HTTPS with a bearer token.
    Cloud {
        api_base: String,
        access_token: String,
        phone_number_id: String,
    },
    /// Third-party platform relaying WhatsApp as form-encoded webhooks.
    Forwarded {
        account_sid: String,
        auth_token: String,
        whatsapp_number: String,
        api_url: String,
        /// Public URL of `/webhook/forwarded`, part of the platform's signature.
        webhook_url: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfig {
    pub api_base: String,
    pub api_key: String,
    pub webhook_secret: String,
    pub callback_url: String,
    pub channel: String,
    pub account: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyConfig {
    pub api_base: String,
    pub api_key: String,
    pub api_secret: String,
    pub sender_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: String,
    pub messaging: MessagingConfig,
    pub verify_token: String,
    pub app_secret: Option<String>,
    pub payment: PaymentConfig,
    pub notify: Option<NotifyConfig>,
    pub deposit_percent: u64,
    pub session_ttl: Duration,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let messaging = match get("MESSAGING_PROVIDER").as_deref().unwrap_or("cloud") {
            "cloud" => MessagingConfig::Cloud {
                api_base: get("WHATSAPP_API_BASE")
                    .unwrap_or_else(|| "https://graph.facebook.com/v18.0".to_string()),
                access_token: require("WHATSAPP_ACCESS_TOKEN")?,
                phone_number_id: require("WHATSAPP_PHONE_NUMBER_ID")?,
            },
            "forwarded" | "twilio" => MessagingConfig::Forwarded {
                account_sid: require("T_ACCOUNT_SID")?,
                auth_token: require("T_AUTH_TOKEN")?,
                whatsapp_number: require("T_WHATSAPP_NUMBER")?,
                api_url: require("T_API_URL")?,
                webhook_url: get("T_WEBHOOK_URL"),
            },
            other => {
                return Err(ConfigError::Invalid {
                    name: "MESSAGING_PROVIDER",
                    value: other.to_string(),
                });
            }
        };

        let payment = PaymentConfig {
            api_base: require("PAYMENT_API_BASE")?,
            api_key: require("PAYMENT_API_KEY")?,
            webhook_secret: require("PAYMENT_WEBHOOK_SECRET")?,
            callback_url: get("PAYMENT_CALLBACK_URL").unwrap_or_default(),
            channel: get("PAYMENT_CHANNEL").unwrap_or_else(|| "M-Pesa".to_string()),
            account: get("PAYMENT_ACCOUNT").unwrap_or_else(|| "CARRENTAL".to_string()),
            currency: get("CURRENCY").unwrap_or_else(|| "TZS".to_string()),
        };

        let notify = match (get("NOTIFY_API_BASE"), get("NOTIFY_API_KEY")) {
            (Some(api_base), Some(api_key)) => Some(NotifyConfig {
                api_base,
                api_key,
                api_secret: require("NOTIFY_API_SECRET")?,
                sender_id: get("NOTIFY_SENDER_ID").unwrap_or_else(|| "CARRENTAL".to_string()),
            }),
            _ => None,
        };

        let deposit_percent = parse_or("DEPOSIT_PERCENT", get("DEPOSIT_PERCENT"), 50)?;
        if deposit_percent > 100 {
            return Err(ConfigError::Invalid {
                name: "DEPOSIT_PERCENT",
                value: deposit_percent.to_string(),
            });
        }

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:6500".to_string()),
            messaging,
            verify_token: require("WHATSAPP_VERIFY_TOKEN")?,
            app_secret: get("WHATSAPP_APP_SECRET"),
            payment,
            notify,
            deposit_percent,
            session_ttl: Duration::from_secs(parse_or(
                "SESSION_TTL_SECS",
                get("SESSION_TTL_SECS"),
                86_400,
            )?),
            http_timeout: Duration::from_secs(parse_or(
                "HTTP_TIMEOUT_SECS",
                get("HTTP_TIMEOUT_SECS"),
                10,
            )?),
        })
    }
}

fn parse_or(name: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
