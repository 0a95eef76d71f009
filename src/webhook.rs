use base64::{Engine as _, engine::general_purpose::STANDARD as Engine};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use sha2::Sha256;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
};

use crate::error::WebhookError;

/// A customer message after provider-specific unwrapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: String,
    pub phone: String,
    pub text: String,
    pub button_id: Option<String>,
    pub profile_name: Option<String>,
}

/// `whatsapp:+255 700-000000` and `255700000000` both become `+255700000000`.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw
        .trim()
        .trim_start_matches("whatsapp:")
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    format!("+{}", digits)
}

// --- Cloud API payload ---

#[derive(Debug, Deserialize)]
pub struct CloudWebhook {
    pub entry: Vec<CloudEntry>,
}

#[derive(Debug, Deserialize)]
pub struct CloudEntry {
    #[serde(default)]
    pub changes: Vec<CloudChange>,
}

#[derive(Debug, Deserialize)]
pub struct CloudChange {
    #[serde(default)]
    pub field: Option<String>,
    pub value: CloudValue,
}

#[derive(Debug, Deserialize)]
pub struct CloudValue {
    #[serde(default)]
    pub contacts: Vec<CloudContact>,
    #[serde(default)]
    pub messages: Vec<CloudMessage>,
}

#[derive(Debug, Deserialize)]
pub struct CloudContact {
    pub wa_id: String,
    #[serde(default)]
    pub profile: Option<CloudProfile>,
}

#[derive(Debug, Deserialize)]
pub struct CloudProfile {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CloudMessage {
    pub from: String,
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<CloudText>,
    #[serde(default)]
    pub interactive: Option<CloudInteractive>,
    #[serde(default)]
    pub button: Option<CloudButton>,
}

#[derive(Debug, Deserialize)]
pub struct CloudText {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct CloudInteractive {
    #[serde(rename = "type")]
    pub interactive_type: String,
    #[serde(default)]
    pub button_reply: Option<CloudReplyOption>,
    #[serde(default)]
    pub list_reply: Option<CloudReplyOption>,
}

#[derive(Debug, Deserialize)]
pub struct CloudReplyOption {
    pub id: String,
    pub title: String,
}

/// Quick-reply button on a template message.
#[derive(Debug, Deserialize)]
pub struct CloudButton {
    #[serde(default)]
    pub payload: Option<String>,
    pub text: String,
}

fn cloud_content(message: &CloudMessage) -> Option<(String, Option<String>)> {
    match message.message_type.as_str() {
        "text" => message.text.as_ref().map(|t| (t.body.clone(), None)),
        "interactive" => {
            let interactive = message.interactive.as_ref()?;
            let option = match interactive.interactive_type.as_str() {
                "button_reply" => interactive.button_reply.as_ref(),
                "list_reply" => interactive.list_reply.as_ref(),
                _ => None,
            }?;
            Some((option.title.clone(), Some(option.id.clone())))
        }
        "button" => message
            .button
            .as_ref()
            .map(|b| (b.text.clone(), b.payload.clone())),
        _ => None,
    }
}

/// Extracts customer messages; delivery receipts and media yield nothing.
pub fn parse_cloud(body: &[u8]) -> Result<Vec<InboundMessage>, WebhookError> {
    let webhook: CloudWebhook =
        serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;

    let mut inbound = Vec::new();
    for entry in &webhook.entry {
        for change in &entry.changes {
            if change.field.as_deref().is_some_and(|f| f != "messages") {
                continue;
            }
            for message in &change.value.messages {
                let Some((text, button_id)) = cloud_content(message) else {
                    log::debug!(
                        "Skipping unsupported {} message {}",
                        message.message_type,
                        message.id
                    );
                    continue;
                };
                if text.trim().is_empty() && button_id.is_none() {
                    continue;
                }
                let profile_name = change
                    .value
                    .contacts
                    .iter()
                    .find(|c| c.wa_id == message.from)
                    .or_else(|| change.value.contacts.first())
                    .and_then(|c| c.profile.as_ref())
                    .map(|p| p.name.clone());
                inbound.push(InboundMessage {
                    message_id: message.id.clone(),
                    phone: normalize_phone(&message.from),
                    text,
                    button_id,
                    profile_name,
                });
            }
        }
    }
    Ok(inbound)
}

// --- Forwarded (form-encoded) payload ---

/// Decodes a relayed message. `Ok(None)` means a status callback or an empty
/// message that needs only an acknowledgement.
pub fn parse_forwarded(
    form: &HashMap<String, String>,
) -> Result<Option<InboundMessage>, WebhookError> {
    if let Some(status) = form.get("SmsStatus").or(form.get("MessageStatus")) {
        if matches!(
            status.as_str(),
            "delivered" | "read" | "sent" | "failed" | "undelivered" | "queued"
        ) {
            return Ok(None);
        }
    }

    let from = form
        .get("From")
        .ok_or_else(|| WebhookError::Malformed("missing 'From' field".to_string()))?;
    let message_id = form
        .get("MessageSid")
        .or(form.get("SmsSid"))
        .ok_or_else(|| WebhookError::Malformed("missing 'MessageSid' field".to_string()))?;

    let button_id = form
        .get("ButtonPayload")
        .filter(|p| !p.trim().is_empty())
        .cloned();
    let text = form
        .get("Body")
        .filter(|b| !b.trim().is_empty())
        .or(form.get("ButtonText"))
        .cloned()
        .unwrap_or_default();

    if text.trim().is_empty() && button_id.is_none() {
        return Ok(None);
    }

    Ok(Some(InboundMessage {
        message_id: message_id.clone(),
        phone: normalize_phone(from),
        text,
        button_id,
        profile_name: form.get("ProfileName").cloned(),
    }))
}

// --- Signatures ---

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Checks a hex HMAC-SHA256 of `body`, with or without a `sha256=` prefix.
/// The comparison runs in constant time.
pub fn verify_hmac_sha256(key: &[u8], body: &[u8], signature: &str) -> Result<(), WebhookError> {
    let hex_sig = signature.trim();
    let hex_sig = hex_sig.strip_prefix("sha256=").unwrap_or(hex_sig);
    let expected = hex::decode(hex_sig).map_err(|_| WebhookError::InvalidSignature)?;
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookError::InvalidSignature)
}

#[cfg(test)]
pub fn sign_hmac_sha256(key: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// `X-Hub-Signature-256` check; skipped when no app secret is configured.
pub fn verify_cloud_signature(
    app_secret: Option<&str>,
    body: &[u8],
    header: Option<&str>,
) -> Result<(), WebhookError> {
    let Some(secret) = app_secret else {
        return Ok(());
    };
    let header = header.ok_or(WebhookError::MissingSignature)?;
    if !header.trim().starts_with("sha256=") {
        return Err(WebhookError::InvalidSignature);
    }
    verify_hmac_sha256(secret.as_bytes(), body, header)
}

fn forwarded_mac(auth_token: &str, url: &str, params: &HashMap<String, String>) -> HmacSha1 {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    let mut data = url.to_string();
    for key in keys {
        data.push_str(key);
        data.push_str(&params[key]);
    }
    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(data.as_bytes());
    mac
}

/// Relay platform signature: base64 HMAC-SHA1 over the public URL followed by
/// every form parameter as `key + value`, keys sorted.
#[cfg(test)]
pub fn forwarded_signature(auth_token: &str, url: &str, params: &HashMap<String, String>) -> String {
    Engine.encode(forwarded_mac(auth_token, url, params).finalize().into_bytes())
}

pub fn verify_forwarded_signature(
    auth_token: &str,
    url: &str,
    params: &HashMap<String, String>,
    header: Option<&str>,
) -> Result<(), WebhookError> {
    let header = header.ok_or(WebhookError::MissingSignature)?;
    let expected = Engine
        .decode(header.trim())
        .map_err(|_| WebhookError::InvalidSignature)?;
    forwarded_mac(auth_token, url, params)
        .verify_slice(&expected)
        .map_err(|_| WebhookError::InvalidSignature)
}

// --- Idempotency ---

/// Bounded memory of recently processed provider ids. Webhook retries carry
/// the same id and are dropped before they reach any state.
pub struct RecentIds {
    inner: Mutex<(HashSet<String>, VecDeque<String>)>,
    capacity: usize,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new((HashSet::new(), VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    /// Records the id; returns false if it was already recorded.
    pub fn first_seen(&self, id: &str) -> bool {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let (seen, order) = &mut *guard;
        if seen.contains(id) {
            return false;
        }
        seen.insert(id.to_string());
        order.push_back(id.to_string());
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                seen.remove(&oldest);
            }
        }
        true
    }
}
