use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as Engine};
use serde_json::{Value, json};
use std::{collections::HashMap, time::Duration};

use crate::config::MessagingConfig;
use crate::model::{Button, Interactive, ListSection, Reply};

const MAX_BUTTONS: usize = 3;
const MAX_BUTTON_TITLE: usize = 20;
const MAX_ROW_TITLE: usize = 24;
const MAX_ROW_DESCRIPTION: usize = 72;
const MAX_ROWS: usize = 10;
const MAX_INTERACTIVE_BODY: usize = 1024;
const MAX_TEXT_BODY: usize = 4096;

/// Result of one best-effort send. Failures are reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn sent(message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> SendOutcome;

    async fn send_buttons(
        &self,
        to: &str,
        body: &str,
        buttons: &[Button],
        footer: Option<&str>,
    ) -> SendOutcome;

    async fn send_list(
        &self,
        to: &str,
        body: &str,
        button_label: &str,
        sections: &[ListSection],
    ) -> SendOutcome;

    async fn send_reply(&self, to: &str, reply: &Reply) -> SendOutcome {
        match &reply.interactive {
            None => self.send_text(to, &reply.text).await,
            Some(Interactive::Buttons(buttons)) => {
                self.send_buttons(to, &reply.text, buttons, reply.footer.as_deref())
                    .await
            }
            Some(Interactive::List {
                button_label,
                sections,
            }) => self.send_list(to, &reply.text, button_label, sections).await,
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}

/// Cloud API wants the bare international number.
fn cloud_recipient(to: &str) -> String {
    to.trim_start_matches("whatsapp:").trim_start_matches('+').to_string()
}

pub fn text_payload(to: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": cloud_recipient(to),
        "type": "text",
        "text": { "preview_url": false, "body": truncate(body, MAX_TEXT_BODY) },
    })
}

pub fn buttons_payload(to: &str, body: &str, buttons: &[Button], footer: Option<&str>) -> Value {
    let buttons: Vec<Value> = buttons
        .iter()
        .take(MAX_BUTTONS)
        .map(|b| {
            json!({
                "type": "reply",
                "reply": { "id": b.id, "title": truncate(&b.title, MAX_BUTTON_TITLE) },
            })
        })
        .collect();

    let mut interactive = json!({
        "type": "button",
        "body": { "text": truncate(body, MAX_INTERACTIVE_BODY) },
        "action": { "buttons": buttons },
    });
    if let Some(footer) = footer {
        interactive["footer"] = json!({ "text": truncate(footer, 60) });
    }

    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": cloud_recipient(to),
        "type": "interactive",
        "interactive": interactive,
    })
}

pub fn list_payload(to: &str, body: &str, button_label: &str, sections: &[ListSection]) -> Value {
    let mut remaining = MAX_ROWS;
    let sections: Vec<Value> = sections
        .iter()
        .filter_map(|section| {
            let rows: Vec<Value> = section
                .rows
                .iter()
                .take(remaining)
                .map(|row| {
                    let mut value = json!({
                        "id": row.id,
                        "title": truncate(&row.title, MAX_ROW_TITLE),
                    });
                    if let Some(description) = &row.description {
                        value["description"] = json!(truncate(description, MAX_ROW_DESCRIPTION));
                    }
                    value
                })
                .collect();
            if rows.is_empty() {
                return None;
            }
            remaining -= rows.len();
            Some(json!({ "title": truncate(&section.title, MAX_ROW_TITLE), "rows": rows }))
        })
        .collect();

    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": cloud_recipient(to),
        "type": "interactive",
        "interactive": {
            "type": "list",
            "body": { "text": truncate(body, MAX_INTERACTIVE_BODY) },
            "action": { "button": truncate(button_label, MAX_BUTTON_TITLE), "sections": sections },
        },
    })
}

/// WhatsApp Business Cloud API sender.
pub struct CloudApiChannel {
    client: reqwest::Client,
    messages_url: String,
    access_token: String,
}

impl CloudApiChannel {
    pub fn new(
        api_base: &str,
        phone_number_id: &str,
        access_token: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            messages_url: format!(
                "{}/{}/messages",
                api_base.trim_end_matches('/'),
                phone_number_id
            ),
            access_token: access_token.to_string(),
        })
    }

    async fn post(&self, payload: Value) -> SendOutcome {
        let response = self
            .client
            .post(&self.messages_url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(res) if res.status().is_success() => {
                let message_id = res.json::<Value>().await.ok().and_then(|v| {
                    v.get("messages")
                        .and_then(|m| m.get(0))
                        .and_then(|m| m.get("id"))
                        .and_then(|id| id.as_str())
                        .map(str::to_string)
                });
                SendOutcome::sent(message_id)
            }
            Ok(res) => {
                let status = res.status();
                let body = res.text().await.unwrap_or_default();
                log::error!("Cloud API send failed with status {}: {}", status, body);
                SendOutcome::failed(format!("status {}", status))
            }
            Err(err) => {
                log::error!("Cloud API send error: {}", err);
                SendOutcome::failed(err.to_string())
            }
        }
    }
}

#[async_trait]
impl MessageChannel for CloudApiChannel {
    async fn send_text(&self, to: &str, body: &str) -> SendOutcome {
        self.post(text_payload(to, body)).await
    }

    async fn send_buttons(
        &self,
        to: &str,
        body: &str,
        buttons: &[Button],
        footer: Option<&str>,
    ) -> SendOutcome {
        self.post(buttons_payload(to, body, buttons, footer)).await
    }

    async fn send_list(
        &self,
        to: &str,
        body: &str,
        button_label: &str,
        sections: &[ListSection],
    ) -> SendOutcome {
        self.post(list_payload(to, body, button_label, sections)).await
    }
}

/// Renders options as text for relays that cannot carry interactive messages.
/// Titles are phrased so typing them back classifies to the same intent.
pub fn render_options(body: &str, titles: &[&str], footer: Option<&str>) -> String {
    let mut text = body.to_string();
    if !titles.is_empty() {
        let options = titles
            .iter()
            .map(|t| format!("*{}*", t))
            .collect::<Vec<_>>()
            .join(" | ");
        text.push_str(&format!("\n\n👉 Reply: {}", options));
    }
    if let Some(footer) = footer {
        text.push_str(&format!("\n\n_{}_", footer));
    }
    text
}

/// Sends through a relay platform's REST API using a form post with basic auth.
pub struct ForwardedChannel {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    api_url: String,
}

impl ForwardedChannel {
    pub fn new(
        account_sid: &str,
        auth_token: &str,
        from_number: &str,
        api_url: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            from_number: from_number.to_string(),
            api_url: api_url.to_string(),
        })
    }
}

fn relay_address(to: &str) -> String {
    if to.starts_with("whatsapp:") {
        to.to_string()
    } else if to.starts_with('+') {
        format!("whatsapp:{}", to)
    } else {
        format!("whatsapp:+{}", to)
    }
}

#[async_trait]
impl MessageChannel for ForwardedChannel {
    async fn send_text(&self, to: &str, body: &str) -> SendOutcome {
        let to_whatsapp = relay_address(to);
        let auth_encoded = Engine.encode(format!("{}:{}", self.account_sid, self.auth_token));
        let body = truncate(body, 1600);

        let mut form_data = HashMap::new();
        form_data.insert("From", self.from_number.as_str());
        form_data.insert("To", to_whatsapp.as_str());
        form_data.insert("Body", body.as_str());

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Basic {}", auth_encoded))
            .form(&form_data)
            .send()
            .await;

        match response {
            Ok(res) if res.status().is_success() => {
                let sid = res.json::<Value>().await.ok().and_then(|v| {
                    v.get("sid").and_then(|s| s.as_str()).map(str::to_string)
                });
                SendOutcome::sent(sid)
            }
            Ok(res) => {
                log::error!("Failed to send relayed message: {}", res.status());
                SendOutcome::failed(format!("status {}", res.status()))
            }
            Err(err) => {
                log::error!("Relayed message error: {}", err);
                SendOutcome::failed(err.to_string())
            }
        }
    }

    async fn send_buttons(
        &self,
        to: &str,
        body: &str,
        buttons: &[Button],
        footer: Option<&str>,
    ) -> SendOutcome {
        let titles: Vec<&str> = buttons.iter().map(|b| b.title.as_str()).collect();
        self.send_text(to, &render_options(body, &titles, footer))
            .await
    }

    async fn send_list(
        &self,
        to: &str,
        body: &str,
        _button_label: &str,
        _sections: &[ListSection],
    ) -> SendOutcome {
        // List bodies already enumerate their rows.
        self.send_text(to, body).await
    }
}

/// Builds the sender selected by configuration.
pub fn from_config(
    config: &MessagingConfig,
    timeout: Duration,
) -> Result<Box<dyn MessageChannel>, reqwest::Error> {
    Ok(match config {
        MessagingConfig::Cloud {
            api_base,
            access_token,
            phone_number_id,
        } => Box::new(CloudApiChannel::new(
            api_base,
            phone_number_id,
            access_token,
            timeout,
        )?),
        MessagingConfig::Forwarded {
            account_sid,
            auth_token,
            whatsapp_number,
            api_url,
            ..
        } => Box::new(ForwardedChannel::new(
            account_sid,
            auth_token,
            whatsapp_number,
            api_url,
            timeout,
        )?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ListRow;

    #[test]
    fn text_payload_shape() {
        let payload = text_payload("+255700000000", "hello");
        assert_eq!(payload["messaging_product"], "whatsapp");
        assert_eq!(payload["to"], "255700000000");
        assert_eq!(payload["type"], "text");
        assert_eq!(payload["text"]["body"], "hello");
    }

    #[test]
    fn buttons_are_capped_and_titles_truncated() {
        let buttons = vec![
            Button::new("a", "A very long button title indeed"),
            Button::new("b", "B"),
            Button::new("c", "C"),
            Button::new("d", "D"),
        ];
        let payload = buttons_payload("255700000000", "pick", &buttons, Some("footer"));
        let rendered = payload["interactive"]["action"]["buttons"].as_array().unwrap();
        assert_eq!(rendered.len(), 3);
        assert_eq!(rendered[0]["type"], "reply");
        assert_eq!(rendered[0]["reply"]["id"], "a");
        assert_eq!(
            rendered[0]["reply"]["title"].as_str().unwrap().chars().count(),
            20
        );
        assert_eq!(payload["interactive"]["footer"]["text"], "footer");
    }

    #[test]
    fn list_rows_are_capped_across_sections() {
        let rows: Vec<ListRow> = (0..8)
            .map(|i| ListRow {
                id: format!("row_{}", i),
                title: format!("Row {}", i),
                description: None,
            })
            .collect();
        let sections = vec![
            ListSection {
                title: "First".into(),
                rows: rows.clone(),
            },
            ListSection {
                title: "Second".into(),
                rows,
            },
        ];
        let payload = list_payload("255700000000", "body", "View", &sections);
        let sections = payload["interactive"]["action"]["sections"].as_array().unwrap();
        let total: usize = sections
            .iter()
            .map(|s| s["rows"].as_array().unwrap().len())
            .sum();
        assert_eq!(total, 10);
        assert_eq!(payload["interactive"]["type"], "list");
        assert_eq!(payload["interactive"]["action"]["button"], "View");
    }

    #[test]
    fn sections_left_without_rows_are_dropped() {
        let rows = |prefix: &str, n: usize| -> Vec<ListRow> {
            (0..n)
                .map(|i| ListRow {
                    id: format!("{}_{}", prefix, i),
                    title: format!("{} {}", prefix, i),
                    description: None,
                })
                .collect()
        };
        let sections = vec![
            ListSection {
                title: "Full".into(),
                rows: rows("full", 10),
            },
            ListSection {
                title: "Overflow".into(),
                rows: rows("over", 2),
            },
        ];
        let payload = list_payload("255700000000", "body", "View", &sections);
        let sections = payload["interactive"]["action"]["sections"].as_array().unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0]["title"], "Full");
    }

    #[test]
    fn relay_rendering_lists_titles() {
        let text = render_options("Pick one", &["Check Again", "Contact Support"], None);
        assert!(text.contains("*Check Again* | *Contact Support*"));
        assert_eq!(render_options("Plain", &[], None), "Plain");
    }

    #[test]
    fn relay_addresses() {
        assert_eq!(relay_address("+255700000000"), "whatsapp:+255700000000");
        assert_eq!(relay_address("255700000000"), "whatsapp:+255700000000");
        assert_eq!(
            relay_address("whatsapp:+255700000000"),
            "whatsapp:+255700000000"
        );
    }
}
