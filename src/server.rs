use actix_web::{HttpRequest, HttpResponse, web};
use chrono::Utc;
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc};

use crate::channel::MessageChannel;
use crate::config::{Config, MessagingConfig};
use crate::dialogue::DialogueEngine;
use crate::error::AppError;
use crate::payment::PaymentCallback;
use crate::webhook::{
    InboundMessage, RecentIds, normalize_phone, parse_cloud, parse_forwarded,
    verify_cloud_signature, verify_forwarded_signature,
};

const EMPTY_RESPONSE: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>";
const SEEN_CAPACITY: usize = 10_000;

/// Secrets and identities the HTTP layer checks requests against.
#[derive(Debug, Clone, Default)]
pub struct WebhookSettings {
    pub verify_token: String,
    pub app_secret: Option<String>,
    /// Auth token and public URL of the forwarded webhook, when signatures are checked.
    pub forwarded_signing: Option<(String, String)>,
    /// Our own number on the forwarded platform; messages from it are echoes.
    pub own_number: Option<String>,
    pub payment_secret: String,
}

impl WebhookSettings {
    pub fn from_config(config: &Config) -> Self {
        let (forwarded_signing, own_number) = match &config.messaging {
            MessagingConfig::Cloud { .. } => (None, None),
            MessagingConfig::Forwarded {
                auth_token,
                whatsapp_number,
                webhook_url,
                ..
            } => (
                webhook_url
                    .as_ref()
                    .map(|url| (auth_token.clone(), url.clone())),
                Some(normalize_phone(whatsapp_number)),
            ),
        };
        Self {
            verify_token: config.verify_token.clone(),
            app_secret: config.app_secret.clone(),
            forwarded_signing,
            own_number,
            payment_secret: config.payment.webhook_secret.clone(),
        }
    }
}

pub struct AppState {
    pub engine: Arc<DialogueEngine>,
    pub channel: Arc<dyn MessageChannel>,
    pub settings: WebhookSettings,
    seen_messages: RecentIds,
    seen_payment_events: RecentIds,
}

impl AppState {
    pub fn new(
        engine: Arc<DialogueEngine>,
        channel: Arc<dyn MessageChannel>,
        settings: WebhookSettings,
    ) -> Self {
        Self {
            engine,
            channel,
            settings,
            seen_messages: RecentIds::new(SEEN_CAPACITY),
            seen_payment_events: RecentIds::new(SEEN_CAPACITY),
        }
    }
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/webhook", web::get().to(verify_webhook))
        .route("/webhook", web::post().to(handle_cloud_webhook))
        .route("/webhook/forwarded", web::post().to(handle_forwarded_webhook))
        .route("/payments/callback", web::post().to(handle_payment_callback))
        .route("/health", web::get().to(health_check))
        .route("/", web::get().to(index));
}

pub async fn health_check() -> actix_web::Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "Kibo Car Rentals WhatsApp Bot"
    })))
}

pub async fn index() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "message": "Kibo Car Rentals WhatsApp Bot API",
        "status": "running",
        "webhook": "/webhook",
        "forwarded_webhook": "/webhook/forwarded",
        "payments_callback": "/payments/callback",
    }))
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

fn empty_response() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("application/xml")
        .body(EMPTY_RESPONSE)
}

fn preview(text: &str) -> String {
    let mut short: String = text.chars().take(40).collect();
    if short.len() < text.len() {
        short.push('…');
    }
    short
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

pub async fn verify_webhook(
    query: web::Query<VerifyQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let subscribed = query.mode.as_deref() == Some("subscribe")
        && query.verify_token.as_deref() == Some(state.settings.verify_token.as_str());
    if !subscribed {
        log::warn!("Webhook verification rejected");
        return Err(AppError::Forbidden);
    }
    log::info!("Webhook verified");
    Ok(HttpResponse::Ok()
        .content_type("text/plain")
        .body(query.challenge.clone().unwrap_or_default()))
}

pub async fn handle_cloud_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    verify_cloud_signature(
        state.settings.app_secret.as_deref(),
        &body,
        header(&req, "X-Hub-Signature-256"),
    )?;
    let messages = parse_cloud(&body)?;
    for message in messages {
        process_message(&state, message).await;
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })))
}

pub async fn handle_forwarded_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let form_data: HashMap<String, String> = serde_urlencoded::from_bytes(&body)
        .map_err(|_| AppError::BadRequest("Invalid form data".to_string()))?;

    if let Some((auth_token, url)) = &state.settings.forwarded_signing {
        verify_forwarded_signature(
            auth_token,
            url,
            &form_data,
            header(&req, "X-Twilio-Signature"),
        )?;
    }

    let Some(message) = parse_forwarded(&form_data)? else {
        return Ok(empty_response());
    };

    // Prevent loops: our own outbound messages can be relayed back to us.
    if state.settings.own_number.as_deref() == Some(message.phone.as_str()) {
        return Ok(empty_response());
    }

    process_message(&state, message).await;
    Ok(empty_response())
}

async fn process_message(state: &AppState, message: InboundMessage) {
    if !state.seen_messages.first_seen(&message.message_id) {
        log::info!("Duplicate message {} ignored", message.message_id);
        return;
    }
    log::debug!(
        "Message {} from {}: {:?}",
        message.message_id,
        message.phone,
        preview(&message.text)
    );

    let turn = state.engine.handle(&message).await;
    log::debug!(
        "Replying to {} after {} in {}",
        message.phone,
        turn.intent,
        turn.state.as_str()
    );
    let outcome = state.channel.send_reply(&message.phone, &turn.reply).await;
    if !outcome.success {
        log::error!(
            "Failed to send reply to {}: {}",
            message.phone,
            outcome.error.unwrap_or_default()
        );
    }
}

pub async fn handle_payment_callback(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let callback = PaymentCallback::verify_and_parse(
        &state.settings.payment_secret,
        &body,
        header(&req, "X-Signature"),
    )?;

    if !state.seen_payment_events.first_seen(&callback.event_id) {
        log::info!("Duplicate payment event {} ignored", callback.event_id);
        return Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "duplicate" })));
    }
    log::info!(
        "Payment {} (ref {}) reported {}",
        callback.payment_id,
        callback.reference.as_deref().unwrap_or("-"),
        callback.status
    );

    if let Some(delivery) = state
        .engine
        .apply_payment_update(&callback.payment_id, callback.status(), Utc::now())
        .await
    {
        let outcome = state.channel.send_reply(&delivery.phone, &delivery.reply).await;
        if !outcome.success {
            log::error!(
                "Failed to send payment update to {}: {}",
                delivery.phone,
                outcome.error.unwrap_or_default()
            );
        }
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::dialogue::EngineSettings;
    use crate::ledger::Ledger;
    use crate::model::{BookingStatus, DialogueState};
    use crate::notify::Notifier;
    use crate::session::SessionStore;
    use crate::testing::{FakeChannel, FakeGateway};
    use crate::webhook::{forwarded_signature, sign_hmac_sha256};
    use actix_web::{App, http::StatusCode, test};
    use std::time::Duration;

    const PHONE: &str = "+255700000000";

    struct Fixture {
        state: web::Data<AppState>,
        channel: Arc<FakeChannel>,
        gateway: Arc<FakeGateway>,
        sessions: Arc<SessionStore>,
        ledger: Arc<Ledger>,
    }

    fn fixture(settings: WebhookSettings) -> Fixture {
        let sessions = Arc::new(SessionStore::new(Duration::from_secs(3600)));
        let ledger = Arc::new(Ledger::new(Arc::new(Catalog::seeded()), 50));
        let gateway = Arc::new(FakeGateway::default());
        let channel = Arc::new(FakeChannel::default());
        let notifier = Arc::new(Notifier::new(None, channel.clone(), "TZS"));
        let engine = Arc::new(DialogueEngine::new(
            sessions.clone(),
            ledger.clone(),
            gateway.clone(),
            notifier,
            EngineSettings {
                currency: "TZS".to_string(),
                payment_channel: "M-Pesa".to_string(),
                payment_account: "CARRENTAL".to_string(),
                callback_url: String::new(),
                deposit_percent: 50,
            },
        ));
        let state = web::Data::new(AppState::new(engine, channel.clone(), settings));
        Fixture {
            state,
            channel,
            gateway,
            sessions,
            ledger,
        }
    }

    fn settings() -> WebhookSettings {
        WebhookSettings {
            verify_token: "verify-me".to_string(),
            app_secret: None,
            forwarded_signing: None,
            own_number: Some("+14155238886".to_string()),
            payment_secret: "payment-secret".to_string(),
        }
    }

    fn cloud_text(id: &str, text: &str) -> String {
        serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "1",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "contacts": [{ "wa_id": "255700000000", "profile": { "name": "Amina" } }],
                        "messages": [{
                            "from": "255700000000",
                            "id": id,
                            "timestamp": "1700000000",
                            "type": "text",
                            "text": { "body": text }
                        }]
                    }
                }]
            }]
        })
        .to_string()
    }

    fn cloud_button(id: &str, button_id: &str, title: &str) -> String {
        serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{
                            "from": "255700000000",
                            "id": id,
                            "type": "interactive",
                            "interactive": {
                                "type": "button_reply",
                                "button_reply": { "id": button_id, "title": title }
                            }
                        }]
                    }
                }]
            }]
        })
        .to_string()
    }

    #[actix_web::test]
    async fn health_and_index() {
        let f = fixture(settings());
        let app = test::init_service(App::new().app_data(f.state.clone()).configure(routes)).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "running");
    }

    #[actix_web::test]
    async fn verification_handshake() {
        let f = fixture(settings());
        let app = test::init_service(App::new().app_data(f.state.clone()).configure(routes)).await;

        let req = test::TestRequest::get()
            .uri("/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=12345")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(test::read_body(resp).await, "12345");

        let req = test::TestRequest::get()
            .uri("/webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=12345")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn cloud_message_gets_a_reply() {
        let f = fixture(settings());
        let app = test::init_service(App::new().app_data(f.state.clone()).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/webhook")
            .insert_header(("Content-Type", "application/json"))
            .set_payload(cloud_text("wamid.1", "Hi"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let sent = f.channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, PHONE);
        assert_eq!(sent[0].button_ids, vec!["browse_cars", "my_bookings", "help"]);
        let session = f.sessions.snapshot(PHONE).await.unwrap();
        assert_eq!(session.state, DialogueState::MainMenu);
        assert_eq!(session.customer_name.as_deref(), Some("Amina"));
    }

    #[actix_web::test]
    async fn button_reply_is_routed_by_id() {
        let f = fixture(settings());
        let app = test::init_service(App::new().app_data(f.state.clone()).configure(routes)).await;

        for body in [
            cloud_text("wamid.1", "Hi"),
            cloud_button("wamid.2", "browse_cars", "Browse Cars"),
            cloud_button("wamid.3", "cat_suv", "SUV"),
        ] {
            let req = test::TestRequest::post()
                .uri("/webhook")
                .set_payload(body)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let session = f.sessions.snapshot(PHONE).await.unwrap();
        assert_eq!(session.state, DialogueState::BrowsingCars);
        let sent = f.channel.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2].button_ids, vec!["car_suv-01", "car_suv-02", "car_suv-03"]);
    }

    #[actix_web::test]
    async fn redelivered_message_is_processed_once() {
        let f = fixture(settings());
        let app = test::init_service(App::new().app_data(f.state.clone()).configure(routes)).await;

        for _ in 0..3 {
            let req = test::TestRequest::post()
                .uri("/webhook")
                .set_payload(cloud_text("wamid.same", "Hi"))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }
        assert_eq!(f.channel.sent().len(), 1);
        let session = f.sessions.snapshot(PHONE).await.unwrap();
        assert_eq!(session.message_count, 1);
    }

    #[actix_web::test]
    async fn malformed_payload_is_rejected_without_state() {
        let f = fixture(settings());
        let app = test::init_service(App::new().app_data(f.state.clone()).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/webhook")
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(f.sessions.is_empty());
        assert!(f.channel.sent().is_empty());
    }

    #[actix_web::test]
    async fn status_only_payload_is_acknowledged() {
        let f = fixture(settings());
        let app = test::init_service(App::new().app_data(f.state.clone()).configure(routes)).await;

        let payload = serde_json::json!({
            "entry": [{ "changes": [{ "value": {
                "statuses": [{ "id": "wamid.1", "status": "delivered" }]
            }}]}]
        });
        let req = test::TestRequest::post()
            .uri("/webhook")
            .set_payload(payload.to_string())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(f.sessions.is_empty());
    }

    #[actix_web::test]
    async fn cloud_signature_is_enforced_when_configured() {
        let f = fixture(WebhookSettings {
            app_secret: Some("app-secret".to_string()),
            ..settings()
        });
        let app = test::init_service(App::new().app_data(f.state.clone()).configure(routes)).await;
        let body = cloud_text("wamid.2", "Hi");

        let req = test::TestRequest::post()
            .uri("/webhook")
            .set_payload(body.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/webhook")
            .insert_header(("X-Hub-Signature-256", "sha256=00ff"))
            .set_payload(body.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(f.channel.sent().is_empty());

        let signature = format!("sha256={}", sign_hmac_sha256(b"app-secret", body.as_bytes()));
        let req = test::TestRequest::post()
            .uri("/webhook")
            .insert_header(("X-Hub-Signature-256", signature))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(f.channel.sent().len(), 1);
    }

    #[actix_web::test]
    async fn forwarded_message_replies_with_empty_response() {
        let f = fixture(settings());
        let app = test::init_service(App::new().app_data(f.state.clone()).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/webhook/forwarded")
            .insert_header(("Content-Type", "application/x-www-form-urlencoded"))
            .set_payload("From=whatsapp%3A%2B255700000000&Body=hello&MessageSid=SM1&ProfileName=Amina")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(test::read_body(resp).await, EMPTY_RESPONSE);

        let sent = f.channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, PHONE);
    }

    #[actix_web::test]
    async fn forwarded_status_and_echo_are_ignored() {
        let f = fixture(settings());
        let app = test::init_service(App::new().app_data(f.state.clone()).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/webhook/forwarded")
            .set_payload("MessageStatus=delivered&MessageSid=SM2&From=whatsapp%3A%2B255700000000")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/webhook/forwarded")
            .set_payload("From=whatsapp%3A%2B14155238886&Body=hello&MessageSid=SM3")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        assert!(f.channel.sent().is_empty());
        assert!(f.sessions.is_empty());
    }

    #[actix_web::test]
    async fn forwarded_signature_is_checked() {
        let url = "https://bot.example.com/webhook/forwarded";
        let f = fixture(WebhookSettings {
            forwarded_signing: Some(("auth-token".to_string(), url.to_string())),
            ..settings()
        });
        let app = test::init_service(App::new().app_data(f.state.clone()).configure(routes)).await;

        let body = "From=whatsapp%3A%2B255700000000&Body=hi&MessageSid=SM4";
        let params: HashMap<String, String> = serde_urlencoded::from_str(body).unwrap();

        let req = test::TestRequest::post()
            .uri("/webhook/forwarded")
            .insert_header(("X-Twilio-Signature", "bm90LXZhbGlk"))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/webhook/forwarded")
            .insert_header((
                "X-Twilio-Signature",
                forwarded_signature("auth-token", url, &params),
            ))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(f.channel.sent().len(), 1);
    }

    async fn reach_payment_pending(f: &Fixture) -> String {
        let steps = [
            ("Hi", None),
            ("Suzuki Swift", Some("car_eco-02")),
            ("Book Now", Some("book_eco-02")),
            ("Name: Amina Juma\nPickup: Friday\nReturn: Saturday\nDays: 1", None),
        ];
        for (i, (text, button_id)) in steps.into_iter().enumerate() {
            let message = InboundMessage {
                message_id: format!("wamid.step{}", i),
                phone: PHONE.to_string(),
                text: text.to_string(),
                button_id: button_id.map(str::to_string),
                profile_name: None,
            };
            f.state.engine.handle(&message).await;
        }
        let session = f.sessions.snapshot(PHONE).await.unwrap();
        assert_eq!(session.state, DialogueState::PaymentPending);
        session.active_booking.unwrap()
    }

    fn signed_callback(event_id: &str, payment_id: &str, status: &str) -> (String, String) {
        let body = serde_json::json!({
            "event_id": event_id,
            "payment_id": payment_id,
            "status": status,
        })
        .to_string();
        let signature = sign_hmac_sha256(b"payment-secret", body.as_bytes());
        (body, signature)
    }

    #[actix_web::test]
    async fn payment_callback_completes_booking_once() {
        let f = fixture(settings());
        let app = test::init_service(App::new().app_data(f.state.clone()).configure(routes)).await;
        let booking_id = reach_payment_pending(&f).await;
        assert_eq!(f.gateway.created()[0].amount, 32_500);
        let before = f.channel.sent().len();

        let (body, signature) = signed_callback("evt-1", "pay-1", "completed");
        for _ in 0..2 {
            let req = test::TestRequest::post()
                .uri("/payments/callback")
                .insert_header(("X-Signature", signature.clone()))
                .set_payload(body.clone())
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }

        assert_eq!(
            f.ledger.get(&booking_id).unwrap().status,
            BookingStatus::Paid
        );
        let session = f.sessions.snapshot(PHONE).await.unwrap();
        assert_eq!(session.state, DialogueState::Completed);

        // receipt on the channel plus the confirmation itself
        let sent = f.channel.sent();
        assert_eq!(sent.len(), before + 2);
        assert!(sent.last().unwrap().button_ids.is_empty());
    }

    #[actix_web::test]
    async fn unsigned_payment_callback_is_rejected() {
        let f = fixture(settings());
        let app = test::init_service(App::new().app_data(f.state.clone()).configure(routes)).await;
        let booking_id = reach_payment_pending(&f).await;

        let (body, _) = signed_callback("evt-2", "pay-1", "completed");
        let req = test::TestRequest::post()
            .uri("/payments/callback")
            .set_payload(body.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/payments/callback")
            .insert_header(("X-Signature", "deadbeef"))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(
            f.ledger.get(&booking_id).unwrap().status,
            BookingStatus::PendingPayment
        );
    }
}
