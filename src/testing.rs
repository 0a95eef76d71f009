//! In-process fakes for the provider seams.

use async_trait::async_trait;
use chrono::Utc;
use std::{collections::HashMap, sync::Mutex};

use crate::channel::{MessageChannel, SendOutcome};
use crate::error::PaymentError;
use crate::model::{Booking, BookingStatus, Button, ListSection, PaymentHandle, PaymentStatus};
use crate::notify::{NotificationProvider, NotifyError};
use crate::payment::{PaymentGateway, PaymentRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: String,
    pub body: String,
    pub button_ids: Vec<String>,
}

#[derive(Default)]
pub struct FakeChannel {
    sent: Mutex<Vec<SentMessage>>,
}

impl FakeChannel {
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, to: &str, body: &str, button_ids: Vec<String>) -> SendOutcome {
        let mut sent = self.sent.lock().unwrap();
        sent.push(SentMessage {
            to: to.to_string(),
            body: body.to_string(),
            button_ids,
        });
        SendOutcome::sent(Some(format!("wamid.{}", sent.len())))
    }
}

#[async_trait]
impl MessageChannel for FakeChannel {
    async fn send_text(&self, to: &str, body: &str) -> SendOutcome {
        self.record(to, body, Vec::new())
    }

    async fn send_buttons(
        &self,
        to: &str,
        body: &str,
        buttons: &[Button],
        _footer: Option<&str>,
    ) -> SendOutcome {
        self.record(to, body, buttons.iter().map(|b| b.id.clone()).collect())
    }

    async fn send_list(
        &self,
        to: &str,
        body: &str,
        _button_label: &str,
        sections: &[ListSection],
    ) -> SendOutcome {
        let ids = sections
            .iter()
            .flat_map(|s| s.rows.iter().map(|r| r.id.clone()))
            .collect();
        self.record(to, body, ids)
    }
}

#[derive(Default)]
pub struct FakeNotifications {
    fail_voice: bool,
    sms: Mutex<Vec<(String, String)>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeNotifications {
    pub fn failing_voice() -> Self {
        Self {
            fail_voice: true,
            ..Self::default()
        }
    }

    pub fn sms_sent(&self) -> Vec<(String, String)> {
        self.sms.lock().unwrap().clone()
    }

    pub fn calls_placed(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationProvider for FakeNotifications {
    async fn send_sms(&self, recipient: &str, content: &str) -> Result<(), NotifyError> {
        self.sms
            .lock()
            .unwrap()
            .push((recipient.to_string(), content.to_string()));
        Ok(())
    }

    async fn voice_call(&self, receiver: &str, text: &str) -> Result<(), NotifyError> {
        if self.fail_voice {
            return Err(NotifyError::Status {
                status: 503,
                body: "voice unavailable".to_string(),
            });
        }
        self.calls
            .lock()
            .unwrap()
            .push((receiver.to_string(), text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct GatewayState {
    fail_create: bool,
    fail_status: bool,
    statuses: HashMap<String, PaymentStatus>,
    created: Vec<PaymentRequest>,
    status_checks: usize,
}

/// Payment gateway whose outcomes tests steer directly.
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<GatewayState>,
}

impl FakeGateway {
    pub fn set_fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    pub fn set_fail_status(&self, fail: bool) {
        self.state.lock().unwrap().fail_status = fail;
    }

    pub fn set_status(&self, payment_id: &str, status: PaymentStatus) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(payment_id.to_string(), status);
    }

    pub fn created(&self) -> Vec<PaymentRequest> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn status_checks(&self) -> usize {
        self.state.lock().unwrap().status_checks
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentHandle, PaymentError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(PaymentError::Status {
                status: 502,
                body: "gateway down".to_string(),
            });
        }
        state.created.push(request.clone());
        let id = format!("pay-{}", state.created.len());
        state.statuses.insert(id.clone(), PaymentStatus::Pending);
        Ok(PaymentHandle {
            id,
            status: PaymentStatus::Pending,
        })
    }

    async fn payment_status(&self, payment_id: &str) -> Result<PaymentStatus, PaymentError> {
        let mut state = self.state.lock().unwrap();
        state.status_checks += 1;
        if state.fail_status {
            return Err(PaymentError::InvalidResponse("timeout".to_string()));
        }
        state
            .statuses
            .get(payment_id)
            .copied()
            .ok_or_else(|| PaymentError::InvalidResponse(format!("unknown payment {}", payment_id)))
    }
}

pub fn sample_booking() -> Booking {
    Booking {
        id: "BK1".to_string(),
        customer_id: "+255700000000".to_string(),
        customer_name: "Amina Juma".to_string(),
        vehicle_id: "eco-01".to_string(),
        vehicle_name: "Toyota Vitz".to_string(),
        pickup: "Friday".to_string(),
        return_at: "Monday".to_string(),
        days: 3,
        daily_rate: 60_000,
        total: 180_000,
        deposit: 90_000,
        status: BookingStatus::Paid,
        payment_id: Some("pay-1".to_string()),
        created_at: Utc::now(),
        paid_at: Some(Utc::now()),
        cancelled_at: None,
    }
}
