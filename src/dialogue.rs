//! Conversation state machine.
//!
//! One inbound message is one turn: the customer's session is locked, the
//! message is classified, and the transition for `(state, intent)` runs to
//! completion (ledger writes and provider calls included) before the lock is
//! released. Provider failures degrade to a reply; they never leave a
//! session pointing at a booking that does not match the ledger.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::details;
use crate::error::LedgerError;
use crate::intent::{self, Intent, VehicleRef};
use crate::ledger::Ledger;
use crate::model::{Booking, BookingStatus, Category, DialogueState, PaymentStatus, Reply, Session};
use crate::notify::Notifier;
use crate::payment::{PaymentGateway, PaymentRequest};
use crate::replies;
use crate::session::SessionStore;
use crate::webhook::InboundMessage;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub currency: String,
    pub payment_channel: String,
    pub payment_account: String,
    pub callback_url: String,
    pub deposit_percent: u64,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub intent: &'static str,
    pub state: DialogueState,
    pub reply: Reply,
}

/// A message the engine wants delivered outside of a customer turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub phone: String,
    pub reply: Reply,
}

pub struct DialogueEngine {
    sessions: Arc<SessionStore>,
    ledger: Arc<Ledger>,
    payments: Arc<dyn PaymentGateway>,
    notifier: Arc<Notifier>,
    settings: EngineSettings,
}

/// Reinterprets intents whose meaning depends on where the customer is.
fn contextualize(state: DialogueState, intent: Intent, raw: &str) -> Intent {
    match (state, intent) {
        (DialogueState::SelectingCategory, Intent::SelectVehicle(VehicleRef::Index(n))) => {
            Category::from_index(n)
                .map(Intent::SelectCategory)
                .unwrap_or(Intent::Unknown)
        }
        (
            DialogueState::BookingForm,
            Intent::Unknown | Intent::SelectVehicle(VehicleRef::Index(_)),
        ) => Intent::SubmitBookingDetails(raw.trim().to_string()),
        (_, intent) => intent,
    }
}

impl DialogueEngine {
    pub fn new(
        sessions: Arc<SessionStore>,
        ledger: Arc<Ledger>,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<Notifier>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            sessions,
            ledger,
            payments,
            notifier,
            settings,
        }
    }

    fn catalog(&self) -> &Catalog {
        self.ledger.catalog()
    }

    fn currency(&self) -> &str {
        &self.settings.currency
    }

    pub async fn handle(&self, message: &InboundMessage) -> Turn {
        let now = Utc::now();
        let mut session = self.sessions.acquire(&message.phone).await;
        session.message_count += 1;
        session.last_message = Some(message.text.clone());
        session.updated_at = now;
        if session.customer_name.is_none() {
            session.customer_name = message.profile_name.clone();
        }
        if session.message_count == 1 {
            log::info!("New session for {} opened at {}", message.phone, session.created_at);
        }

        let classified = intent::classify(&message.text, message.button_id.as_deref());
        let intent = contextualize(session.state, classified, &message.text);
        let tag = intent.tag();
        let before = session.state;

        let reply = self.transition(&mut session, intent, now).await;

        log::info!(
            "{} [{}] {} -> {}",
            message.phone,
            tag,
            before.as_str(),
            session.state.as_str()
        );
        Turn {
            intent: tag,
            state: session.state,
            reply,
        }
    }

    async fn transition(&self, session: &mut Session, intent: Intent, now: DateTime<Utc>) -> Reply {
        match intent {
            Intent::Greeting => self.welcome(session),
            Intent::HelpRequest => replies::help(session.state, session.active_booking.as_deref()),
            Intent::BookingStatusCheck => {
                replies::booking_list(&self.ledger.list_by_customer(&session.phone), self.currency())
            }
            Intent::PriceInquiry => {
                let prices: Vec<(Category, Option<u64>)> = Category::ALL
                    .iter()
                    .map(|c| (*c, self.catalog().starting_price(*c)))
                    .collect();
                replies::price_list(&prices, self.settings.deposit_percent, self.currency())
            }
            Intent::LocationInquiry => replies::locations(&self.catalog().locations()),
            Intent::BrowseCatalog => self.show_categories(session),
            Intent::SelectCategory(category) => self.show_category(session, category),
            Intent::SelectVehicle(vehicle) => self.select_vehicle(session, vehicle),
            Intent::InitiateBooking(vehicle_id) => self.initiate_booking(session, vehicle_id),
            Intent::SubmitBookingDetails(text) => self.submit_details(session, &text, now).await,
            Intent::PayRequest => self.pay_request(session).await,
            Intent::PayConfirm(booking_id) => self.pay_confirm(session, booking_id, now).await,
            Intent::CancelBooking(booking_id) => self.cancel(session, booking_id, now),
            Intent::Unknown => self.fallback(session),
        }
    }

    fn welcome(&self, session: &mut Session) -> Reply {
        session.state = DialogueState::MainMenu;
        session.selected_category = None;
        session.selected_vehicle = None;
        replies::welcome(session.customer_name.as_deref())
    }

    fn fallback(&self, session: &mut Session) -> Reply {
        if session.state == DialogueState::New {
            return self.welcome(session);
        }
        replies::contextual_hint(session.state, session.active_booking.as_deref())
    }

    fn show_categories(&self, session: &mut Session) -> Reply {
        session.state = DialogueState::SelectingCategory;
        session.selected_vehicle = None;
        let counts: Vec<(Category, usize, Option<u64>)> = Category::ALL
            .iter()
            .map(|c| {
                (
                    *c,
                    self.catalog().available_count(*c),
                    self.catalog().starting_price(*c),
                )
            })
            .collect();
        replies::category_menu(&counts, self.currency())
    }

    fn show_category(&self, session: &mut Session, category: Category) -> Reply {
        session.state = DialogueState::BrowsingCars;
        session.selected_category = Some(category);
        session.selected_vehicle = None;
        replies::vehicle_list(category, &self.catalog().by_category(category), self.currency())
    }

    fn select_vehicle(&self, session: &mut Session, vehicle: VehicleRef) -> Reply {
        let found = match vehicle {
            VehicleRef::Index(n) => {
                let (DialogueState::BrowsingCars, Some(category)) =
                    (session.state, session.selected_category)
                else {
                    return self.fallback(session);
                };
                let vehicles = self.catalog().by_category(category);
                match n.checked_sub(1).and_then(|i| vehicles.get(i)) {
                    Some(v) => v.clone(),
                    None => return replies::invalid_choice(vehicles.len()),
                }
            }
            VehicleRef::Id(id) => match self.catalog().get(&id) {
                Some(v) => v,
                None => return replies::vehicle_not_found(),
            },
        };

        session.state = DialogueState::ViewingCar;
        session.selected_category = Some(found.category);
        session.selected_vehicle = Some(found.id.clone());
        replies::vehicle_card(&found, self.currency())
    }

    fn initiate_booking(&self, session: &mut Session, vehicle_id: Option<String>) -> Reply {
        if session.state.is_payment_stage() {
            return replies::contextual_hint(session.state, session.active_booking.as_deref());
        }
        let Some(vehicle_id) = vehicle_id.or_else(|| session.selected_vehicle.clone()) else {
            return self.show_categories(session);
        };
        let Some(vehicle) = self.catalog().get(&vehicle_id) else {
            return replies::vehicle_not_found();
        };
        if !vehicle.available {
            return replies::vehicle_unavailable(&vehicle);
        }

        session.state = DialogueState::BookingForm;
        session.selected_category = Some(vehicle.category);
        session.selected_vehicle = Some(vehicle.id.clone());
        replies::booking_form(&vehicle, self.currency())
    }

    async fn submit_details(&self, session: &mut Session, text: &str, now: DateTime<Utc>) -> Reply {
        if session.state != DialogueState::BookingForm {
            return self.fallback(session);
        }
        let Some(vehicle_id) = session.selected_vehicle.clone() else {
            return self.show_categories(session);
        };
        let details = match details::parse(text) {
            Ok(details) => details,
            Err(missing) => return replies::missing_fields(&missing),
        };

        match self.ledger.create(&session.phone, &vehicle_id, &details, now) {
            Ok(booking) => {
                session.active_booking = Some(booking.id.clone());
                session.active_payment = None;
                self.start_payment(session, &booking).await
            }
            Err(LedgerError::VehicleUnavailable(_)) => {
                session.state = DialogueState::BrowsingCars;
                match self.catalog().get(&vehicle_id) {
                    Some(vehicle) => replies::vehicle_unavailable(&vehicle),
                    None => replies::vehicle_not_found(),
                }
            }
            Err(err) => {
                log::error!("Booking creation failed for {}: {}", session.phone, err);
                replies::service_error()
            }
        }
    }

    async fn start_payment(&self, session: &mut Session, booking: &Booking) -> Reply {
        let request = PaymentRequest {
            amount: booking.deposit,
            currency: self.settings.currency.clone(),
            phone: session.phone.clone(),
            reference: booking.id.clone(),
            callback_url: self.settings.callback_url.clone(),
        };

        match self.payments.create_payment(&request).await {
            Ok(handle) => {
                log::info!(
                    "Payment {} created for booking {} ({:?})",
                    handle.id,
                    booking.id,
                    handle.status
                );
                self.attach(session, booking, handle.id)
            }
            Err(err) => {
                log::error!("Payment creation failed for booking {}: {}", booking.id, err);
                session.state = DialogueState::PaymentInstructions;
                replies::payment_unavailable(booking, self.currency())
            }
        }
    }

    fn attach(&self, session: &mut Session, booking: &Booking, payment_id: String) -> Reply {
        match self.ledger.attach_payment(&booking.id, &payment_id) {
            Ok(pending) => {
                session.active_payment = Some(payment_id);
                session.state = DialogueState::PaymentPending;
                replies::payment_instructions(
                    &pending,
                    &self.settings.payment_channel,
                    &self.settings.payment_account,
                    self.currency(),
                )
            }
            Err(err) => {
                log::error!("Could not attach payment to booking {}: {}", booking.id, err);
                replies::service_error()
            }
        }
    }

    /// The customer's in-flight booking, if it is still awaiting money.
    fn open_booking(&self, session: &Session) -> Option<Booking> {
        session
            .active_booking
            .as_deref()
            .and_then(|id| self.ledger.get(id))
    }

    async fn pay_request(&self, session: &mut Session) -> Reply {
        let Some(booking) = self
            .open_booking(session)
            .filter(|b| matches!(b.status, BookingStatus::Confirmed | BookingStatus::PendingPayment))
        else {
            return self.fallback(session);
        };

        if session.state == DialogueState::PaymentInstructions || booking.payment_id.is_none() {
            return self.start_payment(session, &booking).await;
        }
        session.state = DialogueState::PaymentPending;
        replies::payment_instructions(
            &booking,
            &self.settings.payment_channel,
            &self.settings.payment_account,
            self.currency(),
        )
    }

    /// Checks a booking's payment. A button carries its own booking id, so an
    /// older booking's button settles that booking and leaves the session's
    /// current booking alone.
    async fn pay_confirm(
        &self,
        session: &mut Session,
        booking_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Reply {
        let found = match booking_id {
            Some(id) => self
                .ledger
                .get(&id)
                .filter(|b| b.customer_id == session.phone),
            None => self.open_booking(session),
        };
        let Some(booking) = found else {
            if session.state == DialogueState::Completed {
                return replies::already_completed();
            }
            return self.fallback(session);
        };

        // Only the tracked booking, or one adopted by an empty session, moves the state.
        let focus = match session.active_booking.as_deref() {
            Some(active) => active == booking.id,
            None => true,
        };
        if focus {
            session.active_booking = Some(booking.id.clone());
            session.active_payment = booking.payment_id.clone();
        }

        match booking.status {
            BookingStatus::Paid => self.finish(session, &booking, focus),
            BookingStatus::Cancelled => {
                if focus {
                    session.clear_booking();
                    session.state = DialogueState::MainMenu;
                }
                replies::booking_cancelled(Some(&booking.id))
            }
            BookingStatus::Confirmed => {
                if focus {
                    session.state = DialogueState::PaymentInstructions;
                }
                replies::payment_unavailable(&booking, self.currency())
            }
            BookingStatus::PendingPayment => {
                let Some(payment_id) = booking.payment_id.as_deref() else {
                    if focus {
                        session.state = DialogueState::PaymentInstructions;
                    }
                    return replies::payment_unavailable(&booking, self.currency());
                };
                if focus {
                    session.state = DialogueState::PaymentPending;
                }
                match self.payments.payment_status(payment_id).await {
                    Ok(PaymentStatus::Completed) => match self.settle(&booking.id, now).await {
                        Ok(paid) => self.finish(session, &paid, focus),
                        Err(LedgerError::AlreadyPaid(_)) => {
                            let paid = self
                                .ledger
                                .get(&booking.id)
                                .unwrap_or_else(|| booking.clone());
                            self.finish(session, &paid, focus)
                        }
                        Err(err) => {
                            log::error!("Could not settle booking {}: {}", booking.id, err);
                            replies::service_error()
                        }
                    },
                    Ok(PaymentStatus::Pending) => replies::payment_processing(&booking.id),
                    Ok(PaymentStatus::Failed) => replies::payment_failed(&booking.id),
                    Err(err) => {
                        log::warn!("Payment status check failed for {}: {}", payment_id, err);
                        replies::payment_processing(&booking.id)
                    }
                }
            }
        }
    }

    /// Marks the booking paid and fans out confirmations, exactly once.
    async fn settle(&self, booking_id: &str, now: DateTime<Utc>) -> Result<Booking, LedgerError> {
        let paid = self.ledger.mark_paid(booking_id, now)?;
        self.notifier.notify_payment_confirmed(&paid).await;
        Ok(paid)
    }

    fn complete(&self, session: &mut Session, booking: &Booking) -> Reply {
        session.state = DialogueState::Completed;
        session.clear_booking();
        session.selected_vehicle = None;
        replies::payment_confirmed(booking, self.currency())
    }

    fn finish(&self, session: &mut Session, booking: &Booking, focus: bool) -> Reply {
        if focus {
            return self.complete(session, booking);
        }
        replies::payment_confirmed(booking, self.currency())
    }

    fn cancel(&self, session: &mut Session, booking_id: Option<String>, now: DateTime<Utc>) -> Reply {
        if session.state == DialogueState::BookingForm {
            session.state = DialogueState::MainMenu;
            session.selected_vehicle = None;
            return replies::booking_cancelled(None);
        }
        // A form's cancel button outside the form never touches a booking.
        if booking_id.as_deref() == Some("form") {
            return replies::nothing_to_cancel();
        }

        let target = booking_id.or_else(|| session.active_booking.clone());
        let Some(booking) = target
            .and_then(|id| self.ledger.get(&id))
            .filter(|b| b.customer_id == session.phone)
        else {
            return replies::nothing_to_cancel();
        };

        match self.ledger.cancel(&booking.id, now) {
            Ok(cancelled) => {
                if session.active_booking.as_deref() == Some(cancelled.id.as_str()) {
                    session.clear_booking();
                    session.state = DialogueState::MainMenu;
                }
                replies::booking_cancelled(Some(&cancelled.id))
            }
            Err(LedgerError::AlreadyPaid(id)) => replies::cannot_cancel_paid(&id),
            Err(LedgerError::Cancelled(_)) => replies::nothing_to_cancel(),
            Err(err) => {
                log::error!("Cancelling booking {} failed: {}", booking.id, err);
                replies::service_error()
            }
        }
    }

    /// Consumes an asynchronous payment status from the gateway callback.
    /// Returns the message to push to the customer, if any.
    pub async fn apply_payment_update(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Option<Delivery> {
        let Some(booking) = self.ledger.find_by_payment(payment_id) else {
            log::warn!("Payment update for unknown payment {}", payment_id);
            return None;
        };

        match status {
            PaymentStatus::Pending => None,
            PaymentStatus::Failed => {
                let session = self.sessions.acquire(&booking.customer_id).await;
                let waiting = session.state == DialogueState::PaymentPending
                    && session.active_booking.as_deref() == Some(booking.id.as_str());
                waiting.then(|| Delivery {
                    phone: booking.customer_id.clone(),
                    reply: replies::payment_failed(&booking.id),
                })
            }
            PaymentStatus::Completed => {
                let mut session = self.sessions.acquire(&booking.customer_id).await;
                match self.settle(&booking.id, now).await {
                    Ok(paid) => {
                        let reply = if session.active_booking.as_deref() == Some(paid.id.as_str()) {
                            self.complete(&mut session, &paid)
                        } else {
                            replies::payment_confirmed(&paid, self.currency())
                        };
                        Some(Delivery {
                            phone: paid.customer_id.clone(),
                            reply,
                        })
                    }
                    Err(LedgerError::AlreadyPaid(_)) => None,
                    Err(err) => {
                        log::warn!("Ignoring payment update for {}: {}", booking.id, err);
                        None
                    }
                }
            }
        }
    }
}
