use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::error::LedgerError;
use crate::model::{Booking, BookingDetails, BookingStatus};

pub struct Ledger {
    bookings: Mutex<HashMap<String, Booking>>,
    catalog: Arc<Catalog>,
    deposit_percent: u64,
}

/// `total = rate × days`, `deposit = floor(total × percent / 100)`.
pub fn price(daily_rate: u64, days: u32, deposit_percent: u64) -> (u64, u64) {
    let total = daily_rate * u64::from(days);
    (total, total * deposit_percent / 100)
}

fn booking_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("BK{}{}", now.timestamp_millis(), suffix[..4].to_uppercase())
}

impl Ledger {
    pub fn new(catalog: Arc<Catalog>, deposit_percent: u64) -> Self {
        Self {
            bookings: Mutex::new(HashMap::new()),
            catalog,
            deposit_percent,
        }
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, Booking>> {
        self.bookings.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Reserves the vehicle and records a `confirmed` booking against it.
    pub fn create(
        &self,
        customer_id: &str,
        vehicle_id: &str,
        details: &BookingDetails,
        now: DateTime<Utc>,
    ) -> Result<Booking, LedgerError> {
        if details.days == 0 {
            return Err(LedgerError::InvalidDays);
        }
        let vehicle = self.catalog.reserve(vehicle_id)?;
        let (total, deposit) = price(vehicle.daily_price, details.days, self.deposit_percent);

        let booking = Booking {
            id: booking_id(now),
            customer_id: customer_id.to_string(),
            customer_name: details.customer_name.clone(),
            vehicle_id: vehicle.id,
            vehicle_name: vehicle.name,
            pickup: details.pickup.clone(),
            return_at: details.return_at.clone(),
            days: details.days,
            daily_rate: vehicle.daily_price,
            total,
            deposit,
            status: BookingStatus::Confirmed,
            payment_id: None,
            created_at: now,
            paid_at: None,
            cancelled_at: None,
        };

        self.guard().insert(booking.id.clone(), booking.clone());
        log::info!(
            "Booking {} created for {} on vehicle {} ({} days, total {})",
            booking.id,
            booking.customer_id,
            booking.vehicle_id,
            booking.days,
            booking.total
        );
        Ok(booking)
    }

    pub fn get(&self, id: &str) -> Option<Booking> {
        self.guard().get(id).cloned()
    }

    /// Oldest first.
    pub fn list_by_customer(&self, customer_id: &str) -> Vec<Booking> {
        let mut bookings: Vec<Booking> = self
            .guard()
            .values()
            .filter(|b| b.customer_id == customer_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        bookings
    }

    pub fn find_by_payment(&self, payment_id: &str) -> Option<Booking> {
        self.guard()
            .values()
            .find(|b| b.payment_id.as_deref() == Some(payment_id))
            .cloned()
    }

    pub fn attach_payment(&self, id: &str, payment_id: &str) -> Result<Booking, LedgerError> {
        let mut bookings = self.guard();
        let booking = bookings
            .get_mut(id)
            .ok_or_else(|| LedgerError::BookingNotFound(id.to_string()))?;
        match booking.status {
            BookingStatus::Paid => Err(LedgerError::AlreadyPaid(id.to_string())),
            BookingStatus::Cancelled => Err(LedgerError::Cancelled(id.to_string())),
            BookingStatus::Confirmed | BookingStatus::PendingPayment => {
                booking.payment_id = Some(payment_id.to_string());
                booking.status = BookingStatus::PendingPayment;
                Ok(booking.clone())
            }
        }
    }

    /// Fails with `AlreadyPaid` on a repeat so callers fire notifications once.
    pub fn mark_paid(&self, id: &str, paid_at: DateTime<Utc>) -> Result<Booking, LedgerError> {
        let mut bookings = self.guard();
        let booking = bookings
            .get_mut(id)
            .ok_or_else(|| LedgerError::BookingNotFound(id.to_string()))?;
        match booking.status {
            BookingStatus::Paid => Err(LedgerError::AlreadyPaid(id.to_string())),
            BookingStatus::Cancelled => Err(LedgerError::Cancelled(id.to_string())),
            BookingStatus::Confirmed | BookingStatus::PendingPayment => {
                booking.status = BookingStatus::Paid;
                booking.paid_at = Some(paid_at);
                log::info!("Booking {} marked paid", id);
                Ok(booking.clone())
            }
        }
    }

    /// Cancels an unpaid booking and puts its vehicle back on the market.
    pub fn cancel(&self, id: &str, now: DateTime<Utc>) -> Result<Booking, LedgerError> {
        let booking = {
            let mut bookings = self.guard();
            let booking = bookings
                .get_mut(id)
                .ok_or_else(|| LedgerError::BookingNotFound(id.to_string()))?;
            match booking.status {
                BookingStatus::Paid => return Err(LedgerError::AlreadyPaid(id.to_string())),
                BookingStatus::Cancelled => return Err(LedgerError::Cancelled(id.to_string())),
                BookingStatus::Confirmed | BookingStatus::PendingPayment => {}
            }
            booking.status = BookingStatus::Cancelled;
            booking.cancelled_at = Some(now);
            booking.clone()
        };
        self.catalog.release(&booking.vehicle_id)?;
        log::info!(
            "Booking {} cancelled, vehicle {} released",
            booking.id,
            booking.vehicle_id
        );
        Ok(booking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(Catalog::seeded()), 50)
    }

    fn details(days: u32) -> BookingDetails {
        BookingDetails {
            customer_name: "Amina Juma".to_string(),
            pickup: "Friday 10am".to_string(),
            return_at: "Monday 10am".to_string(),
            days,
        }
    }

    #[test]
    fn totals_and_deposit() {
        for days in [1u32, 2, 3, 7] {
            let ledger = ledger();
            let booking = ledger
                .create("+255700000000", "eco-02", &details(days), Utc::now())
                .unwrap();
            assert_eq!(booking.total, 65_000 * u64::from(days));
            assert_eq!(booking.deposit, booking.total / 2);
            assert_eq!(booking.status, BookingStatus::Confirmed);
        }
    }

    #[test]
    fn deposit_rounds_down() {
        assert_eq!(price(333, 1, 50), (333, 166));
        assert_eq!(price(1_001, 3, 30), (3_003, 900));
        assert_eq!(price(60_000, 7, 100), (420_000, 420_000));
    }

    #[test]
    fn create_then_list_round_trip() {
        let ledger = ledger();
        let booking = ledger
            .create("+255700000000", "suv-01", &details(3), Utc::now())
            .unwrap();
        let listed = ledger.list_by_customer("+255700000000");
        assert_eq!(listed, vec![booking.clone()]);
        assert_eq!(ledger.get(&booking.id), Some(booking));
        assert!(ledger.list_by_customer("+255799999999").is_empty());
    }

    #[test]
    fn booking_marks_vehicle_unavailable() {
        let ledger = ledger();
        ledger
            .create("+255700000000", "lux-01", &details(1), Utc::now())
            .unwrap();
        let listed = ledger.catalog().by_category(Category::Luxury);
        assert!(!listed.iter().find(|v| v.id == "lux-01").unwrap().available);
        assert_eq!(
            ledger.create("+255711111111", "lux-01", &details(1), Utc::now()),
            Err(LedgerError::VehicleUnavailable("lux-01".into()))
        );
    }

    #[test]
    fn zero_days_rejected_without_reserving() {
        let ledger = ledger();
        assert_eq!(
            ledger.create("+255700000000", "van-01", &details(0), Utc::now()),
            Err(LedgerError::InvalidDays)
        );
        assert!(ledger.catalog().get("van-01").unwrap().available);
    }

    #[test]
    fn payment_lifecycle() {
        let ledger = ledger();
        let booking = ledger
            .create("+255700000000", "van-02", &details(2), Utc::now())
            .unwrap();
        let pending = ledger.attach_payment(&booking.id, "pay-1").unwrap();
        assert_eq!(pending.status, BookingStatus::PendingPayment);
        assert_eq!(ledger.find_by_payment("pay-1").unwrap().id, booking.id);

        let paid = ledger.mark_paid(&booking.id, Utc::now()).unwrap();
        assert_eq!(paid.status, BookingStatus::Paid);
        assert!(paid.paid_at.is_some());
        assert_eq!(
            ledger.mark_paid(&booking.id, Utc::now()),
            Err(LedgerError::AlreadyPaid(booking.id.clone()))
        );
        assert_eq!(
            ledger.cancel(&booking.id, Utc::now()),
            Err(LedgerError::AlreadyPaid(booking.id.clone()))
        );
    }

    #[test]
    fn cancel_releases_vehicle() {
        let ledger = ledger();
        let booking = ledger
            .create("+255700000000", "eco-03", &details(2), Utc::now())
            .unwrap();
        let cancelled = ledger.cancel(&booking.id, Utc::now()).unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert!(ledger.catalog().get("eco-03").unwrap().available);
        assert_eq!(
            ledger.mark_paid(&booking.id, Utc::now()),
            Err(LedgerError::Cancelled(booking.id.clone()))
        );
    }

    #[test]
    fn ids_are_unique() {
        let ledger = ledger();
        let now = Utc::now();
        let a = ledger.create("+1", "eco-01", &details(1), now).unwrap();
        let b = ledger.create("+1", "eco-02", &details(1), now).unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("BK"));
    }
}
