use std::sync::{Mutex, MutexGuard};

use crate::error::LedgerError;
use crate::model::{Category, Vehicle};

/// In-memory fleet. Vehicle order is insertion order and drives the numbering
/// customers see when browsing a category.
pub struct Catalog {
    vehicles: Mutex<Vec<Vehicle>>,
}

impl Catalog {
    pub fn new(vehicles: Vec<Vehicle>) -> Self {
        Self {
            vehicles: Mutex::new(vehicles),
        }
    }

    pub fn seeded() -> Self {
        Self::new(seed_vehicles())
    }

    fn guard(&self) -> MutexGuard<'_, Vec<Vehicle>> {
        self.vehicles.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn get(&self, id: &str) -> Option<Vehicle> {
        self.guard().iter().find(|v| v.id == id).cloned()
    }

    /// Every vehicle of the category, available or not.
    pub fn by_category(&self, category: Category) -> Vec<Vehicle> {
        self.guard()
            .iter()
            .filter(|v| v.category == category)
            .cloned()
            .collect()
    }

    pub fn available_count(&self, category: Category) -> usize {
        self.guard()
            .iter()
            .filter(|v| v.category == category && v.available)
            .count()
    }

    /// Lowest daily price in the category, if it has any vehicles.
    pub fn starting_price(&self, category: Category) -> Option<u64> {
        self.guard()
            .iter()
            .filter(|v| v.category == category)
            .map(|v| v.daily_price)
            .min()
    }

    pub fn locations(&self) -> Vec<String> {
        let mut locations: Vec<String> = Vec::new();
        for vehicle in self.guard().iter() {
            if !locations.contains(&vehicle.location) {
                locations.push(vehicle.location.clone());
            }
        }
        locations
    }

    /// Marks the vehicle unavailable. Fails if it is already taken, so two
    /// bookings can never hold the same car.
    pub fn reserve(&self, id: &str) -> Result<Vehicle, LedgerError> {
        let mut vehicles = self.guard();
        let vehicle = vehicles
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| LedgerError::VehicleNotFound(id.to_string()))?;
        if !vehicle.available {
            return Err(LedgerError::VehicleUnavailable(id.to_string()));
        }
        vehicle.available = false;
        Ok(vehicle.clone())
    }

    pub fn release(&self, id: &str) -> Result<(), LedgerError> {
        let mut vehicles = self.guard();
        let vehicle = vehicles
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| LedgerError::VehicleNotFound(id.to_string()))?;
        vehicle.available = true;
        Ok(())
    }
}

fn vehicle(
    id: &str,
    category: Category,
    name: &str,
    daily_price: u64,
    features: &[&str],
    location: &str,
) -> Vehicle {
    Vehicle {
        id: id.to_string(),
        category,
        name: name.to_string(),
        daily_price,
        features: features.iter().map(|f| f.to_string()).collect(),
        available: true,
        location: location.to_string(),
    }
}

const CITY: &str = "Dar es Salaam City Centre";
const AIRPORT: &str = "Julius Nyerere International Airport";
const ARUSHA: &str = "Arusha Clock Tower";

pub fn seed_vehicles() -> Vec<Vehicle> {
    vec![
        vehicle(
            "eco-01",
            Category::Economy,
            "Toyota Vitz",
            60_000,
            &["Automatic", "5 seats", "Air conditioning", "Fuel efficient"],
            CITY,
        ),
        vehicle(
            "eco-02",
            Category::Economy,
            "Suzuki Swift",
            65_000,
            &["Manual", "5 seats", "Air conditioning", "Bluetooth"],
            CITY,
        ),
        vehicle(
            "eco-03",
            Category::Economy,
            "Toyota IST",
            70_000,
            &["Automatic", "5 seats", "Air conditioning"],
            AIRPORT,
        ),
        vehicle(
            "suv-01",
            Category::Suv,
            "Toyota RAV4",
            120_000,
            &["Automatic", "4WD", "5 seats", "Roof rack"],
            CITY,
        ),
        vehicle(
            "suv-02",
            Category::Suv,
            "Toyota Land Cruiser Prado",
            200_000,
            &["Automatic", "4WD", "7 seats", "Safari ready"],
            ARUSHA,
        ),
        vehicle(
            "suv-03",
            Category::Suv,
            "Nissan X-Trail",
            130_000,
            &["Automatic", "AWD", "5 seats", "Reverse camera"],
            AIRPORT,
        ),
        vehicle(
            "lux-01",
            Category::Luxury,
            "Mercedes-Benz E-Class",
            300_000,
            &["Automatic", "Leather seats", "Chauffeur option", "Climate control"],
            CITY,
        ),
        vehicle(
            "lux-02",
            Category::Luxury,
            "Toyota Land Cruiser V8",
            350_000,
            &["Automatic", "4WD", "7 seats", "Premium sound"],
            ARUSHA,
        ),
        vehicle(
            "van-01",
            Category::Van,
            "Toyota Hiace",
            150_000,
            &["Manual", "14 seats", "Large luggage space"],
            AIRPORT,
        ),
        vehicle(
            "van-02",
            Category::Van,
            "Toyota Noah",
            110_000,
            &["Automatic", "8 seats", "Sliding doors"],
            CITY,
        ),
    ]
}
