use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Economy,
    Suv,
    Luxury,
    Van,
}

impl Category {
    /// Display order used by menus and numbered replies.
    pub const ALL: [Category; 4] = [
        Category::Economy,
        Category::Suv,
        Category::Luxury,
        Category::Van,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Economy => "economy",
            Category::Suv => "suv",
            Category::Luxury => "luxury",
            Category::Van => "van",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::Economy => "Economy",
            Category::Suv => "SUV",
            Category::Luxury => "Luxury",
            Category::Van => "Van",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Category::Economy => "🚗",
            Category::Suv => "🚙",
            Category::Luxury => "🏎️",
            Category::Van => "🚐",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "economy" => Some(Category::Economy),
            "suv" | "suvs" => Some(Category::Suv),
            "luxury" => Some(Category::Luxury),
            "van" | "vans" | "minibus" => Some(Category::Van),
            _ => None,
        }
    }

    /// 1-based position in [`Category::ALL`].
    pub fn from_index(index: usize) -> Option<Self> {
        index.checked_sub(1).and_then(|i| Self::ALL.get(i).copied())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    pub category: Category,
    pub name: String,
    pub daily_price: u64,
    pub features: Vec<String>,
    pub available: bool,
    pub location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueState {
    New,
    MainMenu,
    SelectingCategory,
    BrowsingCars,
    ViewingCar,
    BookingForm,
    PaymentPending,
    PaymentInstructions,
    Completed,
}

impl DialogueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogueState::New => "new",
            DialogueState::MainMenu => "main_menu",
            DialogueState::SelectingCategory => "selecting_category",
            DialogueState::BrowsingCars => "browsing_cars",
            DialogueState::ViewingCar => "viewing_car",
            DialogueState::BookingForm => "booking_form",
            DialogueState::PaymentPending => "payment_pending",
            DialogueState::PaymentInstructions => "payment_instructions",
            DialogueState::Completed => "completed",
        }
    }

    pub fn is_payment_stage(&self) -> bool {
        matches!(
            self,
            DialogueState::PaymentPending | DialogueState::PaymentInstructions
        )
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub phone: String,
    pub state: DialogueState,
    pub customer_name: Option<String>,
    pub selected_category: Option<Category>,
    pub selected_vehicle: Option<String>,
    pub active_booking: Option<String>,
    pub active_payment: Option<String>,
    pub message_count: u64,
    pub last_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(phone: &str, now: DateTime<Utc>) -> Self {
        Self {
            phone: phone.to_string(),
            state: DialogueState::New,
            customer_name: None,
            selected_category: None,
            selected_vehicle: None,
            active_booking: None,
            active_payment: None,
            message_count: 0,
            last_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Drops the booking and payment references of a finished or abandoned flow.
    pub fn clear_booking(&mut self) {
        self.active_booking = None;
        self.active_payment = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    PendingPayment,
    Paid,
    Cancelled,
}

impl BookingStatus {
    pub fn emoji(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "📝",
            BookingStatus::PendingPayment => "⏳",
            BookingStatus::Paid => "✅",
            BookingStatus::Cancelled => "❌",
        }
    }
}

/// Customer-supplied booking form, pickup and return kept as free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDetails {
    pub customer_name: String,
    pub pickup: String,
    pub return_at: String,
    pub days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub vehicle_id: String,
    pub vehicle_name: String,
    pub pickup: String,
    pub return_at: String,
    pub days: u32,
    pub daily_rate: u64,
    pub total: u64,
    pub deposit: u64,
    pub status: BookingStatus,
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    /// Maps the provider's status vocabulary onto the three states the bot acts on.
    pub fn from_provider(status: &str) -> Self {
        match status.to_lowercase().as_str() {
            "completed" | "successful" | "success" | "paid" | "settled" => {
                PaymentStatus::Completed
            }
            "failed" | "cancelled" | "canceled" | "rejected" | "expired" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentHandle {
    pub id: String,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub id: String,
    pub title: String,
}

impl Button {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interactive {
    Buttons(Vec<Button>),
    List {
        button_label: String,
        sections: Vec<ListSection>,
    },
}

/// One outbound message produced by a dialogue turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub footer: Option<String>,
    pub interactive: Option<Interactive>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            footer: None,
            interactive: None,
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<Button>) -> Self {
        self.interactive = Some(Interactive::Buttons(buttons));
        self
    }

    pub fn with_list(mut self, button_label: impl Into<String>, sections: Vec<ListSection>) -> Self {
        self.interactive = Some(Interactive::List {
            button_label: button_label.into(),
            sections,
        });
        self
    }

    pub fn with_footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    #[cfg(test)]
    pub fn buttons(&self) -> &[Button] {
        match &self.interactive {
            Some(Interactive::Buttons(buttons)) => buttons,
            _ => &[],
        }
    }

    #[cfg(test)]
    pub fn button_ids(&self) -> Vec<&str> {
        self.buttons().iter().map(|b| b.id.as_str()).collect()
    }
}
