//! Deterministic intent classification.
//!
//! Rules are evaluated top to bottom and the first hit wins. Button and list
//! ids are checked before any free-text rule so an interactive reply can never
//! be misread as prose.

use crate::details;
use crate::model::Category;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VehicleRef {
    /// 1-based position in the list last shown to the customer.
    Index(usize),
    Id(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    BrowseCatalog,
    SelectCategory(Category),
    SelectVehicle(VehicleRef),
    InitiateBooking(Option<String>),
    SubmitBookingDetails(String),
    PayRequest,
    /// Booking id when the customer tapped a booking's own payment button.
    PayConfirm(Option<String>),
    PriceInquiry,
    LocationInquiry,
    HelpRequest,
    BookingStatusCheck,
    CancelBooking(Option<String>),
    Unknown,
}

impl Intent {
    pub fn tag(&self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::BrowseCatalog => "browse_catalog",
            Intent::SelectCategory(_) => "select_category",
            Intent::SelectVehicle(_) => "select_vehicle",
            Intent::InitiateBooking(_) => "initiate_booking",
            Intent::SubmitBookingDetails(_) => "submit_booking_details",
            Intent::PayRequest => "pay_request",
            Intent::PayConfirm(_) => "pay_confirm",
            Intent::PriceInquiry => "price_inquiry",
            Intent::LocationInquiry => "location_inquiry",
            Intent::HelpRequest => "help_request",
            Intent::BookingStatusCheck => "booking_status_check",
            Intent::CancelBooking(_) => "cancel_booking",
            Intent::Unknown => "unknown",
        }
    }
}

struct Input<'a> {
    raw: &'a str,
    text: String,
    words: Vec<String>,
    button_id: Option<&'a str>,
}

impl<'a> Input<'a> {
    fn new(raw: &'a str, button_id: Option<&'a str>) -> Self {
        let text = raw.trim().to_lowercase();
        let words = text
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            raw,
            text,
            words,
            button_id: button_id.map(str::trim).filter(|id| !id.is_empty()),
        }
    }
}

enum Pattern {
    /// Button/list id with this prefix; the remainder is the subject.
    IdPrefix(&'static str),
    IdExact(&'static str),
    /// Any whole word of the text.
    Words(&'static [&'static str]),
    /// Any substring of the text.
    Phrases(&'static [&'static str]),
    Number,
    DetailsForm,
}

impl Pattern {
    fn subject<'i>(&self, input: &'i Input<'_>) -> Option<&'i str> {
        match self {
            Pattern::IdPrefix(prefix) => input
                .button_id?
                .strip_prefix(prefix)
                .filter(|rest| !rest.is_empty()),
            Pattern::IdExact(id) => input.button_id.filter(|b| b == id),
            Pattern::Words(words) => input
                .words
                .iter()
                .any(|w| words.contains(&w.as_str()))
                .then_some(input.text.as_str()),
            Pattern::Phrases(phrases) => phrases
                .iter()
                .any(|p| input.text.contains(p))
                .then_some(input.text.as_str()),
            Pattern::Number => {
                let n: usize = input.text.trim_end_matches('.').parse().ok()?;
                (1..100).contains(&n).then_some(input.text.as_str())
            }
            Pattern::DetailsForm => details::looks_like_details(input.raw).then_some(input.raw),
        }
    }
}

struct Rule {
    pattern: Pattern,
    build: fn(&str) -> Option<Intent>,
}

const GREETING_WORDS: &[&str] = &[
    "hi", "hello", "hey", "start", "menu", "habari", "mambo", "jambo", "hujambo",
];

static RULES: &[Rule] = &[
    Rule {
        pattern: Pattern::IdPrefix("car_"),
        build: |id| Some(Intent::SelectVehicle(VehicleRef::Id(id.to_string()))),
    },
    Rule {
        pattern: Pattern::IdPrefix("book_"),
        build: |id| Some(Intent::InitiateBooking(Some(id.to_string()))),
    },
    Rule {
        pattern: Pattern::IdPrefix("pay_retry"),
        build: |_| Some(Intent::PayRequest),
    },
    Rule {
        pattern: Pattern::IdPrefix("pay_confirm_"),
        build: |id| Some(Intent::PayConfirm(Some(id.to_string()))),
    },
    Rule {
        pattern: Pattern::IdPrefix("pay_"),
        build: |_| Some(Intent::PayConfirm(None)),
    },
    Rule {
        pattern: Pattern::IdPrefix("cat_"),
        build: |cat| Category::parse(cat).map(Intent::SelectCategory),
    },
    Rule {
        pattern: Pattern::IdPrefix("cancel_"),
        build: |id| Some(Intent::CancelBooking(Some(id.to_string()))),
    },
    Rule {
        pattern: Pattern::IdExact("browse_cars"),
        build: |_| Some(Intent::BrowseCatalog),
    },
    Rule {
        pattern: Pattern::IdExact("my_bookings"),
        build: |_| Some(Intent::BookingStatusCheck),
    },
    Rule {
        pattern: Pattern::IdExact("help"),
        build: |_| Some(Intent::HelpRequest),
    },
    Rule {
        pattern: Pattern::IdExact("support"),
        build: |_| Some(Intent::HelpRequest),
    },
    Rule {
        pattern: Pattern::IdExact("main_menu"),
        build: |_| Some(Intent::Greeting),
    },
    Rule {
        pattern: Pattern::DetailsForm,
        build: |raw| Some(Intent::SubmitBookingDetails(raw.trim().to_string())),
    },
    Rule {
        pattern: Pattern::Number,
        build: |n| {
            n.trim_end_matches('.')
                .parse()
                .ok()
                .map(|i| Intent::SelectVehicle(VehicleRef::Index(i)))
        },
    },
    Rule {
        pattern: Pattern::Words(GREETING_WORDS),
        build: |_| Some(Intent::Greeting),
    },
    Rule {
        pattern: Pattern::Phrases(&["i have paid", "i've paid", "check again", "check payment", "payment done"]),
        build: |_| Some(Intent::PayConfirm(None)),
    },
    Rule {
        pattern: Pattern::Words(&["paid", "nimelipa"]),
        build: |_| Some(Intent::PayConfirm(None)),
    },
    Rule {
        pattern: Pattern::Phrases(&["my booking", "booking status", "my reservation"]),
        build: |_| Some(Intent::BookingStatusCheck),
    },
    Rule {
        pattern: Pattern::Words(&["status", "bookings"]),
        build: |_| Some(Intent::BookingStatusCheck),
    },
    Rule {
        pattern: Pattern::Phrases(&["retry payment", "how to pay", "how do i pay", "pay now"]),
        build: |_| Some(Intent::PayRequest),
    },
    Rule {
        pattern: Pattern::Words(&["pay", "lipa"]),
        build: |_| Some(Intent::PayRequest),
    },
    Rule {
        pattern: Pattern::Words(&["cancel", "ghairi"]),
        build: |_| Some(Intent::CancelBooking(None)),
    },
    Rule {
        pattern: Pattern::Words(&["book", "reserve", "rent", "hire"]),
        build: |_| Some(Intent::InitiateBooking(None)),
    },
    Rule {
        pattern: Pattern::Phrases(&["how much"]),
        build: |_| Some(Intent::PriceInquiry),
    },
    Rule {
        pattern: Pattern::Words(&["price", "prices", "cost", "rate", "rates", "bei"]),
        build: |_| Some(Intent::PriceInquiry),
    },
    Rule {
        pattern: Pattern::Words(&["where", "location", "locations", "address", "branch", "wapi"]),
        build: |_| Some(Intent::LocationInquiry),
    },
    Rule {
        pattern: Pattern::Words(&["help", "support", "assist", "msaada"]),
        build: |_| Some(Intent::HelpRequest),
    },
    Rule {
        pattern: Pattern::Words(&["economy", "suv", "suvs", "luxury", "van", "vans"]),
        build: |text| {
            text.split(|c: char| !c.is_alphanumeric())
                .find_map(Category::parse)
                .map(Intent::SelectCategory)
        },
    },
    Rule {
        pattern: Pattern::Words(&[
            "browse", "cars", "car", "catalog", "catalogue", "fleet", "vehicles", "magari",
        ]),
        build: |_| Some(Intent::BrowseCatalog),
    },
];

/// Classifies one inbound message. `button_id` is the id of a tapped button
/// or list row; `text` is the typed body or the tapped option's title.
pub fn classify(text: &str, button_id: Option<&str>) -> Intent {
    let input = Input::new(text, button_id);
    RULES
        .iter()
        .find_map(|rule| rule.pattern.subject(&input).and_then(rule.build))
        .unwrap_or(Intent::Unknown)
}
