use crate::details::Field;
use crate::model::{
    Booking, BookingStatus, Button, Category, DialogueState, ListRow, ListSection, Reply, Vehicle,
};

pub fn money(amount: u64, currency: &str) -> String {
    let digits = amount.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{} {}", currency, grouped)
}

fn menu_buttons() -> Vec<Button> {
    vec![
        Button::new("browse_cars", "Browse Cars"),
        Button::new("my_bookings", "My Bookings"),
        Button::new("help", "Help"),
    ]
}

pub fn welcome(name: Option<&str>) -> Reply {
    let greeting = match name {
        Some(name) => format!("👋 Hello {}! Welcome to *Kibo Car Rentals*! 🚗", name),
        None => "👋 Hello! Welcome to *Kibo Car Rentals*! 🚗".to_string(),
    };
    Reply::text(format!(
        "{}\n\nRent a car in minutes, pay with mobile money and pick it up at a branch near you.\n\nWhat would you like to do?",
        greeting
    ))
    .with_buttons(menu_buttons())
}

pub fn category_menu(counts: &[(Category, usize, Option<u64>)], currency: &str) -> Reply {
    let mut text = "🚘 *Our Fleet*\n\nChoose a category:\n".to_string();
    let mut rows = Vec::new();
    for (i, (category, available, from)) in counts.iter().enumerate() {
        let from = from
            .map(|p| format!("from {}/day", money(p, currency)))
            .unwrap_or_default();
        text.push_str(&format!(
            "\n{}. {} {} ({} available) {}",
            i + 1,
            category.emoji(),
            category.label(),
            available,
            from
        ));
        rows.push(ListRow {
            id: format!("cat_{}", category.as_str()),
            title: category.label().to_string(),
            description: Some(format!("{} available {}", available, from).trim().to_string()),
        });
    }
    text.push_str("\n\nReply with a number or tap *View Categories*.");
    Reply::text(text).with_list(
        "View Categories",
        vec![ListSection {
            title: "Categories".to_string(),
            rows,
        }],
    )
}

pub fn vehicle_list(category: Category, vehicles: &[Vehicle], currency: &str) -> Reply {
    if vehicles.is_empty() {
        return Reply::text(format!(
            "😔 We have no {} cars at the moment. Please pick another category.",
            category.label()
        ))
        .with_buttons(vec![
            Button::new("browse_cars", "Other Categories"),
            Button::new("main_menu", "Main Menu"),
        ]);
    }

    let mut text = format!("{} *{} Cars*\n", category.emoji(), category.label());
    let mut rows = Vec::new();
    for (i, vehicle) in vehicles.iter().enumerate() {
        let availability = if vehicle.available {
            "✅ Available"
        } else {
            "❌ Unavailable"
        };
        text.push_str(&format!(
            "\n{}. *{}*\n   💰 {}/day\n   {}",
            i + 1,
            vehicle.name,
            money(vehicle.daily_price, currency),
            availability
        ));
        rows.push(ListRow {
            id: format!("car_{}", vehicle.id),
            title: vehicle.name.clone(),
            description: Some(format!(
                "{}/day · {}",
                money(vehicle.daily_price, currency),
                if vehicle.available { "Available" } else { "Unavailable" }
            )),
        });
    }
    text.push_str("\n\nReply with the car number to see details.");
    Reply::text(text).with_list(
        "View Cars",
        vec![ListSection {
            title: category.label().to_string(),
            rows,
        }],
    )
}

pub fn vehicle_card(vehicle: &Vehicle, currency: &str) -> Reply {
    let features = vehicle
        .features
        .iter()
        .map(|f| format!("• {}", f))
        .collect::<Vec<_>>()
        .join("\n");
    let availability = if vehicle.available {
        "✅ Available now"
    } else {
        "❌ Currently unavailable"
    };
    let text = format!(
        "{} *{}*\n\n💰 {}/day\n📍 {}\n{}\n\n*Features:*\n{}",
        vehicle.category.emoji(),
        vehicle.name,
        money(vehicle.daily_price, currency),
        vehicle.location,
        availability,
        features
    );

    let mut buttons = Vec::new();
    if vehicle.available {
        buttons.push(Button::new(format!("book_{}", vehicle.id), "Book Now"));
    }
    buttons.push(Button::new(
        format!("cat_{}", vehicle.category.as_str()),
        "Back to Cars",
    ));
    buttons.push(Button::new("main_menu", "Main Menu"));
    Reply::text(text).with_buttons(buttons)
}

pub fn vehicle_unavailable(vehicle: &Vehicle) -> Reply {
    Reply::text(format!(
        "❌ Sorry, the *{}* is currently unavailable. Please choose another car.",
        vehicle.name
    ))
    .with_buttons(vec![
        Button::new(format!("cat_{}", vehicle.category.as_str()), "Back to Cars"),
        Button::new("main_menu", "Main Menu"),
    ])
}

pub fn vehicle_not_found() -> Reply {
    Reply::text("❓ I couldn't find that car. Please pick one from the list.").with_buttons(vec![
        Button::new("browse_cars", "Browse Cars"),
        Button::new("main_menu", "Main Menu"),
    ])
}

pub fn invalid_choice(max: usize) -> Reply {
    Reply::text(format!(
        "❓ Please reply with a number between 1 and {}.",
        max
    ))
}

pub fn booking_form(vehicle: &Vehicle, currency: &str) -> Reply {
    Reply::text(format!(
        "📝 *Booking: {}* ({}/day)\n\nPlease send your details in this format:\n\n\
        Name: Your full name\n\
        Pickup: Pickup date and time\n\
        Return: Return date and time\n\
        Days: Number of days\n\n\
        *Example:*\nName: Amina Juma\nPickup: 12 March, 9am\nReturn: 15 March, 9am\nDays: 3",
        vehicle.name,
        money(vehicle.daily_price, currency)
    ))
    .with_buttons(vec![Button::new("cancel_form", "Cancel")])
}

pub fn missing_fields(missing: &[Field]) -> Reply {
    let list = missing
        .iter()
        .map(|f| format!("• {}", f.label()))
        .collect::<Vec<_>>()
        .join("\n");
    Reply::text(format!(
        "⚠️ Some booking details are missing or invalid:\n\n{}\n\n\
        Please send all of them, e.g.\nName: Amina Juma\nPickup: 12 March, 9am\nReturn: 15 March, 9am\nDays: 3",
        list
    ))
}

pub fn payment_instructions(booking: &Booking, channel: &str, account: &str, currency: &str) -> Reply {
    Reply::text(format!(
        "✅ *Booking {} created!*\n\n\
        🚗 {}\n\
        📅 {} → {} ({} days)\n\
        💵 Total: {}\n\
        💳 Deposit due now: *{}*\n\n\
        *How to pay:*\n\
        1. A {} payment request has been sent to your phone. Approve it with your PIN.\n\
        2. Or pay manually to account *{}* with reference *{}*.\n\n\
        Tap *I have paid* once done.",
        booking.id,
        booking.vehicle_name,
        booking.pickup,
        booking.return_at,
        booking.days,
        money(booking.total, currency),
        money(booking.deposit, currency),
        channel,
        account,
        booking.id
    ))
    .with_buttons(vec![
        Button::new(format!("pay_confirm_{}", booking.id), "I have paid"),
        Button::new(format!("cancel_{}", booking.id), "Cancel Booking"),
    ])
    .with_footer(format!("Reference: {}", booking.id))
}

pub fn payment_unavailable(booking: &Booking, currency: &str) -> Reply {
    Reply::text(format!(
        "⚠️ Your booking *{}* is saved, but we couldn't start the payment of {} right now.\n\n\
        Please tap *Retry Payment* in a moment or contact support.",
        booking.id,
        money(booking.deposit, currency)
    ))
    .with_buttons(vec![
        Button::new(format!("pay_retry_{}", booking.id), "Retry Payment"),
        Button::new("support", "Contact Support"),
        Button::new(format!("cancel_{}", booking.id), "Cancel Booking"),
    ])
}

fn check_again_buttons(booking_id: &str) -> Vec<Button> {
    vec![
        Button::new(format!("pay_confirm_{}", booking_id), "Check Again"),
        Button::new("support", "Contact Support"),
    ]
}

pub fn payment_processing(booking_id: &str) -> Reply {
    Reply::text(
        "⏳ *Payment still processing*\n\nWe haven't received confirmation yet. \
        This can take a minute. Please check again shortly.",
    )
    .with_buttons(check_again_buttons(booking_id))
}

pub fn payment_failed(booking_id: &str) -> Reply {
    Reply::text(
        "❌ *Payment not completed*\n\nThe payment request was declined or expired. \
        Pay to the account in the instructions, then check again.",
    )
    .with_buttons(check_again_buttons(booking_id))
}

pub fn payment_confirmed(booking: &Booking, currency: &str) -> Reply {
    Reply::text(format!(
        "🎉 *Payment Confirmed!*\n\n\
        Booking: *{}*\n\
        🚗 {}\n\
        📅 {} → {}\n\
        💳 Paid: {}\n\n\
        You'll receive an SMS confirmation shortly. Bring your driving licence and ID at pickup.\n\n\
        Thank you for choosing Kibo Car Rentals! Say *hi* any time to book again.",
        booking.id,
        booking.vehicle_name,
        booking.pickup,
        booking.return_at,
        money(booking.deposit, currency)
    ))
}

pub fn already_completed() -> Reply {
    Reply::text("✅ Your last booking is complete and paid. Say *hi* to start a new booking.")
}

pub fn booking_cancelled(booking_id: Option<&str>) -> Reply {
    let text = match booking_id {
        Some(id) => format!("❌ Booking *{}* has been cancelled and the car released.", id),
        None => "❌ Booking cancelled.".to_string(),
    };
    Reply::text(format!("{}\n\nWhat would you like to do next?", text)).with_buttons(menu_buttons())
}

pub fn cannot_cancel_paid(booking_id: &str) -> Reply {
    Reply::text(format!(
        "ℹ️ Booking *{}* is already paid and can't be cancelled here. Please contact support.",
        booking_id
    ))
    .with_buttons(vec![Button::new("support", "Contact Support")])
}

pub fn nothing_to_cancel() -> Reply {
    Reply::text("ℹ️ You have no booking in progress to cancel.").with_buttons(menu_buttons())
}

pub fn booking_list(bookings: &[Booking], currency: &str) -> Reply {
    if bookings.is_empty() {
        return Reply::text("📋 You have no bookings yet.").with_buttons(vec![
            Button::new("browse_cars", "Browse Cars"),
            Button::new("main_menu", "Main Menu"),
        ]);
    }
    let mut text = "📋 *Your Bookings*\n".to_string();
    for booking in bookings {
        text.push_str(&format!(
            "\n{} *{}* - {}\n   📅 {} → {} ({} days)\n   💵 {} · {}",
            booking.status.emoji(),
            booking.id,
            booking.vehicle_name,
            booking.pickup,
            booking.return_at,
            booking.days,
            money(booking.total, currency),
            status_label(booking.status)
        ));
    }
    Reply::text(text).with_buttons(vec![
        Button::new("browse_cars", "Browse Cars"),
        Button::new("main_menu", "Main Menu"),
    ])
}

fn status_label(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::Confirmed => "Confirmed",
        BookingStatus::PendingPayment => "Awaiting payment",
        BookingStatus::Paid => "Paid",
        BookingStatus::Cancelled => "Cancelled",
    }
}

pub fn price_list(prices: &[(Category, Option<u64>)], deposit_percent: u64, currency: &str) -> Reply {
    let mut text = "💰 *Daily Rates*\n".to_string();
    for (category, from) in prices {
        if let Some(from) = from {
            text.push_str(&format!(
                "\n{} {}: from {}",
                category.emoji(),
                category.label(),
                money(*from, currency)
            ));
        }
    }
    text.push_str(&format!(
        "\n\nA {}% deposit secures your booking; the balance is paid at pickup.",
        deposit_percent
    ));
    Reply::text(text).with_buttons(vec![
        Button::new("browse_cars", "Browse Cars"),
        Button::new("main_menu", "Main Menu"),
    ])
}

pub fn locations(locations: &[String]) -> Reply {
    let list = locations
        .iter()
        .map(|l| format!("📍 {}", l))
        .collect::<Vec<_>>()
        .join("\n");
    Reply::text(format!(
        "*Pickup Locations*\n\n{}\n\nOpen daily 7am - 9pm.",
        list
    ))
    .with_buttons(vec![
        Button::new("browse_cars", "Browse Cars"),
        Button::new("main_menu", "Main Menu"),
    ])
}

pub fn help(state: DialogueState, booking_id: Option<&str>) -> Reply {
    let text = "🔰 *Kibo Car Rentals Help*\n\n\
        • *hi* - main menu\n\
        • *browse* - see our cars\n\
        • *my bookings* - booking status\n\
        • *prices* - daily rates\n\
        • *where* - pickup locations\n\
        • *cancel* - cancel a booking in progress\n\n\
        📞 Support: +255 700 000 000";
    let buttons = match (state.is_payment_stage(), booking_id) {
        (true, Some(id)) => vec![
            Button::new(format!("pay_confirm_{}", id), "Check Payment"),
            Button::new("main_menu", "Main Menu"),
        ],
        _ => vec![
            Button::new("browse_cars", "Browse Cars"),
            Button::new("my_bookings", "My Bookings"),
            Button::new("main_menu", "Main Menu"),
        ],
    };
    Reply::text(text).with_buttons(buttons)
}

/// Nudge shown when a message makes no sense in the current state.
pub fn contextual_hint(state: DialogueState, booking_id: Option<&str>) -> Reply {
    match state {
        DialogueState::SelectingCategory => {
            Reply::text("❓ Please choose a category: economy, suv, luxury or van.")
                .with_buttons(vec![
                    Button::new("browse_cars", "View Categories"),
                    Button::new("main_menu", "Main Menu"),
                ])
        }
        DialogueState::BrowsingCars => Reply::text("❓ Reply with the number of a car to see its details.")
            .with_buttons(vec![
                Button::new("browse_cars", "Other Categories"),
                Button::new("main_menu", "Main Menu"),
            ]),
        DialogueState::ViewingCar => {
            Reply::text("❓ Tap *Book Now* to reserve this car or go back to the list.")
        }
        DialogueState::PaymentPending | DialogueState::PaymentInstructions => {
            let id = booking_id.unwrap_or_default();
            Reply::text("⏳ Your booking is waiting for payment. Tap *I have paid* once you've paid.")
                .with_buttons(vec![
                    Button::new(format!("pay_confirm_{}", id), "I have paid"),
                    Button::new(format!("cancel_{}", id), "Cancel Booking"),
                    Button::new("support", "Contact Support"),
                ])
        }
        DialogueState::Completed => Reply::text(
            "✅ Your booking is complete. Would you like to make another one?",
        )
        .with_buttons(vec![
            Button::new("browse_cars", "Browse Cars"),
            Button::new("main_menu", "Main Menu"),
        ]),
        DialogueState::New | DialogueState::MainMenu | DialogueState::BookingForm => Reply::text(
            "❓ I didn't understand that. Type *help* for options or *hi* to start.",
        )
        .with_buttons(menu_buttons()),
    }
}

pub fn service_error() -> Reply {
    Reply::text("⚠️ Something went wrong on our side. Please try again or contact support.")
        .with_buttons(vec![
            Button::new("support", "Contact Support"),
            Button::new("main_menu", "Main Menu"),
        ])
}

/// Receipt pushed through the notification channels after payment.
pub fn receipt_text(booking: &Booking, currency: &str) -> String {
    format!(
        "Kibo Car Rentals: payment of {} received for booking {} ({}, {} to {}). Balance {} due at pickup.",
        money(booking.deposit, currency),
        booking.id,
        booking.vehicle_name,
        booking.pickup,
        booking.return_at,
        money(booking.total - booking.deposit, currency)
    )
}
