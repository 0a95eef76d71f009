//! Booking form parsing. Customers answer either with labelled lines
//! (`Name: ...`) or a single comma-separated line `name, pickup, return, days`.

use crate::model::BookingDetails;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Pickup,
    Return,
    Days,
}

impl Field {
    pub fn label(&self) -> &'static str {
        match self {
            Field::Name => "Name",
            Field::Pickup => "Pickup",
            Field::Return => "Return",
            Field::Days => "Days",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().as_str() {
            "name" | "full name" | "jina" => Some(Field::Name),
            "pickup" | "pick up" | "pickup date" | "pick-up" | "from" | "start" => {
                Some(Field::Pickup)
            }
            "return" | "return date" | "drop off" | "dropoff" | "to" | "end" => {
                Some(Field::Return)
            }
            "days" | "duration" | "number of days" | "siku" => Some(Field::Days),
            _ => None,
        }
    }
}

fn labelled_lines(text: &str) -> impl Iterator<Item = (Field, &str)> {
    text.lines().filter_map(|line| {
        let (key, value) = line.split_once(':').or_else(|| line.split_once('='))?;
        Some((Field::from_key(key)?, value.trim()))
    })
}

fn comma_fields(text: &str) -> Vec<&str> {
    text.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
}

/// True when the text is shaped like a booking form answer.
pub fn looks_like_details(text: &str) -> bool {
    if labelled_lines(text).next().is_some() {
        return true;
    }
    let fields = comma_fields(text);
    fields.len() >= 3 && fields.iter().any(|f| f.chars().any(|c| c.is_ascii_digit()))
}

fn parse_days(value: &str) -> Option<u32> {
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok().filter(|d| (1..=90).contains(d))
}

/// Parses the form, reporting every missing or invalid field at once.
pub fn parse(text: &str) -> Result<BookingDetails, Vec<Field>> {
    let mut name = None;
    let mut pickup = None;
    let mut return_at = None;
    let mut days = None;

    let labelled: Vec<(Field, &str)> = labelled_lines(text).collect();
    if labelled.is_empty() {
        let mut fields = comma_fields(text);
        days = fields.last().and_then(|last| parse_days(last));
        if days.is_some() {
            fields.pop();
        }
        let mut positional = fields.into_iter();
        name = positional.next();
        pickup = positional.next();
        return_at = positional.next();
    } else {
        for (field, value) in labelled {
            if value.is_empty() {
                continue;
            }
            match field {
                Field::Name => name = Some(value),
                Field::Pickup => pickup = Some(value),
                Field::Return => return_at = Some(value),
                Field::Days => days = parse_days(value),
            }
        }
    }

    let mut missing = Vec::new();
    if name.is_none() {
        missing.push(Field::Name);
    }
    if pickup.is_none() {
        missing.push(Field::Pickup);
    }
    if return_at.is_none() {
        missing.push(Field::Return);
    }
    if days.is_none() {
        missing.push(Field::Days);
    }

    match (name, pickup, return_at, days) {
        (Some(name), Some(pickup), Some(return_at), Some(days)) => Ok(BookingDetails {
            customer_name: name.to_string(),
            pickup: pickup.to_string(),
            return_at: return_at.to_string(),
            days,
        }),
        _ => Err(missing),
    }
}
