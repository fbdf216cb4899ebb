use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};

use crate::limits::*;
use crate::model::*;

use super::availability::check_capacity;
use super::EngineError;

pub fn parse_date(raw: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| EngineError::InvalidTime(format!("malformed date {raw:?}, expected YYYY-MM-DD")))
}

pub fn parse_time(raw: &str) -> Result<NaiveTime, EngineError> {
    NaiveTime::parse_from_str(raw.trim(), TIME_FORMAT)
        .map_err(|_| EngineError::InvalidTime(format!("malformed time {raw:?}, expected HH:MM")))
}

pub(crate) fn validate_party_size(people: u32) -> Result<(), EngineError> {
    if people == 0 {
        return Err(EngineError::InvalidPartySize(people));
    }
    if people > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("party too large"));
    }
    Ok(())
}

/// The slot must start strictly after `now` and within the booking horizon.
pub(crate) fn validate_not_past(
    date: NaiveDate,
    time: NaiveTime,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    if time.second() != 0 || time.nanosecond() != 0 {
        return Err(EngineError::InvalidTime("times are whole minutes".into()));
    }
    if date < now.date() {
        return Err(EngineError::InvalidTime(format!("{date} is in the past")));
    }
    if date == now.date() && time <= now.time() {
        return Err(EngineError::InvalidTime(format!(
            "{} today has already passed",
            time.format(TIME_FORMAT)
        )));
    }
    if date - now.date() > TimeDelta::days(MAX_BOOKING_HORIZON_DAYS) {
        return Err(EngineError::LimitExceeded("date too far ahead"));
    }
    Ok(())
}

pub(crate) fn validate_within_hours(restaurant: &Restaurant, time: NaiveTime) -> Result<(), EngineError> {
    if restaurant.is_open_at(time) {
        Ok(())
    } else {
        Err(EngineError::OutsideHours {
            time,
            opens_at: restaurant.opens_at,
            closes_at: restaurant.closes_at,
        })
    }
}

/// Full admission check: party size, temporal validity, opening hours, then
/// capacity. The caller must hold the restaurant's write lock until the
/// resulting booking is persisted.
pub(crate) fn admit(
    rs: &RestaurantState,
    date: NaiveDate,
    time: NaiveTime,
    people: u32,
    exclude: Option<BookingId>,
    now: NaiveDateTime,
) -> Result<CapacityCheck, EngineError> {
    validate_party_size(people)?;
    validate_not_past(date, time, now)?;
    validate_within_hours(&rs.restaurant, time)?;
    let check = check_capacity(rs, date, time, people, exclude, now);
    if !check.allowed {
        return Err(EngineError::CapacityExceeded {
            requested: people,
            remaining: check.remaining,
        });
    }
    Ok(check)
}

/// Cancelled and past bookings stay on record but don't count toward the
/// per-restaurant cap.
pub(crate) fn check_booking_room(
    rs: &RestaurantState,
    now: NaiveDateTime,
    max: usize,
) -> Result<(), EngineError> {
    if rs.live_after(now) >= max {
        return Err(EngineError::LimitExceeded("too many bookings on restaurant"));
    }
    Ok(())
}

fn validate_text(text: &LocalizedText) -> Result<(), EngineError> {
    if text.primary.trim().is_empty() {
        return Err(EngineError::InvalidRestaurant("empty display text"));
    }
    if text.longest() > MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded("display text too long"));
    }
    if text.translations.len() > MAX_TRANSLATIONS {
        return Err(EngineError::LimitExceeded("too many translations"));
    }
    Ok(())
}

pub(crate) fn validate_restaurant(new: &NewRestaurant) -> Result<(), EngineError> {
    validate_text(&new.name)?;
    validate_text(&new.area)?;
    validate_text(&new.cuisine)?;
    if new.opens_at >= new.closes_at {
        return Err(EngineError::InvalidRestaurant("opening time must precede closing time"));
    }
    if new.capacity == 0 {
        return Err(EngineError::InvalidRestaurant("capacity must be positive"));
    }
    if new.capacity > MAX_CAPACITY {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    Ok(())
}
