use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use crate::model::*;

// ── Capacity arithmetic ───────────────────────────────────────────
//
// Seats are computed on demand from the booking list; nothing is cached.
// A booking holds seats while it is pending or confirmed.

/// Seats held at one slot, optionally ignoring one booking (its own
/// contribution during an update).
pub fn seats_held(
    rs: &RestaurantState,
    date: NaiveDate,
    time: NaiveTime,
    exclude: Option<BookingId>,
) -> u32 {
    rs.at_slot(date, time)
        .filter(|b| b.status.holds_capacity())
        .filter(|b| Some(b.id) != exclude)
        .map(|b| b.people)
        .sum()
}

/// Can `people` more guests be seated at this slot? A slot that has already
/// started reports zero remaining seats.
pub fn check_capacity(
    rs: &RestaurantState,
    date: NaiveDate,
    time: NaiveTime,
    people: u32,
    exclude: Option<BookingId>,
    now: NaiveDateTime,
) -> CapacityCheck {
    if date.and_time(time) <= now {
        return CapacityCheck {
            allowed: false,
            remaining: 0,
        };
    }
    let held = seats_held(rs, date, time, exclude);
    let capacity = rs.restaurant.capacity;
    CapacityCheck {
        allowed: held.saturating_add(people) <= capacity,
        remaining: capacity.saturating_sub(held),
    }
}

/// Remaining seats for every slot start in `[opens_at, closes_at)`, stepping
/// by `step_minutes`.
pub fn day_availability(
    rs: &RestaurantState,
    date: NaiveDate,
    step_minutes: u32,
    now: NaiveDateTime,
) -> Vec<SlotAvailability> {
    let step = TimeDelta::minutes(i64::from(step_minutes.max(1)));
    let mut slots = Vec::new();
    let mut time = rs.restaurant.opens_at;
    while time < rs.restaurant.closes_at {
        let check = check_capacity(rs, date, time, 0, None, now);
        slots.push(SlotAvailability {
            time,
            remaining: check.remaining,
        });
        let (next, wrapped) = time.overflowing_add_signed(step);
        if wrapped != 0 {
            break;
        }
        time = next;
    }
    slots
}
