use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

pub type RestaurantId = u64;
pub type BookingId = u64;
pub type UserId = u64;

/// Wire format for reservation dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Wire format for reservation times: 24-hour, no seconds, restaurant-local.
pub const TIME_FORMAT: &str = "%H:%M";

/// Booking state. `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Pending bookings hold their seats during the grace window.
    pub fn holds_capacity(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown booking status: {:?}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for BookingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A display string with optional translations keyed by language tag.
/// Lookups for a missing tag fall back to `primary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub primary: String,
    #[serde(default)]
    pub translations: BTreeMap<String, String>,
}

impl LocalizedText {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            translations: BTreeMap::new(),
        }
    }

    pub fn with(mut self, lang: impl Into<String>, text: impl Into<String>) -> Self {
        self.translations.insert(lang.into(), text.into());
        self
    }

    pub fn get(&self, lang: Option<&str>) -> &str {
        lang.and_then(|l| self.translations.get(l))
            .map(String::as_str)
            .unwrap_or(&self.primary)
    }

    /// Exact, case-insensitive match against the primary text or any translation.
    pub fn matches(&self, needle: &str) -> bool {
        self.primary.eq_ignore_ascii_case(needle)
            || self.translations.values().any(|t| t.eq_ignore_ascii_case(needle))
    }

    pub fn longest(&self) -> usize {
        self.translations
            .values()
            .map(String::len)
            .chain(std::iter::once(self.primary.len()))
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: RestaurantId,
    pub name: LocalizedText,
    pub area: LocalizedText,
    pub cuisine: LocalizedText,
    pub opens_at: NaiveTime,
    pub closes_at: NaiveTime,
    /// Seats available per slot.
    pub capacity: u32,
}

impl Restaurant {
    /// Operating hours are the half-open window `[opens_at, closes_at)`.
    pub fn is_open_at(&self, time: NaiveTime) -> bool {
        self.opens_at <= time && time < self.closes_at
    }
}

/// Attributes for creating or replacing a restaurant. This is also the shape
/// of each entry in a seed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRestaurant {
    pub name: LocalizedText,
    pub area: LocalizedText,
    pub cuisine: LocalizedText,
    #[serde(with = "hhmm")]
    pub opens_at: NaiveTime,
    #[serde(with = "hhmm")]
    pub closes_at: NaiveTime,
    pub capacity: u32,
}

impl NewRestaurant {
    pub fn into_restaurant(self, id: RestaurantId) -> Restaurant {
        Restaurant {
            id,
            name: self.name,
            area: self.area,
            cuisine: self.cuisine,
            opens_at: self.opens_at,
            closes_at: self.closes_at,
            capacity: self.capacity,
        }
    }
}

/// The (restaurant, date, time) triple capacity is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub restaurant_id: RestaurantId,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl Slot {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }
}

/// Contact details of the person a booking belongs to, captured when it is
/// made so notices reach the owner whoever triggers them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub restaurant_id: RestaurantId,
    pub user_id: UserId,
    pub guest: Guest,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub people: u32,
    pub status: BookingStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Booking {
    pub fn slot(&self) -> Slot {
        Slot {
            restaurant_id: self.restaurant_id,
            date: self.date,
            time: self.time,
        }
    }

    /// The owning user, as far as notices are concerned.
    pub fn owner(&self) -> User {
        User {
            id: self.user_id,
            name: self.guest.name.clone(),
            email: self.guest.email.clone(),
            is_admin: false,
        }
    }

    fn sort_key(&self) -> (NaiveDate, NaiveTime) {
        (self.date, self.time)
    }
}

/// Partial update applied by `Engine::update_booking`. `None` keeps the
/// current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingUpdate {
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub people: Option<u32>,
}

/// An already-authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
}

impl User {
    pub fn guest(&self) -> Guest {
        Guest {
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }

    pub fn may_manage(&self, booking: &Booking) -> bool {
        self.is_admin || booking.user_id == self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityCheck {
    pub allowed: bool,
    pub remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAvailability {
    pub time: NaiveTime,
    pub remaining: u32,
}

/// A booking joined with its restaurant's display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingView {
    pub booking: Booking,
    pub restaurant_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestaurantFilter {
    pub area: Option<String>,
    pub cuisine: Option<String>,
}

impl RestaurantFilter {
    pub fn accepts(&self, restaurant: &Restaurant) -> bool {
        self.area.as_deref().is_none_or(|a| restaurant.area.matches(a))
            && self.cuisine.as_deref().is_none_or(|c| restaurant.cuisine.matches(c))
    }
}

#[derive(Debug, Clone)]
pub struct RestaurantState {
    pub restaurant: Restaurant,
    /// Every booking ever made here, including cancelled ones, sorted by (date, time).
    pub bookings: Vec<Booking>,
}

impl RestaurantState {
    pub fn new(restaurant: Restaurant) -> Self {
        Self {
            restaurant,
            bookings: Vec::new(),
        }
    }

    /// Insert maintaining sort order by (date, time).
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = booking.sort_key();
        let pos = self.bookings.partition_point(|b| b.sort_key() <= key);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: BookingId) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings still holding seats at a slot that starts after `now`.
    pub fn live_after(&self, now: NaiveDateTime) -> usize {
        let start = self.bookings.partition_point(|b| b.slot().starts_at() <= now);
        self.bookings[start..]
            .iter()
            .filter(|b| b.status.holds_capacity())
            .count()
    }

    /// Bookings at exactly this date and time, regardless of status.
    pub fn at_slot(&self, date: NaiveDate, time: NaiveTime) -> impl Iterator<Item = &Booking> {
        let key = (date, time);
        let start = self.bookings.partition_point(|b| b.sort_key() < key);
        let end = self.bookings.partition_point(|b| b.sort_key() <= key);
        self.bookings[start..end].iter()
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RestaurantCreated {
        restaurant: Restaurant,
    },
    RestaurantUpdated {
        restaurant: Restaurant,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingRescheduled {
        id: BookingId,
        restaurant_id: RestaurantId,
        date: NaiveDate,
        time: NaiveTime,
        people: u32,
        updated_at: NaiveDateTime,
    },
    BookingStatusChanged {
        id: BookingId,
        restaurant_id: RestaurantId,
        status: BookingStatus,
        updated_at: NaiveDateTime,
    },
}

impl Event {
    pub fn restaurant_id(&self) -> RestaurantId {
        match self {
            Event::RestaurantCreated { restaurant } | Event::RestaurantUpdated { restaurant } => {
                restaurant.id
            }
            Event::BookingCreated { booking } => booking.restaurant_id,
            Event::BookingRescheduled { restaurant_id, .. }
            | Event::BookingStatusChanged { restaurant_id, .. } => *restaurant_id,
        }
    }
}

/// Serde adapter for `HH:MM` times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIME_FORMAT;

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&time.format(TIME_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}
