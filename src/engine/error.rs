use chrono::NaiveTime;

use crate::model::{BookingId, BookingStatus};

#[derive(Debug)]
pub enum EngineError {
    /// Missing restaurant or booking, or a booking the caller does not own.
    NotFound { entity: &'static str, id: u64 },
    Unauthorized,
    InvalidTime(String),
    OutsideHours {
        time: NaiveTime,
        opens_at: NaiveTime,
        closes_at: NaiveTime,
    },
    CapacityExceeded {
        requested: u32,
        remaining: u32,
    },
    InvalidPartySize(u32),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    AlreadyCancelled(BookingId),
    InvalidRestaurant(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn restaurant_not_found(id: u64) -> Self {
        EngineError::NotFound { entity: "restaurant", id }
    }

    pub fn booking_not_found(id: u64) -> Self {
        EngineError::NotFound { entity: "booking", id }
    }

    /// False only for persistence failures; everything else is a request error.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, EngineError::WalError(_))
    }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::Unauthorized => "unauthorized",
            EngineError::InvalidTime(_) => "invalid_time",
            EngineError::OutsideHours { .. } => "outside_hours",
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::InvalidPartySize(_) => "invalid_party_size",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::AlreadyCancelled(_) => "already_cancelled",
            EngineError::InvalidRestaurant(_) => "invalid_restaurant",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "internal",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            EngineError::Unauthorized => write!(f, "unauthorized"),
            EngineError::InvalidTime(msg) => write!(f, "invalid time: {msg}"),
            EngineError::OutsideHours {
                time,
                opens_at,
                closes_at,
            } => write!(
                f,
                "{} is outside opening hours [{}, {})",
                time.format("%H:%M"),
                opens_at.format("%H:%M"),
                closes_at.format("%H:%M")
            ),
            EngineError::CapacityExceeded {
                requested,
                remaining,
            } => write!(
                f,
                "capacity exceeded: {requested} requested, {remaining} seats remaining"
            ),
            EngineError::InvalidPartySize(n) => write!(f, "invalid party size: {n}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot move booking from {from} to {to}")
            }
            EngineError::AlreadyCancelled(id) => write!(f, "booking {id} is cancelled"),
            EngineError::InvalidRestaurant(msg) => write!(f, "invalid restaurant: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
