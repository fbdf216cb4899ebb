use chrono::{NaiveDate, NaiveTime};

use crate::limits::*;
use crate::model::*;

use super::availability::{check_capacity, day_availability};
use super::{require_user, Engine, EngineError};

impl Engine {
    pub async fn get_restaurant(&self, id: RestaurantId) -> Option<Restaurant> {
        let rs = self.get_restaurant_state(&id)?;
        let guard = rs.read().await;
        Some(guard.restaurant.clone())
    }

    /// Restaurants passing the filter, ordered by id.
    pub async fn list_restaurants(&self, filter: &RestaurantFilter) -> Vec<Restaurant> {
        let states: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            if filter.accepts(&guard.restaurant) {
                out.push(guard.restaurant.clone());
            }
        }
        out.sort_by_key(|r| r.id);
        out
    }

    /// Would `people` more guests fit at this slot right now?
    pub async fn check_capacity(
        &self,
        restaurant_id: RestaurantId,
        date: NaiveDate,
        time: NaiveTime,
        people: u32,
        exclude: Option<BookingId>,
    ) -> Result<CapacityCheck, EngineError> {
        let rs = self
            .get_restaurant_state(&restaurant_id)
            .ok_or(EngineError::restaurant_not_found(restaurant_id))?;
        let guard = rs.read().await;
        Ok(check_capacity(&guard, date, time, people, exclude, self.clock.now()))
    }

    pub async fn remaining_seats(
        &self,
        restaurant_id: RestaurantId,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<u32, EngineError> {
        self.check_capacity(restaurant_id, date, time, 0, None)
            .await
            .map(|c| c.remaining)
    }

    pub async fn day_availability(
        &self,
        restaurant_id: RestaurantId,
        date: NaiveDate,
        step_minutes: u32,
    ) -> Result<Vec<SlotAvailability>, EngineError> {
        if step_minutes < MIN_AVAILABILITY_STEP_MINUTES {
            return Err(EngineError::LimitExceeded("availability step too small"));
        }
        let rs = self
            .get_restaurant_state(&restaurant_id)
            .ok_or(EngineError::restaurant_not_found(restaurant_id))?;
        let guard = rs.read().await;
        Ok(day_availability(&guard, date, step_minutes, self.clock.now()))
    }

    /// One booking, visible to its owner and to admins.
    pub async fn get_booking(
        &self,
        booking_id: BookingId,
        user: Option<&User>,
    ) -> Result<Booking, EngineError> {
        let user = require_user(user)?;
        let restaurant_id = self
            .booking_to_restaurant
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::booking_not_found(booking_id))?;
        let rs = self
            .get_restaurant_state(&restaurant_id)
            .ok_or(EngineError::restaurant_not_found(restaurant_id))?;
        let guard = rs.read().await;
        guard
            .booking(booking_id)
            .filter(|b| user.may_manage(b))
            .cloned()
            .ok_or(EngineError::booking_not_found(booking_id))
    }

    /// The caller's bookings, most recent reservation date first.
    pub async fn list_bookings(
        &self,
        user: Option<&User>,
        lang: Option<&str>,
    ) -> Result<Vec<BookingView>, EngineError> {
        let user = require_user(user)?;
        Ok(self.collect_views(|b| b.user_id == user.id, lang).await)
    }

    /// Every booking in the system. Admins only.
    pub async fn list_all_bookings(
        &self,
        user: Option<&User>,
        lang: Option<&str>,
    ) -> Result<Vec<BookingView>, EngineError> {
        let user = require_user(user)?;
        if !user.is_admin {
            return Err(EngineError::Unauthorized);
        }
        Ok(self.collect_views(|_| true, lang).await)
    }

    async fn collect_views(
        &self,
        keep: impl Fn(&Booking) -> bool,
        lang: Option<&str>,
    ) -> Vec<BookingView> {
        let states: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut views = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            let name = guard.restaurant.name.get(lang);
            views.extend(guard.bookings.iter().filter(|b| keep(b)).map(|b| BookingView {
                booking: b.clone(),
                restaurant_name: name.to_string(),
            }));
        }
        views.sort_by(|a, b| {
            (b.booking.date, b.booking.time, b.booking.id)
                .cmp(&(a.booking.date, a.booking.time, a.booking.id))
        });
        views
    }
}
