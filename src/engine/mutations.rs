use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tokio::sync::{oneshot, RwLock};
use tracing::{info, warn};

use crate::limits::*;
use crate::model::*;
use crate::observability as obs;

use super::admission::{admit, check_booking_room, validate_restaurant};
use super::{require_user, Engine, EngineError, WalCommand};

fn record_rejection(err: &EngineError) {
    metrics::counter!(obs::ADMISSIONS_REJECTED_TOTAL, "reason" => err.reason()).increment(1);
}

impl Engine {
    // ── Restaurants ──────────────────────────────────────────

    pub async fn create_restaurant(&self, new: NewRestaurant) -> Result<Restaurant, EngineError> {
        if self.state.len() >= MAX_RESTAURANTS {
            return Err(EngineError::LimitExceeded("too many restaurants"));
        }
        validate_restaurant(&new)?;

        let _catalog = self.catalog.lock().await;
        let restaurant = new.into_restaurant(self.allocate_restaurant_id());
        let event = Event::RestaurantCreated {
            restaurant: restaurant.clone(),
        };
        self.wal_append(&event).await?;
        self.state.insert(
            restaurant.id,
            Arc::new(RwLock::new(RestaurantState::new(restaurant.clone()))),
        );
        metrics::gauge!(obs::RESTAURANTS_ACTIVE).set(self.state.len() as f64);
        info!(restaurant_id = restaurant.id, "restaurant created: {}", restaurant.name.primary);
        Ok(restaurant)
    }

    /// Load a batch of restaurants. Every entry is validated before the first
    /// is written, so a bad entry leaves the catalog untouched.
    pub async fn seed_restaurants(
        &self,
        seed: Vec<NewRestaurant>,
    ) -> Result<Vec<Restaurant>, EngineError> {
        if self.state.len().saturating_add(seed.len()) > MAX_RESTAURANTS {
            return Err(EngineError::LimitExceeded("too many restaurants"));
        }
        for (i, new) in seed.iter().enumerate() {
            validate_restaurant(new).inspect_err(|e| {
                warn!("seed entry {i} ({}) rejected: {e}", new.name.primary);
            })?;
        }
        let mut created = Vec::with_capacity(seed.len());
        for new in seed {
            created.push(self.create_restaurant(new).await?);
        }
        Ok(created)
    }

    /// Replace a restaurant's attributes. Existing bookings are kept as they are.
    pub async fn update_restaurant(
        &self,
        id: RestaurantId,
        new: NewRestaurant,
    ) -> Result<Restaurant, EngineError> {
        validate_restaurant(&new)?;
        let rs = self
            .get_restaurant_state(&id)
            .ok_or(EngineError::restaurant_not_found(id))?;
        let mut guard = rs.write().await;

        let restaurant = new.into_restaurant(id);
        let event = Event::RestaurantUpdated {
            restaurant: restaurant.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(restaurant)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Admit and persist a new booking. The admission check and the insert
    /// happen under one write lock, so concurrent requests can't oversell a slot.
    pub async fn create_booking(
        &self,
        user: Option<&User>,
        restaurant_id: RestaurantId,
        date: NaiveDate,
        time: NaiveTime,
        people: u32,
    ) -> Result<Booking, EngineError> {
        let user = require_user(user)?;
        let rs = self
            .get_restaurant_state(&restaurant_id)
            .ok_or(EngineError::restaurant_not_found(restaurant_id))?;
        let mut guard = rs.write().await;
        let now = self.clock.now();
        check_booking_room(&guard, now, MAX_BOOKINGS_PER_RESTAURANT)?;
        admit(&guard, date, time, people, None, now).inspect_err(record_rejection)?;

        let booking = Booking {
            id: self.allocate_booking_id(),
            restaurant_id,
            user_id: user.id,
            guest: user.guest(),
            date,
            time,
            people,
            status: self.policy.initial_status(),
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let restaurant = guard.restaurant.clone();
        drop(guard);

        metrics::counter!(obs::BOOKINGS_CREATED_TOTAL, "status" => booking.status.as_str())
            .increment(1);
        info!(
            booking_id = booking.id,
            restaurant_id,
            user_id = user.id,
            people,
            "booking {} for {date} {}",
            booking.status,
            time.format(TIME_FORMAT)
        );
        if booking.status == BookingStatus::Confirmed {
            self.notify_confirmed(&booking, &restaurant).await;
        }
        Ok(booking)
    }

    /// Move a booking to a new date, time or party size. The merged request
    /// goes through full admission with the booking's own seats excluded.
    pub async fn update_booking(
        &self,
        booking_id: BookingId,
        user: Option<&User>,
        update: BookingUpdate,
    ) -> Result<Booking, EngineError> {
        let user = require_user(user)?;
        let mut guard = self.resolve_booking_write(booking_id).await?;
        let current = guard
            .booking(booking_id)
            .filter(|b| b.user_id == user.id)
            .cloned()
            .ok_or(EngineError::booking_not_found(booking_id))?;
        if current.status.is_terminal() {
            return Err(EngineError::AlreadyCancelled(booking_id));
        }

        let date = update.date.unwrap_or(current.date);
        let time = update.time.unwrap_or(current.time);
        let people = update.people.unwrap_or(current.people);
        let now = self.clock.now();
        admit(&guard, date, time, people, Some(booking_id), now).inspect_err(record_rejection)?;

        let event = Event::BookingRescheduled {
            id: booking_id,
            restaurant_id: current.restaurant_id,
            date,
            time,
            people,
            updated_at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking_id, "booking moved to {date} {} for {people}", time.format(TIME_FORMAT));
        guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::booking_not_found(booking_id))
    }

    /// Cancel a booking. Cancelling an already-cancelled booking succeeds and
    /// leaves it untouched.
    pub async fn cancel_booking(
        &self,
        booking_id: BookingId,
        user: Option<&User>,
    ) -> Result<Booking, EngineError> {
        let user = require_user(user)?;
        let mut guard = self.resolve_booking_write(booking_id).await?;
        let current = guard
            .booking(booking_id)
            .filter(|b| user.may_manage(b))
            .cloned()
            .ok_or(EngineError::booking_not_found(booking_id))?;
        if current.status == BookingStatus::Cancelled {
            return Ok(current);
        }

        let booking = self
            .change_status(&mut guard, &current, BookingStatus::Cancelled)
            .await?;
        let restaurant = guard.restaurant.clone();
        drop(guard);

        metrics::counter!(obs::BOOKINGS_CANCELLED_TOTAL).increment(1);
        info!(booking_id, user_id = user.id, "booking cancelled");
        if let Err(e) = self
            .notifier
            .booking_cancelled(&booking.owner(), &booking, &restaurant)
            .await
        {
            warn!(booking_id, "cancellation notice not sent: {e}");
        }
        Ok(booking)
    }

    /// `pending → confirmed`. Confirming a confirmed booking is a no-op.
    /// Pending bookings already hold their seats, so no capacity re-check.
    pub async fn confirm_booking(
        &self,
        booking_id: BookingId,
        user: Option<&User>,
    ) -> Result<Booking, EngineError> {
        let user = require_user(user)?;
        let mut guard = self.resolve_booking_write(booking_id).await?;
        let current = guard
            .booking(booking_id)
            .filter(|b| user.may_manage(b))
            .cloned()
            .ok_or(EngineError::booking_not_found(booking_id))?;
        match current.status {
            BookingStatus::Confirmed => return Ok(current),
            BookingStatus::Cancelled => {
                return Err(EngineError::InvalidTransition {
                    from: current.status,
                    to: BookingStatus::Confirmed,
                });
            }
            BookingStatus::Pending => {}
        }

        let booking = self
            .change_status(&mut guard, &current, BookingStatus::Confirmed)
            .await?;
        let restaurant = guard.restaurant.clone();
        drop(guard);

        info!(booking_id, user_id = user.id, "booking confirmed");
        self.notify_confirmed(&booking, &restaurant).await;
        Ok(booking)
    }

    /// Compare-and-set expiry used by the sweeper: cancels the booking only if
    /// it is still pending and was created before `cutoff`. Returns whether
    /// it was cancelled.
    pub async fn expire_pending(
        &self,
        booking_id: BookingId,
        cutoff: NaiveDateTime,
    ) -> Result<bool, EngineError> {
        let mut guard = self.resolve_booking_write(booking_id).await?;
        let current = guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::booking_not_found(booking_id))?;
        if current.status != BookingStatus::Pending || current.created_at >= cutoff {
            return Ok(false);
        }
        self.change_status(&mut guard, &current, BookingStatus::Cancelled)
            .await?;
        metrics::counter!(obs::BOOKINGS_EXPIRED_TOTAL).increment(1);
        Ok(true)
    }

    async fn change_status(
        &self,
        rs: &mut RestaurantState,
        current: &Booking,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        if !current.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }
        let event = Event::BookingStatusChanged {
            id: current.id,
            restaurant_id: current.restaurant_id,
            status,
            updated_at: self.clock.now(),
        };
        self.persist_and_apply(rs, &event).await?;
        rs.booking(current.id)
            .cloned()
            .ok_or(EngineError::booking_not_found(current.id))
    }

    async fn notify_confirmed(&self, booking: &Booking, restaurant: &Restaurant) {
        if let Err(e) = self
            .notifier
            .booking_confirmed(&booking.owner(), booking, restaurant)
            .await
        {
            warn!(booking_id = booking.id, "confirmation notice not sent: {e}");
        }
    }

    // ── Sweeper support ──────────────────────────────────────

    /// Ids of pending bookings created before `cutoff`. Candidates only: the
    /// status is re-checked under the write lock by `expire_pending`.
    pub async fn collect_expired_pending(&self, cutoff: NaiveDateTime) -> Vec<BookingId> {
        let states: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut expired = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            expired.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.status == BookingStatus::Pending && b.created_at < cutoff)
                    .map(|b| b.id),
            );
        }
        expired
    }

    // ── WAL compaction ───────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    ///
    /// Every restaurant's read lock (and the catalog lock) is held until the
    /// compact command is queued behind any appends already in flight, so no
    /// acknowledged event can fall between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let catalog = self.catalog.lock().await;
        let states: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(states.len());
        let mut events = Vec::new();
        for rs in states {
            let guard = rs.read_owned().await;
            events.push(Event::RestaurantCreated {
                restaurant: guard.restaurant.clone(),
            });
            events.extend(
                guard
                    .bookings
                    .iter()
                    .map(|b| Event::BookingCreated { booking: b.clone() }),
            );
            guards.push(guard);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        drop(guards);
        drop(catalog);
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
