mod admission;
mod availability;
mod error;
mod mutations;
mod queries;

pub use admission::{parse_date, parse_time};
pub use availability::{check_capacity, day_availability, seats_held};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use crate::clock::Clock;
use crate::model::*;
use crate::notify::Notifier;
use crate::wal::Wal;

pub type SharedRestaurantState = Arc<RwLock<RestaurantState>>;

/// Which status a freshly admitted booking starts in. Fixed per engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// New bookings are confirmed on admission.
    #[default]
    ConfirmImmediately,
    /// New bookings wait as `pending` for an explicit confirmation and are
    /// swept once the grace period lapses.
    AwaitConfirmation,
}

impl AdmissionPolicy {
    pub fn initial_status(&self) -> BookingStatus {
        match self {
            AdmissionPolicy::ConfirmImmediately => BookingStatus::Confirmed,
            AdmissionPolicy::AwaitConfirmation => BookingStatus::Pending,
        }
    }
}

impl FromStr for AdmissionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirm" => Ok(AdmissionPolicy::ConfirmImmediately),
            "pending" => Ok(AdmissionPolicy::AwaitConfirmation),
            other => Err(format!("unknown admission policy {other:?} (expected confirm|pending)")),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, then one
/// fsync for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so partial bytes don't bleed into the
    // next batch; the whole batch is reported failed either way.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking store, availability engine and booking lifecycle in one place.
///
/// Each restaurant's bookings live behind their own `RwLock`. Every mutation
/// takes that write lock, re-checks admission, appends to the WAL and applies
/// the event before releasing it, so concurrent requests for the same
/// restaurant serialize and capacity can't be oversold.
pub struct Engine {
    pub(super) state: DashMap<RestaurantId, SharedRestaurantState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → restaurant id.
    pub(super) booking_to_restaurant: DashMap<BookingId, RestaurantId>,
    /// Serializes restaurant creation against WAL compaction.
    pub(super) catalog: Mutex<()>,
    next_restaurant_id: AtomicU64,
    next_booking_id: AtomicU64,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) policy: AdmissionPolicy,
}

/// Apply an event to a restaurant's state (no locking; caller holds the lock).
fn apply_to_restaurant(
    rs: &mut RestaurantState,
    event: &Event,
    index: &DashMap<BookingId, RestaurantId>,
) {
    match event {
        Event::RestaurantUpdated { restaurant } => {
            rs.restaurant = restaurant.clone();
        }
        Event::BookingCreated { booking } => {
            index.insert(booking.id, booking.restaurant_id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingRescheduled {
            id,
            date,
            time,
            people,
            updated_at,
            ..
        } => {
            if let Some(mut booking) = rs.remove_booking(*id) {
                booking.date = *date;
                booking.time = *time;
                booking.people = *people;
                booking.updated_at = *updated_at;
                rs.insert_booking(booking);
            }
        }
        Event::BookingStatusChanged {
            id,
            status,
            updated_at,
            ..
        } => {
            if let Some(booking) = rs.booking_mut(*id) {
                booking.status = *status;
                booking.updated_at = *updated_at;
            }
        }
        // Created is handled at the DashMap level
        Event::RestaurantCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        policy: AdmissionPolicy,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            booking_to_restaurant: DashMap::new(),
            catalog: Mutex::new(()),
            next_restaurant_id: AtomicU64::new(1),
            next_booking_id: AtomicU64::new(1),
            clock,
            notifier,
            policy,
        };

        // We are the sole owner of these Arcs during replay, so try_write never
        // contends. blocking_write would panic inside an async context.
        let mut max_restaurant = 0;
        let mut max_booking = 0;
        for event in &events {
            match event {
                Event::RestaurantCreated { restaurant } => {
                    max_restaurant = max_restaurant.max(restaurant.id);
                    let rs = RestaurantState::new(restaurant.clone());
                    engine.state.insert(restaurant.id, Arc::new(RwLock::new(rs)));
                }
                other => {
                    if let Event::BookingCreated { booking } = other {
                        max_booking = max_booking.max(booking.id);
                    }
                    if let Some(entry) = engine.state.get(&other.restaurant_id()) {
                        let rs = entry.value().clone();
                        let mut guard = rs
                            .try_write()
                            .map_err(|_| io::Error::other("replay: restaurant state contended"))?;
                        apply_to_restaurant(&mut guard, other, &engine.booking_to_restaurant);
                    }
                }
            }
        }
        engine.next_restaurant_id.store(max_restaurant + 1, Ordering::SeqCst);
        engine.next_booking_id.store(max_booking + 1, Ordering::SeqCst);
        metrics::gauge!(crate::observability::RESTAURANTS_ACTIVE).set(engine.state.len() as f64);

        Ok(engine)
    }

    /// Current restaurant-local time from the injected clock.
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    pub fn restaurant_count(&self) -> usize {
        self.state.len()
    }

    pub(super) fn allocate_restaurant_id(&self) -> RestaurantId {
        self.next_restaurant_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(super) fn allocate_booking_id(&self) -> BookingId {
        self.next_booking_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) fn get_restaurant_state(&self, id: &RestaurantId) -> Option<SharedRestaurantState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// WAL-append then apply, under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RestaurantState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_restaurant(rs, event, &self.booking_to_restaurant);
        Ok(())
    }

    /// Lookup booking → restaurant, acquire that restaurant's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: BookingId,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<RestaurantState>, EngineError> {
        let restaurant_id = self
            .booking_to_restaurant
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::booking_not_found(booking_id))?;
        let rs = self
            .get_restaurant_state(&restaurant_id)
            .ok_or(EngineError::restaurant_not_found(restaurant_id))?;
        Ok(rs.write_owned().await)
    }
}

pub(super) fn require_user(user: Option<&User>) -> Result<&User, EngineError> {
    user.ok_or(EngineError::Unauthorized)
}
