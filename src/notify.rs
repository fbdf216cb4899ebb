use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::model::{Booking, Restaurant, User};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Outbound booking notices. Delivery is best-effort: the engine logs
/// failures and never rolls back a mutation because of one.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn booking_confirmed(
        &self,
        user: &User,
        booking: &Booking,
        restaurant: &Restaurant,
    ) -> Result<(), NotifyError>;

    async fn booking_cancelled(
        &self,
        user: &User,
        booking: &Booking,
        restaurant: &Restaurant,
    ) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    Confirmed,
    Cancelled,
}

/// Everything a mail worker needs to render a notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub recipient_name: String,
    pub recipient_email: String,
    pub booking: Booking,
    pub restaurant_name: String,
}

/// Broadcast hub that hands notices to whichever delivery workers are subscribed.
pub struct NotifyHub {
    sender: broadcast::Sender<Notice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    fn publish(
        &self,
        kind: NoticeKind,
        user: &User,
        booking: &Booking,
        restaurant: &Restaurant,
    ) -> Result<(), NotifyError> {
        let notice = Notice {
            kind,
            recipient_name: user.name.clone(),
            recipient_email: user.email.clone(),
            booking: booking.clone(),
            restaurant_name: restaurant.name.primary.clone(),
        };
        self.sender
            .send(notice)
            .map(|_| ())
            .map_err(|_| NotifyError("no delivery worker subscribed".into()))
    }
}

#[async_trait]
impl Notifier for NotifyHub {
    async fn booking_confirmed(
        &self,
        user: &User,
        booking: &Booking,
        restaurant: &Restaurant,
    ) -> Result<(), NotifyError> {
        self.publish(NoticeKind::Confirmed, user, booking, restaurant)
    }

    async fn booking_cancelled(
        &self,
        user: &User,
        booking: &Booking,
        restaurant: &Restaurant,
    ) -> Result<(), NotifyError> {
        self.publish(NoticeKind::Cancelled, user, booking, restaurant)
    }
}

/// Drain notices and log them. Stands in for SMTP delivery.
pub async fn run_delivery_log(mut rx: broadcast::Receiver<Notice>) {
    loop {
        match rx.recv().await {
            Ok(notice) => tracing::info!(
                booking_id = notice.booking.id,
                to = %notice.recipient_email,
                "booking {:?} notice for {} at {}",
                notice.kind,
                notice.recipient_name,
                notice.restaurant_name,
            ),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("delivery log lagged, {n} notices dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
