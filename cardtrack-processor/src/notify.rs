//! Milestone notifications.
//!
//! When a merge accepts one of a small set of customer-visible
//! milestones, the batch coordinator hands a notification to a sink.
//! The sink is a port so the delivery mechanism stays out of the
//! pipeline; the default sink just logs.

use async_trait::async_trait;
use cardtrack_core::domain::TimelineEvent;
use cardtrack_core::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::observability::metrics::{self, MetricName};

/// Statuses worth telling the customer about.
pub const MILESTONE_STATUSES: [&str; 4] = [
    "APPLICATION_APPROVED",
    "DISPATCHED",
    "OUT_FOR_DELIVERY",
    "DELIVERED",
];

#[derive(Debug, Clone)]
pub struct Notification {
    pub customer_id: String,
    pub card_id: String,
    pub event: TimelineEvent,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Default sink: structured log lines, no external delivery.
#[derive(Debug, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, notification: Notification) -> Result<()> {
        info!(
            customer_id = %notification.customer_id,
            card_id = %notification.card_id,
            status = %notification.event.status,
            "Milestone notification"
        );
        metrics::increment(MetricName::NotificationsEnqueued);
        Ok(())
    }
}

/// Sink backed by an mpsc channel, for tests and for embedding the
/// pipeline behind a delivery worker. A full channel drops the
/// notification with a warning rather than stalling the batch.
pub struct ChannelNotificationSink {
    sender: mpsc::Sender<Notification>,
}

impl ChannelNotificationSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl NotificationSink for ChannelNotificationSink {
    async fn notify(&self, notification: Notification) -> Result<()> {
        match self.sender.try_send(notification) {
            Ok(()) => {
                metrics::increment(MetricName::NotificationsEnqueued);
            }
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(card_id = %dropped.card_id, "Notification channel full, dropping");
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                warn!(card_id = %dropped.card_id, "Notification channel closed, dropping");
            }
        }
        Ok(())
    }
}
