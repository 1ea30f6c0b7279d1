use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use super::PortError;
use crate::models::booking::RescheduleStatus;

/// An event the counterparty of a reservation or booking is told about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingEvent {
    SlotReserved {
        recipient_id: String,
        slot_id: Uuid,
        holder_id: String,
        expires_at: DateTime<Utc>,
    },
    BookingConfirmed {
        recipient_id: String,
        booking_id: Uuid,
        slot_id: Uuid,
    },
    BookingCancelled {
        recipient_id: String,
        booking_id: Uuid,
        cancelled_by: String,
        reason: String,
    },
    RescheduleRequested {
        recipient_id: String,
        booking_id: Uuid,
        requested_slot_id: Uuid,
        reason: String,
    },
    RescheduleResolved {
        recipient_id: String,
        booking_id: Uuid,
        status: RescheduleStatus,
    },
}

impl BookingEvent {
    pub fn recipient(&self) -> &str {
        match self {
            BookingEvent::SlotReserved { recipient_id, .. }
            | BookingEvent::BookingConfirmed { recipient_id, .. }
            | BookingEvent::BookingCancelled { recipient_id, .. }
            | BookingEvent::RescheduleRequested { recipient_id, .. }
            | BookingEvent::RescheduleResolved { recipient_id, .. } => recipient_id,
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn notify(&self, event: BookingEvent) -> Result<(), PortError>;
}

/// Best-effort delivery: the send runs on its own task and failures are
/// only logged.
pub fn dispatch(notifier: &Arc<dyn NotificationPort>, event: BookingEvent) {
    let Ok(handle) = Handle::try_current() else {
        debug!("No runtime available, dropping notification for {}", event.recipient());
        return;
    };

    let notifier = Arc::clone(notifier);
    handle.spawn(async move {
        let recipient = event.recipient().to_string();
        if let Err(err) = notifier.notify(event).await {
            warn!("Failed to notify {}: {}", recipient, err);
        }
    });
}
