use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::slot::Slot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Confirmed, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::Completed)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Completed => "COMPLETED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RescheduleStatus {
    Pending,
    Approved,
    Rejected,
}

/// The mentor's decision on a pending reschedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RescheduleAction {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    pub booking_id: Uuid,
    pub requested_slot_id: Uuid,
    pub reason: String,
    pub status: RescheduleStatus,
    pub requested_at: DateTime<Utc>,
    /// Pending requests are auto-rejected at this instant
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl RescheduleRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RescheduleStatus::Pending
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.expires_at <= now
    }

    pub fn resolve(&mut self, action: RescheduleAction, now: DateTime<Utc>) -> Result<()> {
        if !self.is_pending() {
            return Err(EngineError::Conflict(
                "reschedule request is already resolved".into(),
            ));
        }
        self.status = match action {
            RescheduleAction::Approved => RescheduleStatus::Approved,
            RescheduleAction::Rejected => RescheduleStatus::Rejected,
        };
        self.resolved_at = Some(now);
        Ok(())
    }
}

/// The confirmed outcome of a successful payment against a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub slot_id: Uuid,
    pub mentor_id: String,
    pub mentee_id: String,
    pub status: BookingStatus,
    pub payment_ref: String,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub reschedule_request: Option<RescheduleRequest>,
}

impl Booking {
    pub fn confirm(slot: &Slot, mentee_id: &str, payment_ref: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            slot_id: slot.id,
            mentor_id: slot.mentor_id.clone(),
            mentee_id: mentee_id.to_string(),
            status: BookingStatus::Confirmed,
            payment_ref: payment_ref.to_string(),
            amount: slot.price,
            created_at: now,
            cancelled_at: None,
            cancel_reason: None,
            reschedule_request: None,
        }
    }

    pub fn is_party(&self, user_id: &str) -> bool {
        self.mentor_id == user_id || self.mentee_id == user_id
    }

    pub fn pending_reschedule(&self) -> Option<&RescheduleRequest> {
        self.reschedule_request.as_ref().filter(|r| r.is_pending())
    }

    pub fn move_to(&mut self, next: BookingStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::Conflict(format!(
                "booking is {} and cannot become {}",
                self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub slot_id: Uuid,
    pub payment_ref: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelBookingRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleBody {
    pub requested_slot_id: Uuid,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveRescheduleBody {
    pub action: RescheduleAction,
}
