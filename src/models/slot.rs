use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::rule::RecurringRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    Open,
    Reserved,
    Booked,
    Cancelled,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Open => "OPEN",
            SlotStatus::Reserved => "RESERVED",
            SlotStatus::Booked => "BOOKED",
            SlotStatus::Cancelled => "CANCELLED",
        }
    }

    /// The slot lifecycle transition table.
    ///
    /// `Booked -> Open` is the release path of a cancelled booking whose slot
    /// goes back on sale.
    pub fn can_transition_to(self, next: SlotStatus) -> bool {
        use SlotStatus::*;
        matches!(
            (self, next),
            (Open, Reserved)
                | (Reserved, Open)
                | (Reserved, Booked)
                | (Open, Cancelled)
                | (Reserved, Cancelled)
                | (Booked, Cancelled)
                | (Booked, Open)
        )
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotOrigin {
    Rule,
    Custom,
}

/// One concrete, dated bookable window.
///
/// A live reservation is stored on the slot itself: `status == RESERVED`
/// with `participant_id` and `expires_at` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: Uuid,
    pub mentor_id: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub price: i64,
    pub status: SlotStatus,
    pub generated_from: SlotOrigin,
    pub rule_id: Option<Uuid>,
    pub rule_revision: Option<u32>,
    pub participant_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub version: u64,
}

/// A temporary claim on a slot during checkout or a pending reschedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub slot_id: Uuid,
    pub holder_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomSlotRequest {
    pub start_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub price: i64,
}

/// A requested change of slot state. Applied through [`Slot::apply`].
#[derive(Debug, Clone, Copy)]
pub enum SlotTransition<'a> {
    Reserve {
        holder: &'a str,
        expires_at: DateTime<Utc>,
    },
    Release {
        holder: &'a str,
    },
    Book {
        holder: &'a str,
    },
    /// Mentor removes an unbooked slot
    Cancel,
    /// The slot's booking was cancelled; `reopen` puts it back on sale
    CancelBooking {
        reopen: bool,
    },
}

impl Slot {
    pub fn from_rule(rule: &RecurringRule, start_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mentor_id: rule.mentor_id.clone(),
            start_at,
            end_at: start_at + Duration::minutes(rule.slot_duration_minutes as i64),
            duration_minutes: rule.slot_duration_minutes,
            price: rule.price,
            status: SlotStatus::Open,
            generated_from: SlotOrigin::Rule,
            rule_id: Some(rule.id),
            rule_revision: Some(rule.revision),
            participant_id: None,
            expires_at: None,
            version: 0,
        }
    }

    pub fn custom(mentor_id: &str, request: &CustomSlotRequest) -> Result<Self> {
        if mentor_id.trim().is_empty() {
            return Err(EngineError::Validation("mentor id is required".into()));
        }
        if request.duration_minutes == 0 || request.duration_minutes > 24 * 60 {
            return Err(EngineError::Validation(
                "slot duration must be between 1 and 1440 minutes".into(),
            ));
        }
        if request.price < 0 {
            return Err(EngineError::Validation("price must not be negative".into()));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            mentor_id: mentor_id.to_string(),
            start_at: request.start_at,
            end_at: request.start_at + Duration::minutes(request.duration_minutes as i64),
            duration_minutes: request.duration_minutes,
            price: request.price,
            status: SlotStatus::Open,
            generated_from: SlotOrigin::Custom,
            rule_id: None,
            rule_revision: None,
            participant_id: None,
            expires_at: None,
            version: 0,
        })
    }

    pub fn is_live(&self) -> bool {
        self.status != SlotStatus::Cancelled
    }

    pub fn overlaps(&self, start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> bool {
        self.start_at < end_at && start_at < self.end_at
    }

    pub fn hold_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == SlotStatus::Reserved && self.expires_at.map_or(false, |t| t <= now)
    }

    /// Lazy expiry: a hold past its deadline reverts to OPEN.
    /// Returns the holder whose reservation lapsed.
    pub fn expire_hold(&mut self, now: DateTime<Utc>) -> Option<String> {
        if !self.hold_lapsed(now) {
            return None;
        }
        self.status = SlotStatus::Open;
        self.expires_at = None;
        self.version += 1;
        self.participant_id.take()
    }

    /// A copy of the slot as any read at `now` must see it.
    pub fn as_of(&self, now: DateTime<Utc>) -> Slot {
        let mut slot = self.clone();
        slot.expire_hold(now);
        slot
    }

    pub fn reservation(&self) -> Option<Reservation> {
        match (self.status, &self.participant_id, self.expires_at) {
            (SlotStatus::Reserved, Some(holder), Some(expires_at)) => Some(Reservation {
                slot_id: self.id,
                holder_id: holder.clone(),
                expires_at,
            }),
            _ => None,
        }
    }

    fn move_to(&mut self, next: SlotStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::Conflict(format!(
                "slot is {} and cannot become {}",
                self.status, next
            )));
        }
        self.status = next;
        self.version += 1;
        Ok(())
    }

    /// Apply one lifecycle transition, enforcing its guard.
    ///
    /// A lapsed hold is expired first, so every transition sees the same
    /// deadline the reads do.
    pub fn apply(&mut self, transition: SlotTransition<'_>, now: DateTime<Utc>) -> Result<()> {
        let lapsed_holder = self.expire_hold(now);

        match transition {
            SlotTransition::Reserve { holder, expires_at } => {
                if holder == self.mentor_id {
                    return Err(EngineError::Policy(
                        "mentors cannot reserve their own slots".into(),
                    ));
                }
                if self.status != SlotStatus::Open {
                    return Err(EngineError::slot_unavailable());
                }
                if self.start_at <= now {
                    return Err(EngineError::Conflict("slot has already started".into()));
                }
                self.move_to(SlotStatus::Reserved)?;
                self.participant_id = Some(holder.to_string());
                self.expires_at = Some(expires_at);
            }
            SlotTransition::Release { holder } => {
                if lapsed_holder.as_deref() == Some(holder) {
                    return Ok(());
                }
                if self.status != SlotStatus::Reserved {
                    return Err(EngineError::Conflict("slot is not reserved".into()));
                }
                if self.participant_id.as_deref() != Some(holder) {
                    return Err(EngineError::Policy(
                        "reservation is held by another user".into(),
                    ));
                }
                self.move_to(SlotStatus::Open)?;
                self.participant_id = None;
                self.expires_at = None;
            }
            SlotTransition::Book { holder } => {
                if lapsed_holder.as_deref() == Some(holder) {
                    return Err(EngineError::Expired(
                        "reservation expired before the booking was confirmed".into(),
                    ));
                }
                if self.status != SlotStatus::Reserved
                    || self.participant_id.as_deref() != Some(holder)
                {
                    return Err(EngineError::slot_unavailable());
                }
                self.move_to(SlotStatus::Booked)?;
                self.expires_at = None;
            }
            SlotTransition::Cancel => {
                if self.status == SlotStatus::Booked {
                    return Err(EngineError::Conflict(
                        "booked slots are cancelled through their booking".into(),
                    ));
                }
                self.move_to(SlotStatus::Cancelled)?;
                self.participant_id = None;
                self.expires_at = None;
            }
            SlotTransition::CancelBooking { reopen } => {
                if self.status != SlotStatus::Booked {
                    return Err(EngineError::Conflict(format!(
                        "slot is {} and has no booking to cancel",
                        self.status
                    )));
                }
                let next = if reopen {
                    SlotStatus::Open
                } else {
                    SlotStatus::Cancelled
                };
                self.move_to(next)?;
                self.participant_id = None;
                self.expires_at = None;
            }
        }

        Ok(())
    }
}
