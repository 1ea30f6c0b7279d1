use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::BookingPolicy;
use crate::error::{EngineError, Result};
use crate::models::booking::{RescheduleAction, RescheduleStatus};
use crate::models::slot::{CustomSlotRequest, Slot, SlotOrigin, SlotStatus, SlotTransition};
use crate::ports::{dispatch, BookingEvent, NotificationPort};
use crate::services::database::{DatabaseService, Tables};

/// Read and mentor-side write access to concrete slots.
pub struct SlotStore {
    db: Arc<DatabaseService>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationPort>,
}

impl SlotStore {
    pub fn new(
        db: Arc<DatabaseService>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationPort>,
    ) -> Self {
        Self {
            db,
            clock,
            notifier,
        }
    }

    /// A slot as of now. Lapsed holds read as OPEN.
    pub fn get(&self, slot_id: Uuid) -> Result<Slot> {
        let now = self.clock.now();
        self.db
            .read(|tables| tables.slot(slot_id).map(|slot| slot.as_of(now)))?
    }

    /// Slots of a mentor starting in `[from, to)`, ordered by start time.
    pub fn list_range(
        &self,
        mentor_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        available_only: bool,
    ) -> Result<Vec<Slot>> {
        let now = self.clock.now();
        let mut slots = self.db.read(|tables| {
            tables
                .slots
                .iter()
                .filter(|s| s.mentor_id == mentor_id && s.start_at >= from && s.start_at < to)
                .map(|s| s.as_of(now))
                .filter(|s| !available_only || (s.status == SlotStatus::Open && s.start_at > now))
                .collect::<Vec<_>>()
        })?;
        slots.sort_by_key(|s| s.start_at);

        debug!(
            "Listed {} slots for mentor {} between {} and {}",
            slots.len(),
            mentor_id,
            from,
            to
        );
        Ok(slots)
    }

    /// Create a one-off slot. It must start in the future and must not
    /// overlap any live slot of the same mentor.
    pub fn create_custom(&self, mentor_id: &str, request: &CustomSlotRequest) -> Result<Slot> {
        let now = self.clock.now();
        let slot = Slot::custom(mentor_id, request)?;
        if slot.start_at <= now {
            return Err(EngineError::Validation(
                "custom slots must start in the future".into(),
            ));
        }

        self.db.write(|tables| {
            if let Some(existing) =
                tables.overlapping_live_slot(&slot.mentor_id, slot.start_at, slot.end_at)
            {
                return Err(EngineError::Conflict(format!(
                    "slot overlaps existing slot {} starting {}",
                    existing.id, existing.start_at
                )));
            }
            tables.slots.push(slot.clone());
            Ok(())
        })?;

        info!(
            "Created custom slot {} for mentor {} at {}",
            slot.id, slot.mentor_id, slot.start_at
        );
        Ok(slot)
    }

    /// Mentor-initiated removal of an unbooked slot. A pending reschedule
    /// that was holding the slot is rejected in the same update.
    pub fn cancel(&self, slot_id: Uuid, actor_id: &str) -> Result<Slot> {
        let now = self.clock.now();

        let (slot, rejected) = self.db.write(|tables| {
            let slot = tables.slot_mut(slot_id)?;
            if slot.mentor_id != actor_id {
                return Err(EngineError::Policy(
                    "only the owning mentor can cancel this slot".into(),
                ));
            }
            slot.apply(SlotTransition::Cancel, now)?;
            let slot = slot.clone();
            let rejected = reject_requests_for_slot(tables, slot_id, now);
            Ok((slot, rejected))
        })?;

        info!("Mentor {} cancelled slot {}", actor_id, slot_id);
        for (booking_id, mentee_id) in rejected {
            dispatch(
                &self.notifier,
                BookingEvent::RescheduleResolved {
                    recipient_id: mentee_id,
                    booking_id,
                    status: RescheduleStatus::Rejected,
                },
            );
        }
        Ok(slot)
    }
}

/// First instant of the month and first instant of the next month.
pub fn month_range(year: i32, month: u32) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let invalid = || EngineError::Validation(format!("invalid month {}-{}", year, month));

    let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;

    let start = start.and_hms_opt(0, 0, 0).ok_or_else(invalid)?.and_utc();
    let next = next.and_hms_opt(0, 0, 0).ok_or_else(invalid)?.and_utc();
    Ok((start, next))
}

/// Cancel the future OPEN slots generated from a rule. Lapsed holds count as
/// OPEN; BOOKED and live RESERVED slots are left alone.
pub(crate) fn cancel_future_open_slots(
    tables: &mut Tables,
    rule_id: Uuid,
    now: DateTime<Utc>,
) -> usize {
    let mut cancelled = 0;
    for slot in tables
        .slots
        .iter_mut()
        .filter(|s| s.rule_id == Some(rule_id) && s.start_at > now)
    {
        slot.expire_hold(now);
        if slot.status == SlotStatus::Open && slot.apply(SlotTransition::Cancel, now).is_ok() {
            cancelled += 1;
        }
    }
    cancelled
}

/// Free the slot of a cancelled booking.
///
/// The slot goes back on sale only if it is still in the future and it is
/// custom, its rule is still active, or the policy releases slots of
/// disabled rules. Otherwise it ends CANCELLED.
pub(crate) fn release_booked_slot(
    tables: &mut Tables,
    slot_id: Uuid,
    now: DateTime<Utc>,
    policy: &BookingPolicy,
) -> Result<SlotStatus> {
    let rule_active = {
        let slot = tables.slot(slot_id)?;
        match (slot.generated_from, slot.rule_id) {
            (SlotOrigin::Custom, _) => true,
            (SlotOrigin::Rule, Some(rule_id)) => {
                tables.rule(rule_id).map_or(false, |rule| rule.is_active)
            }
            (SlotOrigin::Rule, None) => false,
        }
    };

    let slot = tables.slot_mut(slot_id)?;
    let reopen = slot.start_at > now && (rule_active || policy.release_when_rule_inactive);
    slot.apply(SlotTransition::CancelBooking { reopen }, now)?;
    Ok(slot.status)
}

/// Reject pending reschedule requests that target `slot_id`.
/// Returns the affected bookings with their mentees.
pub(crate) fn reject_requests_for_slot(
    tables: &mut Tables,
    slot_id: Uuid,
    now: DateTime<Utc>,
) -> Vec<(Uuid, String)> {
    let mut affected = Vec::new();
    for booking in tables.bookings.iter_mut() {
        if let Some(request) = booking.reschedule_request.as_mut() {
            if request.is_pending()
                && request.requested_slot_id == slot_id
                && request.resolve(RescheduleAction::Rejected, now).is_ok()
            {
                warn!(
                    "Rejected reschedule of booking {} because slot {} is gone",
                    booking.id, slot_id
                );
                affected.push((booking.id, booking.mentee_id.clone()));
            }
        }
    }
    affected
}
