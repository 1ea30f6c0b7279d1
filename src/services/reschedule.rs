use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::BookingPolicy;
use crate::error::{EngineError, Result};
use crate::models::booking::{
    Booking, BookingStatus, RescheduleAction, RescheduleRequest, RescheduleStatus,
};
use crate::models::slot::SlotTransition;
use crate::ports::{dispatch, BookingEvent, NotificationPort};
use crate::services::database::{DatabaseService, Tables};
use crate::services::slot_store::release_booked_slot;

/// Mentee-initiated, mentor-approved move of a booking to another slot.
///
/// The requested slot is held for the mentee while the request is pending,
/// with the hold deadline equal to the request deadline. Approval swaps the
/// slots in a single update; any failure leaves the original booking as it
/// was.
pub struct RescheduleWorkflow {
    db: Arc<DatabaseService>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
    notifier: Arc<dyn NotificationPort>,
}

impl RescheduleWorkflow {
    pub fn new(
        db: Arc<DatabaseService>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
        notifier: Arc<dyn NotificationPort>,
    ) -> Self {
        Self {
            db,
            clock,
            policy,
            notifier,
        }
    }

    pub fn request(
        &self,
        booking_id: Uuid,
        actor_id: &str,
        requested_slot_id: Uuid,
        reason: &str,
    ) -> Result<RescheduleRequest> {
        let now = self.clock.now();
        let max_age = self.policy.reschedule_max_age;
        let min_notice = self.policy.min_cancel_notice;

        let (request, mentor_id, lapsed) = self.db.write(|tables| {
            // A request past its deadline no longer blocks a new one
            let lapsed = tables
                .booking(booking_id)?
                .pending_reschedule()
                .map_or(false, |request| request.is_stale(now));
            if lapsed {
                reject_pending(tables, booking_id, now)?;
            }

            let booking = tables.booking(booking_id)?;
            if booking.mentee_id != actor_id {
                return Err(EngineError::Policy(
                    "only the mentee of a booking can ask to reschedule it".into(),
                ));
            }
            if booking.status != BookingStatus::Confirmed {
                return Err(EngineError::Conflict(format!(
                    "booking is {} and cannot be rescheduled",
                    booking.status
                )));
            }
            if booking.pending_reschedule().is_some() {
                return Err(EngineError::Conflict(
                    "booking already has a pending reschedule request".into(),
                ));
            }
            if booking.slot_id == requested_slot_id {
                return Err(EngineError::Validation(
                    "requested slot is the booking's current slot".into(),
                ));
            }

            let current = tables.slot(booking.slot_id)?;
            if current.start_at - now < min_notice {
                return Err(EngineError::Policy("minimum notice not met".into()));
            }

            let mentor_id = booking.mentor_id.clone();
            let mentee_id = booking.mentee_id.clone();

            let target = tables.slot_mut(requested_slot_id)?;
            if target.mentor_id != mentor_id {
                return Err(EngineError::Validation(
                    "requested slot belongs to a different mentor".into(),
                ));
            }
            // The hold never outlives the session it is holding
            let expires_at = (now + max_age).min(target.start_at);
            target.apply(
                SlotTransition::Reserve {
                    holder: &mentee_id,
                    expires_at,
                },
                now,
            )?;

            let request = RescheduleRequest {
                booking_id,
                requested_slot_id,
                reason: reason.trim().to_string(),
                status: RescheduleStatus::Pending,
                requested_at: now,
                expires_at,
                resolved_at: None,
            };
            tables.booking_mut(booking_id)?.reschedule_request = Some(request.clone());
            Ok((request, mentor_id, lapsed))
        })?;

        if lapsed {
            info!("Stale reschedule of booking {} was rejected", booking_id);
            self.notify_resolved(booking_id, RescheduleStatus::Rejected)?;
        }

        info!(
            "Mentee {} asked to move booking {} to slot {}",
            actor_id, booking_id, requested_slot_id
        );
        dispatch(
            &self.notifier,
            BookingEvent::RescheduleRequested {
                recipient_id: mentor_id,
                booking_id,
                requested_slot_id,
                reason: request.reason.clone(),
            },
        );
        Ok(request)
    }

    /// The mentor's decision. A request that outlived its deadline is
    /// rejected instead and the call fails with `Expired`.
    pub fn resolve(
        &self,
        booking_id: Uuid,
        actor_id: &str,
        action: RescheduleAction,
    ) -> Result<Booking> {
        let now = self.clock.now();
        let policy = self.policy;

        let lapsed = self.db.write(|tables| {
            let booking = tables.booking(booking_id)?;
            ensure_mentor(booking, actor_id)?;
            let stale = booking
                .pending_reschedule()
                .map_or(false, |request| request.is_stale(now));
            if !stale {
                return Ok(false);
            }
            Ok(reject_pending(tables, booking_id, now)?.is_some())
        })?;
        if lapsed {
            warn!("Reschedule of booking {} expired before it was resolved", booking_id);
            self.notify_resolved(booking_id, RescheduleStatus::Rejected)?;
            return Err(EngineError::Expired(
                "reschedule request expired and was rejected".into(),
            ));
        }

        let booking = self.db.write(|tables| {
            let booking = tables.booking(booking_id)?;
            ensure_mentor(booking, actor_id)?;
            let request = booking.pending_reschedule().cloned().ok_or_else(|| {
                EngineError::Conflict("booking has no pending reschedule request".into())
            })?;

            match action {
                RescheduleAction::Rejected => {
                    reject_pending(tables, booking_id, now)?;
                }
                RescheduleAction::Approved => {
                    let old_slot_id = booking.slot_id;
                    let mentee_id = booking.mentee_id.clone();
                    let new_slot_id = request.requested_slot_id;

                    if tables.slot(new_slot_id)?.start_at <= now {
                        return Err(EngineError::Expired(
                            "requested slot has already started".into(),
                        ));
                    }
                    if tables.confirmed_booking_for_slot(new_slot_id).is_some() {
                        return Err(EngineError::slot_unavailable());
                    }
                    tables
                        .slot_mut(new_slot_id)?
                        .apply(SlotTransition::Book { holder: &mentee_id }, now)?;
                    release_booked_slot(tables, old_slot_id, now, &policy)?;

                    let booking = tables.booking_mut(booking_id)?;
                    booking.slot_id = new_slot_id;
                    if let Some(request) = booking.reschedule_request.as_mut() {
                        request.resolve(RescheduleAction::Approved, now)?;
                    }
                }
            }

            tables.booking(booking_id).cloned()
        })?;

        info!(
            "Mentor {} {:?} reschedule of booking {}; booking now on slot {}",
            actor_id, action, booking_id, booking.slot_id
        );
        let status = match action {
            RescheduleAction::Approved => RescheduleStatus::Approved,
            RescheduleAction::Rejected => RescheduleStatus::Rejected,
        };
        self.notify_resolved(booking_id, status)?;
        Ok(booking)
    }

    /// Auto-reject every pending request past its deadline.
    pub fn expire_pending(&self) -> Result<usize> {
        let now = self.clock.now();

        let rejected = self.db.write(|tables| {
            let stale: Vec<Uuid> = tables
                .bookings
                .iter()
                .filter(|b| b.pending_reschedule().map_or(false, |r| r.is_stale(now)))
                .map(|b| b.id)
                .collect();
            for booking_id in &stale {
                reject_pending(tables, *booking_id, now)?;
            }
            Ok(stale)
        })?;

        for booking_id in &rejected {
            self.notify_resolved(*booking_id, RescheduleStatus::Rejected)?;
        }
        if !rejected.is_empty() {
            info!("Auto-rejected {} stale reschedule requests", rejected.len());
        }
        Ok(rejected.len())
    }

    fn notify_resolved(&self, booking_id: Uuid, status: RescheduleStatus) -> Result<()> {
        let mentee_id = self
            .db
            .read(|tables| tables.booking(booking_id).map(|b| b.mentee_id.clone()))??;
        dispatch(
            &self.notifier,
            BookingEvent::RescheduleResolved {
                recipient_id: mentee_id,
                booking_id,
                status,
            },
        );
        Ok(())
    }
}

fn ensure_mentor(booking: &Booking, actor_id: &str) -> Result<()> {
    if booking.mentor_id != actor_id {
        return Err(EngineError::Policy(
            "only the booking's mentor can resolve a reschedule request".into(),
        ));
    }
    Ok(())
}

/// Reject the booking's pending reschedule, if any, and give back the hold
/// on the requested slot.
pub(crate) fn reject_pending(
    tables: &mut Tables,
    booking_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<RescheduleRequest>> {
    let booking = tables.booking_mut(booking_id)?;
    let mentee_id = booking.mentee_id.clone();
    let request = match booking.reschedule_request.as_mut() {
        Some(request) if request.is_pending() => request,
        _ => return Ok(None),
    };
    request.resolve(RescheduleAction::Rejected, now)?;
    let request = request.clone();

    let released = tables
        .slot_mut(request.requested_slot_id)
        .and_then(|slot| slot.apply(SlotTransition::Release { holder: &mentee_id }, now));
    if let Err(err) = released {
        debug!(
            "Hold on slot {} was already gone: {}",
            request.requested_slot_id, err
        );
    }

    Ok(Some(request))
}
