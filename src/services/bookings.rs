use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::BookingPolicy;
use crate::error::{EngineError, Result};
use crate::models::booking::{Booking, BookingStatus};
use crate::models::slot::{Slot, SlotStatus, SlotTransition};
use crate::ports::{dispatch, BookingEvent, LedgerMovement, MovementKind, PortError, Ports};
use crate::services::database::{DatabaseService, Tables};
use crate::services::reschedule::reject_pending;
use crate::services::slot_store::release_booked_slot;

/// Result of a booking cancellation.
#[derive(Debug, Clone)]
pub struct Cancellation {
    pub booking: Booking,
    /// Where the freed slot ended up: OPEN when back on sale, else CANCELLED
    pub slot_status: SlotStatus,
}

/// Turns a verified payment into a confirmed booking, and cancels bookings.
pub struct BookingService {
    db: Arc<DatabaseService>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
    ports: Ports,
}

impl BookingService {
    pub fn new(
        db: Arc<DatabaseService>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
        ports: Ports,
    ) -> Self {
        Self {
            db,
            clock,
            policy,
            ports,
        }
    }

    /// Confirm a held slot against a payment reference.
    ///
    /// The payment is verified with no lock held. The booking is then created
    /// and the slot moved to BOOKED in one atomic update. Re-submitting the
    /// same reference for the same slot returns the existing booking.
    pub async fn confirm_booking(
        &self,
        slot_id: Uuid,
        holder_id: &str,
        payment_ref: &str,
    ) -> Result<Booking> {
        let payment_ref = payment_ref.trim();
        if payment_ref.is_empty() {
            return Err(EngineError::Validation("payment reference is required".into()));
        }

        let now = self.clock.now();
        if let Some(existing) = self.db.read(|tables| {
            find_by_payment_ref(tables, payment_ref).cloned()
        })? {
            return same_booking(existing, slot_id, holder_id);
        }

        let slot = self.checkout_hold(slot_id, holder_id, now)?;

        info!("Verifying payment {} for slot {}", payment_ref, slot_id);
        let confirmation = match self.ports.payments.verify(payment_ref).await {
            Ok(confirmation) => confirmation,
            Err(err) => {
                warn!("Payment {} failed: {}", payment_ref, err);
                self.release_after_failed_payment(slot_id, holder_id);
                return Err(EngineError::PaymentFailed(err.to_string()));
            }
        };

        if confirmation.amount != slot.price || confirmation.payer_id != holder_id {
            warn!(
                "Payment {} does not match slot {} (paid {} by {}, expected {} by {})",
                payment_ref,
                slot_id,
                confirmation.amount,
                confirmation.payer_id,
                slot.price,
                holder_id
            );
            self.release_after_failed_payment(slot_id, holder_id);
            return Err(EngineError::PaymentFailed(
                "payment does not match the reserved slot".into(),
            ));
        }

        // The clock is read again: the hold may have lapsed during the call.
        let now = self.clock.now();
        let outcome = self.db.write(|tables| {
            if let Some(existing) = find_by_payment_ref(tables, payment_ref) {
                return same_booking(existing.clone(), slot_id, holder_id).map(|b| (b, false));
            }
            if tables.reschedule_holding(slot_id, now).is_some() {
                return Err(EngineError::held_for_reschedule());
            }
            if tables.confirmed_booking_for_slot(slot_id).is_some() {
                return Err(EngineError::slot_unavailable());
            }

            let slot = tables.slot_mut(slot_id)?;
            slot.apply(SlotTransition::Book { holder: holder_id }, now)?;
            let booking = Booking::confirm(slot, holder_id, payment_ref, now);
            tables.bookings.push(booking.clone());
            Ok((booking, true))
        });

        let booking = match outcome {
            Ok((booking, false)) => return Ok(booking),
            Ok((booking, true)) => booking,
            Err(err) => {
                error!(
                    "Payment {} captured but booking of slot {} failed: {}",
                    payment_ref, slot_id, err
                );
                self.refund(payment_ref, confirmation.amount).await;
                return Err(err);
            }
        };

        info!(
            "Booking {} confirmed: slot {} for mentee {}",
            booking.id, slot_id, holder_id
        );

        self.record_movement(LedgerMovement {
            booking_id: booking.id,
            amount: booking.amount,
            payer_id: booking.mentee_id.clone(),
            payee_id: booking.mentor_id.clone(),
            payment_ref: booking.payment_ref.clone(),
            kind: MovementKind::Debit,
        })
        .await;

        for recipient in [&booking.mentor_id, &booking.mentee_id] {
            dispatch(
                &self.ports.notifier,
                BookingEvent::BookingConfirmed {
                    recipient_id: recipient.clone(),
                    booking_id: booking.id,
                    slot_id,
                },
            );
        }

        Ok(booking)
    }

    /// Wallet route: debit the mentee's internal balance, then confirm.
    pub async fn checkout(&self, slot_id: Uuid, holder_id: &str) -> Result<Booking> {
        let now = self.clock.now();
        let slot = self.checkout_hold(slot_id, holder_id, now)?;

        let payment_ref = match self.ports.payments.authorize(slot.price, holder_id).await {
            Ok(payment_ref) => payment_ref,
            Err(err) => {
                warn!("Balance debit for slot {} by {} failed: {}", slot_id, holder_id, err);
                self.release_after_failed_payment(slot_id, holder_id);
                return Err(EngineError::PaymentFailed(err.to_string()));
            }
        };

        self.confirm_booking(slot_id, holder_id, &payment_ref).await
    }

    /// Cancel a confirmed booking on behalf of one of its parties.
    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        actor_id: &str,
        reason: Option<String>,
    ) -> Result<Cancellation> {
        let now = self.clock.now();
        let policy = self.policy;
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        let cancellation = self.db.write(|tables| {
            let booking = tables.booking(booking_id)?;
            if !booking.is_party(actor_id) {
                return Err(EngineError::Policy(
                    "only the mentor or mentee of a booking can cancel it".into(),
                ));
            }
            if booking.status != BookingStatus::Confirmed {
                return Err(EngineError::Conflict(format!(
                    "booking is {} and cannot be cancelled",
                    booking.status
                )));
            }

            let slot = tables.slot(booking.slot_id)?;
            if slot.start_at <= now {
                return Err(EngineError::Policy("the session has already started".into()));
            }
            if actor_id == booking.mentee_id && slot.start_at - now < policy.min_cancel_notice {
                return Err(EngineError::Policy("minimum notice not met".into()));
            }
            let slot_id = slot.id;

            reject_pending(tables, booking_id, now)?;
            let slot_status = release_booked_slot(tables, slot_id, now, &policy)?;

            let booking = tables.booking_mut(booking_id)?;
            booking.move_to(BookingStatus::Cancelled)?;
            booking.cancelled_at = Some(now);
            booking.cancel_reason = reason.clone();

            Ok(Cancellation {
                booking: booking.clone(),
                slot_status,
            })
        })?;

        let booking = &cancellation.booking;
        info!(
            "Booking {} cancelled by {}; slot {} is now {}",
            booking.id, actor_id, booking.slot_id, cancellation.slot_status
        );

        self.record_movement(LedgerMovement {
            booking_id: booking.id,
            amount: booking.amount,
            payer_id: booking.mentor_id.clone(),
            payee_id: booking.mentee_id.clone(),
            payment_ref: booking.payment_ref.clone(),
            kind: MovementKind::Refund,
        })
        .await;

        let counterparty = if actor_id == booking.mentee_id {
            &booking.mentor_id
        } else {
            &booking.mentee_id
        };
        dispatch(
            &self.ports.notifier,
            BookingEvent::BookingCancelled {
                recipient_id: counterparty.clone(),
                booking_id: booking.id,
                cancelled_by: actor_id.to_string(),
                reason: booking.cancel_reason.clone().unwrap_or_default(),
            },
        );

        Ok(cancellation)
    }

    pub fn get(&self, booking_id: Uuid, actor_id: &str) -> Result<Booking> {
        let booking = self.db.read(|tables| tables.booking(booking_id).cloned())??;
        if !booking.is_party(actor_id) {
            return Err(EngineError::Policy(
                "bookings are only visible to their mentor and mentee".into(),
            ));
        }
        Ok(booking)
    }

    /// Bookings where the user is the mentor or the mentee, newest first.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<Booking>> {
        let mut bookings = self.db.read(|tables| {
            tables
                .bookings
                .iter()
                .filter(|b| b.is_party(user_id))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    /// Mark CONFIRMED bookings whose session has ended as COMPLETED.
    pub fn complete_finished(&self) -> Result<usize> {
        let now = self.clock.now();

        let completed = self.db.write(|tables| {
            let finished: Vec<Uuid> = tables
                .bookings
                .iter()
                .filter(|b| b.status == BookingStatus::Confirmed)
                .filter(|b| tables.slot(b.slot_id).map_or(false, |s| s.end_at <= now))
                .map(|b| b.id)
                .collect();

            for booking_id in &finished {
                reject_pending(tables, *booking_id, now)?;
                tables
                    .booking_mut(*booking_id)?
                    .move_to(BookingStatus::Completed)?;
            }
            Ok(finished.len())
        })?;

        if completed > 0 {
            info!("Completed {} finished bookings", completed);
        }
        Ok(completed)
    }

    // The slot, provided the caller holds a live checkout hold on it.
    // A hold backing a reschedule request cannot be bought.
    fn checkout_hold(&self, slot_id: Uuid, holder_id: &str, now: DateTime<Utc>) -> Result<Slot> {
        let slot = self.db.read(|tables| {
            if tables.reschedule_holding(slot_id, now).is_some() {
                return Err(EngineError::held_for_reschedule());
            }
            tables.slot(slot_id).cloned()
        })??;
        ensure_live_hold(&slot, holder_id, now)?;
        Ok(slot)
    }

    fn release_after_failed_payment(&self, slot_id: Uuid, holder_id: &str) {
        let now = self.clock.now();
        let released = self.db.write(|tables| {
            if tables.reschedule_holding(slot_id, now).is_some() {
                return Err(EngineError::held_for_reschedule());
            }
            tables
                .slot_mut(slot_id)?
                .apply(SlotTransition::Release { holder: holder_id }, now)
        });
        match released {
            Ok(()) => info!("Released slot {} after failed payment", slot_id),
            Err(err) => debug!("Slot {} not released after failed payment: {}", slot_id, err),
        }
    }

    async fn refund(&self, payment_ref: &str, amount: i64) {
        match self.ports.payments.refund(payment_ref, amount).await {
            Ok(()) => info!("Refunded payment {}", payment_ref),
            Err(err) => error!("Refund of payment {} failed: {}", payment_ref, err),
        }
    }

    async fn record_movement(&self, movement: LedgerMovement) {
        let booking_id = movement.booking_id;
        let kind = movement.kind;
        if let Err(err) = self.ports.ledger.record_movement(movement).await {
            log_ledger_failure(booking_id, kind, &err);
        }
    }
}

fn log_ledger_failure(booking_id: Uuid, kind: MovementKind, err: &PortError) {
    error!(
        "Ledger {:?} for booking {} was not recorded, needs reconciliation: {}",
        kind, booking_id, err
    );
}

fn find_by_payment_ref<'a>(tables: &'a Tables, payment_ref: &str) -> Option<&'a Booking> {
    tables.bookings.iter().find(|b| b.payment_ref == payment_ref)
}

// A payment reference confirms at most one booking.
fn same_booking(existing: Booking, slot_id: Uuid, holder_id: &str) -> Result<Booking> {
    if existing.slot_id == slot_id && existing.mentee_id == holder_id {
        debug!("Payment {} already confirmed booking {}", existing.payment_ref, existing.id);
        Ok(existing)
    } else {
        Err(EngineError::Conflict(
            "payment reference was already used for another booking".into(),
        ))
    }
}

fn ensure_live_hold(slot: &Slot, holder_id: &str, now: DateTime<Utc>) -> Result<()> {
    let held_by_caller =
        slot.status == SlotStatus::Reserved && slot.participant_id.as_deref() == Some(holder_id);

    if held_by_caller && slot.hold_lapsed(now) {
        return Err(EngineError::Expired(
            "reservation expired before the booking was confirmed".into(),
        ));
    }
    if !held_by_caller {
        return Err(EngineError::slot_unavailable());
    }
    Ok(())
}
