use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::BookingPolicy;
use crate::error::{EngineError, Result};
use crate::models::slot::{Reservation, SlotTransition};
use crate::ports::{dispatch, BookingEvent, NotificationPort};
use crate::services::database::DatabaseService;

/// Places and releases checkout holds.
pub struct ReservationManager {
    db: Arc<DatabaseService>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
    notifier: Arc<dyn NotificationPort>,
}

impl ReservationManager {
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

    /// Hold a slot for `holder_id`. Concurrent calls on one slot serialize on
    /// the store lock; exactly one of them wins.
    pub fn reserve(&self, slot_id: Uuid, holder_id: &str) -> Result<Reservation> {
        let now = self.clock.now();
        let expires_at = now + self.policy.hold;

        let (reservation, mentor_id) = self.db.write(|tables| {
            let slot = tables.slot_mut(slot_id)?;
            slot.apply(
                SlotTransition::Reserve {
                    holder: holder_id,
                    expires_at,
                },
                now,
            )?;
            let reservation = slot
                .reservation()
                .ok_or_else(|| EngineError::Storage(format!("slot {} lost its hold", slot_id)))?;
            Ok((reservation, slot.mentor_id.clone()))
        })?;

        info!(
            "User {} reserved slot {} until {}",
            holder_id, slot_id, reservation.expires_at
        );
        dispatch(
            &self.notifier,
            BookingEvent::SlotReserved {
                recipient_id: mentor_id,
                slot_id,
                holder_id: holder_id.to_string(),
                expires_at: reservation.expires_at,
            },
        );
        Ok(reservation)
    }

    /// Give a hold back. Releasing a hold that already lapsed is a no-op.
    pub fn release(&self, slot_id: Uuid, holder_id: &str) -> Result<()> {
        let now = self.clock.now();

        self.db.write(|tables| {
            if tables.reschedule_holding(slot_id, now).is_some() {
                return Err(EngineError::held_for_reschedule());
            }
            tables
                .slot_mut(slot_id)?
                .apply(SlotTransition::Release { holder: holder_id }, now)
        })?;

        info!("User {} released slot {}", holder_id, slot_id);
        Ok(())
    }

    /// Persist the expiry of every lapsed checkout hold. Holds backing a
    /// pending reschedule are left to the reschedule sweep.
    pub fn expire_stale(&self) -> Result<usize> {
        let now = self.clock.now();

        let expired = self.db.write(|tables| {
            let reschedule_holds: Vec<Uuid> = tables
                .bookings
                .iter()
                .filter_map(|b| b.pending_reschedule().map(|r| r.requested_slot_id))
                .collect();

            let mut expired = 0;
            for slot in tables
                .slots
                .iter_mut()
                .filter(|s| !reschedule_holds.contains(&s.id))
            {
                if let Some(holder) = slot.expire_hold(now) {
                    warn!("Hold of {} on slot {} expired", holder, slot.id);
                    expired += 1;
                }
            }
            Ok(expired)
        })?;

        if expired > 0 {
            info!("Expired {} stale reservations", expired);
        }
        Ok(expired)
    }
}
