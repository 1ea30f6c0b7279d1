use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::services::bookings::BookingService;
use crate::services::reservations::ReservationManager;
use crate::services::reschedule::RescheduleWorkflow;
use crate::services::slot_generator::SlotGenerator;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub rejected_reschedules: usize,
    pub expired_holds: usize,
    pub completed_bookings: usize,
    pub generated_slots: usize,
}

/// The periodic maintenance pass. Every step uses the same deadlines the
/// request path checks lazily, so running it late changes nothing.
pub struct Sweeper {
    generator: Arc<SlotGenerator>,
    reservations: Arc<ReservationManager>,
    bookings: Arc<BookingService>,
    reschedules: Arc<RescheduleWorkflow>,
}

impl Sweeper {
    pub fn new(
        generator: Arc<SlotGenerator>,
        reservations: Arc<ReservationManager>,
        bookings: Arc<BookingService>,
        reschedules: Arc<RescheduleWorkflow>,
    ) -> Self {
        Self {
            generator,
            reservations,
            bookings,
            reschedules,
        }
    }

    // Stale reschedules go first so their holds are released before the
    // checkout-hold pass runs.
    pub fn run_once(&self) -> Result<SweepReport> {
        let report = SweepReport {
            rejected_reschedules: self.reschedules.expire_pending()?,
            expired_holds: self.reservations.expire_stale()?,
            completed_bookings: self.bookings.complete_finished()?,
            generated_slots: self.generator.generate_all()?,
        };

        if report == SweepReport::default() {
            debug!("Sweep found nothing to do");
        } else {
            info!("Sweep finished: {:?}", report);
        }
        Ok(report)
    }

    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        info!("Starting background sweep every {:?}", every);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.run_once() {
                    error!("Sweep failed: {}", err);
                }
            }
        })
    }
}
