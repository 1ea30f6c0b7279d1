//! In-process stand-ins used when `SIMULATE_PAYMENTS=true`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

use super::{
    BookingEvent, LedgerMovement, LedgerPort, NotificationPort, PaymentConfirmation, PaymentPort,
    PortError,
};

/// Approves every payment and remembers who paid what, so `verify` can
/// answer for references it issued. Unknown references are treated as
/// gateway payments of an unknown amount and declined.
#[derive(Debug, Default)]
pub struct SimulatedPayments {
    issued: Mutex<HashMap<String, PaymentConfirmation>>,
}

impl SimulatedPayments {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentPort for SimulatedPayments {
    async fn authorize(&self, amount: i64, payer_id: &str) -> Result<String, PortError> {
        let payment_ref = format!("sim_{}", uuid::Uuid::new_v4().simple());
        let confirmation = PaymentConfirmation {
            payment_ref: payment_ref.clone(),
            payer_id: payer_id.to_string(),
            amount,
        };
        self.issued
            .lock()
            .map_err(|e| PortError::Unavailable(e.to_string()))?
            .insert(payment_ref.clone(), confirmation);

        info!("Simulated debit of {} from {} as {}", amount, payer_id, payment_ref);
        Ok(payment_ref)
    }

    async fn verify(&self, payment_ref: &str) -> Result<PaymentConfirmation, PortError> {
        self.issued
            .lock()
            .map_err(|e| PortError::Unavailable(e.to_string()))?
            .get(payment_ref)
            .cloned()
            .ok_or_else(|| PortError::Declined(format!("unknown payment {}", payment_ref)))
    }

    async fn refund(&self, payment_ref: &str, amount: i64) -> Result<(), PortError> {
        info!("Simulated refund of {} for {}", amount, payment_ref);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LoggingLedger;

#[async_trait]
impl LedgerPort for LoggingLedger {
    async fn record_movement(&self, movement: LedgerMovement) -> Result<(), PortError> {
        info!(
            "Ledger {:?}: {} from {} to {} for booking {}",
            movement.kind,
            movement.amount,
            movement.payer_id,
            movement.payee_id,
            movement.booking_id
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl NotificationPort for LoggingNotifier {
    async fn notify(&self, event: BookingEvent) -> Result<(), PortError> {
        info!("Notify {}: {:?}", event.recipient(), event);
        Ok(())
    }
}
