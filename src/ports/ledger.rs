use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use super::PortError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Mentee pays the mentor for a confirmed booking
    Debit,
    /// Money goes back to the mentee after a cancellation
    Refund,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerMovement {
    pub booking_id: Uuid,
    pub amount: i64,
    pub payer_id: String,
    pub payee_id: String,
    pub payment_ref: String,
    pub kind: MovementKind,
}

/// Records the financial side of a booking. The ledger owns retries; a
/// failure here never rolls back a confirmed booking.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerPort: Send + Sync {
    async fn record_movement(&self, movement: LedgerMovement) -> Result<(), PortError>;
}
