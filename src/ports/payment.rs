use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use super::PortError;

/// What the payment provider reports for a captured payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
    pub payment_ref: String,
    pub payer_id: String,
    pub amount: i64,
}

/// Payment provider contract.
///
/// Both routes converge on the same booking confirmation: an internal
/// balance debit goes through `authorize`, a third-party gateway payment
/// arrives as a reference the client already holds. Either way the engine
/// calls `verify` before confirming.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PaymentPort: Send + Sync {
    /// Debit `amount` from the payer's internal balance.
    async fn authorize(&self, amount: i64, payer_id: &str) -> Result<String, PortError>;

    /// Capture (or confirm the capture of) a payment reference.
    async fn verify(&self, payment_ref: &str) -> Result<PaymentConfirmation, PortError>;

    /// Return a captured payment that could not be turned into a booking.
    async fn refund(&self, payment_ref: &str, amount: i64) -> Result<(), PortError>;
}
