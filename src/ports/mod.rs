//! Outbound collaborators of the engine.
//!
//! Payments, the ledger and notification delivery live outside this service.
//! The engine only depends on the narrow traits below; HTTP implementations
//! are in [`crate::client`] and in-process stand-ins in [`simulated`].

pub mod ledger;
pub mod notification;
pub mod payment;
pub mod simulated;

use std::sync::Arc;
use thiserror::Error;

pub use ledger::{LedgerMovement, LedgerPort, MovementKind};
pub use notification::{dispatch, BookingEvent, NotificationPort};
pub use payment::{PaymentConfirmation, PaymentPort};

#[derive(Debug, Error)]
pub enum PortError {
    /// The payment provider refused the charge
    #[error("declined: {0}")]
    Declined(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for PortError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PortError::InvalidResponse(err.to_string())
        } else {
            PortError::Unavailable(err.to_string())
        }
    }
}

/// The set of collaborators handed to the services.
#[derive(Clone)]
pub struct Ports {
    pub payments: Arc<dyn PaymentPort>,
    pub ledger: Arc<dyn LedgerPort>,
    pub notifier: Arc<dyn NotificationPort>,
}
