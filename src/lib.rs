//! Mentor Scheduling & Booking Service
//!
//! Turns mentors' recurring weekly availability into a calendar of dated
//! slots and sells each slot to at most one mentee.
//!
//! # Modules
//!
//! - `services`: rule store, slot generator, slot store, reservations,
//!   bookings, reschedule workflow and the background sweep
//! - `models`: rules, slots, bookings and their state machines
//! - `ports`: payment, ledger and notification contracts
//! - `client`: signed HTTP implementations of the ports
//! - `handlers` / `routes`: the axum HTTP surface
//!
//! # Consistency
//!
//! Every state change runs as one closure under the store lock and is
//! persisted before the lock is released. Payment calls happen with no lock
//! held: hold first, pay, then confirm in a second short update.

pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod ports;
pub mod routes;
pub mod services;


// Re-export the main API types for ease of use
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BookingPolicy, ServiceConfig};
pub use error::{EngineError, Result};
pub use handlers::api::AppState;
pub use routes::create_router;
