pub mod bookings;
pub mod database;
pub mod reschedule;
pub mod reservations;
pub mod rule_store;
pub mod slot_generator;
pub mod slot_store;
pub mod sweeper;
