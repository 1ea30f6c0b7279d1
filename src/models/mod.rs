pub mod booking;
pub mod common;
pub mod rule;
pub mod slot;
