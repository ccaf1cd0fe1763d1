//! Pluggable integrations
//!
//! - [`platform`]: booking-platform calendar scrapers

pub mod platform;
