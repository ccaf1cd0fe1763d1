//! Domain models for calendar-sync
//!
//! This module contains the core domain models used throughout the engine.

pub mod availability;
pub mod property;
pub mod sync_log;

// Re-export commonly used types
pub use availability::{dedup_rows, Availability, AvailabilityRow};
pub use property::{Platform, Property};
pub use sync_log::{SyncFlag, SyncLog, SyncStatus};
