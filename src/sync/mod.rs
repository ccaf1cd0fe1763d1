//! Sync engine
//!
//! # Components
//!
//! - [`retry`]: capped exponential backoff around network-bound steps
//! - [`state`]: per-attempt log lifecycle
//! - [`writer`]: idempotent availability upserts
//! - [`orchestrator`]: scheduling, worker pool and run-now entry points
//!
//! # Example
//!
//! ```ignore
//! use calendar_sync::sync::SyncOrchestrator;
//!
//! let orchestrator = SyncOrchestrator::new(db, pool, scrapers, clock, &config, None);
//! let report = orchestrator.run_pass().await?;
//! println!("{} synced, {} flagged", report.success, report.critical_error);
//! ```

pub mod orchestrator;
pub mod retry;
pub mod state;
pub mod writer;

pub use orchestrator::{PassReport, SyncHandle, SyncOrchestrator};
pub use retry::RetryExecutor;
pub use state::{SyncAttempt, SyncOutcome};
pub use writer::AvailabilityWriter;
