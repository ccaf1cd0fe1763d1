//! Session and proxy management
//!
//! - [`identity`]: egress endpoints, stealth profiles and outcome windows
//! - [`pool`]: the shared pool handing out exclusive leases

pub mod identity;
pub mod pool;

pub use identity::{Identity, OutcomeWindow, ProxyEndpoint, StealthProfile, Viewport};
pub use pool::{IdentityHealth, LeaseOutcome, SessionLease, SessionPool};
