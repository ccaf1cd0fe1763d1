//! Session pool with exclusive leases, eviction and rotation
//!
//! Each slot owns one egress endpoint. A slot carries an atomic in-use flag
//! and its own lock, so leases on different slots never contend. A slot's
//! identity is replaced when it ages past the rotation interval and dropped
//! when its rolling success rate falls below the threshold.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::identity::{Identity, OutcomeWindow, ProxyEndpoint, StealthProfile};
use crate::clock::Clock;
use crate::config::{ProxyConfig, ProxyKind, StealthConfig};
use crate::error::PoolError;

/// How the identity fared during a lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// The identity got through to the page
    Success,
    /// Challenged, blocked or unreachable
    Failure,
}

/// Exclusive checkout of one identity for one sync attempt
///
/// Consumed by [`SessionPool::release`].
#[derive(Debug)]
pub struct SessionLease {
    slot: usize,
    identity: Arc<Identity>,
}

impl SessionLease {
    /// Session ID of the leased identity
    pub fn session_id(&self) -> &str {
        &self.identity.session_id
    }

    /// Egress proxy URL (None = direct)
    pub fn proxy_url(&self) -> Option<&str> {
        self.identity.endpoint.as_ref().map(|e| e.url.as_str())
    }

    /// Disguise to apply (None when stealth is disabled)
    pub fn stealth(&self) -> Option<&StealthProfile> {
        self.identity.stealth.as_ref()
    }

    /// The leased identity
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

/// Health of one slot for status display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityHealth {
    /// Slot index
    pub slot: usize,
    /// Current session ID (None while evicted)
    pub session_id: Option<String>,
    /// Endpoint label
    pub label: Option<String>,
    /// Endpoint URL without password
    pub proxy: Option<String>,
    /// Whether a lease is out
    pub in_use: bool,
    /// Rolling success rate
    pub success_rate: Option<f64>,
    /// Outcomes in the window
    pub samples: usize,
    /// Age of the current identity in seconds
    pub age_secs: Option<i64>,
    /// Whether the slot is waiting out an eviction
    pub evicted: bool,
}

struct SlotState {
    identity: Option<Arc<Identity>>,
    window: OutcomeWindow,
    evicted_at: Option<DateTime<Utc>>,
}

struct IdentitySlot {
    endpoint: Option<ProxyEndpoint>,
    in_use: AtomicBool,
    state: Mutex<SlotState>,
}

impl IdentitySlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared pool of egress identities
pub struct SessionPool {
    slots: Vec<IdentitySlot>,
    config: ProxyConfig,
    stealth_enabled: bool,
    clock: Arc<dyn Clock>,
    cursor: AtomicUsize,
}

impl SessionPool {
    /// Build the pool from configuration
    ///
    /// With `residential_only`, datacenter endpoints are dropped. With no
    /// endpoints configured and `residential_only` off, `direct_slots`
    /// proxyless identities are created instead. `min_samples` is capped at
    /// the window length so eviction stays reachable.
    pub fn new(
        mut config: ProxyConfig,
        stealth: &StealthConfig,
        direct_slots: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        if config.min_samples > config.success_window {
            warn!(
                min_samples = config.min_samples,
                success_window = config.success_window,
                "min_samples exceeds the success window, capping"
            );
            config.min_samples = config.success_window;
        }

        let mut endpoints: Vec<Option<ProxyEndpoint>> = config
            .identities
            .iter()
            .filter(|c| !config.residential_only || c.kind == ProxyKind::Residential)
            .map(|c| Some(ProxyEndpoint::from(c)))
            .collect();

        let excluded = config.identities.len() - endpoints.len();
        if excluded > 0 {
            info!(excluded, "Excluded datacenter proxies (residential_only)");
        }

        if config.identities.is_empty() && !config.residential_only {
            endpoints = vec![None; direct_slots];
        }
        if endpoints.is_empty() {
            warn!("Session pool has no eligible identities; every acquire will fail");
        }

        let now = clock.now();
        let mut rng = rand::thread_rng();
        let slots = endpoints
            .into_iter()
            .map(|endpoint| {
                let identity = Identity::fresh(&mut rng, endpoint.clone(), stealth.enabled, now);
                IdentitySlot {
                    endpoint,
                    in_use: AtomicBool::new(false),
                    state: Mutex::new(SlotState {
                        identity: Some(Arc::new(identity)),
                        window: OutcomeWindow::new(config.success_window),
                        evicted_at: None,
                    }),
                }
            })
            .collect();

        Self {
            slots,
            config,
            stealth_enabled: stealth.enabled,
            clock,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Lease a healthy idle identity
    pub fn acquire(&self) -> Result<SessionLease, PoolError> {
        let n = self.slots.len();
        if n == 0 {
            return Err(PoolError::Exhausted);
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for offset in 0..n {
            let index = (start + offset) % n;
            let slot = &self.slots[index];

            if slot
                .in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            let identity = {
                let mut state = slot.lock();
                self.refresh(index, slot, &mut state);
                state.identity.clone()
            };

            match identity {
                Some(identity) => {
                    debug!(slot = index, session_id = %identity.session_id, "Session leased");
                    return Ok(SessionLease {
                        slot: index,
                        identity,
                    });
                }
                None => slot.in_use.store(false, Ordering::Release),
            }
        }

        Err(PoolError::Exhausted)
    }

    /// Return a lease and record how the identity fared
    pub fn release(&self, lease: SessionLease, outcome: LeaseOutcome) -> Result<(), PoolError> {
        let slot = self
            .slots
            .get(lease.slot)
            .ok_or_else(|| PoolError::UnknownLease(lease.identity.session_id.clone()))?;

        {
            let mut state = slot.lock();
            let owned = state
                .identity
                .as_ref()
                .map(|current| Arc::ptr_eq(current, &lease.identity))
                .unwrap_or(false);
            if !owned || !slot.in_use.load(Ordering::Acquire) {
                return Err(PoolError::UnknownLease(lease.identity.session_id.clone()));
            }

            state.window.record(outcome == LeaseOutcome::Success);
            let now = self.clock.now();

            let below_threshold = state.window.len() >= self.config.min_samples
                && state
                    .window
                    .success_rate()
                    .map(|rate| rate < self.config.min_success_rate)
                    .unwrap_or(false);

            if below_threshold {
                warn!(
                    slot = lease.slot,
                    session_id = %lease.identity.session_id,
                    success_rate = state.window.success_rate().unwrap_or(0.0),
                    "Evicting identity below minimum success rate"
                );
                state.identity = None;
                state.evicted_at = Some(now);
                state.window.clear();
            } else if lease.identity.age(now) >= self.config.rotation_interval() {
                self.rotate(lease.slot, slot, &mut state, now);
            }
        }

        slot.in_use.store(false, Ordering::Release);
        Ok(())
    }

    /// Per-slot health
    pub fn snapshot(&self) -> Vec<IdentityHealth> {
        let now = self.clock.now();
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| {
                let state = slot.lock();
                IdentityHealth {
                    slot: index,
                    session_id: state.identity.as_ref().map(|i| i.session_id.clone()),
                    label: slot.endpoint.as_ref().and_then(|e| e.label.clone()),
                    proxy: slot.endpoint.as_ref().map(ProxyEndpoint::redacted_url),
                    in_use: slot.in_use.load(Ordering::Acquire),
                    success_rate: state.window.success_rate(),
                    samples: state.window.len(),
                    age_secs: state.identity.as_ref().map(|i| i.age(now).num_seconds()),
                    evicted: state.identity.is_none(),
                }
            })
            .collect()
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the pool has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Refill an evicted slot once its cooldown passed, rotate a stale identity
    fn refresh(&self, index: usize, slot: &IdentitySlot, state: &mut SlotState) {
        let now = self.clock.now();
        let interval = self.config.rotation_interval();
        let due = match (&state.identity, state.evicted_at) {
            (Some(identity), _) => identity.age(now) >= interval,
            (None, Some(evicted_at)) => now - evicted_at >= interval,
            (None, None) => true,
        };
        if due {
            self.rotate(index, slot, state, now);
        }
    }

    fn rotate(&self, index: usize, slot: &IdentitySlot, state: &mut SlotState, now: DateTime<Utc>) {
        let identity = Identity::fresh(
            &mut rand::thread_rng(),
            slot.endpoint.clone(),
            self.stealth_enabled,
            now,
        );
        info!(slot = index, session_id = %identity.session_id, "Identity rotated");
        state.identity = Some(Arc::new(identity));
        state.evicted_at = None;
        state.window.clear();
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("slots", &self.slots.len())
            .field("stealth_enabled", &self.stealth_enabled)
            .finish()
    }
}
