//! Per-attempt sync state machine
//!
//! [`SyncAttempt`] owns one [`SyncLog`] row and moves it through
//! `pending -> started -> terminal`, persisting every transition. Invalid
//! moves are rejected in memory before they reach storage; the store rejects
//! them again.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::database::Database;
use crate::error::{OrchestratorError, SyncStateError};
use crate::models::{Property, SyncLog, SyncStatus};

/// How an attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Rows fetched and written
    Success {
        /// Number of rows written
        rows: u64,
    },
    /// Anti-bot challenge, nothing written
    Captcha,
    /// Transient failure after retries, or a write failure
    Error(String),
    /// Adapter or listing needs an operator
    Critical(String),
    /// Never ran to completion
    Cancelled(String),
}

impl SyncOutcome {
    /// Terminal status recorded for this outcome
    pub fn status(&self) -> SyncStatus {
        match self {
            SyncOutcome::Success { .. } => SyncStatus::Success,
            SyncOutcome::Captcha | SyncOutcome::Error(_) => SyncStatus::Error,
            SyncOutcome::Critical(_) => SyncStatus::CriticalError,
            SyncOutcome::Cancelled(_) => SyncStatus::Cancelled,
        }
    }

    fn message(&self) -> String {
        match self {
            SyncOutcome::Success { rows } => format!("{} availability rows written", rows),
            SyncOutcome::Captcha => "anti-bot challenge encountered".to_string(),
            SyncOutcome::Error(msg) | SyncOutcome::Critical(msg) | SyncOutcome::Cancelled(msg) => {
                msg.clone()
            }
        }
    }
}

/// One sync attempt and its log row
pub struct SyncAttempt {
    log: SyncLog,
    started_at: Option<DateTime<Utc>>,
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
}

impl SyncAttempt {
    /// Insert a `pending` log for a property
    pub async fn create(
        db: Arc<dyn Database>,
        clock: Arc<dyn Clock>,
        property: &Property,
    ) -> Result<Self, OrchestratorError> {
        let mut log = SyncLog::pending(property.id, property.platform, clock.now());
        log.id = db.insert_sync_log(&log).await?;

        debug!(
            sync_log_id = log.id,
            property_id = property.id,
            platform = %property.platform,
            "Sync attempt enqueued"
        );

        Ok(Self {
            log,
            started_at: None,
            db,
            clock,
        })
    }

    /// Current state of the log
    pub fn log(&self) -> &SyncLog {
        &self.log
    }

    /// Log row ID
    pub fn id(&self) -> i64 {
        self.log.id
    }

    /// Move to `started`
    pub async fn start(&mut self) -> Result<(), OrchestratorError> {
        let mut next = self.transition(SyncStatus::Started)?;
        let now = self.clock.now();
        next.message = None;

        self.db.update_sync_log(&next).await?;
        self.log = next;
        self.started_at = Some(now);
        Ok(())
    }

    /// Move to the outcome's terminal state and return the final row
    ///
    /// Execution time counts from `start`; an attempt cancelled while still
    /// pending records zero.
    pub async fn finish(mut self, outcome: SyncOutcome) -> Result<SyncLog, OrchestratorError> {
        let mut next = self.transition(outcome.status())?;
        let now = self.clock.now();

        next.message = Some(outcome.message());
        next.captcha_encountered = matches!(outcome, SyncOutcome::Captcha);
        next.availabilities_updated = match outcome {
            SyncOutcome::Success { rows } => rows,
            _ => 0,
        };
        next.execution_time_ms = self
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        next.completed_at = Some(now);

        self.db.update_sync_log(&next).await?;
        self.log = next;
        Ok(self.log)
    }

    fn transition(&self, to: SyncStatus) -> Result<SyncLog, SyncStateError> {
        if !self.log.status.can_transition_to(to) {
            return Err(SyncStateError::InvalidTransition {
                from: self.log.status.to_string(),
                to: to.to_string(),
            });
        }
        let mut next = self.log.clone();
        next.status = to;
        Ok(next)
    }
}

impl std::fmt::Debug for SyncAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncAttempt")
            .field("log", &self.log)
            .field("started_at", &self.started_at)
            .finish()
    }
}
