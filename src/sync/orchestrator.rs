//! Sync orchestrator
//!
//! Selects due properties, runs one job per property on a bounded worker
//! pool, and drives each job's log through the state machine:
//!
//! ```text
//! create log (pending) -> wait for worker -> started
//!   -> acquire lease -> fetch (with retry) -> write -> terminal log -> release lease
//! ```
//!
//! The periodic loop ([`SyncOrchestrator::run`]) and the run-now entry points
//! share the same job path. A property is never in flight twice.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{Config, RetryConfig, SchedulerConfig};
use crate::database::Database;
use crate::error::{OrchestratorError, PoolError};
use crate::models::{AvailabilityRow, Property, SyncFlag, SyncLog, SyncStatus};
use crate::otel::Metrics;
use crate::plugins::platform::ScraperRegistry;
use crate::session::{IdentityHealth, LeaseOutcome, SessionLease, SessionPool};

use super::retry::RetryExecutor;
use super::state::{SyncAttempt, SyncOutcome};
use super::writer::AvailabilityWriter;

const NO_SESSION: &str = "no session available";
const SHUTDOWN_BEFORE_START: &str = "shutdown before start";
const INTERRUPTED: &str = "interrupted before completion";

/// Terminal status counts of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Jobs admitted
    pub selected: usize,
    /// Jobs that ended `SUCCESS`
    pub success: usize,
    /// Jobs that ended `ERROR` (challenge or exhausted retries)
    pub error: usize,
    /// Jobs that ended `CRITICAL_ERROR` and flagged their property
    pub critical_error: usize,
    /// Jobs that ended `CANCELLED`
    pub cancelled: usize,
    /// Jobs whose log could not be finalized
    pub failed: usize,
}

impl PassReport {
    fn record(&mut self, status: SyncStatus) {
        match status {
            SyncStatus::Success => self.success += 1,
            SyncStatus::Error => self.error += 1,
            SyncStatus::CriticalError => self.critical_error += 1,
            SyncStatus::Cancelled => self.cancelled += 1,
            SyncStatus::Pending | SyncStatus::Started => self.failed += 1,
        }
    }
}

enum SyncRequest {
    Property {
        id: i64,
        respond: oneshot::Sender<Result<SyncLog, OrchestratorError>>,
    },
    All {
        respond: oneshot::Sender<Result<PassReport, OrchestratorError>>,
    },
}

/// Handle for triggering syncs through a running loop
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<SyncRequest>,
}

impl SyncHandle {
    /// Sync one property now, ignoring its frequency and flag
    pub async fn sync_property(&self, id: i64) -> Result<SyncLog, OrchestratorError> {
        let (respond, response) = oneshot::channel();
        self.tx
            .send(SyncRequest::Property { id, respond })
            .await
            .map_err(|_| OrchestratorError::NotRunning)?;
        response.await.map_err(|_| OrchestratorError::NotRunning)?
    }

    /// Sync every active, unflagged property now
    pub async fn sync_all(&self) -> Result<PassReport, OrchestratorError> {
        let (respond, response) = oneshot::channel();
        self.tx
            .send(SyncRequest::All { respond })
            .await
            .map_err(|_| OrchestratorError::NotRunning)?;
        response.await.map_err(|_| OrchestratorError::NotRunning)?
    }
}

/// Removes a property from the in-flight set when dropped
struct InFlight {
    set: Arc<Mutex<HashSet<i64>>>,
    id: i64,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// What a job observed, before its log is finalized
struct Execution {
    outcome: SyncOutcome,
    lease: Option<(SessionLease, LeaseOutcome)>,
}

impl Execution {
    fn without_lease(outcome: SyncOutcome) -> Self {
        Self {
            outcome,
            lease: None,
        }
    }
}

struct Inner {
    db: Arc<dyn Database>,
    pool: Arc<SessionPool>,
    scrapers: ScraperRegistry,
    retry: RetryExecutor,
    acquire_retry: RetryExecutor,
    writer: AvailabilityWriter,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<Metrics>>,
    workers: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    shutting_down: AtomicBool,
    scheduler: SchedulerConfig,
    requests_tx: mpsc::Sender<SyncRequest>,
    requests_rx: Mutex<Option<mpsc::Receiver<SyncRequest>>>,
}

/// Schedules and runs property sync jobs
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// Create an orchestrator
    ///
    /// Worker count, retry policy, pool acquisition retries and loop cadence
    /// come from `config`.
    pub fn new(
        db: Arc<dyn Database>,
        pool: Arc<SessionPool>,
        scrapers: ScraperRegistry,
        clock: Arc<dyn Clock>,
        config: &Config,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let retry_config = config.scraping.retry.clone();
        let acquire_config = RetryConfig {
            max_retries: config.scraping.pool_acquire_retries,
            ..retry_config.clone()
        };
        let (requests_tx, requests_rx) = mpsc::channel(32);

        Self {
            inner: Arc::new(Inner {
                writer: AvailabilityWriter::new(db.clone(), clock.clone()),
                retry: RetryExecutor::new(retry_config, clock.clone()),
                acquire_retry: RetryExecutor::new(acquire_config, clock.clone()),
                workers: Arc::new(Semaphore::new(config.scraping.max_concurrency.max(1))),
                in_flight: Arc::new(Mutex::new(HashSet::new())),
                shutting_down: AtomicBool::new(false),
                scheduler: config.scheduler.clone(),
                requests_rx: Mutex::new(Some(requests_rx)),
                requests_tx,
                db,
                pool,
                scrapers,
                clock,
                metrics,
            }),
        }
    }

    /// Handle for triggering syncs through [`run`](Self::run)
    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            tx: self.inner.requests_tx.clone(),
        }
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Run every due, active, unflagged property once
    pub async fn run_pass(&self) -> Result<PassReport, OrchestratorError> {
        self.ensure_running()?;
        let now = self.inner.clock.now();
        let due: Vec<Property> = self
            .inner
            .db
            .get_schedulable_properties()
            .await?
            .into_iter()
            .filter(|p| p.is_due(now))
            .collect();

        debug!(due = due.len(), "Scheduling pass");
        self.run_batch(due).await
    }

    /// Run every active, unflagged property now, regardless of frequency
    pub async fn sync_all_now(&self) -> Result<PassReport, OrchestratorError> {
        self.ensure_running()?;
        let properties = self.inner.db.get_schedulable_properties().await?;
        self.run_batch(properties).await
    }

    /// Run one property now, ignoring its frequency and any open flag
    ///
    /// Returns the terminal log of the attempt.
    pub async fn sync_property_now(&self, id: i64) -> Result<SyncLog, OrchestratorError> {
        self.ensure_running()?;
        let property = self
            .inner
            .db
            .get_property(id)
            .await?
            .ok_or(OrchestratorError::PropertyNotFound(id))?;
        let _claim = self
            .claim(id)
            .ok_or(OrchestratorError::AlreadyRunning(id))?;

        let attempt =
            SyncAttempt::create(self.inner.db.clone(), self.inner.clock.clone(), &property)
                .await?;
        self.run_job(property, attempt).await
    }

    /// Close attempts a previous process left `pending` or `started`
    ///
    /// Call once at startup, before any job is admitted. Returns the number
    /// of logs closed as `cancelled`.
    pub async fn recover_interrupted(&self) -> Result<u64, OrchestratorError> {
        let closed = self
            .inner
            .db
            .cancel_unfinished_sync_logs(INTERRUPTED, self.inner.clock.now())
            .await?;
        if closed > 0 {
            warn!(closed = closed, "Closed sync logs left unfinished by an earlier run");
        }
        Ok(closed)
    }

    /// Stop admitting jobs
    ///
    /// Queued jobs are cancelled when they reach a worker; running jobs
    /// finish normally.
    pub fn shutdown(&self) {
        if !self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            info!("Sync orchestrator shutting down");
        }
        self.inner.workers.close();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Periodic loop until `shutdown_rx` fires
    ///
    /// Passes run every `scheduler.poll_interval_secs` after an initial delay
    /// and may overlap; a property already in flight is skipped. Requests
    /// from [`SyncHandle`] are served concurrently. Returns once every job
    /// has reached a terminal state.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let Some(mut requests) = self
            .inner
            .requests_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            warn!("Sync loop is already running");
            return;
        };

        let initial_delay = Duration::from_secs(self.inner.scheduler.initial_delay_secs);
        let poll_interval = Duration::from_secs(self.inner.scheduler.poll_interval_secs.max(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_secs = poll_interval.as_secs(),
            initial_delay_secs = initial_delay.as_secs(),
            "Sync loop started"
        );

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping sync loop");
                    break;
                }
                _ = ticker.tick() => {
                    let this = self.clone();
                    tasks.spawn(async move {
                        match this.run_pass().await {
                            Ok(report) if report.selected > 0 => {
                                info!(?report, "Scheduling pass complete");
                            }
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "Scheduling pass failed"),
                        }
                    });
                }
                Some(request) = requests.recv() => {
                    let this = self.clone();
                    tasks.spawn(async move { this.serve(request).await });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Sync task panicked");
                    }
                }
            }
        }

        self.shutdown();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Sync task panicked");
            }
        }
        info!("Sync loop stopped");
    }

    async fn serve(&self, request: SyncRequest) {
        match request {
            SyncRequest::Property { id, respond } => {
                let _ = respond.send(self.sync_property_now(id).await);
            }
            SyncRequest::All { respond } => {
                let _ = respond.send(self.sync_all_now().await);
            }
        }
    }

    // =========================================================================
    // Read path and operator controls
    // =========================================================================

    /// Newest-first sync logs, optionally for one property
    pub async fn history(
        &self,
        property_id: Option<i64>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<SyncLog>, OrchestratorError> {
        Ok(self
            .inner
            .db
            .list_sync_logs(property_id, limit, offset)
            .await?)
    }

    /// One sync log
    pub async fn sync_log(&self, id: i64) -> Result<Option<SyncLog>, OrchestratorError> {
        Ok(self.inner.db.get_sync_log(id).await?)
    }

    /// Properties held back from automatic scheduling
    pub async fn flagged_properties(&self) -> Result<Vec<SyncFlag>, OrchestratorError> {
        Ok(self.inner.db.list_flags().await?)
    }

    /// Return a flagged property to automatic scheduling
    pub async fn clear_flag(&self, property_id: i64) -> Result<bool, OrchestratorError> {
        let cleared = self.inner.db.clear_flag(property_id).await?;
        if cleared {
            info!(property_id = property_id, "Sync flag cleared");
        }
        Ok(cleared)
    }

    /// Identity health snapshot
    pub fn pool_health(&self) -> Vec<IdentityHealth> {
        self.inner.pool.snapshot()
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    fn ensure_running(&self) -> Result<(), OrchestratorError> {
        if self.is_shutting_down() {
            Err(OrchestratorError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    fn claim(&self, id: i64) -> Option<InFlight> {
        let inserted = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        inserted.then(|| InFlight {
            set: self.inner.in_flight.clone(),
            id,
        })
    }

    async fn run_batch(&self, properties: Vec<Property>) -> Result<PassReport, OrchestratorError> {
        let mut report = PassReport::default();
        let mut jobs = JoinSet::new();

        for property in properties {
            if self.is_shutting_down() {
                break;
            }
            let Some(claim) = self.claim(property.id) else {
                debug!(property_id = property.id, "Property already in flight, skipping");
                continue;
            };

            let attempt = match SyncAttempt::create(
                self.inner.db.clone(),
                self.inner.clock.clone(),
                &property,
            )
            .await
            {
                Ok(attempt) => attempt,
                Err(e) => {
                    error!(property_id = property.id, error = %e, "Failed to create sync log");
                    report.failed += 1;
                    continue;
                }
            };

            report.selected += 1;
            let this = self.clone();
            jobs.spawn(async move {
                let _claim = claim;
                this.run_job(property, attempt).await
            });
        }

        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(Ok(log)) => report.record(log.status),
                Ok(Err(e)) => {
                    error!(error = %e, "Sync job could not be finalized");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "Sync job panicked");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn run_job(
        &self,
        property: Property,
        mut attempt: SyncAttempt,
    ) -> Result<SyncLog, OrchestratorError> {
        let _permit = match self.inner.workers.clone().acquire_owned().await {
            Ok(permit) if !self.is_shutting_down() => permit,
            _ => {
                debug!(property_id = property.id, "Cancelling queued job");
                let log = attempt
                    .finish(SyncOutcome::Cancelled(SHUTDOWN_BEFORE_START.to_string()))
                    .await?;
                self.observe(&log);
                return Ok(log);
            }
        };

        if let Err(e) = attempt.start().await {
            error!(
                sync_log_id = attempt.id(),
                property_id = property.id,
                error = %e,
                "Failed to start sync attempt"
            );
            let log = attempt
                .finish(SyncOutcome::Cancelled(format!("failed to start: {}", e)))
                .await?;
            self.observe(&log);
            return Ok(log);
        }
        info!(
            sync_log_id = attempt.id(),
            property_id = property.id,
            platform = %property.platform,
            "Sync started"
        );

        let execution = self.execute(&property).await;

        if let SyncOutcome::Critical(reason) = &execution.outcome {
            let flag = SyncFlag {
                property_id: property.id,
                reason: reason.clone(),
                sync_log_id: attempt.id(),
                flagged_at: self.inner.clock.now(),
            };
            if let Err(e) = self.inner.db.set_flag(&flag).await {
                error!(property_id = property.id, error = %e, "Failed to flag property");
            }
        }

        let finished = attempt.finish(execution.outcome).await;

        if let Some((lease, outcome)) = execution.lease {
            if let Err(e) = self.inner.pool.release(lease, outcome) {
                warn!(property_id = property.id, error = %e, "Failed to release session");
            }
        }

        let log = finished?;
        self.observe(&log);
        Ok(log)
    }

    async fn execute(&self, property: &Property) -> Execution {
        let Some(scraper) = self.inner.scrapers.get(property.platform) else {
            return Execution::without_lease(SyncOutcome::Critical(format!(
                "no adapter registered for platform {}",
                property.platform
            )));
        };

        let lease = match self.acquire_lease().await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(property_id = property.id, error = %e, "No session available");
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_pool_exhausted();
                }
                return Execution::without_lease(SyncOutcome::Cancelled(NO_SESSION.to_string()));
            }
        };

        let fetched = self
            .inner
            .retry
            .execute(|| scraper.fetch_availability(&lease, &property.external_url))
            .await;

        let (outcome, identity_outcome) = match fetched {
            Ok(fetch) if fetch.captcha_encountered => {
                warn!(
                    property_id = property.id,
                    session_id = lease.session_id(),
                    "Anti-bot challenge encountered"
                );
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_captcha(property.platform);
                }
                (SyncOutcome::Captcha, LeaseOutcome::Failure)
            }
            Ok(fetch) => (self.persist(property, fetch.rows).await, LeaseOutcome::Success),
            Err(e) if e.is_critical() => {
                error!(property_id = property.id, error = %e, "Critical scrape failure");
                (SyncOutcome::Critical(e.to_string()), LeaseOutcome::Success)
            }
            Err(e) => {
                warn!(property_id = property.id, error = %e, "Scrape failed after retries");
                (SyncOutcome::Error(e.to_string()), LeaseOutcome::Failure)
            }
        };

        Execution {
            outcome,
            lease: Some((lease, identity_outcome)),
        }
    }

    async fn acquire_lease(&self) -> Result<SessionLease, PoolError> {
        let pool = &self.inner.pool;
        self.inner
            .acquire_retry
            .execute(|| async { pool.acquire() })
            .await
    }

    async fn persist(
        &self,
        property: &Property,
        rows: Vec<AvailabilityRow>,
    ) -> SyncOutcome {
        let written = match self
            .inner
            .writer
            .write(property.id, property.platform, rows)
            .await
        {
            Ok(written) => written,
            Err(e) => {
                error!(property_id = property.id, error = %e, "Failed to write availability");
                return SyncOutcome::Error(format!("failed to write availability: {}", e));
            }
        };

        if let Some(metrics) = &self.inner.metrics {
            metrics.record_written(property.platform, written);
        }

        let now = self.inner.clock.now();
        if let Err(e) = self.inner.db.update_last_synced(property.id, now).await {
            error!(property_id = property.id, error = %e, "Failed to advance last_synced");
            return SyncOutcome::Error(format!("failed to update last synced time: {}", e));
        }

        SyncOutcome::Success { rows: written }
    }

    fn observe(&self, log: &SyncLog) {
        info!(
            sync_log_id = log.id,
            property_id = log.property_id,
            platform = %log.platform,
            status = %log.status,
            rows = log.availabilities_updated,
            captcha = log.captcha_encountered,
            duration_ms = log.execution_time_ms,
            "Sync finished"
        );
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_attempt(
                log.platform,
                log.status,
                log.execution_time_ms as f64 / 1000.0,
            );
        }
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("platforms", &self.inner.scrapers.platforms())
            .field("workers", &self.inner.workers.available_permits())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
