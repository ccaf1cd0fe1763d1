//! Sync engine integration tests
//!
//! Drives the orchestrator end-to-end against an in-memory store:
//! - Scheduling and the success path
//! - Challenge, transient and structural failures
//! - Pool exhaustion and shutdown
//! - The run loop and its handle

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};

use calendar_sync::clock::Clock;
use calendar_sync::database::Database;
use calendar_sync::error::{DbError, OrchestratorError, ScrapeError};
use calendar_sync::models::{Platform, SyncStatus};
use calendar_sync::plugins::platform::FetchOutcome;

use common::{test_config, Harness, ScriptedScraper};

/// Test 1: A due property is synced, written and timestamped
#[tokio::test]
async fn test_due_property_success() {
    let scraper = Arc::new(ScriptedScraper::rows(Platform::Airbnb, 30));
    let h = Harness::new(test_config(3), scraper.clone()).await;
    h.property(1, Platform::Airbnb, 30, Some(40)).await;

    let report = h.orchestrator.run_pass().await.unwrap();
    assert_eq!(report.selected, 1);
    assert_eq!(report.success, 1);

    let property = h.db.get_property(1).await.unwrap().unwrap();
    assert_eq!(property.last_synced, Some(h.clock.now()));

    let logs = h.orchestrator.history(Some(1), 10, 0).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, SyncStatus::Success);
    assert_eq!(logs[0].availabilities_updated, 30);
    assert!(logs[0].completed_at.is_some());
    assert_eq!(h.db.count_availability(1).await.unwrap(), 30);
    assert_eq!(scraper.calls(), 1);
}

/// Test 2: Only due, active properties are selected
#[tokio::test]
async fn test_pass_selects_only_due_properties() {
    let scraper = Arc::new(ScriptedScraper::rows(Platform::Vrbo, 5));
    let h = Harness::new(test_config(3), scraper.clone()).await;
    h.property(1, Platform::Vrbo, 30, Some(40)).await;
    h.property(2, Platform::Vrbo, 30, Some(10)).await;
    h.property(3, Platform::Vrbo, 30, None).await;
    let inactive = h
        .property(4, Platform::Vrbo, 30, None)
        .await
        .with_active(false);
    h.db.upsert_property(&inactive).await.unwrap();

    let report = h.orchestrator.run_pass().await.unwrap();
    assert_eq!(report.selected, 2);
    assert_eq!(report.success, 2);
    assert!(h.db.list_sync_logs(Some(2), 10, 0).await.unwrap().is_empty());
    assert!(h.db.list_sync_logs(Some(4), 10, 0).await.unwrap().is_empty());

    // Everything just synced; nothing is due
    let report = h.orchestrator.run_pass().await.unwrap();
    assert_eq!(report.selected, 0);
}

/// Test 3: A challenge ends as ERROR and leaves the store untouched
#[tokio::test]
async fn test_captcha_is_error_without_writes() {
    let scraper = Arc::new(ScriptedScraper::new(
        Platform::Booking,
        Ok(FetchOutcome::challenged()),
    ));
    let h = Harness::new(test_config(3), scraper.clone()).await;
    let property = h.property(1, Platform::Booking, 30, Some(40)).await;

    let report = h.orchestrator.run_pass().await.unwrap();
    assert_eq!(report.error, 1);

    let log = &h.orchestrator.history(Some(1), 1, 0).await.unwrap()[0];
    assert_eq!(log.status, SyncStatus::Error);
    assert!(log.captcha_encountered);
    assert_eq!(log.availabilities_updated, 0);

    let stored = h.db.get_property(1).await.unwrap().unwrap();
    assert_eq!(stored.last_synced, property.last_synced);
    assert_eq!(h.db.count_availability(1).await.unwrap(), 0);

    // Challenges are not retried in place and do not flag the property
    assert_eq!(scraper.calls(), 1);
    assert!(h.db.get_flag(1).await.unwrap().is_none());
}

/// Test 4: Structural failure flags the property out of later passes
#[tokio::test]
async fn test_structural_failure_flags_property() {
    let scraper = Arc::new(ScriptedScraper::new(
        Platform::Vrbo,
        Err(ScrapeError::Structural("missing __NEXT_DATA__ script".into())),
    ));
    let h = Harness::new(test_config(3), scraper.clone()).await;
    h.property(1, Platform::Vrbo, 30, Some(40)).await;

    let report = h.orchestrator.run_pass().await.unwrap();
    assert_eq!(report.critical_error, 1);
    assert_eq!(scraper.calls(), 1);

    let log = &h.orchestrator.history(Some(1), 1, 0).await.unwrap()[0];
    assert_eq!(log.status, SyncStatus::CriticalError);
    assert!(log.message.as_deref().unwrap().contains("__NEXT_DATA__"));

    let flags = h.orchestrator.flagged_properties().await.unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].sync_log_id, log.id);

    h.clock.advance(chrono::Duration::hours(2));
    let report = h.orchestrator.run_pass().await.unwrap();
    assert_eq!(report.selected, 0);

    assert!(h.orchestrator.clear_flag(1).await.unwrap());
    assert!(!h.orchestrator.clear_flag(1).await.unwrap());
    let report = h.orchestrator.run_pass().await.unwrap();
    assert_eq!(report.selected, 1);
}

/// Test 5: Transient failures are retried, then recorded as ERROR
#[tokio::test]
async fn test_transient_failures_exhaust_retries() {
    let scraper = Arc::new(ScriptedScraper::new(
        Platform::Airbnb,
        Err(ScrapeError::ServerError(503)),
    ));
    let h = Harness::new(test_config(3), scraper.clone()).await;
    h.property(1, Platform::Airbnb, 30, Some(40)).await;

    let report = h.orchestrator.run_pass().await.unwrap();
    assert_eq!(report.error, 1);
    assert_eq!(scraper.calls(), 3);
    assert_eq!(
        h.clock.sleeps(),
        vec![Duration::from_millis(2000), Duration::from_millis(4000)]
    );

    let log = &h.orchestrator.history(Some(1), 1, 0).await.unwrap()[0];
    assert!(!log.captcha_encountered);
    assert!(h.db.get_flag(1).await.unwrap().is_none());
}

/// Test 6: Retry recovers from a transient failure
#[tokio::test]
async fn test_retry_recovers() {
    let scraper = Arc::new(
        ScriptedScraper::rows(Platform::Airbnb, 4)
            .then(Err(ScrapeError::Timeout))
            .then(Err(ScrapeError::Connection("reset".into()))),
    );
    let h = Harness::new(test_config(3), scraper.clone()).await;
    h.property(1, Platform::Airbnb, 30, Some(40)).await;

    let report = h.orchestrator.run_pass().await.unwrap();
    assert_eq!(report.success, 1);
    assert_eq!(scraper.calls(), 3);
    assert_eq!(h.db.count_availability(1).await.unwrap(), 4);
}

/// Test 7: No session available cancels the attempt and keeps the property due
#[tokio::test]
async fn test_pool_exhausted_cancels() {
    let mut config = test_config(3);
    config.proxy.residential_only = true;
    let scraper = Arc::new(ScriptedScraper::rows(Platform::Airbnb, 3));
    let h = Harness::new(config, scraper.clone()).await;
    assert!(h.pool.is_empty());
    h.property(1, Platform::Airbnb, 30, Some(40)).await;

    let report = h.orchestrator.run_pass().await.unwrap();
    assert_eq!(report.cancelled, 1);
    assert_eq!(scraper.calls(), 0);

    let log = &h.orchestrator.history(Some(1), 1, 0).await.unwrap()[0];
    assert_eq!(log.status, SyncStatus::Cancelled);
    assert_eq!(log.message.as_deref(), Some("no session available"));
    assert!(h.db.get_flag(1).await.unwrap().is_none());

    let property = h.db.get_property(1).await.unwrap().unwrap();
    assert!(property.is_due(h.clock.now()));
}

/// Test 8: Unknown adapter is critical
#[tokio::test]
async fn test_missing_adapter_is_critical() {
    let scraper = Arc::new(ScriptedScraper::rows(Platform::Airbnb, 1));
    let h = Harness::new(test_config(3), scraper).await;
    h.property(1, Platform::Booking, 30, None).await;

    let report = h.orchestrator.run_pass().await.unwrap();
    assert_eq!(report.critical_error, 1);
    assert!(h.db.get_flag(1).await.unwrap().is_some());
}

/// Test 9: Shutdown cancels queued jobs; the running one completes
#[tokio::test]
async fn test_shutdown_cancels_queued_jobs() {
    let gate = Arc::new(Semaphore::new(0));
    let scraper = Arc::new(ScriptedScraper::rows(Platform::Vrbo, 2).gated(gate.clone()));
    let h = Harness::new(test_config(1), scraper.clone()).await;
    for id in 1..=3 {
        h.property(id, Platform::Vrbo, 30, None).await;
    }

    let orchestrator = h.orchestrator.clone();
    let pass = tokio::spawn(async move { orchestrator.run_pass().await });

    scraper.entered.notified().await;
    h.orchestrator.shutdown();
    gate.add_permits(10);

    // Properties not yet admitted when shutdown began are skipped entirely
    let report = pass.await.unwrap().unwrap();
    assert_eq!(report.success, 1);
    assert_eq!(report.cancelled, report.selected - 1);
    assert_eq!(scraper.calls(), 1);

    for log in h.db.list_sync_logs(None, 10, 0).await.unwrap() {
        assert!(log.status.is_terminal());
        if log.status == SyncStatus::Cancelled {
            assert_eq!(log.message.as_deref(), Some("shutdown before start"));
            assert_eq!(log.execution_time_ms, 0);
        }
    }

    assert!(matches!(
        h.orchestrator.run_pass().await,
        Err(OrchestratorError::ShuttingDown)
    ));
}

/// Test 10: Terminal rows reject further updates
#[tokio::test]
async fn test_terminal_log_is_immutable() {
    let scraper = Arc::new(ScriptedScraper::rows(Platform::Airbnb, 1));
    let h = Harness::new(test_config(3), scraper).await;
    h.property(1, Platform::Airbnb, 30, None).await;

    let log = h.orchestrator.sync_property_now(1).await.unwrap();
    assert_eq!(log.status, SyncStatus::Success);

    let mut tampered = log.clone();
    tampered.status = SyncStatus::Error;
    tampered.message = Some("rewritten".into());
    assert!(matches!(
        h.db.update_sync_log(&tampered).await,
        Err(DbError::ConstraintViolation(_))
    ));
    assert_eq!(h.orchestrator.sync_log(log.id).await.unwrap(), Some(log));
}

/// Test 11: Run-now ignores flags and frequency, rejects unknown properties
#[tokio::test]
async fn test_sync_property_now() {
    let scraper = Arc::new(
        ScriptedScraper::rows(Platform::Booking, 6)
            .then(Err(ScrapeError::ListingUnavailable("HTTP 404".into()))),
    );
    let h = Harness::new(test_config(3), scraper).await;
    h.property(1, Platform::Booking, 1440, Some(5)).await;

    let log = h.orchestrator.sync_property_now(1).await.unwrap();
    assert_eq!(log.status, SyncStatus::CriticalError);
    assert!(h.db.get_flag(1).await.unwrap().is_some());

    let log = h.orchestrator.sync_property_now(1).await.unwrap();
    assert_eq!(log.status, SyncStatus::Success);
    assert_eq!(log.availabilities_updated, 6);

    assert!(matches!(
        h.orchestrator.sync_property_now(99).await,
        Err(OrchestratorError::PropertyNotFound(99))
    ));
}

/// Test 12: Run-all skips flagged properties but ignores frequency
#[tokio::test]
async fn test_sync_all_now() {
    let scraper = Arc::new(ScriptedScraper::rows(Platform::Airbnb, 2));
    let h = Harness::new(test_config(2), scraper.clone()).await;
    h.property(1, Platform::Airbnb, 1440, Some(1)).await;
    h.property(2, Platform::Airbnb, 1440, Some(1)).await;
    h.db.set_flag(&calendar_sync::models::SyncFlag {
        property_id: 2,
        reason: "layout changed".into(),
        sync_log_id: 0,
        flagged_at: h.clock.now(),
    })
    .await
    .unwrap();

    let report = h.orchestrator.sync_all_now().await.unwrap();
    assert_eq!(report.selected, 1);
    assert_eq!(report.success, 1);
    assert_eq!(scraper.calls(), 1);
}

/// Test 13: A property in flight is not started twice
#[tokio::test]
async fn test_in_flight_property_rejected() {
    let gate = Arc::new(Semaphore::new(0));
    let scraper = Arc::new(ScriptedScraper::rows(Platform::Airbnb, 1).gated(gate.clone()));
    let h = Harness::new(test_config(3), scraper.clone()).await;
    h.property(1, Platform::Airbnb, 30, None).await;

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.sync_property_now(1).await });
    scraper.entered.notified().await;

    assert!(matches!(
        h.orchestrator.sync_property_now(1).await,
        Err(OrchestratorError::AlreadyRunning(1))
    ));
    let report = h.orchestrator.run_pass().await.unwrap();
    assert_eq!(report.selected, 0);

    gate.add_permits(1);
    assert_eq!(first.await.unwrap().unwrap().status, SyncStatus::Success);
    assert_eq!(scraper.calls(), 1);
}

/// Test 14: Run loop serves handle requests and drains on shutdown
#[tokio::test]
async fn test_run_loop_with_handle() {
    let scraper = Arc::new(ScriptedScraper::rows(Platform::Vrbo, 3));
    let mut config = test_config(2);
    config.scheduler.initial_delay_secs = 3600;
    let h = Harness::new(config, scraper).await;
    h.property(1, Platform::Vrbo, 30, None).await;

    let handle = h.orchestrator.handle();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let orchestrator = h.orchestrator.clone();
    let running = tokio::spawn(async move { orchestrator.run(shutdown_rx).await });

    let log = handle.sync_property(1).await.unwrap();
    assert_eq!(log.status, SyncStatus::Success);

    let report = handle.sync_all().await.unwrap();
    assert_eq!(report.success, 1);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("loop did not stop")
        .unwrap();

    assert!(h.orchestrator.is_shutting_down());
    assert!(matches!(
        handle.sync_property(1).await,
        Err(OrchestratorError::NotRunning)
    ));
}

/// Test 15: The loop runs a pass once the initial delay elapses
#[tokio::test]
async fn test_run_loop_polls() {
    let scraper = Arc::new(ScriptedScraper::rows(Platform::Airbnb, 1));
    let mut config = test_config(1);
    config.scheduler.initial_delay_secs = 0;
    config.scheduler.poll_interval_secs = 3600;
    let h = Harness::new(config, scraper.clone()).await;
    h.property(1, Platform::Airbnb, 30, None).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let orchestrator = h.orchestrator.clone();
    let running = tokio::spawn(async move { orchestrator.run(shutdown_rx).await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.db.count_sync_logs(Some(1)).await.unwrap() == 0
            || !h.orchestrator.history(Some(1), 1, 0).await.unwrap()[0]
                .status
                .is_terminal()
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first pass did not run");
    assert_eq!(scraper.calls(), 1);

    shutdown_tx.send(()).unwrap();
    running.await.unwrap();
    assert_eq!(scraper.calls(), 1);
}

/// Test 16: Logs left open by an earlier process are closed at startup
#[tokio::test]
async fn test_recover_interrupted_logs() {
    let scraper = Arc::new(ScriptedScraper::rows(Platform::Vrbo, 2));
    let h = Harness::new(test_config(1), scraper).await;
    h.property(1, Platform::Vrbo, 30, None).await;

    let mut stale = calendar_sync::models::SyncLog::pending(1, Platform::Vrbo, h.clock.now());
    stale.id = h.db.insert_sync_log(&stale).await.unwrap();
    stale.status = SyncStatus::Started;
    h.db.update_sync_log(&stale).await.unwrap();

    assert_eq!(h.orchestrator.recover_interrupted().await.unwrap(), 1);

    let log = h.orchestrator.sync_log(stale.id).await.unwrap().unwrap();
    assert_eq!(log.status, SyncStatus::Cancelled);
    assert_eq!(log.message.as_deref(), Some("interrupted before completion"));
    assert!(log.completed_at.is_some());

    let report = h.orchestrator.run_pass().await.unwrap();
    assert_eq!(report.success, 1);
    assert_eq!(h.orchestrator.recover_interrupted().await.unwrap(), 0);
}
