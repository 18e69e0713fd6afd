// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end reconcile flows: events in, tickets out, records driven to
//! terminal states across ticks.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use common::{MockMetadata, MockOrchestrator, event, in_memory_store, proxy_event, spider_event};
use dbha_autofix_core::ingest::Ingestor;
use dbha_autofix_core::metadata::{ClusterMetadata, InstanceStatus};
use dbha_autofix_core::model::{AutofixRecord, AutofixStep, ClusterType, TicketStatus};
use dbha_autofix_core::orchestrator::{Orchestrator, TicketKind};
use dbha_autofix_core::reconciler::{Reconciler, ReconcilerConfig};
use dbha_autofix_core::store::{RecordStore, SqliteStore};

struct Harness {
    store: Arc<SqliteStore>,
    orchestrator: Arc<MockOrchestrator>,
    metadata: Arc<MockMetadata>,
    ingestor: Ingestor,
    reconciler: Reconciler,
}

async fn harness(config: ReconcilerConfig) -> Harness {
    let store = in_memory_store().await;
    let orchestrator = Arc::new(MockOrchestrator::default());
    let metadata = Arc::new(MockMetadata::default());
    metadata.add_cluster("ha.db.example", 11, ClusterType::TenDBHA);
    metadata.add_cluster("cluster.db.example", 7, ClusterType::TenDBCluster);

    let ingestor = Ingestor::new(
        store.clone() as Arc<dyn RecordStore>,
        metadata.clone() as Arc<dyn ClusterMetadata>,
    );
    let reconciler = Reconciler::new(
        store.clone() as Arc<dyn RecordStore>,
        orchestrator.clone() as Arc<dyn Orchestrator>,
        metadata.clone() as Arc<dyn ClusterMetadata>,
        config,
    );

    Harness {
        store,
        orchestrator,
        metadata,
        ingestor,
        reconciler,
    }
}

async fn get(h: &Harness, check_id: i64, ip: &str, port: i32) -> AutofixRecord {
    h.store
        .get_record(check_id, ip, port)
        .await
        .expect("store read")
        .expect("record exists")
}

#[tokio::test]
async fn test_backend_inplace_success_closes_record() {
    let h = harness(ReconcilerConfig::default()).await;
    h.metadata
        .add_instance("10.0.0.1", 20000, 11, InstanceStatus::Unavailable);
    h.metadata.add_peer("10.0.0.1", 20000, "10.0.0.2", 20000);

    let report = h.ingestor.ingest(&[event(100, "10.0.0.1", 20000)]).await.unwrap();
    assert_eq!(report.accepted, 1);

    h.reconciler.tick().await.unwrap();
    let ticket_id = h.orchestrator.last_ticket_id();
    assert_eq!(
        h.orchestrator.created.lock().unwrap()[0].0,
        TicketKind::MysqlStorageStandardizeAutofix
    );

    let rec = get(&h, 100, "10.0.0.1", 20000).await;
    assert_eq!(rec.inplace_ticket_status, TicketStatus::Pending);
    assert_eq!(rec.inplace_ticket_id, ticket_id);

    h.orchestrator.set_status(ticket_id, TicketStatus::Succeeded);
    h.reconciler.tick().await.unwrap();

    let rec = get(&h, 100, "10.0.0.1", 20000).await;
    assert_eq!(rec.inplace_ticket_status, TicketStatus::Succeeded);
    assert_eq!(rec.replace_ticket_status, TicketStatus::Skipped);
    assert!(rec.is_closed());
    assert!(h.store.list_open_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_proxy_episode_waits_for_all_ports() {
    let h = harness(ReconcilerConfig::default()).await;
    h.metadata
        .add_instance("10.0.1.1", 10000, 11, InstanceStatus::Unavailable);
    h.metadata
        .add_instance("10.0.1.1", 10001, 11, InstanceStatus::Unavailable);

    // Only the first port has reported so far.
    h.ingestor
        .ingest(&[proxy_event(200, "10.0.1.1", 10000)])
        .await
        .unwrap();
    h.reconciler.tick().await.unwrap();
    assert_eq!(h.orchestrator.created_count(), 0, "incomplete episode must wait");

    h.ingestor
        .ingest(&[proxy_event(200, "10.0.1.1", 10001)])
        .await
        .unwrap();
    h.reconciler.tick().await.unwrap();

    // One machine-level ticket covering both ports.
    assert_eq!(h.orchestrator.created_count(), 1);
    assert_eq!(
        h.orchestrator.created.lock().unwrap()[0].0,
        TicketKind::MysqlProxyInplaceAutofix
    );
    let ticket_id = h.orchestrator.last_ticket_id();
    for port in [10000, 10001] {
        let rec = get(&h, 200, "10.0.1.1", port).await;
        assert_eq!(rec.inplace_ticket_id, ticket_id);
        assert_eq!(rec.inplace_ticket_status, TicketStatus::Pending);
    }
}

#[tokio::test]
async fn test_wait_window_expiry_times_out_episode() {
    let h = harness(ReconcilerConfig::default()).await;
    h.metadata
        .add_instance("10.0.1.2", 10000, 11, InstanceStatus::Unavailable);
    h.metadata
        .add_instance("10.0.1.2", 10001, 11, InstanceStatus::Unavailable);

    // The lone event is 30 minutes old; the second port never reports.
    let mut stale = proxy_event(300, "10.0.1.2", 10000);
    stale.event_create_time = (Utc::now() - chrono::Duration::minutes(30)).to_rfc3339();
    h.ingestor.ingest(&[stale]).await.unwrap();

    h.reconciler.tick().await.unwrap();

    assert_eq!(h.orchestrator.created_count(), 0);
    let rec = get(&h, 300, "10.0.1.2", 10000).await;
    assert_eq!(rec.inplace_ticket_status, TicketStatus::Timeout);
    assert_eq!(rec.replace_ticket_status, TicketStatus::Skipped);
    assert!(rec.is_closed());
}

#[tokio::test]
async fn test_spider_spanning_clusters_is_terminated() {
    let h = harness(ReconcilerConfig::default()).await;
    // One spider machine with instances in two different clusters.
    h.metadata
        .add_instance("10.0.2.1", 25000, 7, InstanceStatus::Unavailable);
    h.metadata
        .add_instance("10.0.2.1", 25001, 8, InstanceStatus::Unavailable);

    h.ingestor
        .ingest(&[
            spider_event(400, "10.0.2.1", 25000),
            spider_event(400, "10.0.2.1", 25001),
        ])
        .await
        .unwrap();

    // Tick 1 skips the in-place phase; tick 2 rejects the replace.
    h.reconciler.tick().await.unwrap();
    let rec = get(&h, 400, "10.0.2.1", 25000).await;
    assert_eq!(rec.inplace_ticket_status, TicketStatus::Skipped);
    assert_eq!(rec.current_step, AutofixStep::ReplaceNew);

    h.reconciler.tick().await.unwrap();

    assert_eq!(h.orchestrator.created_count(), 0);
    for port in [25000, 25001] {
        let rec = get(&h, 400, "10.0.2.1", port).await;
        assert_eq!(rec.inplace_ticket_status, TicketStatus::Skipped);
        assert_eq!(rec.replace_ticket_status, TicketStatus::Terminated);
        assert!(rec.is_closed());
    }
}

#[tokio::test]
async fn test_inplace_failure_escalates_to_replacement() {
    let h = harness(ReconcilerConfig::default()).await;
    h.metadata
        .add_instance("10.0.3.1", 20000, 11, InstanceStatus::Unavailable);

    let mut ev = event(500, "10.0.3.1", 20000);
    ev.context.master_host = "10.0.3.9".to_string();
    ev.context.master_port = 20000;
    ev.context.master_log_file = "binlog.000042".to_string();
    ev.context.master_log_pos = 1337;
    h.ingestor.ingest(&[ev]).await.unwrap();

    // In-place standardize goes out and fails.
    h.reconciler.tick().await.unwrap();
    let inplace_ticket = h.orchestrator.last_ticket_id();
    h.orchestrator.set_status(inplace_ticket, TicketStatus::Failed);

    // The failure escalates and the replace chain dispatches in one tick.
    h.reconciler.tick().await.unwrap();
    let kinds: Vec<TicketKind> = h
        .orchestrator
        .created
        .lock()
        .unwrap()
        .iter()
        .map(|(kind, _)| *kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            TicketKind::MysqlStorageStandardizeAutofix,
            TicketKind::MysqlDbhaAfRepairReplicate,
            TicketKind::MysqlDbhaAfBackendReplace,
        ]
    );

    let rec = get(&h, 500, "10.0.3.1", 20000).await;
    assert_eq!(rec.current_step, AutofixStep::ReplaceNew);
    assert_eq!(rec.replace_ticket_status, TicketStatus::Pending);
    // The chain's final ticket is the one being tracked.
    let replace_ticket = h.orchestrator.last_ticket_id();
    assert_eq!(rec.replace_ticket_id, replace_ticket);

    h.orchestrator.set_status(replace_ticket, TicketStatus::Succeeded);
    h.reconciler.tick().await.unwrap();

    let rec = get(&h, 500, "10.0.3.1", 20000).await;
    assert_eq!(rec.inplace_ticket_status, TicketStatus::Failed);
    assert_eq!(rec.replace_ticket_status, TicketStatus::Succeeded);
    assert!(rec.is_closed());
}

#[tokio::test]
async fn test_implicit_recovery_cancels_in_flight_ticket() {
    let h = harness(ReconcilerConfig::default()).await;
    h.metadata
        .add_instance("10.0.4.1", 20000, 11, InstanceStatus::Unavailable);

    h.ingestor.ingest(&[event(600, "10.0.4.1", 20000)]).await.unwrap();
    h.reconciler.tick().await.unwrap();
    let ticket_id = h.orchestrator.last_ticket_id();

    // The instance comes back while the ticket is still pending.
    h.metadata.mark_recovered("10.0.4.1", 20000);
    h.reconciler.tick().await.unwrap();

    assert_eq!(*h.orchestrator.cancelled.lock().unwrap(), vec![ticket_id]);
    let rec = get(&h, 600, "10.0.4.1", 20000).await;
    assert_eq!(rec.inplace_ticket_status, TicketStatus::Terminated);
    assert_eq!(rec.replace_ticket_status, TicketStatus::Skipped);
    assert!(rec.is_closed());
}

#[tokio::test]
async fn test_implicit_recovery_beats_dispatch() {
    let h = harness(ReconcilerConfig::default()).await;
    h.metadata
        .add_instance("10.0.4.2", 20000, 11, InstanceStatus::Unavailable);

    h.ingestor.ingest(&[event(601, "10.0.4.2", 20000)]).await.unwrap();
    h.metadata.mark_recovered("10.0.4.2", 20000);
    h.reconciler.tick().await.unwrap();

    // No ticket was ever created; both phases close as skipped.
    assert_eq!(h.orchestrator.created_count(), 0);
    let rec = get(&h, 601, "10.0.4.2", 20000).await;
    assert_eq!(rec.inplace_ticket_status, TicketStatus::Skipped);
    assert_eq!(rec.replace_ticket_status, TicketStatus::Skipped);
    assert!(rec.is_closed());
}

#[tokio::test]
async fn test_implicit_recovery_disabled_dispatches_anyway() {
    let config = ReconcilerConfig {
        implicit_recovery_enabled: false,
        ..ReconcilerConfig::default()
    };
    let h = harness(config).await;
    h.metadata
        .add_instance("10.0.4.3", 20000, 11, InstanceStatus::Unavailable);
    h.metadata.add_peer("10.0.4.3", 20000, "10.0.4.4", 20000);

    h.ingestor.ingest(&[event(602, "10.0.4.3", 20000)]).await.unwrap();
    h.metadata.mark_recovered("10.0.4.3", 20000);
    h.reconciler.tick().await.unwrap();

    assert_eq!(h.orchestrator.created_count(), 1);
}

#[tokio::test]
async fn test_reingest_preserves_progress() {
    let h = harness(ReconcilerConfig::default()).await;
    h.metadata
        .add_instance("10.0.5.1", 20000, 11, InstanceStatus::Unavailable);

    h.ingestor.ingest(&[event(700, "10.0.5.1", 20000)]).await.unwrap();
    h.reconciler.tick().await.unwrap();
    let ticket_id = h.orchestrator.last_ticket_id();

    // The agent re-reports the same failure; progress must survive.
    let report = h.ingestor.ingest(&[event(700, "10.0.5.1", 20000)]).await.unwrap();
    assert_eq!(report.accepted, 0);
    assert_eq!(report.refreshed, 1);

    let all = h.store.list_all_records(100).await.unwrap();
    assert_eq!(all.len(), 1);
    let rec = get(&h, 700, "10.0.5.1", 20000).await;
    assert_eq!(rec.inplace_ticket_id, ticket_id);
    assert_eq!(rec.inplace_ticket_status, TicketStatus::Pending);
}

#[tokio::test]
async fn test_tick_is_idempotent_while_ticket_runs() {
    let h = harness(ReconcilerConfig::default()).await;
    h.metadata
        .add_instance("10.0.5.2", 20000, 11, InstanceStatus::Unavailable);

    h.ingestor.ingest(&[event(701, "10.0.5.2", 20000)]).await.unwrap();
    h.reconciler.tick().await.unwrap();
    let after_first = get(&h, 701, "10.0.5.2", 20000).await;

    // Nothing changed externally: further ticks create nothing and leave
    // the record byte-identical.
    h.reconciler.tick().await.unwrap();
    h.reconciler.tick().await.unwrap();

    assert_eq!(h.orchestrator.created_count(), 1);
    let after_third = get(&h, 701, "10.0.5.2", 20000).await;
    assert_eq!(after_first.inplace_ticket_id, after_third.inplace_ticket_id);
    assert_eq!(after_first.inplace_ticket_status, after_third.inplace_ticket_status);
    assert_eq!(after_first.replace_ticket_status, after_third.replace_ticket_status);
    assert_eq!(after_first.current_step, after_third.current_step);
}

#[tokio::test]
async fn test_shutdown_stops_run_loop() {
    let config = ReconcilerConfig {
        period: Duration::from_millis(10),
        ..ReconcilerConfig::default()
    };
    let h = harness(config).await;
    let shutdown = h.reconciler.shutdown_handle();

    let handle = tokio::spawn(async move { h.reconciler.run().await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown.notify_one();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("run loop must stop on shutdown")
        .unwrap();
}
