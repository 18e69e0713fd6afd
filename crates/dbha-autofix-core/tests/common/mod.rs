// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures: an in-memory store plus scriptable orchestrator and
//! metadata fakes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use dbha_autofix_core::error::{AutofixError, Result};
use dbha_autofix_core::ingest::{EventContext, HaEvent};
use dbha_autofix_core::metadata::{
    ClusterInfo, ClusterMetadata, InstanceAddr, InstanceInfo, InstancePhase, InstanceStatus,
};
use dbha_autofix_core::model::{ClusterType, TicketStatus};
use dbha_autofix_core::orchestrator::{Orchestrator, TicketKind, TicketRequest};
use dbha_autofix_core::store::SqliteStore;

/// Orchestrator fake: hands out sequential ticket ids and lets tests
/// script the status each ticket reports.
#[derive(Default)]
pub struct MockOrchestrator {
    next_id: Mutex<i64>,
    statuses: Mutex<HashMap<i64, TicketStatus>>,
    pub created: Mutex<Vec<(TicketKind, i64)>>,
    pub cancelled: Mutex<Vec<i64>>,
}

impl MockOrchestrator {
    pub fn set_status(&self, ticket_id: i64, status: TicketStatus) {
        self.statuses.lock().unwrap().insert(ticket_id, status);
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn last_ticket_id(&self) -> i64 {
        self.created.lock().unwrap().last().expect("no tickets created").1
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    async fn create_ticket(&self, request: &TicketRequest) -> Result<i64> {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let id = 5000 + *next;
        self.statuses.lock().unwrap().insert(id, TicketStatus::Pending);
        self.created.lock().unwrap().push((request.kind, id));
        Ok(id)
    }

    async fn poll_ticket(&self, ticket_id: i64) -> Result<TicketStatus> {
        self.statuses
            .lock()
            .unwrap()
            .get(&ticket_id)
            .copied()
            .ok_or(AutofixError::Rpc {
                service: "orchestrator",
                details: format!("unknown ticket {ticket_id}"),
            })
    }

    async fn cancel_ticket(&self, ticket_id: i64) -> Result<()> {
        self.cancelled.lock().unwrap().push(ticket_id);
        Ok(())
    }
}

/// Metadata fake: a mutable machine census plus static cluster and peer
/// tables, so tests can recover instances mid-flight.
#[derive(Default)]
pub struct MockMetadata {
    machines: Mutex<HashMap<String, Vec<InstanceInfo>>>,
    clusters: Mutex<HashMap<String, ClusterInfo>>,
    peers: Mutex<HashMap<(String, i32), InstanceAddr>>,
}

impl MockMetadata {
    pub fn add_cluster(&self, immute_domain: &str, cluster_id: i64, cluster_type: ClusterType) {
        self.clusters.lock().unwrap().insert(
            immute_domain.to_string(),
            ClusterInfo {
                cluster_id,
                immute_domain: immute_domain.to_string(),
                cluster_type,
            },
        );
    }

    pub fn add_instance(&self, ip: &str, port: i32, cluster_id: i64, status: InstanceStatus) {
        self.machines
            .lock()
            .unwrap()
            .entry(ip.to_string())
            .or_default()
            .push(InstanceInfo {
                port,
                cluster_id,
                status,
                phase: InstancePhase::Online,
            });
    }

    pub fn add_peer(&self, ip: &str, port: i32, peer_ip: &str, peer_port: i32) {
        self.peers.lock().unwrap().insert(
            (ip.to_string(), port),
            InstanceAddr {
                ip: peer_ip.to_string(),
                port: peer_port,
            },
        );
    }

    /// Flip an instance back to RUNNING, as if it recovered on its own.
    pub fn mark_recovered(&self, ip: &str, port: i32) {
        if let Some(instances) = self.machines.lock().unwrap().get_mut(ip) {
            for instance in instances.iter_mut() {
                if instance.port == port {
                    instance.status = InstanceStatus::Running;
                }
            }
        }
    }
}

#[async_trait]
impl ClusterMetadata for MockMetadata {
    async fn resolve_cluster(
        &self,
        _bk_cloud_id: i64,
        _bk_biz_id: i64,
        immute_domain: &str,
    ) -> Result<Option<ClusterInfo>> {
        Ok(self.clusters.lock().unwrap().get(immute_domain).cloned())
    }

    async fn machine_instances(&self, _bk_cloud_id: i64, ip: &str) -> Result<Vec<InstanceInfo>> {
        Ok(self.machines.lock().unwrap().get(ip).cloned().unwrap_or_default())
    }

    async fn replication_peer(
        &self,
        _bk_cloud_id: i64,
        ip: &str,
        port: i32,
    ) -> Result<Option<InstanceAddr>> {
        Ok(self.peers.lock().unwrap().get(&(ip.to_string(), port)).cloned())
    }
}

pub async fn in_memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory().await.expect("in-memory store"))
}

/// A DBHA failover event with sane defaults for a TenDBHA backend.
pub fn event(check_id: i64, ip: &str, port: i32) -> HaEvent {
    HaEvent {
        bk_cloud_id: 0,
        bk_biz_id: 3,
        check_id,
        immute_domain: "ha.db.example".to_string(),
        cluster_type: "TenDBHA".to_string(),
        machine_type: "BACKEND".to_string(),
        instance_role: "backend_master".to_string(),
        ip: ip.to_string(),
        port,
        event_create_time: Utc::now().to_rfc3339(),
        context: EventContext::default(),
    }
}

pub fn proxy_event(check_id: i64, ip: &str, port: i32) -> HaEvent {
    let mut ev = event(check_id, ip, port);
    ev.machine_type = "PROXY".to_string();
    ev.instance_role = "proxy".to_string();
    ev
}

pub fn spider_event(check_id: i64, ip: &str, port: i32) -> HaEvent {
    let mut ev = event(check_id, ip, port);
    ev.immute_domain = "cluster.db.example".to_string();
    ev.cluster_type = "TenDBCluster".to_string();
    ev.machine_type = "SPIDER".to_string();
    ev.instance_role = "spider_master".to_string();
    ev
}
