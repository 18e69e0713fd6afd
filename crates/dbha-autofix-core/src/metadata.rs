// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-only view of the cluster-metadata service.
//!
//! The controller never mutates metadata; it resolves clusters during
//! ingestion, takes the machine census for episode completeness, checks
//! instance availability for implicit recovery, and looks up replication
//! peers for storage standardization.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::ClusterType;

/// Current availability of an instance as tracked by cluster metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    /// Instance is serving.
    Running,
    /// Instance is marked unavailable (the HA agent failed it over).
    Unavailable,
}

/// Whether the instance is part of the serving topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstancePhase {
    /// Instance belongs to the serving topology.
    Online,
    /// Instance has been taken out of the topology.
    Offline,
}

/// One instance on a machine, from the machine census.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    /// Listen port.
    pub port: i32,
    /// Cluster the instance belongs to.
    pub cluster_id: i64,
    /// Availability status.
    pub status: InstanceStatus,
    /// Topology phase.
    pub phase: InstancePhase,
}

impl InstanceInfo {
    /// The census counts only online instances; a machine "ought to emit"
    /// one failover event per online instance.
    pub fn is_online(&self) -> bool {
        self.phase == InstancePhase::Online
    }

    /// The condition the HA agent reported: still down, still in topology.
    pub fn is_unavailable_online(&self) -> bool {
        self.status == InstanceStatus::Unavailable && self.is_online()
    }
}

/// A resolved cluster.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    /// Cluster id.
    pub cluster_id: i64,
    /// Immutable domain.
    pub immute_domain: String,
    /// Topology family.
    pub cluster_type: ClusterType,
}

/// Address of an instance, used for replication-peer lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceAddr {
    /// Peer IP.
    pub ip: String,
    /// Peer port.
    pub port: i32,
}

/// Read-only metadata egress (spec'd narrow surface).
#[async_trait]
pub trait ClusterMetadata: Send + Sync {
    /// Resolve a cluster by its location triple. `None` means the triple
    /// does not name a known cluster.
    async fn resolve_cluster(
        &self,
        bk_cloud_id: i64,
        bk_biz_id: i64,
        immute_domain: &str,
    ) -> Result<Option<ClusterInfo>>;

    /// List all instances on a machine (the machine census).
    async fn machine_instances(&self, bk_cloud_id: i64, ip: &str) -> Result<Vec<InstanceInfo>>;

    /// The surviving replication peer of a storage instance, if any.
    /// In-place storage repair standardizes the peer because the failed
    /// node is unreachable.
    async fn replication_peer(
        &self,
        bk_cloud_id: i64,
        ip: &str,
        port: i32,
    ) -> Result<Option<InstanceAddr>>;
}

/// Expected ports a machine ought to emit failover events for: every
/// online instance in the census.
pub fn expected_ports(census: &[InstanceInfo]) -> Vec<i32> {
    let mut ports: Vec<i32> = census.iter().filter(|i| i.is_online()).map(|i| i.port).collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}

/// Distinct clusters the machine's online instances belong to.
pub fn machine_cluster_ids(census: &[InstanceInfo]) -> Vec<i64> {
    let mut ids: Vec<i64> = census.iter().filter(|i| i.is_online()).map(|i| i.cluster_id).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}
