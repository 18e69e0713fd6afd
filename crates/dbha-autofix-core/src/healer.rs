// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The healing state machine: turns a ready episode into a dispatch plan.
//!
//! Per phase, a record moves through
//! `UNSUBMITTED -> PENDING -> RUNNING -> terminal`; the in-place phase runs
//! first and, on FAILED or TIMEOUT, the record advances to the replace
//! phase. This module picks the ticket kinds for the current phase based
//! on the machine role and validates the dispatch-time constraints. It
//! never talks to the orchestrator itself; the dispatcher does.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use crate::error::{AutofixError, Result};
use crate::grouper::Episode;
use crate::metadata::{ClusterMetadata, machine_cluster_ids};
use crate::model::{AutofixRecord, MachineType, Phase};
use crate::orchestrator::{TicketKind, TicketRequest};

/// What the state machine wants done for a ready episode.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Create these tickets, in order, and claim the final ticket id on
    /// every record of the episode.
    Dispatch {
        /// The phase being dispatched.
        phase: Phase,
        /// Ordered creation plan; chained kinds are created back to back.
        tickets: Vec<TicketRequest>,
    },
    /// The machine role has no in-place action; skip straight to the
    /// replace phase.
    SkipInPlace,
    /// Every affected instance is healthy again; close the episode
    /// without dispatching.
    AlreadyRecovered,
}

/// Chooses the recovery action for ready episodes.
pub struct Healer {
    metadata: Arc<dyn ClusterMetadata>,
    implicit_recovery_enabled: bool,
}

impl Healer {
    /// Create a healer over the given metadata view.
    pub fn new(metadata: Arc<dyn ClusterMetadata>, implicit_recovery_enabled: bool) -> Self {
        Self {
            metadata,
            implicit_recovery_enabled,
        }
    }

    /// Decide what to do for a ready episode.
    ///
    /// The episode is coherent by the time it gets here (the grouper
    /// guarantees one machine type, one step, one status across records).
    pub async fn decide(&self, episode: &Episode) -> Result<Decision> {
        let first = &episode.records[0];
        let machine_type = first.machine_type;
        let phase = first.current_phase();

        // Taxonomy drift guard: a record whose machine type is no longer
        // legal for its cluster type cannot be healed.
        if !first
            .cluster_type
            .legal_machine_types()
            .contains(&machine_type)
        {
            return Err(AutofixError::UnsupportedMachineType {
                machine_type: format!("{} (cluster type {})", machine_type, first.cluster_type),
            });
        }

        let census = self
            .metadata
            .machine_instances(episode.bk_cloud_id, &episode.ip)
            .await?;

        // Implicit-recovery shortcut: if none of the episode's instances
        // is still unavailable, the problem resolved itself.
        if self.implicit_recovery_enabled {
            let still_down = episode
                .records
                .iter()
                .any(|r| instance_still_unavailable(&census, r.port));
            if !still_down {
                info!(
                    check_id = episode.check_id,
                    ip = %episode.ip,
                    "All instances recovered on their own; skipping autofix"
                );
                return Ok(Decision::AlreadyRecovered);
            }
        }

        let decision = match (machine_type, phase) {
            (MachineType::Proxy, Phase::InPlace) => {
                self.check_unavailable_count(episode, &census)?;
                Decision::Dispatch {
                    phase,
                    tickets: vec![TicketRequest {
                        kind: TicketKind::MysqlProxyInplaceAutofix,
                        bk_biz_id: first.bk_biz_id,
                        cluster_ids: machine_cluster_ids(&census),
                        details: json!({
                            "bk_cloud_id": episode.bk_cloud_id,
                            "ip": episode.ip,
                            "ports": episode.ports(),
                        }),
                    }],
                }
            }

            (MachineType::Proxy, Phase::Replace) => Decision::Dispatch {
                phase,
                tickets: vec![TicketRequest {
                    kind: TicketKind::MysqlDbhaAutofixProxySwitch,
                    bk_biz_id: first.bk_biz_id,
                    cluster_ids: machine_cluster_ids(&census),
                    details: json!({
                        "bk_cloud_id": episode.bk_cloud_id,
                        "ip": episode.ip,
                        "ports": episode.ports(),
                    }),
                }],
            },

            (MachineType::Spider, Phase::InPlace) => Decision::SkipInPlace,

            (MachineType::Spider, Phase::Replace) => {
                self.check_unavailable_count(episode, &census)?;
                let cluster_ids = machine_cluster_ids(&census);
                if cluster_ids.len() != 1 {
                    return Err(AutofixError::SpiderMultiClusters {
                        ip: episode.ip.clone(),
                        cluster_ids,
                    });
                }
                Decision::Dispatch {
                    phase,
                    tickets: vec![
                        TicketRequest {
                            kind: TicketKind::MysqlDbhaAutofixSpiderAdd,
                            bk_biz_id: first.bk_biz_id,
                            cluster_ids: cluster_ids.clone(),
                            details: json!({
                                "bk_cloud_id": episode.bk_cloud_id,
                                "ip": episode.ip,
                                "spider_count": episode.records.len(),
                            }),
                        },
                        TicketRequest {
                            kind: TicketKind::MysqlDbhaAutofixSpiderReduce,
                            bk_biz_id: first.bk_biz_id,
                            cluster_ids,
                            details: json!({
                                "bk_cloud_id": episode.bk_cloud_id,
                                "ip": episode.ip,
                            }),
                        },
                    ],
                }
            }

            (
                MachineType::Backend | MachineType::Single | MachineType::Remote,
                Phase::InPlace,
            ) => self.storage_standardize(episode, first).await?,

            (MachineType::Backend | MachineType::Single, Phase::Replace) => {
                let mut tickets = Vec::new();
                // Replication repair first, when the HA agent captured
                // usable master coordinates.
                if first.context.has_master_coordinates() {
                    tickets.push(TicketRequest {
                        kind: TicketKind::MysqlDbhaAfRepairReplicate,
                        bk_biz_id: first.bk_biz_id,
                        cluster_ids: record_cluster_ids(&episode.records),
                        details: json!({
                            "bk_cloud_id": episode.bk_cloud_id,
                            "ip": episode.ip,
                            "ports": episode.ports(),
                            "master_host": first.context.master_host,
                            "master_port": first.context.master_port,
                            "binlog_file": first.context.master_log_file,
                            "binlog_pos": first.context.master_log_pos,
                        }),
                    });
                }
                tickets.push(TicketRequest {
                    kind: TicketKind::MysqlDbhaAfBackendReplace,
                    bk_biz_id: first.bk_biz_id,
                    cluster_ids: record_cluster_ids(&episode.records),
                    details: json!({
                        "bk_cloud_id": episode.bk_cloud_id,
                        "ip": episode.ip,
                        "ports": episode.ports(),
                    }),
                });
                Decision::Dispatch { phase, tickets }
            }

            (MachineType::Remote, Phase::Replace) => {
                let cluster_ids = machine_cluster_ids(&census);
                if cluster_ids.len() != 1 {
                    return Err(AutofixError::RemoteMultiClusters {
                        ip: episode.ip.clone(),
                        cluster_ids,
                    });
                }
                Decision::Dispatch {
                    phase,
                    tickets: vec![TicketRequest {
                        kind: TicketKind::MysqlDbhaAfRemoteReplace,
                        bk_biz_id: first.bk_biz_id,
                        cluster_ids,
                        details: json!({
                            "bk_cloud_id": episode.bk_cloud_id,
                            "ip": episode.ip,
                        }),
                    }],
                }
            }
        };

        Ok(decision)
    }

    /// Is this record's instance healthy again? Used by the reconciler's
    /// implicit-recovery sweep. An instance missing from the census has
    /// left the topology and counts as recovered.
    pub async fn instance_recovered(&self, record: &AutofixRecord) -> Result<bool> {
        let census = self
            .metadata
            .machine_instances(record.bk_cloud_id, &record.ip)
            .await?;
        Ok(!instance_still_unavailable(&census, record.port))
    }

    /// In-place storage repair: standardize the surviving replication
    /// peer, because the failed node is unreachable. A node without a
    /// peer (TenDBSingle) standardizes in place.
    async fn storage_standardize(
        &self,
        episode: &Episode,
        first: &AutofixRecord,
    ) -> Result<Decision> {
        let peer = self
            .metadata
            .replication_peer(episode.bk_cloud_id, &episode.ip, first.port)
            .await?;

        let (target_ip, target_port) = match &peer {
            Some(addr) => (addr.ip.clone(), addr.port),
            None => (episode.ip.clone(), first.port),
        };
        debug!(
            check_id = episode.check_id,
            ip = %episode.ip,
            target_ip = %target_ip,
            "Standardizing storage instance"
        );

        Ok(Decision::Dispatch {
            phase: Phase::InPlace,
            tickets: vec![TicketRequest {
                kind: TicketKind::MysqlStorageStandardizeAutofix,
                bk_biz_id: first.bk_biz_id,
                cluster_ids: record_cluster_ids(&episode.records),
                details: json!({
                    "bk_cloud_id": episode.bk_cloud_id,
                    "ip": target_ip,
                    "port": target_port,
                }),
            }],
        })
    }

    /// The number of unavailable-online instances on the machine must
    /// equal the record count, or the machine is in a state we did not
    /// expect and the dispatch aborts for this tick.
    fn check_unavailable_count(&self, episode: &Episode, census: &[crate::metadata::InstanceInfo]) -> Result<()> {
        let unavailable = census.iter().filter(|i| i.is_unavailable_online()).count();
        if unavailable != episode.records.len() {
            return Err(AutofixError::BadInstanceStatus {
                ip: episode.ip.clone(),
                expected: episode.records.len(),
                actual: unavailable,
            });
        }
        Ok(())
    }
}

fn instance_still_unavailable(census: &[crate::metadata::InstanceInfo], port: i32) -> bool {
    census
        .iter()
        .any(|i| i.port == port && i.is_unavailable_online())
}

fn record_cluster_ids(records: &[AutofixRecord]) -> Vec<i64> {
    let mut ids: Vec<i64> = records.iter().map(|r| r.cluster_id).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouper::group_records;
    use crate::metadata::{
        ClusterInfo, InstanceAddr, InstanceInfo, InstancePhase, InstanceStatus,
    };
    use crate::model::{AutofixStep, ClusterType, MasterContext, TicketStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeMetadata {
        machines: HashMap<String, Vec<InstanceInfo>>,
        peers: HashMap<(String, i32), InstanceAddr>,
    }

    #[async_trait]
    impl ClusterMetadata for FakeMetadata {
        async fn resolve_cluster(
            &self,
            _bk_cloud_id: i64,
            _bk_biz_id: i64,
            _immute_domain: &str,
        ) -> Result<Option<ClusterInfo>> {
            Ok(None)
        }

        async fn machine_instances(
            &self,
            _bk_cloud_id: i64,
            ip: &str,
        ) -> Result<Vec<InstanceInfo>> {
            Ok(self.machines.get(ip).cloned().unwrap_or_default())
        }

        async fn replication_peer(
            &self,
            _bk_cloud_id: i64,
            ip: &str,
            port: i32,
        ) -> Result<Option<InstanceAddr>> {
            Ok(self.peers.get(&(ip.to_string(), port)).cloned())
        }
    }

    fn down(port: i32, cluster_id: i64) -> InstanceInfo {
        InstanceInfo {
            port,
            cluster_id,
            status: InstanceStatus::Unavailable,
            phase: InstancePhase::Online,
        }
    }

    fn up(port: i32, cluster_id: i64) -> InstanceInfo {
        InstanceInfo {
            port,
            cluster_id,
            status: InstanceStatus::Running,
            phase: InstancePhase::Online,
        }
    }

    fn record(
        port: i32,
        cluster_type: ClusterType,
        machine_type: MachineType,
        step: AutofixStep,
    ) -> AutofixRecord {
        let now = Utc::now();
        let mut rec = AutofixRecord {
            id: port as i64,
            check_id: 100,
            ip: "10.0.0.1".to_string(),
            port,
            bk_cloud_id: 0,
            bk_biz_id: 3,
            cluster_id: 11,
            immute_domain: "db.test.example".to_string(),
            cluster_type,
            machine_type,
            instance_role: "role".to_string(),
            event_create_time: now,
            context: MasterContext::default(),
            current_step: step,
            inplace_ticket_id: 0,
            inplace_ticket_status: TicketStatus::Unsubmitted,
            replace_ticket_id: 0,
            replace_ticket_status: TicketStatus::Unsubmitted,
            created_at: now,
            updated_at: now,
        };
        if step == AutofixStep::ReplaceNew {
            rec.inplace_ticket_status = TicketStatus::Failed;
            rec.inplace_ticket_id = 900;
        }
        rec
    }

    fn episode(records: Vec<AutofixRecord>) -> Episode {
        let mut eps = group_records(records);
        assert_eq!(eps.len(), 1);
        eps.remove(0)
    }

    #[tokio::test]
    async fn test_proxy_inplace_dispatch() {
        let mut meta = FakeMetadata::default();
        meta.machines
            .insert("10.0.0.1".to_string(), vec![down(10000, 11), down(10001, 11)]);
        let healer = Healer::new(Arc::new(meta), true);

        let ep = episode(vec![
            record(10000, ClusterType::TenDBHA, MachineType::Proxy, AutofixStep::InPlaceAutofix),
            record(10001, ClusterType::TenDBHA, MachineType::Proxy, AutofixStep::InPlaceAutofix),
        ]);

        match healer.decide(&ep).await.unwrap() {
            Decision::Dispatch { phase, tickets } => {
                assert_eq!(phase, Phase::InPlace);
                assert_eq!(tickets.len(), 1);
                assert_eq!(tickets[0].kind, TicketKind::MysqlProxyInplaceAutofix);
            }
            other => panic!("expected Dispatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_proxy_inplace_bad_instance_status() {
        // Two records but only one unavailable instance on the machine.
        let mut meta = FakeMetadata::default();
        meta.machines
            .insert("10.0.0.1".to_string(), vec![down(10000, 11), up(10001, 11)]);
        let healer = Healer::new(Arc::new(meta), true);

        let ep = episode(vec![
            record(10000, ClusterType::TenDBHA, MachineType::Proxy, AutofixStep::InPlaceAutofix),
            record(10001, ClusterType::TenDBHA, MachineType::Proxy, AutofixStep::InPlaceAutofix),
        ]);

        let err = healer.decide(&ep).await.unwrap_err();
        assert_eq!(err.error_code(), "BAD_INSTANCE_STATUS");
        assert!(!err.closes_group());
    }

    #[tokio::test]
    async fn test_spider_inplace_is_skipped() {
        let mut meta = FakeMetadata::default();
        meta.machines
            .insert("10.0.0.1".to_string(), vec![down(25000, 7)]);
        let healer = Healer::new(Arc::new(meta), true);

        let ep = episode(vec![record(
            25000,
            ClusterType::TenDBCluster,
            MachineType::Spider,
            AutofixStep::InPlaceAutofix,
        )]);

        assert!(matches!(
            healer.decide(&ep).await.unwrap(),
            Decision::SkipInPlace
        ));
    }

    #[tokio::test]
    async fn test_spider_replace_pairs_add_and_reduce() {
        let mut meta = FakeMetadata::default();
        meta.machines
            .insert("10.0.0.1".to_string(), vec![down(25000, 7)]);
        let healer = Healer::new(Arc::new(meta), true);

        let ep = episode(vec![record(
            25000,
            ClusterType::TenDBCluster,
            MachineType::Spider,
            AutofixStep::ReplaceNew,
        )]);

        match healer.decide(&ep).await.unwrap() {
            Decision::Dispatch { phase, tickets } => {
                assert_eq!(phase, Phase::Replace);
                assert_eq!(tickets.len(), 2);
                assert_eq!(tickets[0].kind, TicketKind::MysqlDbhaAutofixSpiderAdd);
                assert_eq!(tickets[1].kind, TicketKind::MysqlDbhaAutofixSpiderReduce);
            }
            other => panic!("expected Dispatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spider_replace_multi_cluster_rejected() {
        let mut meta = FakeMetadata::default();
        meta.machines
            .insert("10.0.0.1".to_string(), vec![down(25000, 7), down(25001, 8)]);
        let healer = Healer::new(Arc::new(meta), true);

        let ep = episode(vec![
            record(25000, ClusterType::TenDBCluster, MachineType::Spider, AutofixStep::ReplaceNew),
            record(25001, ClusterType::TenDBCluster, MachineType::Spider, AutofixStep::ReplaceNew),
        ]);

        let err = healer.decide(&ep).await.unwrap_err();
        assert_eq!(err.error_code(), "SPIDER_MULTI_CLUSTERS");
        assert!(err.closes_group());
    }

    #[tokio::test]
    async fn test_backend_inplace_standardizes_peer() {
        let mut meta = FakeMetadata::default();
        meta.machines
            .insert("10.0.0.1".to_string(), vec![down(20000, 11)]);
        meta.peers.insert(
            ("10.0.0.1".to_string(), 20000),
            InstanceAddr {
                ip: "10.0.0.2".to_string(),
                port: 20000,
            },
        );
        let healer = Healer::new(Arc::new(meta), true);

        let ep = episode(vec![record(
            20000,
            ClusterType::TenDBHA,
            MachineType::Backend,
            AutofixStep::InPlaceAutofix,
        )]);

        match healer.decide(&ep).await.unwrap() {
            Decision::Dispatch { tickets, .. } => {
                assert_eq!(tickets[0].kind, TicketKind::MysqlStorageStandardizeAutofix);
                assert_eq!(tickets[0].details["ip"], "10.0.0.2");
            }
            other => panic!("expected Dispatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backend_replace_chains_repair_then_replace() {
        let mut meta = FakeMetadata::default();
        meta.machines
            .insert("10.0.0.1".to_string(), vec![down(20000, 11)]);
        let healer = Healer::new(Arc::new(meta), true);

        let mut rec = record(
            20000,
            ClusterType::TenDBHA,
            MachineType::Backend,
            AutofixStep::ReplaceNew,
        );
        rec.context.master_host = "10.0.0.9".to_string();
        rec.context.master_port = 20000;
        let ep = episode(vec![rec]);

        match healer.decide(&ep).await.unwrap() {
            Decision::Dispatch { tickets, .. } => {
                assert_eq!(tickets.len(), 2);
                assert_eq!(tickets[0].kind, TicketKind::MysqlDbhaAfRepairReplicate);
                assert_eq!(tickets[1].kind, TicketKind::MysqlDbhaAfBackendReplace);
            }
            other => panic!("expected Dispatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backend_replace_without_coordinates_skips_repair() {
        let mut meta = FakeMetadata::default();
        meta.machines
            .insert("10.0.0.1".to_string(), vec![down(20000, 11)]);
        let healer = Healer::new(Arc::new(meta), true);

        let ep = episode(vec![record(
            20000,
            ClusterType::TenDBHA,
            MachineType::Backend,
            AutofixStep::ReplaceNew,
        )]);

        match healer.decide(&ep).await.unwrap() {
            Decision::Dispatch { tickets, .. } => {
                assert_eq!(tickets.len(), 1);
                assert_eq!(tickets[0].kind, TicketKind::MysqlDbhaAfBackendReplace);
            }
            other => panic!("expected Dispatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remote_replace_multi_cluster_rejected() {
        let mut meta = FakeMetadata::default();
        meta.machines
            .insert("10.0.0.1".to_string(), vec![down(26000, 7), down(26001, 8)]);
        let healer = Healer::new(Arc::new(meta), true);

        let ep = episode(vec![
            record(26000, ClusterType::TenDBCluster, MachineType::Remote, AutofixStep::ReplaceNew),
            record(26001, ClusterType::TenDBCluster, MachineType::Remote, AutofixStep::ReplaceNew),
        ]);

        let err = healer.decide(&ep).await.unwrap_err();
        assert_eq!(err.error_code(), "REMOTE_MULTI_CLUSTERS");
    }

    #[tokio::test]
    async fn test_implicit_recovery_shortcut() {
        // Instance is running again; no ticket should ever be proposed.
        let mut meta = FakeMetadata::default();
        meta.machines
            .insert("10.0.0.1".to_string(), vec![up(20000, 11)]);
        let healer = Healer::new(Arc::new(meta), true);

        let ep = episode(vec![record(
            20000,
            ClusterType::TenDBHA,
            MachineType::Backend,
            AutofixStep::InPlaceAutofix,
        )]);

        assert!(matches!(
            healer.decide(&ep).await.unwrap(),
            Decision::AlreadyRecovered
        ));
    }

    #[tokio::test]
    async fn test_implicit_recovery_disabled() {
        let mut meta = FakeMetadata::default();
        meta.machines
            .insert("10.0.0.1".to_string(), vec![up(20000, 11)]);
        meta.peers.insert(
            ("10.0.0.1".to_string(), 20000),
            InstanceAddr {
                ip: "10.0.0.2".to_string(),
                port: 20000,
            },
        );
        let healer = Healer::new(Arc::new(meta), false);

        let ep = episode(vec![record(
            20000,
            ClusterType::TenDBHA,
            MachineType::Backend,
            AutofixStep::InPlaceAutofix,
        )]);

        // With the shortcut disabled the dispatch goes ahead.
        assert!(matches!(
            healer.decide(&ep).await.unwrap(),
            Decision::Dispatch { .. }
        ));
    }

    #[tokio::test]
    async fn test_taxonomy_drift_is_unsupported() {
        let mut meta = FakeMetadata::default();
        meta.machines
            .insert("10.0.0.1".to_string(), vec![down(20000, 11)]);
        let healer = Healer::new(Arc::new(meta), true);

        // A SPIDER record on a TenDBHA cluster cannot be healed.
        let ep = episode(vec![record(
            20000,
            ClusterType::TenDBHA,
            MachineType::Spider,
            AutofixStep::InPlaceAutofix,
        )]);

        let err = healer.decide(&ep).await.unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_MACHINE_TYPE");
        assert!(err.closes_group());
    }
}
