// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HA event ingress: validation and upsert of inbound failover events.
//!
//! The ingestor is a pure sink. Each batch item is validated independently;
//! a malformed item is rejected with a reason and the batch continues.
//! Accepted items upsert by `(check_id, ip, port)`: re-reports refresh the
//! event context but never touch progress fields.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AutofixError, Result};
use crate::metadata::ClusterMetadata;
use crate::model::{
    ClusterType, MachineType, MasterContext, NewAutofixRecord, UpsertOutcome,
};
use crate::store::RecordStore;

/// Failover context reported by the HA agent alongside an event.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EventContext {
    /// GM node of the HA agent that reported the event.
    #[serde(default)]
    pub dbha_gm_ip: String,
    /// Master host at failover time.
    #[serde(default)]
    pub master_host: String,
    /// Master port at failover time.
    #[serde(default)]
    pub master_port: i32,
    /// Binlog file position.
    #[serde(default)]
    pub master_log_file: String,
    /// Binlog offset position.
    #[serde(default)]
    pub master_log_pos: i64,
}

/// One inbound HA failover event.
///
/// Enum-valued and time fields arrive as strings so a bad value rejects
/// only its own item, not the whole batch.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HaEvent {
    /// Cloud area of the machine.
    pub bk_cloud_id: i64,
    /// Business the cluster belongs to.
    pub bk_biz_id: i64,
    /// Failover event id assigned by the HA agent.
    pub check_id: i64,
    /// Immutable domain of the affected cluster.
    pub immute_domain: String,
    /// Cluster topology family.
    pub cluster_type: String,
    /// Role of the failed machine.
    pub machine_type: String,
    /// Role of the failed instance.
    pub instance_role: String,
    /// Failed instance IP.
    pub ip: String,
    /// Failed instance port.
    pub port: i32,
    /// RFC3339 event creation time.
    pub event_create_time: String,
    /// Failover context.
    #[serde(default)]
    pub context: EventContext,
}

/// A rejected batch item.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedEvent {
    /// Index of the item within the batch.
    pub index: usize,
    /// IP from the item, for log correlation.
    pub ip: String,
    /// Port from the item.
    pub port: i32,
    /// Stable error code.
    pub code: &'static str,
    /// Human-readable reason.
    pub message: String,
}

/// Per-batch ingestion report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Items that created a new record.
    pub accepted: usize,
    /// Items that refreshed an existing record.
    pub refreshed: usize,
    /// Items rejected by validation.
    pub rejected: Vec<RejectedEvent>,
}

/// Validates inbound HA events and upserts them into the record store.
pub struct Ingestor {
    store: Arc<dyn RecordStore>,
    metadata: Arc<dyn ClusterMetadata>,
}

impl Ingestor {
    /// Create an ingestor over the given store and metadata view.
    pub fn new(store: Arc<dyn RecordStore>, metadata: Arc<dyn ClusterMetadata>) -> Self {
        Self { store, metadata }
    }

    /// Ingest a batch. Malformed items are reported and skipped; transient
    /// store/metadata failures abort the batch so the HA agent can retry.
    pub async fn ingest(&self, events: &[HaEvent]) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for (index, event) in events.iter().enumerate() {
            match self.validate(event).await {
                Ok(new_record) => match self.store.upsert_record(&new_record).await? {
                    UpsertOutcome::Inserted => {
                        debug!(
                            check_id = new_record.check_id,
                            ip = %new_record.ip,
                            port = new_record.port,
                            "Autofix record created"
                        );
                        report.accepted += 1;
                    }
                    UpsertOutcome::Refreshed => {
                        debug!(
                            check_id = new_record.check_id,
                            ip = %new_record.ip,
                            port = new_record.port,
                            "Autofix record refreshed (re-report)"
                        );
                        report.refreshed += 1;
                    }
                },
                Err(err @ AutofixError::MalformedEvent { .. }) => {
                    warn!(
                        index,
                        ip = %event.ip,
                        port = event.port,
                        error = %err,
                        "Rejecting malformed HA event"
                    );
                    report.rejected.push(RejectedEvent {
                        index,
                        ip: event.ip.clone(),
                        port: event.port,
                        code: err.error_code(),
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        Ok(report)
    }

    /// Validate one item and build its insert payload.
    async fn validate(&self, event: &HaEvent) -> Result<NewAutofixRecord> {
        if event.port <= 0 {
            return Err(AutofixError::MalformedEvent {
                field: "port",
                message: format!("port must be positive, got {}", event.port),
            });
        }

        if event.ip.parse::<std::net::IpAddr>().is_err() {
            return Err(AutofixError::MalformedEvent {
                field: "ip",
                message: format!("'{}' is not a v4/v6 IP literal", event.ip),
            });
        }

        let cluster_type =
            ClusterType::from_str(&event.cluster_type).map_err(|e| AutofixError::MalformedEvent {
                field: "cluster_type",
                message: e.to_string(),
            })?;

        let machine_type =
            MachineType::from_str(&event.machine_type).map_err(|e| AutofixError::MalformedEvent {
                field: "machine_type",
                message: e.to_string(),
            })?;

        if !cluster_type.legal_machine_types().contains(&machine_type) {
            return Err(AutofixError::MalformedEvent {
                field: "machine_type",
                message: format!(
                    "machine type {} is not legal for cluster type {}",
                    machine_type, cluster_type
                ),
            });
        }

        let event_create_time: DateTime<Utc> =
            DateTime::parse_from_rfc3339(&event.event_create_time)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| AutofixError::MalformedEvent {
                    field: "event_create_time",
                    message: format!("'{}' is not RFC3339: {}", event.event_create_time, e),
                })?;

        let cluster = self
            .metadata
            .resolve_cluster(event.bk_cloud_id, event.bk_biz_id, &event.immute_domain)
            .await?
            .ok_or_else(|| AutofixError::MalformedEvent {
                field: "immute_domain",
                message: format!(
                    "({}, {}, '{}') does not resolve to a known cluster",
                    event.bk_cloud_id, event.bk_biz_id, event.immute_domain
                ),
            })?;

        if cluster.cluster_type != cluster_type {
            return Err(AutofixError::MalformedEvent {
                field: "cluster_type",
                message: format!(
                    "event says {} but cluster '{}' is {}",
                    cluster_type, event.immute_domain, cluster.cluster_type
                ),
            });
        }

        Ok(NewAutofixRecord {
            check_id: event.check_id,
            ip: event.ip.clone(),
            port: event.port,
            bk_cloud_id: event.bk_cloud_id,
            bk_biz_id: event.bk_biz_id,
            cluster_id: cluster.cluster_id,
            immute_domain: event.immute_domain.clone(),
            cluster_type,
            machine_type,
            instance_role: event.instance_role.clone(),
            event_create_time,
            context: MasterContext {
                dbha_gm_ip: event.context.dbha_gm_ip.clone(),
                master_host: event.context.master_host.clone(),
                master_port: event.context.master_port,
                master_log_file: event.context.master_log_file.clone(),
                master_log_pos: event.context.master_log_pos,
            },
        })
    }
}
