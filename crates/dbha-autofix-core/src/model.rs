// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Core value types: cluster/machine taxonomy, ticket statuses, healing
//! steps, and the authoritative `AutofixRecord` row.
//!
//! Statuses are persisted as SCREAMING_SNAKE_CASE strings; the enums here
//! are the only in-process representation. Ticket ids are 64-bit integers
//! where zero means "no ticket".

use chrono::{DateTime, Utc};

/// Error returned when a persisted or inbound string does not map to a
/// known enum value.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind} value: '{value}'")]
pub struct UnknownEnumValue {
    /// Which enum failed to parse (e.g. "machine_type").
    pub kind: &'static str,
    /// The offending string.
    pub value: String,
}

/// Cluster topology families managed by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterType {
    /// Single-node MySQL.
    TenDBSingle,
    /// Classic HA pair (proxy + backend).
    TenDBHA,
    /// Spider-sharded cluster (spider + remote).
    TenDBCluster,
}

impl ClusterType {
    /// Wire/storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TenDBSingle => "TenDBSingle",
            Self::TenDBHA => "TenDBHA",
            Self::TenDBCluster => "TenDBCluster",
        }
    }

    /// Machine types that may legally appear in a cluster of this type.
    pub fn legal_machine_types(&self) -> &'static [MachineType] {
        match self {
            Self::TenDBSingle => &[MachineType::Single],
            Self::TenDBHA => &[MachineType::Proxy, MachineType::Backend],
            Self::TenDBCluster => &[MachineType::Spider, MachineType::Remote],
        }
    }
}

impl std::str::FromStr for ClusterType {
    type Err = UnknownEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TenDBSingle" => Ok(Self::TenDBSingle),
            "TenDBHA" => Ok(Self::TenDBHA),
            "TenDBCluster" => Ok(Self::TenDBCluster),
            other => Err(UnknownEnumValue {
                kind: "cluster_type",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ClusterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of the failed machine; selects the healing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineType {
    /// TenDBHA access layer.
    Proxy,
    /// TenDBCluster access layer.
    Spider,
    /// TenDBHA storage backend.
    Backend,
    /// TenDBCluster storage shard.
    Remote,
    /// TenDBSingle storage node.
    Single,
}

impl MachineType {
    /// Wire/storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proxy => "PROXY",
            Self::Spider => "SPIDER",
            Self::Backend => "BACKEND",
            Self::Remote => "REMOTE",
            Self::Single => "SINGLE",
        }
    }

    /// Whether this machine type hosts storage instances (standardize
    /// targets the replication peer for these).
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Backend | Self::Remote | Self::Single)
    }
}

impl std::str::FromStr for MachineType {
    type Err = UnknownEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROXY" => Ok(Self::Proxy),
            "SPIDER" => Ok(Self::Spider),
            "BACKEND" => Ok(Self::Backend),
            "REMOTE" => Ok(Self::Remote),
            "SINGLE" => Ok(Self::Single),
            other => Err(UnknownEnumValue {
                kind: "machine_type",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for MachineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-phase ticket status.
///
/// The observable sequence within a phase is always a prefix of
/// `UNSUBMITTED -> PENDING -> RUNNING -> terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketStatus {
    /// No ticket has been created for this phase yet.
    Unsubmitted,
    /// The phase was skipped (not needed, or the episode closed early).
    Skipped,
    /// Ticket created, not yet started by the orchestrator.
    Pending,
    /// Orchestrator is executing the ticket.
    Running,
    /// Ticket finished successfully.
    Succeeded,
    /// Ticket finished with an error.
    Failed,
    /// Ticket was revoked upstream.
    Revoked,
    /// The controller terminated the phase (malformed group, implicit
    /// recovery, manual intervention).
    Terminated,
    /// The phase timed out (ticket timeout, or the episode never became
    /// complete within the wait window).
    Timeout,
}

impl TicketStatus {
    /// Wire/storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsubmitted => "UNSUBMITTED",
            Self::Skipped => "SKIPPED",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Revoked => "REVOKED",
            Self::Terminated => "TERMINATED",
            Self::Timeout => "TIMEOUT",
        }
    }

    /// The phase still has work outstanding.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Unsubmitted | Self::Pending | Self::Running)
    }

    /// The phase will never progress again.
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Statuses that must never be overwritten once written.
    pub fn is_monotone_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Terminated | Self::Revoked)
    }

    /// The phase has a live ticket the orchestrator may still act on.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = UnknownEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNSUBMITTED" => Ok(Self::Unsubmitted),
            "SKIPPED" => Ok(Self::Skipped),
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            "REVOKED" => Ok(Self::Revoked),
            "TERMINATED" => Ok(Self::Terminated),
            "TIMEOUT" => Ok(Self::Timeout),
            other => Err(UnknownEnumValue {
                kind: "ticket_status",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which recovery phase a record is currently working through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutofixStep {
    /// Restore the failed instance on its existing host.
    InPlaceAutofix,
    /// Provision a new host and cut over.
    ReplaceNew,
}

impl AutofixStep {
    /// Wire/storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InPlaceAutofix => "IN_PLACE_AUTOFIX",
            Self::ReplaceNew => "REPLACE_NEW",
        }
    }

    /// The ticket column pair this step writes to.
    pub fn phase(&self) -> Phase {
        match self {
            Self::InPlaceAutofix => Phase::InPlace,
            Self::ReplaceNew => Phase::Replace,
        }
    }
}

impl std::str::FromStr for AutofixStep {
    type Err = UnknownEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PLACE_AUTOFIX" => Ok(Self::InPlaceAutofix),
            "REPLACE_NEW" => Ok(Self::ReplaceNew),
            other => Err(UnknownEnumValue {
                kind: "current_step",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for AutofixStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects one of the two ticket column pairs on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// `inplace_ticket_id` / `inplace_ticket_status`.
    InPlace,
    /// `replace_ticket_id` / `replace_ticket_status`.
    Replace,
}

impl Phase {
    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InPlace => "inplace",
            Self::Replace => "replace",
        }
    }

    /// The other phase.
    pub fn other(&self) -> Phase {
        match self {
            Self::InPlace => Self::Replace,
            Self::Replace => Self::InPlace,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Original master coordinates reported by the HA agent, used by the
/// optional replication repair during backend replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterContext {
    /// GM node of the HA agent that reported the event.
    pub dbha_gm_ip: String,
    /// Master host at failover time (empty when unknown).
    pub master_host: String,
    /// Master port at failover time.
    pub master_port: i32,
    /// Binlog file position.
    pub master_log_file: String,
    /// Binlog offset position.
    pub master_log_pos: i64,
}

impl MasterContext {
    /// Whether the HA agent supplied usable replication coordinates.
    pub fn has_master_coordinates(&self) -> bool {
        !self.master_host.is_empty() && self.master_port > 0
    }
}

/// The authoritative autofix row: one per instance affected by one
/// failover event, unique on `(check_id, ip, port)`.
#[derive(Debug, Clone)]
pub struct AutofixRecord {
    /// Database primary key.
    pub id: i64,
    /// Failover event id assigned by the HA agent.
    pub check_id: i64,
    /// IP of the failed instance.
    pub ip: String,
    /// Port of the failed instance.
    pub port: i32,
    /// Cloud area the machine lives in.
    pub bk_cloud_id: i64,
    /// Business the cluster belongs to.
    pub bk_biz_id: i64,
    /// Cluster the instance belongs to.
    pub cluster_id: i64,
    /// Immutable domain of the cluster.
    pub immute_domain: String,
    /// Cluster topology family.
    pub cluster_type: ClusterType,
    /// Role of the failed machine.
    pub machine_type: MachineType,
    /// Role of the failed instance within the cluster.
    pub instance_role: String,
    /// When the HA agent created the failover event.
    pub event_create_time: DateTime<Utc>,
    /// Replication context captured at failover time.
    pub context: MasterContext,
    /// Which recovery phase the record is working through.
    pub current_step: AutofixStep,
    /// In-place phase ticket id (0 = none).
    pub inplace_ticket_id: i64,
    /// In-place phase status.
    pub inplace_ticket_status: TicketStatus,
    /// Replace phase ticket id (0 = none).
    pub replace_ticket_id: i64,
    /// Replace phase status.
    pub replace_ticket_status: TicketStatus,
    /// When the row was inserted.
    pub created_at: DateTime<Utc>,
    /// When the row was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl AutofixRecord {
    /// Status of the given phase.
    pub fn phase_status(&self, phase: Phase) -> TicketStatus {
        match phase {
            Phase::InPlace => self.inplace_ticket_status,
            Phase::Replace => self.replace_ticket_status,
        }
    }

    /// Ticket id of the given phase (0 = none).
    pub fn phase_ticket_id(&self, phase: Phase) -> i64 {
        match phase {
            Phase::InPlace => self.inplace_ticket_id,
            Phase::Replace => self.replace_ticket_id,
        }
    }

    /// Set the in-memory status of the given phase. Persisting is the
    /// store's job; this keeps a loaded record in step with a write.
    pub fn set_phase_status(&mut self, phase: Phase, status: TicketStatus) {
        match phase {
            Phase::InPlace => self.inplace_ticket_status = status,
            Phase::Replace => self.replace_ticket_status = status,
        }
    }

    /// The phase selected by `current_step`.
    pub fn current_phase(&self) -> Phase {
        self.current_step.phase()
    }

    /// Status of the current phase.
    pub fn current_status(&self) -> TicketStatus {
        self.phase_status(self.current_phase())
    }

    /// Ticket id of the current phase.
    pub fn current_ticket_id(&self) -> i64 {
        self.phase_ticket_id(self.current_phase())
    }

    /// A record is closed when neither phase has outstanding work.
    pub fn is_closed(&self) -> bool {
        self.inplace_ticket_status.is_terminal() && self.replace_ticket_status.is_terminal()
    }

    /// Ticket-id / status coherence for one phase:
    /// `status = UNSUBMITTED <=> ticket_id = 0`.
    pub fn phase_coherent(&self, phase: Phase) -> bool {
        let status = self.phase_status(phase);
        let ticket_id = self.phase_ticket_id(phase);
        match status {
            TicketStatus::Unsubmitted => ticket_id == 0,
            // SKIPPED, TERMINATED and TIMEOUT can be written by the
            // controller without a ticket ever existing (skipped phases,
            // malformed groups, wait-window expiry), so either id is fine.
            TicketStatus::Skipped | TicketStatus::Terminated | TicketStatus::Timeout => true,
            _ => ticket_id > 0,
        }
    }

    /// Coherence across both phases.
    pub fn is_coherent(&self) -> bool {
        self.phase_coherent(Phase::InPlace) && self.phase_coherent(Phase::Replace)
    }

    /// Group key shared by all records of one healing episode.
    pub fn group_key(&self) -> (i64, i64, String) {
        (self.check_id, self.bk_cloud_id, self.ip.clone())
    }
}

/// Insert payload produced by the event ingestor.
#[derive(Debug, Clone)]
pub struct NewAutofixRecord {
    /// Failover event id.
    pub check_id: i64,
    /// Failed instance IP.
    pub ip: String,
    /// Failed instance port.
    pub port: i32,
    /// Cloud area.
    pub bk_cloud_id: i64,
    /// Business id.
    pub bk_biz_id: i64,
    /// Resolved cluster id.
    pub cluster_id: i64,
    /// Cluster immutable domain.
    pub immute_domain: String,
    /// Cluster topology family.
    pub cluster_type: ClusterType,
    /// Machine role.
    pub machine_type: MachineType,
    /// Instance role.
    pub instance_role: String,
    /// Event creation time (UTC).
    pub event_create_time: DateTime<Utc>,
    /// Replication context at failover time.
    pub context: MasterContext,
}

/// Result of an upsert by `(check_id, ip, port)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new row was created with fresh progress defaults.
    Inserted,
    /// An existing row had its event context refreshed; progress untouched.
    Refreshed,
}
