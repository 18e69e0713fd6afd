// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Record store interfaces and backends.
//!
//! The store exclusively owns `autofix_records` rows. Mutations are small,
//! synchronous SQL statements; the dispatch claim is the one compound
//! operation and is transactional per episode.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AutofixError, Result};
use crate::model::{
    AutofixRecord, AutofixStep, ClusterType, MachineType, MasterContext, NewAutofixRecord, Phase,
    TicketStatus, UpsertOutcome,
};

/// Raw `autofix_records` row; enums land as strings and are decoded in
/// [`AutofixRecord::try_from`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecordRow {
    /// Primary key.
    pub id: i64,
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
    /// Cluster id.
    pub cluster_id: i64,
    /// Cluster immutable domain.
    pub immute_domain: String,
    /// Cluster type string.
    pub cluster_type: String,
    /// Machine type string.
    pub machine_type: String,
    /// Instance role.
    pub instance_role: String,
    /// Event creation time.
    pub event_create_time: DateTime<Utc>,
    /// Reporting GM node.
    pub dbha_gm_ip: String,
    /// Master host at failover time.
    pub master_host: String,
    /// Master port at failover time.
    pub master_port: i32,
    /// Binlog file.
    pub master_log_file: String,
    /// Binlog position.
    pub master_log_pos: i64,
    /// Current step string.
    pub current_step: String,
    /// In-place ticket id.
    pub inplace_ticket_id: i64,
    /// In-place status string.
    pub inplace_ticket_status: String,
    /// Replace ticket id.
    pub replace_ticket_id: i64,
    /// Replace status string.
    pub replace_ticket_status: String,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for AutofixRecord {
    type Error = AutofixError;

    fn try_from(row: RecordRow) -> Result<Self> {
        Ok(AutofixRecord {
            id: row.id,
            check_id: row.check_id,
            ip: row.ip,
            port: row.port,
            bk_cloud_id: row.bk_cloud_id,
            bk_biz_id: row.bk_biz_id,
            cluster_id: row.cluster_id,
            immute_domain: row.immute_domain,
            cluster_type: ClusterType::from_str(&row.cluster_type)?,
            machine_type: MachineType::from_str(&row.machine_type)?,
            instance_role: row.instance_role,
            event_create_time: row.event_create_time,
            context: MasterContext {
                dbha_gm_ip: row.dbha_gm_ip,
                master_host: row.master_host,
                master_port: row.master_port,
                master_log_file: row.master_log_file,
                master_log_pos: row.master_log_pos,
            },
            current_step: AutofixStep::from_str(&row.current_step)?,
            inplace_ticket_id: row.inplace_ticket_id,
            inplace_ticket_status: TicketStatus::from_str(&row.inplace_ticket_status)?,
            replace_ticket_id: row.replace_ticket_id,
            replace_ticket_status: TicketStatus::from_str(&row.replace_ticket_status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) fn decode_rows(rows: Vec<RecordRow>) -> Result<Vec<AutofixRecord>> {
    rows.into_iter().map(AutofixRecord::try_from).collect()
}

/// Columns addressed by a phase. Used to build phase-specific statements
/// from one template instead of duplicating every query.
pub(crate) fn phase_columns(phase: Phase) -> (&'static str, &'static str) {
    match phase {
        Phase::InPlace => ("inplace_ticket_id", "inplace_ticket_status"),
        Phase::Replace => ("replace_ticket_id", "replace_ticket_status"),
    }
}

/// Record store interface used by the ingestor, dispatcher and reconciler.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Upsert by `(check_id, ip, port)`. Inserts with fresh progress
    /// defaults, or refreshes event context on an existing row without
    /// touching progress fields.
    async fn upsert_record(&self, new: &NewAutofixRecord) -> Result<UpsertOutcome>;

    /// Fetch one record by its identity triple.
    async fn get_record(&self, check_id: i64, ip: &str, port: i32)
    -> Result<Option<AutofixRecord>>;

    /// All records with outstanding work in either phase.
    async fn list_open_records(&self) -> Result<Vec<AutofixRecord>>;

    /// Every record, newest first. Read surface for operators.
    async fn list_all_records(&self, limit: i64) -> Result<Vec<AutofixRecord>>;

    /// Write a phase status. Monotone-terminal statuses (SUCCEEDED,
    /// TERMINATED, REVOKED) are never overwritten; such writes are
    /// silently dropped.
    async fn set_phase_status(&self, id: i64, phase: Phase, status: TicketStatus) -> Result<()>;

    /// Move a record to the given step.
    async fn set_current_step(&self, id: i64, step: AutofixStep) -> Result<()>;

    /// Claim the dispatch for a group: writes `{phase}_ticket_id` and
    /// PENDING on every row that still satisfies the idempotency
    /// precondition (`status = UNSUBMITTED AND ticket_id = 0`), under a
    /// row lock where the backend supports one. Returns the number of
    /// rows claimed; fewer than `ids.len()` means a lost race.
    async fn claim_dispatch(&self, ids: &[i64], phase: Phase, ticket_id: i64) -> Result<u64>;

    /// Database liveness probe.
    async fn health_check(&self) -> Result<bool>;
}
