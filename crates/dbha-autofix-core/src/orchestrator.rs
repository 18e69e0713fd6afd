// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The Ticket Orchestrator egress surface.
//!
//! The orchestrator is the external service that actually executes
//! infrastructure changes. The controller only creates tickets, polls their
//! status, and cancels them; ticket payload bodies are opaque here except
//! for the cluster-id list used by single-cluster validation.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::TicketStatus;

/// The ticket kinds the healing state machine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketKind {
    /// Per-machine proxy in-place repair.
    MysqlProxyInplaceAutofix,
    /// Proxy host replacement (switch to a new proxy).
    MysqlDbhaAutofixProxySwitch,
    /// Add a replacement spider node.
    MysqlDbhaAutofixSpiderAdd,
    /// Drain and remove the failed spider node.
    MysqlDbhaAutofixSpiderReduce,
    /// Standardize a storage instance (run on the surviving peer).
    MysqlStorageStandardizeAutofix,
    /// Re-point replication before a backend replacement.
    MysqlDbhaAfRepairReplicate,
    /// Replace a failed backend host.
    MysqlDbhaAfBackendReplace,
    /// Replace a failed remote (TenDBCluster storage) host.
    MysqlDbhaAfRemoteReplace,
}

impl TicketKind {
    /// Wire representation, matching the orchestrator's ticket-type names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MysqlProxyInplaceAutofix => "MYSQL_PROXY_INPLACE_AUTOFIX",
            Self::MysqlDbhaAutofixProxySwitch => "MYSQL_DBHA_AUTOFIX_PROXY_SWITCH",
            Self::MysqlDbhaAutofixSpiderAdd => "MYSQL_DBHA_AUTOFIX_SPIDER_ADD",
            Self::MysqlDbhaAutofixSpiderReduce => "MYSQL_DBHA_AUTOFIX_SPIDER_REDUCE",
            Self::MysqlStorageStandardizeAutofix => "MYSQL_STORAGE_STANDARDIZE_AUTOFIX",
            Self::MysqlDbhaAfRepairReplicate => "MYSQL_DBHA_AF_REPAIR_REPLICATE",
            Self::MysqlDbhaAfBackendReplace => "MYSQL_DBHA_AF_BACKEND_REPLACE",
            Self::MysqlDbhaAfRemoteReplace => "MYSQL_DBHA_AF_REMOTE_REPLACE",
        }
    }
}

impl std::fmt::Display for TicketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ticket creation request.
///
/// `details` is the kind-specific payload dict; the controller treats it as
/// opaque apart from `cluster_ids`.
#[derive(Debug, Clone)]
pub struct TicketRequest {
    /// Which operation the orchestrator should run.
    pub kind: TicketKind,
    /// Business the affected clusters belong to.
    pub bk_biz_id: i64,
    /// Clusters the ticket touches; single-cluster kinds must carry
    /// exactly one entry.
    pub cluster_ids: Vec<i64>,
    /// Kind-specific payload body.
    pub details: serde_json::Value,
}

/// Narrow RPC surface of the Ticket Orchestrator.
///
/// The concrete client lives outside the core crate; tests use an
/// in-memory fake. The orchestrator owns ticket state: the controller
/// never fabricates terminal statuses, it only copies what `poll_ticket`
/// reports.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Create a ticket; returns the orchestrator-assigned ticket id (> 0).
    async fn create_ticket(&self, request: &TicketRequest) -> Result<i64>;

    /// Current status of a ticket.
    async fn poll_ticket(&self, ticket_id: i64) -> Result<TicketStatus>;

    /// Ask the orchestrator to cancel a ticket. Fire-and-forget: the
    /// terminal status is only written once observed via `poll_ticket`.
    async fn cancel_ticket(&self, ticket_id: i64) -> Result<()>;
}
