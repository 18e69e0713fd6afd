// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP clients for the ticket orchestrator and the cluster-metadata
//! service.
//!
//! Both services speak plain JSON. Transport failures and unexpected
//! status codes surface as [`AutofixError::Rpc`], which the reconciler
//! treats as transient and retries on the next tick.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use dbha_autofix_core::error::{AutofixError, Result};
use dbha_autofix_core::metadata::{
    ClusterInfo, ClusterMetadata, InstanceAddr, InstanceInfo, InstancePhase, InstanceStatus,
};
use dbha_autofix_core::model::{ClusterType, TicketStatus};
use dbha_autofix_core::orchestrator::{Orchestrator, TicketRequest};

fn rpc_error(service: &'static str, details: impl ToString) -> AutofixError {
    AutofixError::Rpc {
        service,
        details: details.to_string(),
    }
}

/// Ticket orchestrator client.
pub struct HttpOrchestrator {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct TicketCreated {
    ticket_id: i64,
}

#[derive(Deserialize)]
struct TicketState {
    status: String,
}

impl HttpOrchestrator {
    /// Create a client for the orchestrator at `base_url`.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Orchestrator for HttpOrchestrator {
    async fn create_ticket(&self, request: &TicketRequest) -> Result<i64> {
        let body = serde_json::json!({
            "ticket_type": request.kind.as_str(),
            "bk_biz_id": request.bk_biz_id,
            "cluster_ids": request.cluster_ids,
            "details": request.details,
        });
        let response = self
            .client
            .post(format!("{}/api/v1/tickets", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| rpc_error("orchestrator", e))?;
        if !response.status().is_success() {
            return Err(rpc_error(
                "orchestrator",
                format!("create ticket returned {}", response.status()),
            ));
        }
        let created: TicketCreated = response
            .json()
            .await
            .map_err(|e| rpc_error("orchestrator", e))?;
        Ok(created.ticket_id)
    }

    async fn poll_ticket(&self, ticket_id: i64) -> Result<TicketStatus> {
        let response = self
            .client
            .get(format!("{}/api/v1/tickets/{}", self.base_url, ticket_id))
            .send()
            .await
            .map_err(|e| rpc_error("orchestrator", e))?;
        if !response.status().is_success() {
            return Err(rpc_error(
                "orchestrator",
                format!("poll ticket {} returned {}", ticket_id, response.status()),
            ));
        }
        let state: TicketState = response
            .json()
            .await
            .map_err(|e| rpc_error("orchestrator", e))?;
        let status: TicketStatus = state
            .status
            .parse()
            .map_err(|e: dbha_autofix_core::model::UnknownEnumValue| {
                rpc_error("orchestrator", e)
            })?;
        debug!(ticket_id, status = %status, "Polled ticket");
        Ok(status)
    }

    async fn cancel_ticket(&self, ticket_id: i64) -> Result<()> {
        let response = self
            .client
            .post(format!(
                "{}/api/v1/tickets/{}/revoke",
                self.base_url, ticket_id
            ))
            .send()
            .await
            .map_err(|e| rpc_error("orchestrator", e))?;
        if !response.status().is_success() {
            return Err(rpc_error(
                "orchestrator",
                format!("revoke ticket {} returned {}", ticket_id, response.status()),
            ));
        }
        Ok(())
    }
}

/// Cluster-metadata service client.
pub struct HttpClusterMetadata {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ClusterDto {
    cluster_id: i64,
    immute_domain: String,
    cluster_type: String,
}

#[derive(Deserialize)]
struct InstanceDto {
    port: i32,
    cluster_id: i64,
    status: String,
    phase: String,
}

#[derive(Deserialize)]
struct PeerDto {
    ip: String,
    port: i32,
}

impl HttpClusterMetadata {
    /// Create a client for the metadata service at `base_url`.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

fn parse_instance(dto: InstanceDto) -> Result<InstanceInfo> {
    let status = match dto.status.as_str() {
        "running" => InstanceStatus::Running,
        "unavailable" => InstanceStatus::Unavailable,
        other => return Err(rpc_error("dbmeta", format!("unknown instance status '{other}'"))),
    };
    let phase = match dto.phase.as_str() {
        "online" => InstancePhase::Online,
        "offline" => InstancePhase::Offline,
        other => return Err(rpc_error("dbmeta", format!("unknown instance phase '{other}'"))),
    };
    Ok(InstanceInfo {
        port: dto.port,
        cluster_id: dto.cluster_id,
        status,
        phase,
    })
}

#[async_trait]
impl ClusterMetadata for HttpClusterMetadata {
    async fn resolve_cluster(
        &self,
        bk_cloud_id: i64,
        bk_biz_id: i64,
        immute_domain: &str,
    ) -> Result<Option<ClusterInfo>> {
        let response = self
            .client
            .get(format!("{}/api/v1/clusters", self.base_url))
            .query(&[
                ("bk_cloud_id", bk_cloud_id.to_string()),
                ("bk_biz_id", bk_biz_id.to_string()),
                ("immute_domain", immute_domain.to_string()),
            ])
            .send()
            .await
            .map_err(|e| rpc_error("dbmeta", e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(rpc_error(
                "dbmeta",
                format!("resolve cluster returned {}", response.status()),
            ));
        }
        let dto: ClusterDto = response.json().await.map_err(|e| rpc_error("dbmeta", e))?;
        let cluster_type: ClusterType = dto
            .cluster_type
            .parse()
            .map_err(|e: dbha_autofix_core::model::UnknownEnumValue| rpc_error("dbmeta", e))?;
        Ok(Some(ClusterInfo {
            cluster_id: dto.cluster_id,
            immute_domain: dto.immute_domain,
            cluster_type,
        }))
    }

    async fn machine_instances(&self, bk_cloud_id: i64, ip: &str) -> Result<Vec<InstanceInfo>> {
        let response = self
            .client
            .get(format!("{}/api/v1/machines/{}/instances", self.base_url, ip))
            .query(&[("bk_cloud_id", bk_cloud_id.to_string())])
            .send()
            .await
            .map_err(|e| rpc_error("dbmeta", e))?;
        if !response.status().is_success() {
            return Err(rpc_error(
                "dbmeta",
                format!("machine census returned {}", response.status()),
            ));
        }
        let dtos: Vec<InstanceDto> = response.json().await.map_err(|e| rpc_error("dbmeta", e))?;
        dtos.into_iter().map(parse_instance).collect()
    }

    async fn replication_peer(
        &self,
        bk_cloud_id: i64,
        ip: &str,
        port: i32,
    ) -> Result<Option<InstanceAddr>> {
        let response = self
            .client
            .get(format!(
                "{}/api/v1/instances/{}/{}/peer",
                self.base_url, ip, port
            ))
            .query(&[("bk_cloud_id", bk_cloud_id.to_string())])
            .send()
            .await
            .map_err(|e| rpc_error("dbmeta", e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(rpc_error(
                "dbmeta",
                format!("peer lookup returned {}", response.status()),
            ));
        }
        let dto: PeerDto = response.json().await.map_err(|e| rpc_error("dbmeta", e))?;
        Ok(Some(InstanceAddr {
            ip: dto.ip,
            port: dto.port,
        }))
    }
}
