// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP surface: event intake, record inspection, health.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use dbha_autofix_core::error::AutofixError;
use dbha_autofix_core::ingest::{HaEvent, IngestReport, Ingestor};
use dbha_autofix_core::model::AutofixRecord;
use dbha_autofix_core::store::RecordStore;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Record store.
    pub store: Arc<dyn RecordStore>,
    /// Event ingestor.
    pub ingestor: Arc<Ingestor>,
}

/// Build the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/dbha/events", post(report_events))
        .route("/api/v1/records", get(list_records))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// JSON error payload.
#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// An `AutofixError` mapped onto an HTTP response.
pub struct ApiError(AutofixError);

impl From<AutofixError> for ApiError {
    fn from(err: AutofixError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AutofixError::MalformedEvent { .. } => StatusCode::BAD_REQUEST,
            AutofixError::Rpc { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error_code = self.0.error_code(), error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            code: self.0.error_code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn report_events(
    State(state): State<AppState>,
    Json(events): Json<Vec<HaEvent>>,
) -> Result<Json<IngestReport>, ApiError> {
    let report = state.ingestor.ingest(&events).await?;
    Ok(Json(report))
}

/// One record as exposed over the API.
#[derive(Serialize)]
pub struct RecordView {
    /// Row id.
    pub id: i64,
    /// Failover event id.
    pub check_id: i64,
    /// Failed instance IP.
    pub ip: String,
    /// Failed instance port.
    pub port: i32,
    /// Cloud area.
    pub bk_cloud_id: i64,
    /// Business the cluster belongs to.
    pub bk_biz_id: i64,
    /// Resolved cluster id.
    pub cluster_id: i64,
    /// Cluster entry domain.
    pub immute_domain: String,
    /// Topology family.
    pub cluster_type: String,
    /// Machine role.
    pub machine_type: String,
    /// Role of the failed instance.
    pub instance_role: String,
    /// When the HA agent observed the failure.
    pub event_create_time: chrono::DateTime<chrono::Utc>,
    /// Which phase is active.
    pub current_step: String,
    /// In-place phase ticket id (0 = none).
    pub inplace_ticket_id: i64,
    /// In-place phase status.
    pub inplace_ticket_status: String,
    /// Replace phase ticket id (0 = none).
    pub replace_ticket_id: i64,
    /// Replace phase status.
    pub replace_ticket_status: String,
    /// Last update time.
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<AutofixRecord> for RecordView {
    fn from(r: AutofixRecord) -> Self {
        Self {
            id: r.id,
            check_id: r.check_id,
            ip: r.ip,
            port: r.port,
            bk_cloud_id: r.bk_cloud_id,
            bk_biz_id: r.bk_biz_id,
            cluster_id: r.cluster_id,
            immute_domain: r.immute_domain,
            cluster_type: r.cluster_type.as_str().to_string(),
            machine_type: r.machine_type.as_str().to_string(),
            instance_role: r.instance_role,
            event_create_time: r.event_create_time,
            current_step: r.current_step.as_str().to_string(),
            inplace_ticket_id: r.inplace_ticket_id,
            inplace_ticket_status: r.inplace_ticket_status.as_str().to_string(),
            replace_ticket_id: r.replace_ticket_id,
            replace_ticket_status: r.replace_ticket_status.as_str().to_string(),
            updated_at: r.updated_at,
        }
    }
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    open_only: bool,
}

fn default_limit() -> i64 {
    100
}

async fn list_records(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<RecordView>>, ApiError> {
    let records = if params.open_only {
        state.store.list_open_records().await?
    } else {
        state.store.list_all_records(params.limit.clamp(1, 1000)).await?
    };
    Ok(Json(records.into_iter().map(RecordView::from).collect()))
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

async fn health(State(state): State<AppState>) -> Result<Json<Health>, ApiError> {
    state.store.health_check().await?;
    Ok(Json(Health { status: "ok" }))
}
