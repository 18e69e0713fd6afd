// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! DBHA Autofix Server - MySQL auto-healing controller.
//!
//! Receives failover events from DBHA agents, persists per-instance
//! autofix records, and reconciles them into orchestrator repair tickets.

use std::sync::Arc;

use tracing::{info, warn};

use dbha_autofix_core::ingest::Ingestor;
use dbha_autofix_core::metadata::ClusterMetadata;
use dbha_autofix_core::migrations;
use dbha_autofix_core::orchestrator::Orchestrator;
use dbha_autofix_core::reconciler::Reconciler;
use dbha_autofix_core::store::{PostgresStore, RecordStore, SqliteStore};
use dbha_autofix_server::config::Config;
use dbha_autofix_server::routes::{AppState, create_router};
use dbha_autofix_server::rpc::{HttpClusterMetadata, HttpOrchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dbha_autofix_server=info,dbha_autofix_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;
    info!(
        http_addr = %config.http_addr,
        orchestrator_url = %config.orchestrator_url,
        dbmeta_url = %config.dbmeta_url,
        "Starting DBHA autofix server"
    );

    // The URL scheme picks the backend; Postgres in production, SQLite
    // for small or local deployments.
    let store: Arc<dyn RecordStore> = if config.database_url.starts_with("sqlite") {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&config.database_url)
            .await?;
        migrations::run_sqlite(&pool).await?;
        Arc::new(SqliteStore::new(pool))
    } else {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        migrations::run_postgres(&pool).await?;
        Arc::new(PostgresStore::new(pool))
    };
    info!("Database ready");

    let http_client = reqwest::Client::new();
    let orchestrator: Arc<dyn Orchestrator> = Arc::new(HttpOrchestrator::new(
        http_client.clone(),
        config.orchestrator_url.clone(),
    ));
    let metadata: Arc<dyn ClusterMetadata> = Arc::new(HttpClusterMetadata::new(
        http_client,
        config.dbmeta_url.clone(),
    ));

    let reconciler = Reconciler::new(
        store.clone(),
        orchestrator,
        metadata.clone(),
        config.reconciler_config(),
    );
    let shutdown = reconciler.shutdown_handle();
    let reconciler_task = tokio::spawn(async move { reconciler.run().await });

    let state = AppState {
        store: store.clone(),
        ingestor: Arc::new(Ingestor::new(store, metadata)),
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "Autofix server ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("Shutdown signal received");
    shutdown.notify_one();
    reconciler_task.await?;

    info!("DBHA autofix server shut down");
    Ok(())
}
