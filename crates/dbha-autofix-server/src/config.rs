// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the autofix server.

use std::net::SocketAddr;
use std::time::Duration;

use dbha_autofix_core::reconciler::ReconcilerConfig;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL; `postgres://` or `sqlite://` decides the backend.
    pub database_url: String,
    /// HTTP listen address.
    pub http_addr: SocketAddr,
    /// Base URL of the ticket orchestrator.
    pub orchestrator_url: String,
    /// Base URL of the cluster-metadata service.
    pub dbmeta_url: String,
    /// Seconds between reconcile ticks.
    pub reconcile_period_secs: u64,
    /// Minutes an incomplete episode may wait for missing events.
    pub wait_window_mins: u64,
    /// Whether self-recovered instances close without dispatching.
    pub implicit_recovery: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("AUTOFIX_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("AUTOFIX_DATABASE_URL"))?;

        let port: u16 = std::env::var("AUTOFIX_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidNumber("AUTOFIX_HTTP_PORT"))?;
        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let orchestrator_url = std::env::var("AUTOFIX_ORCHESTRATOR_URL")
            .map_err(|_| ConfigError::MissingEnvVar("AUTOFIX_ORCHESTRATOR_URL"))?;
        let dbmeta_url = std::env::var("AUTOFIX_DBMETA_URL")
            .map_err(|_| ConfigError::MissingEnvVar("AUTOFIX_DBMETA_URL"))?;

        let reconcile_period_secs: u64 = std::env::var("AUTOFIX_RECONCILE_PERIOD_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidNumber("AUTOFIX_RECONCILE_PERIOD_SECS"))?;

        let wait_window_mins: u64 = std::env::var("AUTOFIX_WAIT_WINDOW_MINS")
            .unwrap_or_else(|_| "15".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidNumber("AUTOFIX_WAIT_WINDOW_MINS"))?;

        let implicit_recovery = std::env::var("AUTOFIX_IMPLICIT_RECOVERY")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        Ok(Self {
            database_url,
            http_addr,
            orchestrator_url,
            dbmeta_url,
            reconcile_period_secs,
            wait_window_mins,
            implicit_recovery,
        })
    }

    /// The reconciler tunables this configuration implies.
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            period: Duration::from_secs(self.reconcile_period_secs),
            wait_window: Duration::from_secs(self.wait_window_mins * 60),
            implicit_recovery_enabled: self.implicit_recovery,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A numeric environment variable did not parse.
    #[error("Invalid number in environment variable: {0}")]
    InvalidNumber(&'static str),
}
