// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! DBHA Autofix Server - HTTP edge of the auto-healing controller.
//!
//! Hosts the event intake and record inspection API, owns the database
//! pool, and runs the reconciler as a background task. The core healing
//! logic lives in [`dbha_autofix_core`].
//!
//! # Endpoints
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | `POST` | `/api/v1/dbha/events` | Batch of DBHA failover events |
//! | `GET` | `/api/v1/records` | Inspect autofix records (`?open_only=true`, `?limit=N`) |
//! | `GET` | `/health` | Liveness + database check |

#![deny(missing_docs)]

pub mod config;
pub mod routes;
pub mod rpc;

pub use config::{Config, ConfigError};
pub use routes::{AppState, create_router};
pub use rpc::{HttpClusterMetadata, HttpOrchestrator};
