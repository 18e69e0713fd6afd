// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! DBHA Autofix Core - MySQL Auto-Healing Controller
//!
//! This crate turns DBHA failover events into orchestrator repair tickets
//! and tracks them to completion. Every failed instance gets a durable
//! record; a periodic reconciler drives each record through a two-phase
//! healing state machine (fix in place, then replace the host) until both
//! phases are terminal.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          DBHA Agents                             │
//! │                (report failover events per instance)             │
//! └──────────────────────────────────────────────────────────────────┘
//!                                 │ events
//!                                 ▼
//! ┌──────────────┐      ┌──────────────────┐      ┌─────────────────┐
//! │   Ingestor   │─────▶│   autofix_records │◀────│   Reconciler    │
//! │  (validate,  │      │  (SQLite/Postgres)│     │  (60s tick)     │
//! │   upsert)    │      └──────────────────┘      └─────────────────┘
//! └──────────────┘                                   │          │
//!        │                                           ▼          ▼
//!        │ resolve                            ┌───────────┐ ┌────────────┐
//!        ▼                                    │  Grouper  │ │ Dispatcher │
//! ┌──────────────┐                            │ + Healer  │ │  (tickets) │
//! │ Cluster      │◀───────────────────────────┴───────────┘ └────────────┘
//! │ Metadata     │                                               │
//! └──────────────┘                                               ▼
//!                                                      ┌──────────────────┐
//!                                                      │   Orchestrator   │
//!                                                      │ (ticket platform)│
//!                                                      └──────────────────┘
//! ```
//!
//! # Healing state machine
//!
//! A record carries one ticket slot per phase, each moving through
//! `UNSUBMITTED -> PENDING -> RUNNING -> terminal`. The in-place phase
//! runs first; `FAILED` or `TIMEOUT` escalates the record to the replace
//! phase, while `SUCCEEDED` (and operator-driven `TERMINATED`/`REVOKED`)
//! closes it with the replace phase skipped. Ticket kinds are chosen per
//! machine role (proxy, spider, backend, remote, single).
//!
//! # Episodes
//!
//! Records sharing `(check_id, bk_cloud_id, ip)` heal together as one
//! episode: a machine failure takes out all its instances at once, and
//! the repair tickets operate on the machine. An episode dispatches only
//! once every expected instance has reported, waiting up to a
//! configurable window before giving up.
//!
//! # Safety properties
//!
//! - Event ingestion is idempotent: re-reported events refresh context
//!   but never reset healing progress.
//! - Dispatch is exactly-once: the store claims records with a
//!   conditional update, and a lost race cancels the duplicate ticket.
//! - Terminal statuses are monotone: a stale poll can never reopen a
//!   closed phase.
//! - Instances that recover on their own close their records without
//!   dispatching (implicit recovery, on by default).

#![deny(missing_docs)]

pub mod dispatcher;
pub mod error;
pub mod grouper;
pub mod healer;
pub mod ingest;
pub mod metadata;
pub mod migrations;
pub mod model;
pub mod orchestrator;
pub mod reconciler;
pub mod store;

pub use error::{AutofixError, Result};
