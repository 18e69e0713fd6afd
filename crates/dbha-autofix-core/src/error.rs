// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the autofix controller.
//!
//! Every kind carries a stable code for logs and HTTP responses, and a
//! disposition: terminating kinds close the episode, transient kinds leave
//! state untouched so the next reconciler tick retries.

use std::fmt;

/// Result type using AutofixError.
pub type Result<T> = std::result::Result<T, AutofixError>;

/// Controller errors.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AutofixError {
    /// An inbound HA event failed validation; the item is rejected and the
    /// batch continues.
    MalformedEvent {
        /// The field that failed validation.
        field: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// Records of one episode disagree on machine type, ticket id or
    /// status, or the dispatch precondition was violated.
    BadTodoRecord {
        /// Failover event id of the group.
        check_id: i64,
        /// Machine IP of the group.
        ip: String,
        /// What disagreed.
        reason: String,
    },

    /// The machine's live instance statuses do not match the record count
    /// at dispatch time.
    BadInstanceStatus {
        /// Machine IP.
        ip: String,
        /// Records in the episode.
        expected: usize,
        /// Unavailable online instances observed on the machine.
        actual: usize,
    },

    /// A spider replacement would span more than one cluster.
    SpiderMultiClusters {
        /// Machine IP.
        ip: String,
        /// The clusters the machine's instances belong to.
        cluster_ids: Vec<i64>,
    },

    /// A remote replacement would span more than one cluster.
    RemoteMultiClusters {
        /// Machine IP.
        ip: String,
        /// The clusters the machine's instances belong to.
        cluster_ids: Vec<i64>,
    },

    /// The episode stayed incomplete past the wait window.
    WaitTimeout {
        /// Failover event id of the group.
        check_id: i64,
        /// Machine IP of the group.
        ip: String,
        /// Seconds since the earliest event of the group.
        waited_secs: i64,
    },

    /// The record's machine type has no healing strategy.
    UnsupportedMachineType {
        /// The offending machine type string.
        machine_type: String,
    },

    /// An orchestrator or metadata call failed; state is unchanged and the
    /// next tick retries.
    Rpc {
        /// The remote service ("orchestrator", "dbmeta").
        service: &'static str,
        /// Failure details.
        details: String,
    },

    /// Record store operation failed.
    Database {
        /// The operation that failed.
        operation: &'static str,
        /// Failure details.
        details: String,
    },
}

impl AutofixError {
    /// Stable code string for this error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedEvent { .. } => "MALFORMED_EVENT",
            Self::BadTodoRecord { .. } => "BAD_TODO_RECORD",
            Self::BadInstanceStatus { .. } => "BAD_INSTANCE_STATUS",
            Self::SpiderMultiClusters { .. } => "SPIDER_MULTI_CLUSTERS",
            Self::RemoteMultiClusters { .. } => "REMOTE_MULTI_CLUSTERS",
            Self::WaitTimeout { .. } => "WAIT_TIMEOUT",
            Self::UnsupportedMachineType { .. } => "UNSUPPORTED_MACHINE_TYPE",
            Self::Rpc { .. } => "RPC_ERROR",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether this error should close the episode (mark TERMINATED)
    /// instead of being retried on the next tick.
    pub fn closes_group(&self) -> bool {
        matches!(
            self,
            Self::BadTodoRecord { .. }
                | Self::SpiderMultiClusters { .. }
                | Self::RemoteMultiClusters { .. }
                | Self::UnsupportedMachineType { .. }
        )
    }

    /// Whether the next tick may succeed without intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc { .. } | Self::Database { .. })
    }
}

impl fmt::Display for AutofixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedEvent { field, message } => {
                write!(f, "Malformed HA event, field '{}': {}", field, message)
            }
            Self::BadTodoRecord {
                check_id,
                ip,
                reason,
            } => {
                write!(
                    f,
                    "Bad autofix records for check {} on {}: {}",
                    check_id, ip, reason
                )
            }
            Self::BadInstanceStatus {
                ip,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Instance status mismatch on {}: {} records but {} unavailable online instances",
                    ip, expected, actual
                )
            }
            Self::SpiderMultiClusters { ip, cluster_ids } => {
                write!(
                    f,
                    "Spider machine {} spans {} clusters ({:?}); replacement requires exactly one",
                    ip,
                    cluster_ids.len(),
                    cluster_ids
                )
            }
            Self::RemoteMultiClusters { ip, cluster_ids } => {
                write!(
                    f,
                    "Remote machine {} spans {} clusters ({:?}); replacement requires exactly one",
                    ip,
                    cluster_ids.len(),
                    cluster_ids
                )
            }
            Self::WaitTimeout {
                check_id,
                ip,
                waited_secs,
            } => {
                write!(
                    f,
                    "Episode for check {} on {} incomplete after {}s; giving up autofix",
                    check_id, ip, waited_secs
                )
            }
            Self::UnsupportedMachineType { machine_type } => {
                write!(f, "Unsupported machine type '{}'", machine_type)
            }
            Self::Rpc { service, details } => {
                write!(f, "RPC error calling {}: {}", service, details)
            }
            Self::Database { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for AutofixError {}

impl From<sqlx::Error> for AutofixError {
    fn from(err: sqlx::Error) -> Self {
        AutofixError::Database {
            operation: "query",
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AutofixError {
    fn from(err: serde_json::Error) -> Self {
        AutofixError::Database {
            operation: "json",
            details: err.to_string(),
        }
    }
}

impl From<crate::model::UnknownEnumValue> for AutofixError {
    fn from(err: crate::model::UnknownEnumValue) -> Self {
        AutofixError::Database {
            operation: "decode",
            details: err.to_string(),
        }
    }
}
