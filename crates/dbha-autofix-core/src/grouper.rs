// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Episode grouping: fold outstanding records of one machine failover into
//! a healing episode and judge whether it is ready to progress.
//!
//! An episode is derived state, never persisted. The group key is
//! `(check_id, bk_cloud_id, ip)`; the machine census tells us how many
//! per-instance events the machine ought to emit. Incomplete groups wait
//! up to the wait window, anchored on the earliest event time seen.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::model::AutofixRecord;

/// All outstanding records of one machine under one failover event.
#[derive(Debug, Clone)]
pub struct Episode {
    /// Failover event id.
    pub check_id: i64,
    /// Cloud area.
    pub bk_cloud_id: i64,
    /// Machine IP.
    pub ip: String,
    /// The records sharing the group key, ordered by port.
    pub records: Vec<AutofixRecord>,
}

impl Episode {
    /// Earliest event time in the group; the anchor for the timeout test.
    pub fn earliest_event_time(&self) -> DateTime<Utc> {
        self.records
            .iter()
            .map(|r| r.event_create_time)
            .min()
            .expect("episode always holds at least one record")
    }

    /// Row ids of all records in the group.
    pub fn record_ids(&self) -> Vec<i64> {
        self.records.iter().map(|r| r.id).collect()
    }

    /// Ports of all records in the group.
    pub fn ports(&self) -> Vec<i32> {
        self.records.iter().map(|r| r.port).collect()
    }
}

/// What the reconciler should do with an episode this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupVerdict {
    /// Counts match and the group is coherent; forward to the state machine.
    Ready,
    /// Events are still missing but the wait window has not elapsed.
    Wait {
        /// Seconds since the earliest event of the group.
        waited_secs: i64,
    },
    /// Events are still missing and the wait window has elapsed; give up.
    Timeout {
        /// Seconds since the earliest event of the group.
        waited_secs: i64,
    },
    /// The group contradicts itself (mixed machine types, steps, ticket
    /// ids or statuses, incoherent rows, or more records than the machine
    /// has instances); terminate it.
    Malformed {
        /// What was wrong.
        reason: String,
    },
}

/// Fold records into episodes by `(check_id, bk_cloud_id, ip)`.
///
/// A BTreeMap keeps episode order deterministic across ticks.
pub fn group_records(records: Vec<AutofixRecord>) -> Vec<Episode> {
    let mut groups: BTreeMap<(i64, i64, String), Vec<AutofixRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.group_key()).or_default().push(record);
    }

    groups
        .into_iter()
        .map(|((check_id, bk_cloud_id, ip), mut records)| {
            records.sort_by_key(|r| r.port);
            Episode {
                check_id,
                bk_cloud_id,
                ip,
                records,
            }
        })
        .collect()
}

/// Judge one episode against the machine census and the wait window.
pub fn evaluate(
    episode: &Episode,
    expected_ports: &[i32],
    now: DateTime<Utc>,
    wait_window: Duration,
) -> GroupVerdict {
    if let Some(reason) = coherence_failure(episode) {
        return GroupVerdict::Malformed { reason };
    }

    let have = episode.records.len();
    let want = expected_ports.len();

    if have > want {
        return GroupVerdict::Malformed {
            reason: format!(
                "{} records but machine census lists only {} online instances",
                have, want
            ),
        };
    }

    if have < want {
        let waited = now - episode.earliest_event_time();
        let waited_secs = waited.num_seconds();
        if waited <= wait_window {
            return GroupVerdict::Wait { waited_secs };
        }
        return GroupVerdict::Timeout { waited_secs };
    }

    GroupVerdict::Ready
}

/// Check internal agreement of a group; `Some(reason)` on contradiction.
fn coherence_failure(episode: &Episode) -> Option<String> {
    let first = &episode.records[0];

    for record in &episode.records {
        if record.machine_type != first.machine_type {
            return Some(format!(
                "mixed machine types: {} vs {}",
                first.machine_type, record.machine_type
            ));
        }
        if record.current_step != first.current_step {
            return Some(format!(
                "mixed steps: {} vs {}",
                first.current_step, record.current_step
            ));
        }
        if record.current_status() != first.current_status() {
            return Some(format!(
                "mixed statuses: {} vs {}",
                first.current_status(),
                record.current_status()
            ));
        }
        if record.current_ticket_id() != first.current_ticket_id() {
            return Some(format!(
                "mixed ticket ids: {} vs {}",
                first.current_ticket_id(),
                record.current_ticket_id()
            ));
        }
        if !record.is_coherent() {
            return Some(format!(
                "record {}:{} has status {} with ticket id {}",
                record.ip,
                record.port,
                record.current_status(),
                record.current_ticket_id()
            ));
        }
    }

    None
}
