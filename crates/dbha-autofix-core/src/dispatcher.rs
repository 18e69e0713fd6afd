// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Idempotent ticket dispatch against the orchestrator.
//!
//! Dispatching requires every record of the episode to still satisfy
//! `status = UNSUBMITTED AND ticket_id = 0`; the store enforces the
//! precondition under row lock, so at most one worker wins per episode.
//! A loser cancels the ticket it created. Chained plans (spider
//! add+reduce, backend repair+replace) create their tickets back to back
//! and record the final ticket id; a partial create failure cancels the
//! earlier tickets and leaves the records untouched for the next tick.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{AutofixError, Result};
use crate::grouper::Episode;
use crate::model::{Phase, TicketStatus};
use crate::orchestrator::{Orchestrator, TicketRequest};
use crate::store::RecordStore;

/// Translates state-machine decisions into orchestrator tickets.
pub struct TicketDispatcher {
    orchestrator: Arc<dyn Orchestrator>,
    store: Arc<dyn RecordStore>,
}

impl TicketDispatcher {
    /// Create a dispatcher over the given orchestrator and store.
    pub fn new(orchestrator: Arc<dyn Orchestrator>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            orchestrator,
            store,
        }
    }

    /// Create the tickets of a dispatch plan and claim the final ticket id
    /// on every record of the episode. Returns the recorded ticket id.
    pub async fn dispatch(
        &self,
        episode: &Episode,
        phase: Phase,
        tickets: &[TicketRequest],
    ) -> Result<i64> {
        if tickets.is_empty() {
            return Err(AutofixError::BadTodoRecord {
                check_id: episode.check_id,
                ip: episode.ip.clone(),
                reason: "empty dispatch plan".to_string(),
            });
        }

        // Cheap precondition check before touching the orchestrator; the
        // store re-checks under row lock below.
        for record in &episode.records {
            if record.phase_status(phase) != TicketStatus::Unsubmitted
                || record.phase_ticket_id(phase) != 0
            {
                return Err(AutofixError::BadTodoRecord {
                    check_id: episode.check_id,
                    ip: episode.ip.clone(),
                    reason: format!(
                        "record {}:{} already has {} status {} (ticket {})",
                        record.ip,
                        record.port,
                        phase,
                        record.phase_status(phase),
                        record.phase_ticket_id(phase)
                    ),
                });
            }
        }

        let mut created: Vec<i64> = Vec::with_capacity(tickets.len());
        for request in tickets {
            match self.orchestrator.create_ticket(request).await {
                Ok(ticket_id) => {
                    info!(
                        check_id = episode.check_id,
                        ip = %episode.ip,
                        kind = %request.kind,
                        ticket_id,
                        "Ticket created"
                    );
                    created.push(ticket_id);
                }
                Err(err) => {
                    // Partial create: unwind what we made so the next tick
                    // can retry from a clean slate.
                    self.cancel_all(&created).await;
                    return Err(err);
                }
            }
        }

        // The final ticket of a chain is the one whose completion closes
        // the phase; poll it.
        let final_id = *created.last().expect("plan is non-empty");

        let ids = episode.record_ids();
        let claimed = self.store.claim_dispatch(&ids, phase, final_id).await?;
        if claimed != ids.len() as u64 {
            // Lost the race: another worker dispatched first. Our tickets
            // are duplicates; cancel them.
            warn!(
                check_id = episode.check_id,
                ip = %episode.ip,
                claimed,
                expected = ids.len(),
                "Dispatch claim lost; cancelling duplicate tickets"
            );
            self.cancel_all(&created).await;
            return Err(AutofixError::BadTodoRecord {
                check_id: episode.check_id,
                ip: episode.ip.clone(),
                reason: format!("claimed {} of {} records", claimed, ids.len()),
            });
        }

        Ok(final_id)
    }

    /// Fire-and-forget cancel; the terminal status lands via polling.
    pub async fn cancel(&self, ticket_id: i64) {
        if let Err(e) = self.orchestrator.cancel_ticket(ticket_id).await {
            warn!(ticket_id, error = %e, "Ticket cancel failed; orchestrator will time it out");
        }
    }

    async fn cancel_all(&self, ticket_ids: &[i64]) {
        for &ticket_id in ticket_ids {
            self.cancel(ticket_id).await;
        }
    }
}
