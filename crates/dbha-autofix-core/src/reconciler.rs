// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The reconciler: a periodic worker that drives every open record to a
//! terminal state.
//!
//! Each tick loads the open records, folds them into episodes and walks
//! four passes per episode:
//!
//! 1. refresh in-flight ticket statuses from the orchestrator
//! 2. apply phase transitions (in-place outcome decides the replace phase)
//! 3. sweep for implicit recovery (instance healthy again mid-flight)
//! 4. dispatch episodes whose current phase is still UNSUBMITTED
//!
//! Episode failures are isolated: an error in one episode is logged and
//! never blocks the rest of the tick. Cross-process safety comes from the
//! store's conditional dispatch claim, so running several reconcilers
//! against one database stays correct.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::dispatcher::TicketDispatcher;
use crate::error::{AutofixError, Result};
use crate::grouper::{self, Episode, GroupVerdict};
use crate::healer::{Decision, Healer};
use crate::metadata::{ClusterMetadata, expected_ports};
use crate::model::{AutofixRecord, AutofixStep, Phase, TicketStatus};
use crate::orchestrator::Orchestrator;
use crate::store::RecordStore;

/// Tunables for the reconcile loop.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Interval between ticks.
    pub period: Duration,
    /// How long an incomplete episode may wait for missing events.
    pub wait_window: Duration,
    /// Whether self-recovered instances close their records without
    /// dispatching.
    pub implicit_recovery_enabled: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            wait_window: Duration::from_secs(15 * 60),
            implicit_recovery_enabled: true,
        }
    }
}

/// Periodic worker that advances autofix records.
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    orchestrator: Arc<dyn Orchestrator>,
    metadata: Arc<dyn ClusterMetadata>,
    healer: Healer,
    dispatcher: TicketDispatcher,
    config: ReconcilerConfig,
    shutdown: Arc<Notify>,
}

impl Reconciler {
    /// Wire up a reconciler over the given backends.
    pub fn new(
        store: Arc<dyn RecordStore>,
        orchestrator: Arc<dyn Orchestrator>,
        metadata: Arc<dyn ClusterMetadata>,
        config: ReconcilerConfig,
    ) -> Self {
        let healer = Healer::new(metadata.clone(), config.implicit_recovery_enabled);
        let dispatcher = TicketDispatcher::new(orchestrator.clone(), store.clone());
        Self {
            store,
            orchestrator,
            metadata,
            healer,
            dispatcher,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle to stop the run loop.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run ticks until shutdown is notified.
    pub async fn run(&self) {
        info!(
            period_secs = self.config.period.as_secs(),
            wait_window_secs = self.config.wait_window.as_secs(),
            "Reconciler started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.period) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Reconcile tick failed");
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Reconciler shutting down");
                    return;
                }
            }
        }
    }

    /// One reconcile pass over all open records.
    pub async fn tick(&self) -> Result<()> {
        let records = self.store.list_open_records().await?;
        if records.is_empty() {
            debug!("No open records");
            return Ok(());
        }

        let episodes = grouper::group_records(records);
        debug!(episodes = episodes.len(), "Reconciling episodes");

        for mut episode in episodes {
            if let Err(e) = self.reconcile_episode(&mut episode).await {
                error!(
                    check_id = episode.check_id,
                    ip = %episode.ip,
                    error_code = e.error_code(),
                    error = %e,
                    "Episode reconciliation failed"
                );
            }
        }

        Ok(())
    }

    async fn reconcile_episode(&self, episode: &mut Episode) -> Result<()> {
        self.refresh_tickets(episode).await;
        self.apply_transitions(episode).await?;
        if self.config.implicit_recovery_enabled {
            self.sweep_implicit_recovery(episode).await;
        }
        self.dispatch_pass(episode).await
    }

    /// Pass 1: copy terminal/running ticket statuses from the orchestrator
    /// onto the records. The store's monotone guard keeps a stale poll from
    /// reopening a terminal phase.
    async fn refresh_tickets(&self, episode: &mut Episode) {
        for record in &mut episode.records {
            for phase in [Phase::InPlace, Phase::Replace] {
                let ticket_id = record.phase_ticket_id(phase);
                if !record.phase_status(phase).is_in_flight() || ticket_id == 0 {
                    continue;
                }
                match self.orchestrator.poll_ticket(ticket_id).await {
                    Ok(status) => {
                        if status == record.phase_status(phase) {
                            continue;
                        }
                        info!(
                            check_id = record.check_id,
                            ip = %record.ip,
                            port = record.port,
                            ticket_id,
                            phase = %phase,
                            status = %status,
                            "Ticket status changed"
                        );
                        if let Err(e) = self.store.set_phase_status(record.id, phase, status).await
                        {
                            warn!(record_id = record.id, error = %e, "Status write failed");
                            continue;
                        }
                        record.set_phase_status(phase, status);
                    }
                    Err(e) => {
                        // Transient; the ticket keeps its last known status
                        // and the next tick polls again.
                        warn!(ticket_id, error = %e, "Ticket poll failed");
                    }
                }
            }
        }
    }

    /// Pass 2: the in-place outcome decides the replace phase.
    ///
    /// FAILED or TIMEOUT escalates to replacement; SUCCEEDED, TERMINATED
    /// and REVOKED close the episode by skipping the replace phase.
    async fn apply_transitions(&self, episode: &mut Episode) -> Result<()> {
        for record in &mut episode.records {
            if record.current_step != AutofixStep::InPlaceAutofix
                || record.replace_ticket_status != TicketStatus::Unsubmitted
            {
                continue;
            }
            match record.inplace_ticket_status {
                TicketStatus::Failed | TicketStatus::Timeout | TicketStatus::Skipped => {
                    info!(
                        check_id = record.check_id,
                        ip = %record.ip,
                        port = record.port,
                        inplace_status = %record.inplace_ticket_status,
                        "Escalating to replacement"
                    );
                    self.store
                        .set_current_step(record.id, AutofixStep::ReplaceNew)
                        .await?;
                    record.current_step = AutofixStep::ReplaceNew;
                }
                TicketStatus::Succeeded | TicketStatus::Terminated | TicketStatus::Revoked => {
                    self.store
                        .set_phase_status(record.id, Phase::Replace, TicketStatus::Skipped)
                        .await?;
                    record.replace_ticket_status = TicketStatus::Skipped;
                }
                TicketStatus::Unsubmitted | TicketStatus::Pending | TicketStatus::Running => {}
            }
        }
        Ok(())
    }

    /// Pass 3: a record whose instance came back on its own is closed
    /// without further healing. In-flight tickets are cancelled.
    async fn sweep_implicit_recovery(&self, episode: &mut Episode) {
        for record in &mut episode.records {
            if !matches!(
                record.current_status(),
                TicketStatus::Unsubmitted | TicketStatus::Pending
            ) {
                continue;
            }
            match self.healer.instance_recovered(record).await {
                Ok(true) => {
                    info!(
                        check_id = record.check_id,
                        ip = %record.ip,
                        port = record.port,
                        "Instance recovered on its own; closing record"
                    );
                    self.close_recovered(record).await;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        check_id = record.check_id,
                        ip = %record.ip,
                        error = %e,
                        "Recovery check failed"
                    );
                }
            }
        }
    }

    /// Pass 4: episodes whose current phase is still UNSUBMITTED get a
    /// grouper verdict and, when ready, a healing decision.
    async fn dispatch_pass(&self, episode: &mut Episode) -> Result<()> {
        let pending_dispatch = episode
            .records
            .iter()
            .any(|r| r.current_status() == TicketStatus::Unsubmitted);
        if !pending_dispatch {
            return Ok(());
        }

        let census = self
            .metadata
            .machine_instances(episode.bk_cloud_id, &episode.ip)
            .await?;
        let expected = expected_ports(&census);
        let verdict = grouper::evaluate(
            episode,
            &expected,
            Utc::now(),
            chrono::Duration::from_std(self.config.wait_window).unwrap_or_else(|_| {
                chrono::Duration::minutes(15)
            }),
        );

        match verdict {
            GroupVerdict::Wait { waited_secs } => {
                debug!(
                    check_id = episode.check_id,
                    ip = %episode.ip,
                    waited_secs,
                    "Waiting for missing instance events"
                );
                Ok(())
            }
            GroupVerdict::Timeout { waited_secs } => {
                let err = AutofixError::WaitTimeout {
                    check_id: episode.check_id,
                    ip: episode.ip.clone(),
                    waited_secs,
                };
                warn!(error = %err, "Episode gave up waiting; closing as timed out");
                self.close_episode(episode, TicketStatus::Timeout).await;
                Ok(())
            }
            GroupVerdict::Malformed { reason } => {
                let err = AutofixError::BadTodoRecord {
                    check_id: episode.check_id,
                    ip: episode.ip.clone(),
                    reason,
                };
                error!(error = %err, "Malformed episode; terminating");
                self.close_episode(episode, TicketStatus::Terminated).await;
                Ok(())
            }
            GroupVerdict::Ready => self.heal_ready(episode).await,
        }
    }

    async fn heal_ready(&self, episode: &mut Episode) -> Result<()> {
        match self.healer.decide(episode).await {
            Ok(Decision::Dispatch { phase, tickets }) => {
                let ticket_id = self.dispatcher.dispatch(episode, phase, &tickets).await?;
                info!(
                    check_id = episode.check_id,
                    ip = %episode.ip,
                    phase = %phase,
                    ticket_id,
                    "Episode dispatched"
                );
                Ok(())
            }
            Ok(Decision::SkipInPlace) => {
                for record in &mut episode.records {
                    self.store
                        .set_phase_status(record.id, Phase::InPlace, TicketStatus::Skipped)
                        .await?;
                    record.inplace_ticket_status = TicketStatus::Skipped;
                    self.store
                        .set_current_step(record.id, AutofixStep::ReplaceNew)
                        .await?;
                    record.current_step = AutofixStep::ReplaceNew;
                }
                // The replace phase dispatches on the next tick, once the
                // episode re-evaluates as ready.
                Ok(())
            }
            Ok(Decision::AlreadyRecovered) => {
                for record in &mut episode.records {
                    self.close_recovered(record).await;
                }
                Ok(())
            }
            Err(e) if e.closes_group() => {
                error!(
                    check_id = episode.check_id,
                    ip = %episode.ip,
                    error_code = e.error_code(),
                    error = %e,
                    "Unhealable episode; terminating"
                );
                self.close_episode(episode, TicketStatus::Terminated).await;
                Ok(())
            }
            // BAD_INSTANCE_STATUS and transient failures: leave the episode
            // untouched and retry next tick.
            Err(e) => Err(e),
        }
    }

    /// Close every record of the episode: the current phase gets the given
    /// terminal status, the untouched phase is skipped.
    async fn close_episode(&self, episode: &mut Episode, status: TicketStatus) {
        for record in &mut episode.records {
            self.close_record(record, status).await;
        }
    }

    /// Close one record. An in-flight ticket is cancelled first; its
    /// terminal status then lands via the monotone status write. The
    /// current phase gets the given status, the untouched phase SKIPPED.
    async fn close_record(&self, record: &mut AutofixRecord, status: TicketStatus) {
        for phase in [Phase::InPlace, Phase::Replace] {
            let target = match record.phase_status(phase) {
                TicketStatus::Unsubmitted => {
                    if phase == record.current_phase() {
                        status
                    } else {
                        TicketStatus::Skipped
                    }
                }
                TicketStatus::Pending | TicketStatus::Running => {
                    self.dispatcher.cancel(record.phase_ticket_id(phase)).await;
                    TicketStatus::Terminated
                }
                _ => continue,
            };
            self.write_close(record, phase, target).await;
        }
    }

    /// Close a record whose instance came back on its own: phases never
    /// dispatched are skipped, in-flight work is cancelled.
    async fn close_recovered(&self, record: &mut AutofixRecord) {
        for phase in [Phase::InPlace, Phase::Replace] {
            let target = match record.phase_status(phase) {
                TicketStatus::Unsubmitted => TicketStatus::Skipped,
                TicketStatus::Pending | TicketStatus::Running => {
                    self.dispatcher.cancel(record.phase_ticket_id(phase)).await;
                    TicketStatus::Terminated
                }
                _ => continue,
            };
            self.write_close(record, phase, target).await;
        }
    }

    async fn write_close(&self, record: &mut AutofixRecord, phase: Phase, target: TicketStatus) {
        if let Err(e) = self.store.set_phase_status(record.id, phase, target).await {
            warn!(record_id = record.id, error = %e, "Close write failed");
            return;
        }
        record.set_phase_status(phase, target);
    }
}
