//! Time-driven deadline processing.
//!
//! A sweep synthesizes the missing attendance reports of sessions whose
//! deadline passed, then reconciles cross-document effects that an earlier
//! crash or lost race may have left undone: untallied terminal sessions,
//! commitments whose completion is due and sessions of ended commitments that
//! were never voided.

use super::engine::EngagementEngine;
use super::sessions::newly_synthesized;
use crate::domain::commitment::{CommitmentStatus, LearningCommitment, Tally};
use crate::domain::session::{Session, SessionStatus, Transition};
use crate::error::{EngineError, Result};
use serde::Serialize;
use std::future::Future;
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Sessions past a deadline and still awaiting attendance.
    pub examined: u32,
    /// Sessions the sweep moved to `COMPLETED` or `NOT_CONDUCTED`.
    pub resolved: u32,
    pub disputed: u32,
    /// Sessions left alone because other writers kept winning; retried next sweep.
    pub skipped_conflicts: u32,
    /// Tallies, completions and voids applied by the reconciliation pass.
    pub reconciled: u32,
}

impl AddAssign for SweepReport {
    fn add_assign(&mut self, rhs: Self) {
        self.examined += rhs.examined;
        self.resolved += rhs.resolved;
        self.disputed += rhs.disputed;
        self.skipped_conflicts += rhs.skipped_conflicts;
        self.reconciled += rhs.reconciled;
    }
}

impl EngagementEngine {
    /// Runs one deadline sweep. Idempotent: sweeping again at the same
    /// instant changes nothing.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for due in self.sessions.due_for_sweep(self.now()).await? {
            report.examined += 1;
            let result = self
                .mutate(&*self.sessions, due.id, |s: &mut Session, now| {
                    let before = s.attendance;
                    let transition = s.sweep(now);
                    Ok((transition, newly_synthesized(&before, &s.attendance)))
                })
                .await;

            let (session, (transition, synthesized)) = match result {
                Ok(swept) => swept,
                Err(EngineError::ConflictingTransition { .. }) => {
                    report.skipped_conflicts += 1;
                    warn!(session_id = %due.id, "Sweep lost repeated write races, skipping session");
                    continue;
                }
                Err(e) => {
                    error!(session_id = %due.id, error = %e, "Failed to sweep session");
                    continue;
                }
            };

            match transition {
                Transition::Moved(SessionStatus::Disputed) => report.disputed += 1,
                Transition::Moved(_) => report.resolved += 1,
                Transition::Recorded | Transition::Unchanged => {}
            }
            if let Err(e) = self
                .publish_session_transition(&session, transition, &synthesized)
                .await
            {
                warn!(
                    session_id = %session.id,
                    error = %e,
                    "Roll-up deferred to reconciliation"
                );
            }
        }

        report.reconciled = self.reconcile().await?;
        if report != SweepReport::default() {
            info!(
                examined = report.examined,
                resolved = report.resolved,
                disputed = report.disputed,
                skipped_conflicts = report.skipped_conflicts,
                reconciled = report.reconciled,
                "Deadline sweep finished"
            );
        } else {
            debug!("Deadline sweep found nothing to do");
        }
        Ok(report)
    }

    async fn reconcile(&self) -> Result<u32> {
        let now = self.now();
        let mut reconciled = 0;
        for commitment in self.commitments.get_unsettled().await? {
            let sessions = self.sessions.for_commitment(commitment.id).await?;
            let before = reconciled;

            let ended = matches!(
                commitment.status(),
                CommitmentStatus::Cancelled | CommitmentStatus::Rejected
            );
            if ended && sessions.iter().any(|s| s.is_upcoming(now)) {
                let reason = format!("Commitment {}", commitment.status());
                reconciled += self.void_open_sessions(commitment.id, &reason).await? as u32;
            }

            for session in &sessions {
                if session.outcome().is_none() || commitment.tallied_sessions.contains(&session.id)
                {
                    continue;
                }
                match self.record_session_outcome(session).await {
                    Ok(Some(Tally::Applied | Tally::Saturated)) => {
                        reconciled += 1;
                        info!(
                            session_id = %session.id,
                            commitment_id = %commitment.id,
                            "Reconciled untallied session outcome"
                        );
                    }
                    Ok(_) => {}
                    Err(EngineError::ConflictingTransition { .. }) => {
                        warn!(
                            commitment_id = %commitment.id,
                            session_id = %session.id,
                            "Reconciliation lost repeated write races, retrying next sweep"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }

            if commitment.status() == CommitmentStatus::Active
                && commitment.completed_sessions >= commitment.total_sessions
                && self.complete_if_due(commitment.id).await?
            {
                reconciled += 1;
            }

            // Settle against the sessions read above only when this pass changed nothing.
            if reconciled == before && commitment.is_terminal() {
                self.settle_commitment(&commitment, &sessions).await?;
            }
        }
        Ok(reconciled)
    }

    async fn settle_commitment(
        &self,
        commitment: &LearningCommitment,
        sessions: &[Session],
    ) -> Result<()> {
        let result = self
            .mutate(&*self.commitments, commitment.id, |c: &mut LearningCommitment, _| {
                Ok(c.settle(sessions))
            })
            .await;
        match result {
            Ok((_, true)) => {
                debug!(commitment_id = %commitment.id, "Commitment settled");
                Ok(())
            }
            Ok(_) | Err(EngineError::ConflictingTransition { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Fires [`EngagementEngine::sweep_once`] on a fixed interval.
pub struct DeadlineSweeper {
    engine: Arc<EngagementEngine>,
    interval: Duration,
}

impl DeadlineSweeper {
    /// Uses the engine's configured sweep interval.
    pub fn new(engine: Arc<EngagementEngine>) -> Self {
        let interval = engine.config().sweep_interval();
        Self { engine, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sweeps on every tick until `shutdown` resolves. A failed sweep is
    /// logged and retried on the next tick. Returns the accumulated report.
    pub async fn run<F>(self, shutdown: F) -> SweepReport
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_ms = self.interval.as_millis() as u64, "Deadline sweeper started");
        let mut totals = SweepReport::default();
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Deadline sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.engine.sweep_once().await {
                        Ok(report) => totals += report,
                        Err(e) => error!(error = %e, "Deadline sweep failed"),
                    }
                }
            }
        }
        totals
    }
}
