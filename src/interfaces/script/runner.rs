use super::command::{Operation, ScriptLine};
use crate::application::engine::EngagementEngine;
use crate::domain::identity::Actor;
use crate::domain::ports::Clock;
use crate::error::{EngineError, Result};
use crate::infrastructure::clock::ManualClock;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Drives an engine from script commands on a manual clock.
///
/// The clock only moves forward: each command sets it to the command's `at`.
pub struct ScriptRunner {
    engine: EngagementEngine,
    clock: ManualClock,
}

impl ScriptRunner {
    /// Takes over the engine's clock.
    pub fn new(engine: EngagementEngine) -> Self {
        let clock = ManualClock::new(DateTime::<Utc>::UNIX_EPOCH);
        let engine = engine.with_clock(Arc::new(clock.clone()));
        Self { engine, clock }
    }

    pub fn engine(&self) -> &EngagementEngine {
        &self.engine
    }

    /// Runs one command. Failures leave the stores untouched and the clock at
    /// the command's time.
    pub async fn apply(&self, line: ScriptLine) -> Result<()> {
        let previous = self.clock.now();
        if line.at < previous {
            return Err(EngineError::ValidationError(format!(
                "command at {} is earlier than the previous command at {previous}",
                line.at
            )));
        }
        self.clock.set(line.at);

        let name = line.op.name();
        debug!(op = name, at = %line.at, "Applying script command");
        let actor = line.actor;
        let caller = || -> Result<Actor> {
            actor.ok_or_else(|| EngineError::ValidationError(format!("{name} requires an actor")))
        };

        let engine = &self.engine;
        match line.op {
            Operation::CreateTeachingRequest(new) => {
                engine.create_teaching_request(&caller()?, new).await?;
            }
            Operation::RespondToTeachingRequest {
                request_id,
                response,
            } => {
                engine
                    .respond_to_teaching_request(&caller()?, request_id, response)
                    .await?;
            }
            Operation::CreateLearningCommitment(new) => {
                engine.create_learning_commitment(&caller()?, new).await?;
            }
            Operation::Payment { event } => {
                engine.handle_payment_event(event).await?;
            }
            Operation::WithdrawCommitment {
                commitment_id,
                reason,
            } => {
                engine
                    .withdraw_commitment(&caller()?, commitment_id, reason)
                    .await?;
            }
            Operation::CloseEarly {
                commitment_id,
                reason,
            } => {
                engine.close_early(&caller()?, commitment_id, reason).await?;
            }
            Operation::CreateSession(new) => {
                engine.create_session(&caller()?, new).await?;
            }
            Operation::ConfirmSession { session_id } => {
                engine.confirm_session(&caller()?, session_id).await?;
            }
            Operation::RejectSession { session_id, reason } => {
                engine.reject_session(&caller()?, session_id, reason).await?;
            }
            Operation::CancelSession { session_id, reason } => {
                engine.cancel_session(&caller()?, session_id, reason).await?;
            }
            Operation::ReportAttendance { session_id, report } => {
                engine
                    .report_attendance(&caller()?, session_id, report)
                    .await?;
            }
            Operation::ResolveDispute {
                session_id,
                decision,
                admin_notes,
            } => {
                engine
                    .resolve_dispute(&caller()?, session_id, decision, admin_notes)
                    .await?;
            }
            Operation::RequestCancellation {
                commitment_id,
                reason,
                evidence_link,
            } => {
                engine
                    .request_cancellation(&caller()?, commitment_id, reason, evidence_link)
                    .await?;
            }
            Operation::RespondToCancellation {
                commitment_id,
                accepted,
                reason,
            } => {
                engine
                    .respond_to_cancellation(&caller()?, commitment_id, accepted, reason)
                    .await?;
            }
            Operation::WithdrawCancellation { commitment_id } => {
                engine
                    .withdraw_cancellation(&caller()?, commitment_id)
                    .await?;
            }
            Operation::EscalateCancellation { commitment_id } => {
                engine
                    .escalate_cancellation(&caller()?, commitment_id)
                    .await?;
            }
            Operation::ApproveCancellation {
                commitment_id,
                admin_notes,
            } => {
                engine
                    .approve_cancellation(&caller()?, commitment_id, admin_notes)
                    .await?;
            }
            Operation::RejectCancellation {
                commitment_id,
                admin_notes,
            } => {
                engine
                    .reject_cancellation(&caller()?, commitment_id, admin_notes)
                    .await?;
            }
            Operation::Sweep => {
                engine.sweep_once().await?;
            }
        }
        Ok(())
    }
}
