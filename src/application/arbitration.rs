use super::engine::EngagementEngine;
use crate::domain::commitment::LearningCommitment;
use crate::domain::events::DomainEvent;
use crate::domain::identity::{Actor, CommitmentId, SessionId};
use crate::domain::session::{Session, SessionDecision};
use crate::error::Result;
use tracing::info;

impl EngagementEngine {
    /// Admin forces the outcome of a disputed session.
    ///
    /// The decision is logged on the owning commitment and rolled up like any
    /// other terminal outcome. A second call fails with `AlreadyResolved`.
    pub async fn resolve_dispute(
        &self,
        actor: &Actor,
        session_id: SessionId,
        decision: SessionDecision,
        admin_notes: Option<String>,
    ) -> Result<Session> {
        let admin_id = actor.require_admin("resolve a session dispute")?;
        let (session, transition) = self
            .mutate(&*self.sessions, session_id, |s: &mut Session, now| {
                s.resolve_dispute(admin_id, decision, admin_notes.clone(), now)
            })
            .await?;
        info!(
            session_id = %session_id,
            admin_id = %admin_id,
            decision = ?decision,
            "Session dispute resolved"
        );

        self.emit(DomainEvent::DisputeResolved {
            session_id,
            decision,
        })
        .await;
        self.publish_session_transition(&session, transition, &[])
            .await?;
        Ok(session)
    }

    /// Admin grants a contested cancellation.
    pub async fn approve_cancellation(
        &self,
        actor: &Actor,
        commitment_id: CommitmentId,
        admin_notes: Option<String>,
    ) -> Result<LearningCommitment> {
        let commitment = self
            .settle_cancellation(actor, commitment_id, true, admin_notes)
            .await?;
        self.emit(DomainEvent::CancellationApproved { commitment_id })
            .await;
        self.commitment_ended(&commitment).await?;
        Ok(commitment)
    }

    /// Admin refuses a contested cancellation; the commitment resumes.
    pub async fn reject_cancellation(
        &self,
        actor: &Actor,
        commitment_id: CommitmentId,
        admin_notes: Option<String>,
    ) -> Result<LearningCommitment> {
        let commitment = self
            .settle_cancellation(actor, commitment_id, false, admin_notes)
            .await?;
        self.emit(DomainEvent::CancellationRejected { commitment_id })
            .await;
        if self.complete_if_due(commitment_id).await? {
            return self.get_commitment(commitment_id).await;
        }
        Ok(commitment)
    }

    async fn settle_cancellation(
        &self,
        actor: &Actor,
        commitment_id: CommitmentId,
        approve: bool,
        admin_notes: Option<String>,
    ) -> Result<LearningCommitment> {
        let admin_id = actor.require_admin(if approve {
            "approve a cancellation"
        } else {
            "reject a cancellation"
        })?;
        let (commitment, status) = self
            .mutate(&*self.commitments, commitment_id, |c: &mut LearningCommitment, now| {
                c.settle_cancellation(admin_id, approve, admin_notes.clone(), now)
            })
            .await?;
        info!(
            commitment_id = %commitment_id,
            admin_id = %admin_id,
            approve,
            status = %status,
            "Cancellation settled by admin"
        );
        Ok(commitment)
    }
}
