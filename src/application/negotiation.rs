use super::engine::EngagementEngine;
use crate::domain::commitment::{CommitmentStatus, LearningCommitment};
use crate::domain::events::DomainEvent;
use crate::domain::identity::{Actor, CommitmentId, party_of};
use crate::error::Result;
use tracing::info;

impl EngagementEngine {
    /// Opens a cancellation negotiation. Only one may be open per commitment.
    pub async fn request_cancellation(
        &self,
        actor: &Actor,
        commitment_id: CommitmentId,
        reason: String,
        evidence_link: Option<String>,
    ) -> Result<LearningCommitment> {
        let (commitment, requested_by) = self
            .mutate(&*self.commitments, commitment_id, |c: &mut LearningCommitment, now| {
                let party = party_of(actor, c.student_id, c.tutor_id, "request cancellation of")?;
                c.request_cancellation(party, reason.clone(), evidence_link.clone(), now)?;
                Ok(party)
            })
            .await?;
        info!(commitment_id = %commitment_id, requested_by = %requested_by, "Cancellation requested");

        self.emit(DomainEvent::CancellationRequested {
            commitment_id,
            requested_by,
        })
        .await;
        Ok(commitment)
    }

    /// The non-requesting party accepts (cancelling the commitment) or
    /// rejects (handing it to an admin).
    pub async fn respond_to_cancellation(
        &self,
        actor: &Actor,
        commitment_id: CommitmentId,
        accepted: bool,
        reason: Option<String>,
    ) -> Result<LearningCommitment> {
        let (commitment, status) = self
            .mutate(&*self.commitments, commitment_id, |c: &mut LearningCommitment, now| {
                let party = party_of(actor, c.student_id, c.tutor_id, "respond to a cancellation of")?;
                c.respond_to_cancellation(party, accepted, reason.clone(), now)
            })
            .await?;
        info!(commitment_id = %commitment_id, accepted, status = %status, "Cancellation answered");

        if status == CommitmentStatus::AdminReview {
            self.emit(DomainEvent::CancellationEscalated { commitment_id })
                .await;
        } else {
            self.commitment_ended(&commitment).await?;
        }
        Ok(commitment)
    }

    /// The requester takes back an uncontested request; the commitment resumes.
    pub async fn withdraw_cancellation(
        &self,
        actor: &Actor,
        commitment_id: CommitmentId,
    ) -> Result<LearningCommitment> {
        let (commitment, ()) = self
            .mutate(&*self.commitments, commitment_id, |c: &mut LearningCommitment, now| {
                let party = party_of(actor, c.student_id, c.tutor_id, "withdraw a cancellation of")?;
                c.withdraw_cancellation(party, now)
            })
            .await?;
        info!(commitment_id = %commitment_id, "Cancellation withdrawn");

        self.emit(DomainEvent::CancellationWithdrawn { commitment_id })
            .await;
        // Sessions may have finished while the negotiation was open.
        if self.complete_if_due(commitment_id).await? {
            return self.get_commitment(commitment_id).await;
        }
        Ok(commitment)
    }

    /// Either party sends an open negotiation straight to admin review.
    pub async fn escalate_cancellation(
        &self,
        actor: &Actor,
        commitment_id: CommitmentId,
    ) -> Result<LearningCommitment> {
        let (commitment, party) = self
            .mutate(&*self.commitments, commitment_id, |c: &mut LearningCommitment, now| {
                let party = party_of(actor, c.student_id, c.tutor_id, "escalate a cancellation of")?;
                c.escalate_cancellation(party, now)?;
                Ok(party)
            })
            .await?;
        info!(commitment_id = %commitment_id, escalated_by = %party, "Cancellation escalated");

        self.emit(DomainEvent::CancellationEscalated { commitment_id })
            .await;
        Ok(commitment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::commitments::PaymentEvent;
    use crate::domain::commitment::NewCommitment;
    use crate::domain::identity::{RequestId, UserId};
    use crate::domain::money::Amount;
    use crate::domain::teaching_request::{NewTeachingRequest, RequestResponse};
    use crate::error::{EngineError, Snapshot};
    use crate::infrastructure::in_memory::{
        InMemoryCommitmentStore, InMemorySessionStore, InMemoryTeachingRequestStore,
    };
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    async fn active() -> (EngagementEngine, Actor, Actor, CommitmentId) {
        let engine = EngagementEngine::new(
            Box::new(InMemoryTeachingRequestStore::new()),
            Box::new(InMemoryCommitmentStore::new()),
            Box::new(InMemorySessionStore::new()),
        );
        let student = Actor::student(UserId::new());
        let tutor = Actor::tutor(UserId::new());
        let request = engine
            .create_teaching_request(
                &student,
                NewTeachingRequest {
                    id: RequestId::new(),
                    tutor_id: tutor.id,
                    subject: "History".to_string(),
                    level: "GCSE".to_string(),
                    hourly_rate: Amount::new(dec!(20)).unwrap(),
                },
            )
            .await
            .unwrap();
        engine
            .respond_to_teaching_request(&tutor, request.id, RequestResponse::Accept)
            .await
            .unwrap();
        let commitment = engine
            .create_learning_commitment(
                &student,
                NewCommitment {
                    id: CommitmentId::new(),
                    teaching_request_id: request.id,
                    total_sessions: 4,
                    sessions_per_week: 1,
                    start_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                    hours_per_session: dec!(1),
                },
            )
            .await
            .unwrap();
        engine
            .handle_payment_event(PaymentEvent::Confirmed {
                commitment_id: commitment.id,
                amount: commitment.total_amount,
            })
            .await
            .unwrap();
        (engine, student, tutor, commitment.id)
    }

    #[tokio::test]
    async fn test_second_request_sees_open_negotiation() {
        let (engine, student, tutor, id) = active().await;
        engine
            .request_cancellation(&student, id, "Relocating".to_string(), None)
            .await
            .unwrap();

        match engine
            .request_cancellation(&tutor, id, "Too busy".to_string(), None)
            .await
        {
            Err(EngineError::NegotiationInProgress { current }) => {
                let decision = current.cancellation_decision().unwrap();
                assert_eq!(decision.requester_reason, "Relocating");
            }
            other => panic!("expected NegotiationInProgress, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_only_counterpart_may_answer() {
        let (engine, student, tutor, id) = active().await;
        engine
            .request_cancellation(&student, id, "Relocating".to_string(), None)
            .await
            .unwrap();

        let stranger = Actor::tutor(UserId::new());
        for actor in [&student, &stranger] {
            assert!(matches!(
                engine.respond_to_cancellation(actor, id, true, None).await,
                Err(EngineError::Unauthorized { .. })
            ));
        }

        let cancelled = engine
            .respond_to_cancellation(&tutor, id, true, None)
            .await
            .unwrap();
        assert_eq!(cancelled.status(), CommitmentStatus::Cancelled);
        assert!(!cancelled.is_money_transferred);
    }

    #[tokio::test]
    async fn test_withdraw_then_escalate() {
        let (engine, student, tutor, id) = active().await;
        engine
            .request_cancellation(&tutor, id, "Schedule".to_string(), None)
            .await
            .unwrap();
        let resumed = engine.withdraw_cancellation(&tutor, id).await.unwrap();
        assert_eq!(resumed.status(), CommitmentStatus::Active);

        engine
            .request_cancellation(&tutor, id, "Schedule".to_string(), None)
            .await
            .unwrap();
        let review = engine.escalate_cancellation(&student, id).await.unwrap();
        assert_eq!(review.status(), CommitmentStatus::AdminReview);
    }

    #[tokio::test]
    async fn test_stale_negotiation_call_returns_current_commitment() {
        let (engine, student, tutor, id) = active().await;
        engine
            .request_cancellation(&student, id, "Relocating".to_string(), None)
            .await
            .unwrap();
        engine
            .respond_to_cancellation(&tutor, id, true, None)
            .await
            .unwrap();

        for err in [
            engine.withdraw_cancellation(&student, id).await.unwrap_err(),
            engine
                .respond_to_cancellation(&tutor, id, false, None)
                .await
                .unwrap_err(),
        ] {
            assert!(matches!(err, EngineError::InvalidTransition { .. }));
            match err.current_state() {
                Some(Snapshot::LearningCommitment(current)) => {
                    assert_eq!(current.id, id);
                    assert_eq!(current.status(), CommitmentStatus::Cancelled);
                }
                other => panic!("expected the current commitment, got {other:?}"),
            }
        }
    }
}
