use super::engine::EngagementEngine;
use crate::domain::commitment::{CommitmentStatus, LearningCommitment, NewCommitment, Tally};
use crate::domain::events::DomainEvent;
use crate::domain::identity::{Actor, CommitmentId, party_of};
use crate::domain::money::Amount;
use crate::domain::session::{CancelledBy, DisputeInfo, DisputeResolution, Session, Transition};
use crate::domain::teaching_request::TeachingRequest;
use crate::error::{EngineError, Result, Snapshot};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A notification from the payment gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentEvent {
    Confirmed {
        commitment_id: CommitmentId,
        amount: Amount,
    },
    Failed {
        commitment_id: CommitmentId,
    },
}

impl EngagementEngine {
    /// Turns an accepted teaching request into an unfunded commitment and asks
    /// the payment gateway for the full price.
    pub async fn create_learning_commitment(
        &self,
        actor: &Actor,
        new: NewCommitment,
    ) -> Result<LearningCommitment> {
        let request: TeachingRequest = self.load(&*self.requests, new.teaching_request_id).await?;
        party_of(
            actor,
            request.student_id,
            request.tutor_id,
            "create a commitment for another pair",
        )?;
        if self.commitments.find_by_request(request.id).await?.is_some() {
            return Err(EngineError::InvalidTransition {
                from: request.status.to_string(),
                action: "create a second commitment from",
                current: Box::new(Snapshot::TeachingRequest(request)),
            });
        }

        let commitment = LearningCommitment::new(&request, new, self.now())?;
        self.commitments.insert(commitment.clone()).await?;
        info!(
            commitment_id = %commitment.id,
            request_id = %request.id,
            total_sessions = commitment.total_sessions,
            total_amount = %commitment.total_amount,
            "Learning commitment created"
        );

        self.emit(DomainEvent::CommitmentCreated {
            commitment_id: commitment.id,
            request_id: request.id,
        })
        .await;
        self.emit(DomainEvent::PaymentRequired {
            commitment_id: commitment.id,
            amount: commitment.total_amount,
        })
        .await;
        Ok(commitment)
    }

    /// Consumes a payment gateway notification.
    ///
    /// Confirmed payments accumulate; the commitment activates once they cover
    /// `total_amount`. A failed payment leaves the commitment untouched.
    pub async fn handle_payment_event(&self, event: PaymentEvent) -> Result<LearningCommitment> {
        match event {
            PaymentEvent::Confirmed {
                commitment_id,
                amount,
            } => {
                let (commitment, activated) = self
                    .mutate(&*self.commitments, commitment_id, |c: &mut LearningCommitment, _| {
                        c.apply_payment(amount)
                    })
                    .await?;
                info!(
                    commitment_id = %commitment_id,
                    amount = %amount,
                    paid = %commitment.student_paid_amount,
                    "Payment received"
                );
                self.emit(DomainEvent::PaymentReceived {
                    commitment_id,
                    amount,
                    paid_so_far: commitment.student_paid_amount,
                })
                .await;
                if activated {
                    info!(commitment_id = %commitment_id, "Commitment activated");
                    self.emit(DomainEvent::CommitmentActivated { commitment_id })
                        .await;
                }
                Ok(commitment)
            }
            PaymentEvent::Failed { commitment_id } => {
                let commitment: LearningCommitment = self.load(&*self.commitments, commitment_id).await?;
                warn!(commitment_id = %commitment_id, status = %commitment.status(), "Payment failed");
                self.emit(DomainEvent::PaymentFailed { commitment_id }).await;
                Ok(commitment)
            }
        }
    }

    /// Either party abandons a commitment that was never funded.
    pub async fn withdraw_commitment(
        &self,
        actor: &Actor,
        commitment_id: CommitmentId,
        reason: Option<String>,
    ) -> Result<LearningCommitment> {
        let (commitment, ()) = self
            .mutate(&*self.commitments, commitment_id, |c: &mut LearningCommitment, _| {
                party_of(actor, c.student_id, c.tutor_id, "withdraw from a commitment")?;
                c.withdraw(reason.clone())
            })
            .await?;
        info!(commitment_id = %commitment_id, "Commitment withdrawn before funding");

        self.commitment_ended(&commitment).await?;
        Ok(commitment)
    }

    /// Admin completes an active commitment before every session took place.
    pub async fn close_early(
        &self,
        actor: &Actor,
        commitment_id: CommitmentId,
        reason: String,
    ) -> Result<LearningCommitment> {
        let admin_id = actor.require_admin("close a commitment early")?;
        let open_disputes = self.has_open_disputes(commitment_id).await?;
        let (commitment, ()) = self
            .mutate(&*self.commitments, commitment_id, |c: &mut LearningCommitment, now| {
                c.close_early(admin_id, reason.clone(), open_disputes, now)
            })
            .await?;
        info!(
            commitment_id = %commitment_id,
            admin_id = %admin_id,
            completed_sessions = commitment.completed_sessions,
            "Commitment closed early"
        );

        self.emit(DomainEvent::CommitmentCompleted {
            commitment_id,
            completed_sessions: commitment.completed_sessions,
        })
        .await;
        self.void_open_sessions(commitment_id, "Commitment closed early")
            .await?;
        Ok(commitment)
    }

    pub async fn get_commitment(&self, commitment_id: CommitmentId) -> Result<LearningCommitment> {
        self.load(&*self.commitments, commitment_id).await
    }

    /// Every commitment, oldest first.
    pub async fn list_commitments(&self) -> Result<Vec<LearningCommitment>> {
        self.commitments.get_all().await
    }

    pub(crate) async fn has_open_disputes(&self, commitment_id: CommitmentId) -> Result<bool> {
        let sessions = self.sessions.for_commitment(commitment_id).await?;
        Ok(sessions.iter().any(Session::has_open_dispute))
    }

    /// Rolls a terminal session result into its commitment: the admin log for a
    /// resolved dispute, the tally, and completion when it is due. Every step is
    /// idempotent per session, so this is safe to repeat after a crash.
    ///
    /// Returns `None` when the session has no outcome to roll up yet.
    pub(crate) async fn record_session_outcome(&self, session: &Session) -> Result<Option<Tally>> {
        let Some(outcome) = session.outcome() else {
            return Ok(None);
        };
        let resolution = match &session.dispute {
            Some(DisputeInfo {
                resolution:
                    DisputeResolution::Resolved {
                        resolved_at,
                        resolved_by,
                        decision,
                        admin_notes,
                    },
                ..
            }) => Some((*resolved_at, *resolved_by, *decision, admin_notes.clone())),
            _ => None,
        };
        let open_disputes = self.has_open_disputes(session.learning_commitment_id).await?;

        let (commitment, (tally, completed)) = self
            .mutate(
                &*self.commitments,
                session.learning_commitment_id,
                |c: &mut LearningCommitment, _| {
                    if let Some((resolved_at, admin_id, decision, notes)) = &resolution {
                        c.log_dispute_resolution(
                            *admin_id,
                            session.id,
                            *decision,
                            notes.clone(),
                            *resolved_at,
                        );
                    }
                    let tally = c.tally(session.id, outcome);
                    Ok((tally, c.try_complete(open_disputes)))
                },
            )
            .await?;

        match tally {
            Tally::Applied => info!(
                commitment_id = %commitment.id,
                session_id = %session.id,
                completed_sessions = commitment.completed_sessions,
                total_sessions = commitment.total_sessions,
                absences = commitment.absence_stats.total(),
                "Session outcome rolled up"
            ),
            Tally::AlreadyTallied => debug!(
                commitment_id = %commitment.id,
                session_id = %session.id,
                "Session outcome already rolled up"
            ),
            Tally::Saturated => warn!(
                commitment_id = %commitment.id,
                session_id = %session.id,
                total_sessions = commitment.total_sessions,
                "Completed session beyond the commitment total; not counted"
            ),
        }
        if completed {
            self.commitment_completed(&commitment).await;
        }
        Ok(Some(tally))
    }

    /// Completes an active commitment whose sessions are all done, unless a
    /// dispute is still open. Returns true when this call completed it.
    pub(crate) async fn complete_if_due(&self, commitment_id: CommitmentId) -> Result<bool> {
        let open_disputes = self.has_open_disputes(commitment_id).await?;
        let (commitment, completed) = self
            .mutate(&*self.commitments, commitment_id, |c: &mut LearningCommitment, _| {
                Ok(c.try_complete(open_disputes))
            })
            .await?;
        if completed {
            self.commitment_completed(&commitment).await;
        }
        Ok(completed)
    }

    async fn commitment_completed(&self, commitment: &LearningCommitment) {
        info!(
            commitment_id = %commitment.id,
            completed_sessions = commitment.completed_sessions,
            "Commitment completed, money released to tutor"
        );
        self.emit(DomainEvent::CommitmentCompleted {
            commitment_id: commitment.id,
            completed_sessions: commitment.completed_sessions,
        })
        .await;
    }

    /// Publishes the end of a cancelled or rejected commitment and voids its
    /// sessions that have not taken place.
    pub(crate) async fn commitment_ended(&self, commitment: &LearningCommitment) -> Result<()> {
        let (event, reason) = match commitment.status() {
            CommitmentStatus::Cancelled => (
                DomainEvent::CommitmentCancelled {
                    commitment_id: commitment.id,
                    completed_sessions: commitment.completed_sessions,
                    total_sessions: commitment.total_sessions,
                    student_paid_amount: commitment.student_paid_amount,
                },
                "Commitment cancelled",
            ),
            CommitmentStatus::Rejected => (
                DomainEvent::CommitmentRejected {
                    commitment_id: commitment.id,
                },
                "Commitment rejected",
            ),
            _ => return Ok(()),
        };
        info!(commitment_id = %commitment.id, status = %commitment.status(), "Commitment ended");
        self.emit(event).await;
        self.void_open_sessions(commitment.id, reason).await?;
        Ok(())
    }

    /// Cancels every session of the commitment still waiting to take place.
    ///
    /// Sessions that have already started keep their reports and resolve as
    /// usual. A session that keeps losing write races is left for the
    /// sweeper's reconciliation pass. Returns how many sessions this call voided.
    pub(crate) async fn void_open_sessions(
        &self,
        commitment_id: CommitmentId,
        reason: &str,
    ) -> Result<usize> {
        let now = self.now();
        let mut voided = 0;
        for session in self.sessions.for_commitment(commitment_id).await? {
            if !session.is_upcoming(now) {
                continue;
            }
            match self
                .mutate(&*self.sessions, session.id, |s: &mut Session, now| {
                    Ok(s.void(reason, now))
                })
                .await
            {
                Ok((_, Transition::Moved(_))) => {
                    voided += 1;
                    self.emit(DomainEvent::SessionCancelled {
                        session_id: session.id,
                        cancelled_by: CancelledBy::System,
                    })
                    .await;
                }
                Ok(_) => {}
                Err(EngineError::ConflictingTransition { .. }) => {
                    warn!(
                        session_id = %session.id,
                        commitment_id = %commitment_id,
                        "Could not void session, leaving it to the sweeper"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        if voided > 0 {
            info!(commitment_id = %commitment_id, voided, "Voided open sessions");
        }
        Ok(voided)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::{RequestId, UserId};
    use crate::domain::teaching_request::{NewTeachingRequest, RequestResponse};
    use crate::infrastructure::events::InMemoryEventSink;
    use crate::infrastructure::in_memory::{
        InMemoryCommitmentStore, InMemorySessionStore, InMemoryTeachingRequestStore,
    };
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        engine: EngagementEngine,
        events: InMemoryEventSink,
        student: Actor,
        tutor: Actor,
        request_id: RequestId,
    }

    async fn accepted_request() -> Fixture {
        let events = InMemoryEventSink::new();
        let engine = EngagementEngine::new(
            Box::new(InMemoryTeachingRequestStore::new()),
            Box::new(InMemoryCommitmentStore::new()),
            Box::new(InMemorySessionStore::new()),
        )
        .with_event_sink(Arc::new(events.clone()));
        let student = Actor::student(UserId::new());
        let tutor = Actor::tutor(UserId::new());

        let request = engine
            .create_teaching_request(
                &student,
                NewTeachingRequest {
                    id: RequestId::new(),
                    tutor_id: tutor.id,
                    subject: "French".to_string(),
                    level: "B2".to_string(),
                    hourly_rate: Amount::new(dec!(20)).unwrap(),
                },
            )
            .await
            .unwrap();
        engine
            .respond_to_teaching_request(&tutor, request.id, RequestResponse::Accept)
            .await
            .unwrap();

        Fixture {
            engine,
            events,
            student,
            tutor,
            request_id: request.id,
        }
    }

    fn terms(request_id: RequestId) -> NewCommitment {
        NewCommitment {
            id: CommitmentId::new(),
            teaching_request_id: request_id,
            total_sessions: 5,
            sessions_per_week: 1,
            start_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            hours_per_session: dec!(1),
        }
    }

    #[tokio::test]
    async fn test_commitment_requires_payment_in_full() {
        let f = accepted_request().await;
        let commitment = f
            .engine
            .create_learning_commitment(&f.student, terms(f.request_id))
            .await
            .unwrap();
        assert_eq!(commitment.total_amount.value(), dec!(100));
        assert!(f.events.events().await.contains(&DomainEvent::PaymentRequired {
            commitment_id: commitment.id,
            amount: commitment.total_amount,
        }));

        let partial = f
            .engine
            .handle_payment_event(PaymentEvent::Confirmed {
                commitment_id: commitment.id,
                amount: Amount::new(dec!(60)).unwrap(),
            })
            .await
            .unwrap();
        assert_eq!(partial.status(), CommitmentStatus::PendingAgreement);

        let failed = f
            .engine
            .handle_payment_event(PaymentEvent::Failed {
                commitment_id: commitment.id,
            })
            .await
            .unwrap();
        assert_eq!(failed.student_paid_amount, partial.student_paid_amount);

        let funded = f
            .engine
            .handle_payment_event(PaymentEvent::Confirmed {
                commitment_id: commitment.id,
                amount: Amount::new(dec!(40)).unwrap(),
            })
            .await
            .unwrap();
        assert_eq!(funded.status(), CommitmentStatus::Active);
        assert!(f
            .events
            .events()
            .await
            .contains(&DomainEvent::CommitmentActivated {
                commitment_id: commitment.id
            }));
    }

    #[tokio::test]
    async fn test_one_commitment_per_request() {
        let f = accepted_request().await;
        f.engine
            .create_learning_commitment(&f.tutor, terms(f.request_id))
            .await
            .unwrap();

        let second = f
            .engine
            .create_learning_commitment(&f.student, terms(f.request_id))
            .await;
        assert!(matches!(second, Err(EngineError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_strangers_cannot_create_or_withdraw() {
        let f = accepted_request().await;
        let stranger = Actor::student(UserId::new());
        assert!(matches!(
            f.engine
                .create_learning_commitment(&stranger, terms(f.request_id))
                .await,
            Err(EngineError::Unauthorized { .. })
        ));

        let commitment = f
            .engine
            .create_learning_commitment(&f.student, terms(f.request_id))
            .await
            .unwrap();
        assert!(matches!(
            f.engine
                .withdraw_commitment(&stranger, commitment.id, None)
                .await,
            Err(EngineError::Unauthorized { .. })
        ));

        let withdrawn = f
            .engine
            .withdraw_commitment(&f.tutor, commitment.id, Some("No availability".to_string()))
            .await
            .unwrap();
        assert_eq!(withdrawn.status(), CommitmentStatus::Rejected);
        assert!(f
            .events
            .events()
            .await
            .contains(&DomainEvent::CommitmentRejected {
                commitment_id: commitment.id
            }));
    }

    #[tokio::test]
    async fn test_close_early_is_admin_only() {
        let f = accepted_request().await;
        let commitment = f
            .engine
            .create_learning_commitment(&f.student, terms(f.request_id))
            .await
            .unwrap();
        f.engine
            .handle_payment_event(PaymentEvent::Confirmed {
                commitment_id: commitment.id,
                amount: commitment.total_amount,
            })
            .await
            .unwrap();

        assert!(matches!(
            f.engine
                .close_early(&f.tutor, commitment.id, "Done".to_string())
                .await,
            Err(EngineError::Unauthorized { .. })
        ));

        let admin = Actor::admin(UserId::new());
        let closed = f
            .engine
            .close_early(&admin, commitment.id, "Goals reached".to_string())
            .await
            .unwrap();
        assert_eq!(closed.status(), CommitmentStatus::Completed);
        assert!(closed.is_money_transferred);
    }
}
