use super::engine::EngagementEngine;
use crate::domain::commitment::{CommitmentStatus, LearningCommitment};
use crate::domain::events::DomainEvent;
use crate::domain::identity::{Actor, CommitmentId, Party, SessionId, party_of};
use crate::domain::session::{
    AttendanceConfirmation, CancelledBy, NewSession, Session, SessionOutcome, SessionStatus,
    Transition,
};
use crate::error::{EngineError, Result, Snapshot};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One party's attendance claim for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceReport {
    pub attended: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub evidence_urls: Vec<String>,
}

/// Parties whose half went from pending to a synthesized absence.
pub(crate) fn newly_synthesized(
    before: &AttendanceConfirmation,
    after: &AttendanceConfirmation,
) -> Vec<Party> {
    Party::BOTH
        .into_iter()
        .filter(|p| before.side(*p).is_pending() && after.side(*p).is_synthesized())
        .collect()
}

impl EngagementEngine {
    /// Schedules a session under an active commitment.
    pub async fn create_session(&self, actor: &Actor, new: NewSession) -> Result<Session> {
        let commitment: LearningCommitment = self
            .load(&*self.commitments, new.learning_commitment_id)
            .await?;
        let party = party_of(
            actor,
            commitment.student_id,
            commitment.tutor_id,
            "schedule a session under another pair's commitment",
        )?;
        if commitment.status() != CommitmentStatus::Active {
            return Err(EngineError::InvalidTransition {
                from: commitment.status().to_string(),
                action: "schedule a session under",
                current: Box::new(Snapshot::LearningCommitment(commitment)),
            });
        }

        let existing = self.sessions.for_commitment(commitment.id).await?;
        let live = existing.iter().filter(|s| s.status.is_live()).count() as u32;
        if live + commitment.completed_sessions >= commitment.total_sessions {
            return Err(EngineError::ValidationError(format!(
                "All {} sessions of commitment {} are already scheduled or completed",
                commitment.total_sessions, commitment.id
            )));
        }

        let session = Session::new(new, party, self.config().grace_period(), self.now())?;
        self.sessions.insert(session.clone()).await?;
        info!(
            session_id = %session.id,
            commitment_id = %commitment.id,
            created_by = %party,
            start_time = %session.start_time,
            "Session scheduled"
        );

        self.emit(DomainEvent::SessionCreated {
            session_id: session.id,
            commitment_id: commitment.id,
            start_time: session.start_time,
        })
        .await;
        Ok(session)
    }

    /// Records the actor's intent to attend; confirms once both parties did.
    pub async fn confirm_session(&self, actor: &Actor, session_id: SessionId) -> Result<Session> {
        let party = self
            .session_party(actor, session_id, "confirm a session of another pair")
            .await?;
        let (session, transition) = self
            .mutate(&*self.sessions, session_id, |s: &mut Session, now| {
                s.confirm(party, now)
            })
            .await?;
        info!(session_id = %session_id, party = %party, ?transition, "Session intent recorded");

        self.publish_session_transition(&session, transition, &[])
            .await?;
        Ok(session)
    }

    /// The invited party declines a proposed session.
    pub async fn reject_session(
        &self,
        actor: &Actor,
        session_id: SessionId,
        reason: String,
    ) -> Result<Session> {
        let party = self
            .session_party(actor, session_id, "reject a session of another pair")
            .await?;
        let (session, transition) = self
            .mutate(&*self.sessions, session_id, |s: &mut Session, now| {
                s.reject(party, reason.clone(), now)
            })
            .await?;
        info!(session_id = %session_id, party = %party, "Session rejected");

        self.publish_session_transition(&session, transition, &[])
            .await?;
        Ok(session)
    }

    /// Either party calls off a session before it starts.
    pub async fn cancel_session(
        &self,
        actor: &Actor,
        session_id: SessionId,
        reason: String,
    ) -> Result<Session> {
        let party = self
            .session_party(actor, session_id, "cancel a session of another pair")
            .await?;
        let (session, transition) = self
            .mutate(&*self.sessions, session_id, |s: &mut Session, now| {
                s.cancel(party, reason.clone(), now)
            })
            .await?;
        info!(session_id = %session_id, party = %party, "Session cancelled");

        self.publish_session_transition(&session, transition, &[])
            .await?;
        Ok(session)
    }

    /// Records one party's attendance claim and resolves the session when
    /// both halves are known.
    pub async fn report_attendance(
        &self,
        actor: &Actor,
        session_id: SessionId,
        report: AttendanceReport,
    ) -> Result<Session> {
        let party = self
            .session_party(actor, session_id, "report attendance for another pair")
            .await?;
        let (session, (transition, synthesized)) = self
            .mutate(&*self.sessions, session_id, |s: &mut Session, now| {
                let before = s.attendance;
                let transition = s.report_attendance(
                    party,
                    report.attended,
                    report.reason.clone(),
                    report.evidence_urls.clone(),
                    now,
                )?;
                Ok((transition, newly_synthesized(&before, &s.attendance)))
            })
            .await?;
        info!(
            session_id = %session_id,
            party = %party,
            attended = report.attended,
            status = %session.status,
            "Attendance reported"
        );

        self.emit(DomainEvent::AttendanceReported {
            session_id,
            party,
            attended: report.attended,
        })
        .await;
        self.publish_session_transition(&session, transition, &synthesized)
            .await?;
        Ok(session)
    }

    pub async fn get_session(&self, session_id: SessionId) -> Result<Session> {
        self.load(&*self.sessions, session_id).await
    }

    /// The sessions of a commitment, earliest first.
    pub async fn list_sessions(&self, commitment_id: CommitmentId) -> Result<Vec<Session>> {
        self.sessions.for_commitment(commitment_id).await
    }

    async fn session_party(
        &self,
        actor: &Actor,
        session_id: SessionId,
        action: &'static str,
    ) -> Result<Party> {
        let session: Session = self.load(&*self.sessions, session_id).await?;
        let commitment: LearningCommitment = self
            .load(&*self.commitments, session.learning_commitment_id)
            .await?;
        party_of(actor, commitment.student_id, commitment.tutor_id, action)
    }

    /// Publishes what a session transition did and rolls terminal outcomes up
    /// into the owning commitment.
    pub(crate) async fn publish_session_transition(
        &self,
        session: &Session,
        transition: Transition,
        synthesized: &[Party],
    ) -> Result<()> {
        for party in synthesized {
            info!(session_id = %session.id, party = %party, "Absence synthesized after deadline");
            self.emit(DomainEvent::AbsenceSynthesized {
                session_id: session.id,
                party: *party,
            })
            .await;
        }

        let Transition::Moved(status) = transition else {
            return Ok(());
        };
        let event = match status {
            SessionStatus::Scheduled => return Ok(()),
            SessionStatus::Confirmed => DomainEvent::SessionConfirmed {
                session_id: session.id,
            },
            SessionStatus::Completed => DomainEvent::SessionCompleted {
                session_id: session.id,
            },
            SessionStatus::NotConducted => match session.outcome() {
                Some(SessionOutcome::NotConducted(absentee)) => DomainEvent::SessionNotConducted {
                    session_id: session.id,
                    absentee,
                },
                _ => return Ok(()),
            },
            SessionStatus::Disputed => match &session.dispute {
                Some(dispute) => DomainEvent::SessionDisputed {
                    session_id: session.id,
                    opened_by: dispute.opened_by,
                },
                None => return Ok(()),
            },
            SessionStatus::Cancelled => DomainEvent::SessionCancelled {
                session_id: session.id,
                cancelled_by: session
                    .cancellation
                    .as_ref()
                    .map_or(CancelledBy::System, |c| c.cancelled_by),
            },
            SessionStatus::Rejected => DomainEvent::SessionRejected {
                session_id: session.id,
            },
        };
        self.emit(event).await;

        if session.outcome().is_some() {
            self.record_session_outcome(session).await?;
        }
        Ok(())
    }
}
