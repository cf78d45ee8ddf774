use super::identity::{CommitmentId, Party, RequestId, SessionId, UserId};
use super::money::{Amount, Balance};
use super::session::{Absentee, CancelledBy, SessionDecision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Facts the engine publishes for notifiers and other subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    TeachingRequestCreated {
        request_id: RequestId,
        student_id: UserId,
        tutor_id: UserId,
    },
    TeachingRequestAccepted {
        request_id: RequestId,
    },
    TeachingRequestRejected {
        request_id: RequestId,
        reason: Option<String>,
    },
    CommitmentCreated {
        commitment_id: CommitmentId,
        request_id: RequestId,
    },
    PaymentRequired {
        commitment_id: CommitmentId,
        amount: Amount,
    },
    PaymentReceived {
        commitment_id: CommitmentId,
        amount: Amount,
        paid_so_far: Balance,
    },
    PaymentFailed {
        commitment_id: CommitmentId,
    },
    CommitmentActivated {
        commitment_id: CommitmentId,
    },
    CommitmentCompleted {
        commitment_id: CommitmentId,
        completed_sessions: u32,
    },
    CommitmentCancelled {
        commitment_id: CommitmentId,
        completed_sessions: u32,
        total_sessions: u32,
        student_paid_amount: Balance,
    },
    CommitmentRejected {
        commitment_id: CommitmentId,
    },
    SessionCreated {
        session_id: SessionId,
        commitment_id: CommitmentId,
        start_time: DateTime<Utc>,
    },
    SessionConfirmed {
        session_id: SessionId,
    },
    AttendanceReported {
        session_id: SessionId,
        party: Party,
        attended: bool,
    },
    AbsenceSynthesized {
        session_id: SessionId,
        party: Party,
    },
    SessionCompleted {
        session_id: SessionId,
    },
    SessionNotConducted {
        session_id: SessionId,
        absentee: Absentee,
    },
    SessionDisputed {
        session_id: SessionId,
        opened_by: Party,
    },
    DisputeResolved {
        session_id: SessionId,
        decision: SessionDecision,
    },
    SessionCancelled {
        session_id: SessionId,
        cancelled_by: CancelledBy,
    },
    SessionRejected {
        session_id: SessionId,
    },
    CancellationRequested {
        commitment_id: CommitmentId,
        requested_by: Party,
    },
    CancellationWithdrawn {
        commitment_id: CommitmentId,
    },
    CancellationEscalated {
        commitment_id: CommitmentId,
    },
    CancellationApproved {
        commitment_id: CommitmentId,
    },
    CancellationRejected {
        commitment_id: CommitmentId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event: DomainEvent,
}

impl EventEnvelope {
    pub fn new(event: DomainEvent, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at,
            event,
        }
    }
}
