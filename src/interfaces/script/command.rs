use crate::application::commitments::PaymentEvent;
use crate::application::sessions::AttendanceReport;
use crate::domain::commitment::NewCommitment;
use crate::domain::identity::{Actor, CommitmentId, RequestId, SessionId};
use crate::domain::session::{NewSession, SessionDecision};
use crate::domain::teaching_request::{NewTeachingRequest, RequestResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped command of a replay script.
///
/// ```json
/// {"at":"2026-03-02T10:05:00Z","actor":{"id":"...","role":"tutor"},"op":"confirm_session","session_id":"..."}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptLine {
    /// The engine clock is moved to this instant before the command runs.
    pub at: DateTime<Utc>,
    /// Caller of the command. Omitted for gateway events and sweeps.
    #[serde(default)]
    pub actor: Option<Actor>,
    #[serde(flatten)]
    pub op: Operation,
}

/// Every engine operation a script can drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateTeachingRequest(NewTeachingRequest),
    RespondToTeachingRequest {
        request_id: RequestId,
        response: RequestResponse,
    },
    CreateLearningCommitment(NewCommitment),
    Payment {
        event: PaymentEvent,
    },
    WithdrawCommitment {
        commitment_id: CommitmentId,
        #[serde(default)]
        reason: Option<String>,
    },
    CloseEarly {
        commitment_id: CommitmentId,
        reason: String,
    },
    CreateSession(NewSession),
    ConfirmSession {
        session_id: SessionId,
    },
    RejectSession {
        session_id: SessionId,
        reason: String,
    },
    CancelSession {
        session_id: SessionId,
        reason: String,
    },
    ReportAttendance {
        session_id: SessionId,
        report: AttendanceReport,
    },
    ResolveDispute {
        session_id: SessionId,
        decision: SessionDecision,
        #[serde(default)]
        admin_notes: Option<String>,
    },
    RequestCancellation {
        commitment_id: CommitmentId,
        reason: String,
        #[serde(default)]
        evidence_link: Option<String>,
    },
    RespondToCancellation {
        commitment_id: CommitmentId,
        accepted: bool,
        #[serde(default)]
        reason: Option<String>,
    },
    WithdrawCancellation {
        commitment_id: CommitmentId,
    },
    EscalateCancellation {
        commitment_id: CommitmentId,
    },
    ApproveCancellation {
        commitment_id: CommitmentId,
        #[serde(default)]
        admin_notes: Option<String>,
    },
    RejectCancellation {
        commitment_id: CommitmentId,
        #[serde(default)]
        admin_notes: Option<String>,
    },
    Sweep,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateTeachingRequest(_) => "create_teaching_request",
            Operation::RespondToTeachingRequest { .. } => "respond_to_teaching_request",
            Operation::CreateLearningCommitment(_) => "create_learning_commitment",
            Operation::Payment { .. } => "payment",
            Operation::WithdrawCommitment { .. } => "withdraw_commitment",
            Operation::CloseEarly { .. } => "close_early",
            Operation::CreateSession(_) => "create_session",
            Operation::ConfirmSession { .. } => "confirm_session",
            Operation::RejectSession { .. } => "reject_session",
            Operation::CancelSession { .. } => "cancel_session",
            Operation::ReportAttendance { .. } => "report_attendance",
            Operation::ResolveDispute { .. } => "resolve_dispute",
            Operation::RequestCancellation { .. } => "request_cancellation",
            Operation::RespondToCancellation { .. } => "respond_to_cancellation",
            Operation::WithdrawCancellation { .. } => "withdraw_cancellation",
            Operation::EscalateCancellation { .. } => "escalate_cancellation",
            Operation::ApproveCancellation { .. } => "approve_cancellation",
            Operation::RejectCancellation { .. } => "reject_cancellation",
            Operation::Sweep => "sweep",
        }
    }
}
