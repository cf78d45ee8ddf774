//! Learning commitment lifecycle and cancellation negotiation.
//!
//! ```text
//! pending_agreement --payment--> active --all sessions done--> completed
//!        |                         |  ^
//!        v                         v  | withdraw / admin reject
//!     rejected           cancellation_pending --reject/escalate--> admin_review
//!                                  |                                   |
//!                                  +------- accept ----> cancelled <---+ admin approve
//! ```
//!
//! The open cancellation decision lives inside the state itself, so a decision
//! exists exactly when the commitment is negotiating or under admin review.

use super::audit::AuditLog;
use super::identity::{CommitmentId, Party, RequestId, SessionId, UserId};
use super::money::{Amount, Balance};
use super::session::{Absentee, Session, SessionDecision, SessionOutcome, SessionStatus};
use super::teaching_request::{RequestStatus, TeachingRequest};
use crate::error::{EngineError, Result, Snapshot};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentStatus {
    PendingAgreement,
    Active,
    CancellationPending,
    AdminReview,
    Completed,
    Cancelled,
    Rejected,
}

impl CommitmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Rejected)
    }
}

impl fmt::Display for CommitmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PendingAgreement => "pending_agreement",
            Self::Active => "active",
            Self::CancellationPending => "cancellation_pending",
            Self::AdminReview => "admin_review",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// How far the non-requesting side has taken an open cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum NegotiationStep {
    AwaitingResponse,
    RejectedByCounterpart {
        reason: Option<String>,
        decided_at: DateTime<Utc>,
    },
    Escalated {
        by: Party,
        escalated_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    Pending,
    Accepted,
    Rejected,
}

/// One party's position, in the `{status, reason?}` shape clients display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideDecision {
    pub status: DecisionStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationDecision {
    pub requested_by: Party,
    pub requested_at: DateTime<Utc>,
    pub requester_reason: String,
    pub evidence_link: Option<String>,
    pub step: NegotiationStep,
}

impl CancellationDecision {
    pub fn side(&self, party: Party) -> SideDecision {
        if party == self.requested_by {
            return SideDecision {
                status: DecisionStatus::Accepted,
                reason: Some(self.requester_reason.clone()),
            };
        }
        match &self.step {
            NegotiationStep::RejectedByCounterpart { reason, .. } => SideDecision {
                status: DecisionStatus::Rejected,
                reason: reason.clone(),
            },
            _ => SideDecision {
                status: DecisionStatus::Pending,
                reason: None,
            },
        }
    }

    pub fn admin_review_required(&self) -> bool {
        !matches!(self.step, NegotiationStep::AwaitingResponse)
    }
}

/// How an archived cancellation negotiation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancellationOutcome {
    AcceptedByCounterpart { reason: Option<String> },
    Withdrawn,
    ApprovedByAdmin {
        admin_id: UserId,
        admin_notes: Option<String>,
    },
    RejectedByAdmin {
        admin_id: UserId,
        admin_notes: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedCancellation {
    pub decision: CancellationDecision,
    pub outcome: CancellationOutcome,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    ResolveDisagreement,
    ApproveCancellation,
    RejectCancellation,
    CloseEarly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "status", rename_all = "snake_case")]
pub enum ResultingStatus {
    Commitment(CommitmentStatus),
    Session(SessionStatus),
}

/// Audit entry for one admin action; required for any money-movement decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminDisputeLog {
    pub action: AdminAction,
    pub admin_id: UserId,
    pub recorded_at: DateTime<Utc>,
    pub cancellation_snapshot: Option<CancellationDecision>,
    pub session_id: Option<SessionId>,
    pub resulting_status: ResultingStatus,
    pub admin_notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AbsenceStats {
    pub student_absences: u32,
    pub tutor_absences: u32,
    pub mutual_absences: u32,
}

impl AbsenceStats {
    pub fn record(&mut self, absentee: Absentee) {
        match absentee {
            Absentee::Student => self.student_absences += 1,
            Absentee::Tutor => self.tutor_absences += 1,
            Absentee::Mutual => self.mutual_absences += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.student_absences + self.tutor_absences + self.mutual_absences
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionReason {
    AllSessionsCompleted,
    ClosedEarly { closed_by: UserId, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommitmentState {
    PendingAgreement,
    Active,
    CancellationPending { decision: CancellationDecision },
    AdminReview { decision: CancellationDecision },
    Completed { reason: CompletionReason },
    Cancelled,
    Rejected { reason: Option<String> },
}

impl CommitmentState {
    pub fn status(&self) -> CommitmentStatus {
        match self {
            Self::PendingAgreement => CommitmentStatus::PendingAgreement,
            Self::Active => CommitmentStatus::Active,
            Self::CancellationPending { .. } => CommitmentStatus::CancellationPending,
            Self::AdminReview { .. } => CommitmentStatus::AdminReview,
            Self::Completed { .. } => CommitmentStatus::Completed,
            Self::Cancelled => CommitmentStatus::Cancelled,
            Self::Rejected { .. } => CommitmentStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCommitment {
    #[serde(default)]
    pub id: CommitmentId,
    pub teaching_request_id: RequestId,
    pub total_sessions: u32,
    pub sessions_per_week: u32,
    pub start_date: NaiveDate,
    pub hours_per_session: Decimal,
}

/// Result of rolling one session outcome into the commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tally {
    Applied,
    AlreadyTallied,
    /// A completed session arrived after the count was already full.
    Saturated,
}

/// The funded contract for a fixed number of sessions between one student and one tutor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningCommitment {
    pub id: CommitmentId,
    pub tutor_id: UserId,
    pub student_id: UserId,
    pub teaching_request_id: RequestId,
    pub total_sessions: u32,
    pub completed_sessions: u32,
    pub sessions_per_week: u32,
    pub start_date: NaiveDate,
    pub total_amount: Amount,
    pub student_paid_amount: Balance,
    pub is_money_transferred: bool,
    pub state: CommitmentState,
    pub cancellation_history: AuditLog<ArchivedCancellation>,
    pub admin_dispute_logs: AuditLog<AdminDisputeLog>,
    pub absence_stats: AbsenceStats,
    pub tallied_sessions: BTreeSet<SessionId>,
    /// Terminal with every session final and tallied; nothing left to reconcile.
    #[serde(default)]
    pub settled: bool,
    pub created_at: DateTime<Utc>,
    pub revision: u64,
}

impl LearningCommitment {
    /// Derives an unfunded commitment from an accepted teaching request.
    ///
    /// `total_amount` is `hourly_rate * hours_per_session * total_sessions`.
    pub fn new(request: &TeachingRequest, new: NewCommitment, now: DateTime<Utc>) -> Result<Self> {
        if request.status != RequestStatus::Accepted {
            return Err(EngineError::InvalidTransition {
                from: request.status.to_string(),
                action: "create a commitment from",
                current: Box::new(Snapshot::TeachingRequest(request.clone())),
            });
        }
        if new.teaching_request_id != request.id {
            return Err(EngineError::ValidationError(format!(
                "Commitment references request {} but was built from {}",
                new.teaching_request_id, request.id
            )));
        }
        if new.total_sessions == 0 || new.sessions_per_week == 0 {
            return Err(EngineError::ValidationError(
                "A commitment needs at least one session and one session per week".to_string(),
            ));
        }
        let total_amount = request
            .hourly_rate
            .times(new.hours_per_session)
            .and_then(|per_session| per_session.times(Decimal::from(new.total_sessions)))
            .map_err(|_| {
                EngineError::ValidationError("hours_per_session must be positive".to_string())
            })?;

        Ok(Self {
            id: new.id,
            tutor_id: request.tutor_id,
            student_id: request.student_id,
            teaching_request_id: request.id,
            total_sessions: new.total_sessions,
            completed_sessions: 0,
            sessions_per_week: new.sessions_per_week,
            start_date: new.start_date,
            total_amount,
            student_paid_amount: Balance::ZERO,
            is_money_transferred: false,
            state: CommitmentState::PendingAgreement,
            cancellation_history: AuditLog::new(),
            admin_dispute_logs: AuditLog::new(),
            absence_stats: AbsenceStats::default(),
            tallied_sessions: BTreeSet::new(),
            settled: false,
            created_at: now,
            revision: 0,
        })
    }

    pub fn status(&self) -> CommitmentStatus {
        self.state.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// The open cancellation decision, present only while negotiating or under review.
    pub fn cancellation_decision(&self) -> Option<&CancellationDecision> {
        match &self.state {
            CommitmentState::CancellationPending { decision }
            | CommitmentState::AdminReview { decision } => Some(decision),
            _ => None,
        }
    }

    pub fn user_of(&self, party: Party) -> UserId {
        match party {
            Party::Student => self.student_id,
            Party::Tutor => self.tutor_id,
        }
    }

    fn invalid(&self, action: &'static str) -> EngineError {
        EngineError::InvalidTransition {
            from: self.status().to_string(),
            action,
            current: Box::new(Snapshot::LearningCommitment(self.clone())),
        }
    }

    /// Accumulates a confirmed payment; returns true when it activated the commitment.
    pub fn apply_payment(&mut self, amount: Amount) -> Result<bool> {
        if self.state != CommitmentState::PendingAgreement {
            return Err(self.invalid("apply a payment to"));
        }
        self.student_paid_amount += amount;
        if self.student_paid_amount.covers(self.total_amount) {
            self.state = CommitmentState::Active;
            return Ok(true);
        }
        Ok(false)
    }

    /// Either party walks away before the commitment was funded.
    pub fn withdraw(&mut self, reason: Option<String>) -> Result<()> {
        if self.state != CommitmentState::PendingAgreement {
            return Err(self.invalid("withdraw"));
        }
        self.state = CommitmentState::Rejected { reason };
        Ok(())
    }

    /// Rolls a terminal session result into the counters, at most once per session.
    pub fn tally(&mut self, session_id: SessionId, outcome: SessionOutcome) -> Tally {
        if self.tallied_sessions.contains(&session_id) {
            return Tally::AlreadyTallied;
        }
        let tally = match outcome {
            SessionOutcome::Completed if self.completed_sessions >= self.total_sessions => {
                Tally::Saturated
            }
            SessionOutcome::Completed => {
                self.completed_sessions += 1;
                Tally::Applied
            }
            SessionOutcome::NotConducted(absentee) => {
                self.absence_stats.record(absentee);
                Tally::Applied
            }
        };
        self.tallied_sessions.insert(session_id);
        tally
    }

    /// Completes an active commitment whose sessions are all done and undisputed.
    /// Returns true when this call completed it.
    pub fn try_complete(&mut self, open_disputes: bool) -> bool {
        if self.state != CommitmentState::Active
            || self.completed_sessions < self.total_sessions
            || open_disputes
        {
            return false;
        }
        self.state = CommitmentState::Completed {
            reason: CompletionReason::AllSessionsCompleted,
        };
        self.is_money_transferred = true;
        true
    }

    /// Marks a terminal commitment settled once every one of its `sessions` is
    /// final and each outcome is tallied. Returns true when this call settled it.
    pub fn settle(&mut self, sessions: &[Session]) -> bool {
        if self.settled || !self.is_terminal() {
            return false;
        }
        let done = sessions.iter().all(|s| {
            !s.status.is_live()
                && (s.outcome().is_none() || self.tallied_sessions.contains(&s.id))
        });
        self.settled = done;
        done
    }

    /// Admin closes an active commitment before all sessions took place.
    pub fn close_early(
        &mut self,
        admin_id: UserId,
        reason: String,
        open_disputes: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.state != CommitmentState::Active {
            return Err(self.invalid("close early"));
        }
        if open_disputes {
            return Err(EngineError::ValidationError(
                "Resolve open session disputes before closing the commitment".to_string(),
            ));
        }
        if reason.trim().is_empty() {
            return Err(EngineError::ValidationError(
                "Closing early requires a reason".to_string(),
            ));
        }

        self.state = CommitmentState::Completed {
            reason: CompletionReason::ClosedEarly {
                closed_by: admin_id,
                reason: reason.clone(),
            },
        };
        self.is_money_transferred = true;
        self.admin_dispute_logs.append(AdminDisputeLog {
            action: AdminAction::CloseEarly,
            admin_id,
            recorded_at: now,
            cancellation_snapshot: None,
            session_id: None,
            resulting_status: ResultingStatus::Commitment(CommitmentStatus::Completed),
            admin_notes: Some(reason),
        });
        Ok(())
    }

    pub fn request_cancellation(
        &mut self,
        requester: Party,
        reason: String,
        evidence_link: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self.state {
            CommitmentState::Active => {}
            CommitmentState::CancellationPending { .. } | CommitmentState::AdminReview { .. } => {
                return Err(EngineError::NegotiationInProgress {
                    current: Box::new(self.clone()),
                });
            }
            _ => return Err(self.invalid("request cancellation of")),
        }
        if reason.trim().is_empty() {
            return Err(EngineError::ValidationError(
                "A cancellation request needs a reason".to_string(),
            ));
        }

        self.state = CommitmentState::CancellationPending {
            decision: CancellationDecision {
                requested_by: requester,
                requested_at: now,
                requester_reason: reason,
                evidence_link,
                step: NegotiationStep::AwaitingResponse,
            },
        };
        Ok(())
    }

    /// The counterpart answers. Acceptance cancels; rejection always goes to an admin.
    pub fn respond_to_cancellation(
        &mut self,
        responder: Party,
        accepted: bool,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CommitmentStatus> {
        let requested_by = match &self.state {
            CommitmentState::CancellationPending { decision } => decision.requested_by,
            _ => return Err(self.invalid("respond to a cancellation of")),
        };
        if responder == requested_by {
            return Err(EngineError::Unauthorized {
                actor: self.user_of(responder),
                action: "respond to their own cancellation request",
            });
        }

        let CommitmentState::CancellationPending { mut decision } =
            std::mem::replace(&mut self.state, CommitmentState::Cancelled)
        else {
            return Err(self.invalid("respond to a cancellation of"));
        };

        if accepted {
            self.cancellation_history.append(ArchivedCancellation {
                decision,
                outcome: CancellationOutcome::AcceptedByCounterpart { reason },
                closed_at: now,
            });
            self.state = CommitmentState::Cancelled;
        } else {
            decision.step = NegotiationStep::RejectedByCounterpart {
                reason,
                decided_at: now,
            };
            self.state = CommitmentState::AdminReview { decision };
        }
        Ok(self.status())
    }

    /// The requester takes the request back before it was contested.
    pub fn withdraw_cancellation(&mut self, party: Party, now: DateTime<Utc>) -> Result<()> {
        let requested_by = match &self.state {
            CommitmentState::CancellationPending { decision } => decision.requested_by,
            _ => return Err(self.invalid("withdraw the cancellation of")),
        };
        if party != requested_by {
            return Err(EngineError::Unauthorized {
                actor: self.user_of(party),
                action: "withdraw a cancellation they did not request",
            });
        }

        if let CommitmentState::CancellationPending { decision } =
            std::mem::replace(&mut self.state, CommitmentState::Active)
        {
            self.cancellation_history.append(ArchivedCancellation {
                decision,
                outcome: CancellationOutcome::Withdrawn,
                closed_at: now,
            });
        }
        Ok(())
    }

    /// Either party hands the negotiation to an admin, so neither can stall it.
    pub fn escalate_cancellation(&mut self, party: Party, now: DateTime<Utc>) -> Result<()> {
        if !matches!(self.state, CommitmentState::CancellationPending { .. }) {
            return Err(self.invalid("escalate the cancellation of"));
        }
        if let CommitmentState::CancellationPending { mut decision } =
            std::mem::replace(&mut self.state, CommitmentState::Active)
        {
            decision.step = NegotiationStep::Escalated {
                by: party,
                escalated_at: now,
            };
            self.state = CommitmentState::AdminReview { decision };
        }
        Ok(())
    }

    /// Admin settles a contested cancellation. Approval cancels, rejection
    /// reinstates the commitment. Appends exactly one admin log entry.
    pub fn settle_cancellation(
        &mut self,
        admin_id: UserId,
        approve: bool,
        admin_notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CommitmentStatus> {
        if !matches!(self.state, CommitmentState::AdminReview { .. }) {
            return Err(self.invalid(if approve {
                "approve the cancellation of"
            } else {
                "reject the cancellation of"
            }));
        }
        let CommitmentState::AdminReview { decision } =
            std::mem::replace(&mut self.state, CommitmentState::Active)
        else {
            return Err(self.invalid("settle the cancellation of"));
        };

        let (action, outcome) = if approve {
            self.state = CommitmentState::Cancelled;
            (
                AdminAction::ApproveCancellation,
                CancellationOutcome::ApprovedByAdmin {
                    admin_id,
                    admin_notes: admin_notes.clone(),
                },
            )
        } else {
            (
                AdminAction::RejectCancellation,
                CancellationOutcome::RejectedByAdmin {
                    admin_id,
                    admin_notes: admin_notes.clone(),
                },
            )
        };

        self.admin_dispute_logs.append(AdminDisputeLog {
            action,
            admin_id,
            recorded_at: now,
            cancellation_snapshot: Some(decision.clone()),
            session_id: None,
            resulting_status: ResultingStatus::Commitment(self.status()),
            admin_notes,
        });
        self.cancellation_history.append(ArchivedCancellation {
            decision,
            outcome,
            closed_at: now,
        });
        Ok(self.status())
    }

    /// Records an admin session-dispute decision in the commitment's audit trail.
    /// A session is logged at most once; returns false for a repeat.
    pub fn log_dispute_resolution(
        &mut self,
        admin_id: UserId,
        session_id: SessionId,
        decision: SessionDecision,
        admin_notes: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        let already_logged = self.admin_dispute_logs.iter().any(|log| {
            log.action == AdminAction::ResolveDisagreement && log.session_id == Some(session_id)
        });
        if already_logged {
            return false;
        }
        self.admin_dispute_logs.append(AdminDisputeLog {
            action: AdminAction::ResolveDisagreement,
            admin_id,
            recorded_at: now,
            cancellation_snapshot: self.cancellation_decision().cloned(),
            session_id: Some(session_id),
            resulting_status: ResultingStatus::Session(decision.into()),
            admin_notes,
        });
        true
    }
}
