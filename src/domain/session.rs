//! Session attendance state machine.
//!
//! A session moves `SCHEDULED -> CONFIRMED` once both parties signal intent,
//! then resolves from the two independent attendance reports:
//!
//! - both attended: `COMPLETED`
//! - neither attended: `NOT_CONDUCTED`
//! - disagreement, including a synthesized absence against a human claim: `DISPUTED`
//!
//! `DISPUTED` only leaves through an admin decision. `CANCELLED` and `REJECTED`
//! end a session before it starts.

use super::audit::AuditLog;
use super::identity::{CommitmentId, Party, SessionId, UserId};
use crate::error::{EngineError, Result, Snapshot};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Scheduled,
    Confirmed,
    Completed,
    NotConducted,
    Cancelled,
    Rejected,
    Disputed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::NotConducted | Self::Cancelled | Self::Rejected
        )
    }

    /// Scheduled, confirmed or disputed: still holds a slot in the commitment.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Confirmed | Self::Disputed)
    }

    /// Still waiting for attendance reports.
    pub fn awaits_attendance(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Confirmed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scheduled => "SCHEDULED",
            Self::Confirmed => "CONFIRMED",
            Self::Completed => "COMPLETED",
            Self::NotConducted => "NOT_CONDUCTED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
            Self::Disputed => "DISPUTED",
        };
        f.write_str(name)
    }
}

/// Who produced an attendance report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportSource {
    Human,
    /// Synthesized by the deadline sweeper for a party that never reported.
    AbsentAuto,
}

/// One party's half of the attendance confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceHalf {
    #[default]
    Pending,
    Reported {
        attended: bool,
        decided_at: DateTime<Utc>,
        source: ReportSource,
    },
}

impl AttendanceHalf {
    pub fn attended(&self) -> Option<bool> {
        match self {
            AttendanceHalf::Pending => None,
            AttendanceHalf::Reported { attended, .. } => Some(*attended),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, AttendanceHalf::Pending)
    }

    pub fn is_synthesized(&self) -> bool {
        matches!(
            self,
            AttendanceHalf::Reported {
                source: ReportSource::AbsentAuto,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttendanceConfirmation {
    pub tutor: AttendanceHalf,
    pub student: AttendanceHalf,
}

impl AttendanceConfirmation {
    pub fn side(&self, party: Party) -> &AttendanceHalf {
        match party {
            Party::Tutor => &self.tutor,
            Party::Student => &self.student,
        }
    }

    fn side_mut(&mut self, party: Party) -> &mut AttendanceHalf {
        match party {
            Party::Tutor => &mut self.tutor,
            Party::Student => &mut self.student,
        }
    }

    pub fn both_attended(&self) -> bool {
        self.tutor.attended() == Some(true) && self.student.attended() == Some(true)
    }
}

/// Deadlines after which a missing report counts as an absence claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceWindow {
    pub tutor_deadline: DateTime<Utc>,
    pub student_deadline: DateTime<Utc>,
}

impl AttendanceWindow {
    pub fn after(end_time: DateTime<Utc>, grace_period: Duration) -> Self {
        let deadline = end_time + grace_period;
        Self {
            tutor_deadline: deadline,
            student_deadline: deadline,
        }
    }

    pub fn deadline(&self, party: Party) -> DateTime<Utc> {
        match party {
            Party::Tutor => self.tutor_deadline,
            Party::Student => self.student_deadline,
        }
    }

    pub fn earliest(&self) -> DateTime<Utc> {
        self.tutor_deadline.min(self.student_deadline)
    }
}

/// Pre-session intent to attend, per party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttendanceIntent {
    pub tutor: Option<DateTime<Utc>>,
    pub student: Option<DateTime<Utc>>,
}

impl AttendanceIntent {
    pub fn side(&self, party: Party) -> Option<DateTime<Utc>> {
        match party {
            Party::Tutor => self.tutor,
            Party::Student => self.student,
        }
    }

    fn set(&mut self, party: Party, at: DateTime<Utc>) {
        match party {
            Party::Tutor => self.tutor = Some(at),
            Party::Student => self.student = Some(at),
        }
    }

    pub fn both(&self) -> bool {
        self.tutor.is_some() && self.student.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceLogEntry {
    pub party: Party,
    pub attended: bool,
    pub recorded_at: DateTime<Utc>,
    pub source: ReportSource,
}

/// The two outcomes an admin may force on a disputed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionDecision {
    Completed,
    NotConducted,
}

impl From<SessionDecision> for SessionStatus {
    fn from(decision: SessionDecision) -> Self {
        match decision {
            SessionDecision::Completed => SessionStatus::Completed,
            SessionDecision::NotConducted => SessionStatus::NotConducted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeResolution {
    Open,
    Resolved {
        resolved_at: DateTime<Utc>,
        resolved_by: UserId,
        decision: SessionDecision,
        admin_notes: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeInfo {
    pub opened_by: Party,
    pub reason: String,
    pub evidence_urls: Vec<String>,
    pub opened_at: DateTime<Utc>,
    pub resolution: DisputeResolution,
}

impl DisputeInfo {
    pub fn is_open(&self) -> bool {
        self.resolution == DisputeResolution::Open
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelledBy {
    Student,
    Tutor,
    /// The owning commitment terminated and voided the session.
    System,
}

impl From<Party> for CancelledBy {
    fn from(party: Party) -> Self {
        match party {
            Party::Student => CancelledBy::Student,
            Party::Tutor => CancelledBy::Tutor,
        }
    }
}

/// Why a session ended before it took place (cancelled, rejected or voided).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationInfo {
    pub cancelled_by: CancelledBy,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

/// Which side a `NOT_CONDUCTED` session is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Absentee {
    Student,
    Tutor,
    Mutual,
}

impl From<Party> for Absentee {
    fn from(party: Party) -> Self {
        match party {
            Party::Student => Absentee::Student,
            Party::Tutor => Absentee::Tutor,
        }
    }
}

/// A terminal result that counts toward the owning commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    NotConducted(Absentee),
}

/// What a state machine operation did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Idempotent repeat; nothing changed.
    Unchanged,
    /// Recorded a partial update without moving the status.
    Recorded,
    /// Moved to a new status.
    Moved(SessionStatus),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    #[serde(default)]
    pub id: SessionId,
    pub learning_commitment_id: CommitmentId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub is_trial: bool,
}

/// One scheduled meeting under a learning commitment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub learning_commitment_id: CommitmentId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_trial: bool,
    pub created_by: Party,
    pub status: SessionStatus,
    pub intent: AttendanceIntent,
    pub attendance: AttendanceConfirmation,
    pub attendance_window: AttendanceWindow,
    pub attendance_log: AuditLog<AttendanceLogEntry>,
    pub dispute: Option<DisputeInfo>,
    pub cancellation: Option<CancellationInfo>,
    pub is_deleted: bool,
    pub revision: u64,
}

impl Session {
    pub fn new(
        new: NewSession,
        created_by: Party,
        grace_period: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if new.end_time <= new.start_time {
            return Err(EngineError::ValidationError(
                "Session must end after it starts".to_string(),
            ));
        }
        if new.start_time <= now {
            return Err(EngineError::ValidationError(
                "Session must start in the future".to_string(),
            ));
        }

        Ok(Self {
            id: new.id,
            learning_commitment_id: new.learning_commitment_id,
            start_time: new.start_time,
            end_time: new.end_time,
            is_trial: new.is_trial,
            created_by,
            status: SessionStatus::Scheduled,
            intent: AttendanceIntent::default(),
            attendance: AttendanceConfirmation::default(),
            attendance_window: AttendanceWindow::after(new.end_time, grace_period),
            attendance_log: AuditLog::new(),
            dispute: None,
            cancellation: None,
            is_deleted: false,
            revision: 0,
        })
    }

    fn invalid(&self, action: &'static str) -> EngineError {
        EngineError::InvalidTransition {
            from: self.status.to_string(),
            action,
            current: Box::new(Snapshot::Session(self.clone())),
        }
    }

    fn before_start(&self, action: &'static str, now: DateTime<Utc>) -> Result<()> {
        if now < self.start_time {
            Ok(())
        } else {
            Err(EngineError::OutOfWindow {
                action,
                now,
                opens_at: None,
                closes_at: Some(self.start_time),
            })
        }
    }

    /// Derived: both parties reported attendance, or an admin decided it took place.
    pub fn is_attended(&self) -> bool {
        match &self.dispute {
            Some(DisputeInfo {
                resolution: DisputeResolution::Resolved { decision, .. },
                ..
            }) => *decision == SessionDecision::Completed,
            _ => self.status == SessionStatus::Completed && self.attendance.both_attended(),
        }
    }

    pub fn has_open_dispute(&self) -> bool {
        self.dispute.as_ref().is_some_and(DisputeInfo::is_open)
    }

    /// Records one party's intent to attend. The session is confirmed once
    /// both the creator and the invited party have signalled.
    pub fn confirm(&mut self, party: Party, now: DateTime<Utc>) -> Result<Transition> {
        match self.status {
            SessionStatus::Scheduled => {}
            SessionStatus::Confirmed if self.intent.side(party).is_some() => {
                return Ok(Transition::Unchanged);
            }
            _ => return Err(self.invalid("confirm")),
        }
        self.before_start("confirm", now)?;

        if self.intent.side(party).is_some() {
            return Ok(Transition::Unchanged);
        }
        self.intent.set(party, now);

        if self.intent.both() {
            self.status = SessionStatus::Confirmed;
            Ok(Transition::Moved(SessionStatus::Confirmed))
        } else {
            Ok(Transition::Recorded)
        }
    }

    /// The invited party declines a proposed session.
    pub fn reject(&mut self, party: Party, reason: String, now: DateTime<Utc>) -> Result<Transition> {
        if self.status != SessionStatus::Scheduled {
            return Err(self.invalid("reject"));
        }
        if party == self.created_by {
            return Err(EngineError::ValidationError(
                "The creating party cannot reject its own session; cancel it instead".to_string(),
            ));
        }
        self.before_start("reject", now)?;

        self.status = SessionStatus::Rejected;
        self.cancellation = Some(CancellationInfo {
            cancelled_by: party.into(),
            reason,
            cancelled_at: now,
        });
        Ok(Transition::Moved(SessionStatus::Rejected))
    }

    pub fn cancel(&mut self, party: Party, reason: String, now: DateTime<Utc>) -> Result<Transition> {
        if !self.status.awaits_attendance() {
            return Err(self.invalid("cancel"));
        }
        self.before_start("cancel", now)?;

        self.status = SessionStatus::Cancelled;
        self.cancellation = Some(CancellationInfo {
            cancelled_by: party.into(),
            reason,
            cancelled_at: now,
        });
        Ok(Transition::Moved(SessionStatus::Cancelled))
    }

    /// Voids a session that has not happened yet because its commitment ended.
    /// Started sessions are left to resolve through reporting and the sweeper.
    pub fn void(&mut self, reason: &str, now: DateTime<Utc>) -> Transition {
        if !self.is_upcoming(now) {
            return Transition::Unchanged;
        }
        self.status = SessionStatus::Cancelled;
        self.is_deleted = true;
        self.cancellation = Some(CancellationInfo {
            cancelled_by: CancelledBy::System,
            reason: reason.to_string(),
            cancelled_at: now,
        });
        Transition::Moved(SessionStatus::Cancelled)
    }

    /// Still waiting to take place: unresolved, not voided and not yet started.
    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.status.awaits_attendance() && !self.is_deleted && now < self.start_time
    }

    /// Records one party's attendance claim.
    ///
    /// Only accepted between `start_time` and that party's deadline; a late
    /// report is refused rather than backdated. Each party reports once.
    pub fn report_attendance(
        &mut self,
        party: Party,
        attended: bool,
        reason: Option<String>,
        evidence_urls: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        if !self.status.awaits_attendance() {
            return Err(self.invalid("report attendance on"));
        }
        let deadline = self.attendance_window.deadline(party);
        if now < self.start_time || now > deadline {
            return Err(EngineError::OutOfWindow {
                action: "report attendance",
                now,
                opens_at: Some(self.start_time),
                closes_at: Some(deadline),
            });
        }
        if !self.attendance.side(party).is_pending() {
            return Err(self.invalid("report attendance twice on"));
        }

        self.record(party, attended, ReportSource::Human, now);
        self.synthesize_overdue(now);
        Ok(self.resolve(Some(party), reason, evidence_urls, now))
    }

    /// Synthesizes "not attended" for every party whose deadline passed without
    /// a report, then re-runs the resolution rule. Idempotent: a session that is
    /// already resolved, disputed or not yet due is left unchanged.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Transition {
        if !self.status.awaits_attendance() || self.is_deleted {
            return Transition::Unchanged;
        }
        if !self.synthesize_overdue(now) {
            return Transition::Unchanged;
        }
        match self.resolve(None, None, Vec::new(), now) {
            Transition::Unchanged => Transition::Recorded,
            moved => moved,
        }
    }

    /// Forces the admin's decision on an open dispute.
    pub fn resolve_dispute(
        &mut self,
        admin: UserId,
        decision: SessionDecision,
        admin_notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        let already_resolved = match &self.dispute {
            None => return Err(self.invalid("resolve a dispute on")),
            Some(DisputeInfo {
                resolution: DisputeResolution::Resolved { resolved_at, .. },
                ..
            }) => Some(*resolved_at),
            Some(_) => None,
        };
        if let Some(resolved_at) = already_resolved {
            return Err(EngineError::AlreadyResolved {
                resolved_at,
                current: Box::new(self.clone()),
            });
        }
        if self.status != SessionStatus::Disputed {
            return Err(self.invalid("resolve a dispute on"));
        }

        if let Some(dispute) = self.dispute.as_mut() {
            dispute.resolution = DisputeResolution::Resolved {
                resolved_at: now,
                resolved_by: admin,
                decision,
                admin_notes,
            };
        }
        self.status = decision.into();
        Ok(Transition::Moved(self.status))
    }

    /// The result to roll up into the commitment, once the session has one.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        match self.status {
            SessionStatus::Completed => Some(SessionOutcome::Completed),
            SessionStatus::NotConducted => Some(SessionOutcome::NotConducted(self.absentee())),
            _ => None,
        }
    }

    /// Charges a non-conducted session to the side(s) that reported "not attended".
    /// When both did and exactly one report was synthesized, the silent side is charged.
    fn absentee(&self) -> Absentee {
        let tutor = self.attendance.tutor;
        let student = self.attendance.student;
        match (tutor.attended(), student.attended()) {
            (Some(false), Some(true)) => Absentee::Tutor,
            (Some(true), Some(false)) => Absentee::Student,
            (Some(false), Some(false)) => {
                match (tutor.is_synthesized(), student.is_synthesized()) {
                    (true, false) => Absentee::Tutor,
                    (false, true) => Absentee::Student,
                    _ => Absentee::Mutual,
                }
            }
            _ => Absentee::Mutual,
        }
    }

    fn record(&mut self, party: Party, attended: bool, source: ReportSource, now: DateTime<Utc>) {
        *self.attendance.side_mut(party) = AttendanceHalf::Reported {
            attended,
            decided_at: now,
            source,
        };
        self.attendance_log.append(AttendanceLogEntry {
            party,
            attended,
            recorded_at: now,
            source,
        });
    }

    fn synthesize_overdue(&mut self, now: DateTime<Utc>) -> bool {
        let mut synthesized = false;
        for party in Party::BOTH {
            if self.attendance.side(party).is_pending()
                && now > self.attendance_window.deadline(party)
            {
                self.record(party, false, ReportSource::AbsentAuto, now);
                synthesized = true;
            }
        }
        synthesized
    }

    fn resolve(
        &mut self,
        trigger: Option<Party>,
        reason: Option<String>,
        evidence_urls: Vec<String>,
        now: DateTime<Utc>,
    ) -> Transition {
        let (Some(tutor), Some(student)) = (
            self.attendance.tutor.attended(),
            self.attendance.student.attended(),
        ) else {
            return if trigger.is_some() {
                Transition::Recorded
            } else {
                Transition::Unchanged
            };
        };

        self.status = match (tutor, student) {
            (true, true) => SessionStatus::Completed,
            (false, false) => SessionStatus::NotConducted,
            _ => {
                self.open_dispute(trigger, tutor, reason, evidence_urls, now);
                SessionStatus::Disputed
            }
        };
        Transition::Moved(self.status)
    }

    fn open_dispute(
        &mut self,
        trigger: Option<Party>,
        tutor_attended: bool,
        reason: Option<String>,
        evidence_urls: Vec<String>,
        now: DateTime<Utc>,
    ) {
        let human_trigger = trigger.filter(|p| !self.attendance.side(*p).is_synthesized());
        // Without a human trigger the one human report is the one claiming attendance.
        let opened_by = human_trigger.unwrap_or(if tutor_attended {
            Party::Tutor
        } else {
            Party::Student
        });

        let reason = match (reason, human_trigger) {
            (Some(reason), Some(_)) if !reason.trim().is_empty() => reason,
            _ => self.auto_reason(opened_by),
        };

        self.dispute = Some(DisputeInfo {
            opened_by,
            reason,
            evidence_urls,
            opened_at: now,
            resolution: DisputeResolution::Open,
        });
    }

    fn auto_reason(&self, opened_by: Party) -> String {
        let other = opened_by.other();
        if self.attendance.side(other).is_synthesized() {
            format!(
                "{opened_by} reported attendance; no report from {other} before the {} deadline",
                self.attendance_window.deadline(other).to_rfc3339()
            )
        } else {
            let claim = |half: &AttendanceHalf| match half.attended() {
                Some(true) => "attended",
                _ => "not attended",
            };
            format!(
                "Attendance reports disagree: tutor reported {}, student reported {}",
                claim(&self.attendance.tutor),
                claim(&self.attendance.student)
            )
        }
    }
}
