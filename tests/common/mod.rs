#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use engagement_engine::application::commitments::PaymentEvent;
use engagement_engine::application::engine::EngagementEngine;
use engagement_engine::application::sessions::AttendanceReport;
use engagement_engine::config::EngineConfig;
use engagement_engine::domain::commitment::NewCommitment;
use engagement_engine::domain::identity::{Actor, CommitmentId, RequestId, SessionId, UserId};
use engagement_engine::domain::money::Amount;
use engagement_engine::domain::session::{NewSession, Session};
use engagement_engine::domain::teaching_request::{NewTeachingRequest, RequestResponse};
use engagement_engine::infrastructure::clock::ManualClock;
use engagement_engine::infrastructure::events::InMemoryEventSink;
use engagement_engine::infrastructure::in_memory::{
    InMemoryCommitmentStore, InMemorySessionStore, InMemoryTeachingRequestStore,
};
use rust_decimal_macros::dec;
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// A timestamp in March 2026.
pub fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, minute, 0).unwrap()
}

/// An in-memory engine on a manual clock with one student/tutor pair and an admin.
pub struct Harness {
    pub engine: Arc<EngagementEngine>,
    pub clock: ManualClock,
    pub events: InMemoryEventSink,
    pub student: Actor,
    pub tutor: Actor,
    pub admin: Actor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let clock = ManualClock::new(at(1, 8, 0));
        let events = InMemoryEventSink::new();
        let engine = EngagementEngine::new(
            Box::new(InMemoryTeachingRequestStore::new()),
            Box::new(InMemoryCommitmentStore::new()),
            Box::new(InMemorySessionStore::new()),
        )
        .with_clock(Arc::new(clock.clone()))
        .with_event_sink(Arc::new(events.clone()))
        .with_config(config);

        Self {
            engine: Arc::new(engine),
            clock,
            events,
            student: Actor::student(UserId::new()),
            tutor: Actor::tutor(UserId::new()),
            admin: Actor::admin(UserId::new()),
        }
    }

    /// Request, acceptance, commitment and full payment.
    pub async fn active_commitment(&self, total_sessions: u32) -> CommitmentId {
        let request = self
            .engine
            .create_teaching_request(
                &self.student,
                NewTeachingRequest {
                    id: RequestId::new(),
                    tutor_id: self.tutor.id,
                    subject: "Mathematics".to_string(),
                    level: "A-level".to_string(),
                    hourly_rate: Amount::new(dec!(40)).unwrap(),
                },
            )
            .await
            .unwrap();
        self.engine
            .respond_to_teaching_request(&self.tutor, request.id, RequestResponse::Accept)
            .await
            .unwrap();
        let commitment = self
            .engine
            .create_learning_commitment(
                &self.student,
                NewCommitment {
                    id: CommitmentId::new(),
                    teaching_request_id: request.id,
                    total_sessions,
                    sessions_per_week: 2,
                    start_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                    hours_per_session: dec!(1),
                },
            )
            .await
            .unwrap();
        self.engine
            .handle_payment_event(PaymentEvent::Confirmed {
                commitment_id: commitment.id,
                amount: commitment.total_amount,
            })
            .await
            .unwrap();
        commitment.id
    }

    /// A one-hour session from 10:00 on `day`, scheduled by the tutor.
    pub async fn schedule(&self, commitment_id: CommitmentId, day: u32) -> SessionId {
        self.engine
            .create_session(
                &self.tutor,
                NewSession {
                    id: SessionId::new(),
                    learning_commitment_id: commitment_id,
                    start_time: at(day, 10, 0),
                    end_time: at(day, 11, 0),
                    is_trial: false,
                },
            )
            .await
            .unwrap()
            .id
    }

    /// Both parties report attendance at the end of the session on `day`.
    pub async fn attend(&self, session_id: SessionId, day: u32) -> Session {
        self.clock.set(at(day, 11, 0));
        self.report(&self.tutor, session_id, true).await;
        self.report(&self.student, session_id, true).await
    }

    pub async fn report(&self, actor: &Actor, session_id: SessionId, attended: bool) -> Session {
        self.engine
            .report_attendance(
                actor,
                session_id,
                AttendanceReport {
                    attended,
                    reason: None,
                    evidence_urls: vec![],
                },
            )
            .await
            .unwrap()
    }

    /// Runs a complete session on `day` after moving the clock before it.
    pub async fn run_session(&self, commitment_id: CommitmentId, day: u32) -> Session {
        self.clock.set(at(day, 8, 0));
        let session_id = self.schedule(commitment_id, day).await;
        self.attend(session_id, day).await
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// A JSON-lines replay script backed by a temporary file.
pub struct Script {
    file: NamedTempFile,
}

impl Script {
    pub fn new() -> Self {
        Self {
            file: NamedTempFile::new().unwrap(),
        }
    }

    pub fn push(&mut self, line: Value) -> &mut Self {
        writeln!(self.file, "{line}").unwrap();
        self
    }

    pub fn raw(&mut self, line: &str) -> &mut Self {
        writeln!(self.file, "{line}").unwrap();
        self
    }

    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }
}

impl Default for Script {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed identities so scripts and their expected output can refer to them.
pub struct ScriptParties {
    pub student: Value,
    pub tutor: Value,
    pub admin: Value,
    pub request_id: &'static str,
    pub commitment_id: &'static str,
}

pub fn script_parties() -> ScriptParties {
    ScriptParties {
        student: serde_json::json!({"id": "11111111-1111-4111-8111-111111111111", "role": "student"}),
        tutor: serde_json::json!({"id": "22222222-2222-4222-8222-222222222222", "role": "tutor"}),
        admin: serde_json::json!({"id": "33333333-3333-4333-8333-333333333333", "role": "admin"}),
        request_id: "44444444-4444-4444-8444-444444444444",
        commitment_id: "55555555-5555-4555-8555-555555555555",
    }
}

/// Request, acceptance, commitment of `total_sessions` one-hour sessions at 40/h
/// and full payment, all on 2026-03-01.
pub fn active_commitment_script(total_sessions: u32) -> Script {
    let p = script_parties();
    let total = 40 * total_sessions;
    let mut script = Script::new();
    script
        .raw("# active commitment")
        .push(serde_json::json!({
            "at": "2026-03-01T08:00:00Z", "actor": p.student, "op": "create_teaching_request",
            "id": p.request_id, "tutor_id": p.tutor["id"], "subject": "Mathematics",
            "level": "A-level", "hourly_rate": "40"
        }))
        .push(serde_json::json!({
            "at": "2026-03-01T08:05:00Z", "actor": p.tutor, "op": "respond_to_teaching_request",
            "request_id": p.request_id, "response": {"decision": "accept"}
        }))
        .push(serde_json::json!({
            "at": "2026-03-01T08:10:00Z", "actor": p.student, "op": "create_learning_commitment",
            "id": p.commitment_id, "teaching_request_id": p.request_id, "total_sessions": total_sessions,
            "sessions_per_week": 1, "start_date": "2026-03-02", "hours_per_session": "1"
        }))
        .push(serde_json::json!({
            "at": "2026-03-01T08:15:00Z", "op": "payment",
            "event": {"kind": "confirmed", "commitment_id": p.commitment_id, "amount": total.to_string()}
        }));
    script
}

/// The timestamp of `day` at `hour:minute`, as a script string.
pub fn ts(day: u32, hour: u32, minute: u32) -> String {
    at(day, hour, minute).to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
