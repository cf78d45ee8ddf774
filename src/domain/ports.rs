use super::commitment::LearningCommitment;
use super::events::EventEnvelope;
use super::identity::{CommitmentId, RequestId, SessionId};
use super::session::Session;
use super::teaching_request::TeachingRequest;
use crate::error::{EntityKind, Result, Snapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use uuid::Uuid;

/// An entity stored as one document, the unit of atomicity.
pub trait Document:
    Clone + PartialEq + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    type Id: Copy + Eq + Hash + Send + Sync + fmt::Debug + fmt::Display + Into<Uuid>;

    const KIND: EntityKind;

    fn id(&self) -> Self::Id;
    fn revision(&self) -> u64;
    fn set_revision(&mut self, revision: u64);
    fn into_snapshot(self) -> Snapshot;
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome<T> {
    /// The write landed; carries the stored document with its new revision.
    Applied(T),
    /// Someone else wrote first; carries the current stored document.
    Conflict(T),
}

#[async_trait]
pub trait DocumentStore<T: Document>: Send + Sync {
    /// Stores a brand-new document. Fails if the id is already taken.
    async fn insert(&self, doc: T) -> Result<()>;
    async fn get(&self, id: T::Id) -> Result<Option<T>>;
    /// Writes `doc` only if the stored revision still equals `expected_revision`.
    async fn compare_and_swap(&self, doc: T, expected_revision: u64) -> Result<CasOutcome<T>>;
}

pub trait TeachingRequestStore: DocumentStore<TeachingRequest> {}

impl<S: DocumentStore<TeachingRequest>> TeachingRequestStore for S {}

#[async_trait]
pub trait CommitmentStore: DocumentStore<LearningCommitment> {
    async fn find_by_request(&self, request_id: RequestId) -> Result<Option<LearningCommitment>>;
    async fn get_all(&self) -> Result<Vec<LearningCommitment>>;
    /// Commitments not yet settled, oldest first.
    async fn get_unsettled(&self) -> Result<Vec<LearningCommitment>>;
}

#[async_trait]
pub trait SessionStore: DocumentStore<Session> {
    async fn for_commitment(&self, commitment_id: CommitmentId) -> Result<Vec<Session>>;
    /// Sessions still awaiting attendance whose earliest deadline is before `now`.
    async fn due_for_sweep(&self, now: DateTime<Utc>) -> Result<Vec<Session>>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: EventEnvelope) -> Result<()>;
}

pub type TeachingRequestStoreBox = Box<dyn TeachingRequestStore>;
pub type CommitmentStoreBox = Box<dyn CommitmentStore>;
pub type SessionStoreBox = Box<dyn SessionStore>;
pub type EventSinkRef = Arc<dyn EventSink>;
pub type ClockRef = Arc<dyn Clock>;

impl Document for TeachingRequest {
    type Id = RequestId;
    const KIND: EntityKind = EntityKind::TeachingRequest;

    fn id(&self) -> RequestId {
        self.id
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    fn into_snapshot(self) -> Snapshot {
        Snapshot::TeachingRequest(self)
    }
}

impl Document for LearningCommitment {
    type Id = CommitmentId;
    const KIND: EntityKind = EntityKind::LearningCommitment;

    fn id(&self) -> CommitmentId {
        self.id
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    fn into_snapshot(self) -> Snapshot {
        Snapshot::LearningCommitment(self)
    }
}

impl Document for Session {
    type Id = SessionId;
    const KIND: EntityKind = EntityKind::Session;

    fn id(&self) -> SessionId {
        self.id
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    fn into_snapshot(self) -> Snapshot {
        Snapshot::Session(self)
    }
}
