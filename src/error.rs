use crate::domain::commitment::LearningCommitment;
use crate::domain::identity::UserId;
use crate::domain::session::Session;
use crate::domain::teaching_request::TeachingRequest;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    TeachingRequest,
    LearningCommitment,
    Session,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::TeachingRequest => f.write_str("teaching request"),
            EntityKind::LearningCommitment => f.write_str("learning commitment"),
            EntityKind::Session => f.write_str("session"),
        }
    }
}

/// The authoritative state of an entity, attached to failures so a client can
/// resynchronize instead of retrying blindly.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    TeachingRequest(TeachingRequest),
    LearningCommitment(LearningCommitment),
    Session(Session),
}

impl Snapshot {
    pub fn kind(&self) -> EntityKind {
        match self {
            Snapshot::TeachingRequest(_) => EntityKind::TeachingRequest,
            Snapshot::LearningCommitment(_) => EntityKind::LearningCommitment,
            Snapshot::Session(_) => EntityKind::Session,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Snapshot::TeachingRequest(r) => r.id.0,
            Snapshot::LearningCommitment(c) => c.id.0,
            Snapshot::Session(s) => s.id.0,
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid transition: cannot {action} a {} in status {from}", current.kind())]
    InvalidTransition {
        from: String,
        action: &'static str,
        current: Box<Snapshot>,
    },
    #[error("Cannot {action} at {now}: allowed window is {opens_at:?} to {closes_at:?}")]
    OutOfWindow {
        action: &'static str,
        now: DateTime<Utc>,
        opens_at: Option<DateTime<Utc>>,
        closes_at: Option<DateTime<Utc>>,
    },
    #[error("Conflicting transition: {} {} was changed by another actor", current.kind(), current.id())]
    ConflictingTransition { current: Box<Snapshot> },
    #[error("A cancellation negotiation is already in progress on commitment {}", current.id)]
    NegotiationInProgress { current: Box<LearningCommitment> },
    #[error("Dispute on session {} was already resolved at {resolved_at}", current.id)]
    AlreadyResolved {
        resolved_at: DateTime<Utc>,
        current: Box<Session>,
    },
    #[error("User {actor} is not authorized to {action}")]
    Unauthorized {
        actor: UserId,
        action: &'static str,
    },
    #[error("{entity} {id} not found")]
    NotFound { entity: EntityKind, id: Uuid },
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Internal error: {0}")]
    InternalError(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn not_found(entity: EntityKind, id: impl Into<Uuid>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether refetching the entity and retrying can succeed.
    ///
    /// Unauthorized callers, malformed input and infrastructure failures are fatal
    /// to the request; every lifecycle precondition failure is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidTransition { .. }
                | EngineError::OutOfWindow { .. }
                | EngineError::ConflictingTransition { .. }
                | EngineError::NegotiationInProgress { .. }
                | EngineError::AlreadyResolved { .. }
        )
    }

    /// The authoritative entity state carried by this error, if any.
    pub fn current_state(&self) -> Option<Snapshot> {
        match self {
            EngineError::InvalidTransition { current, .. }
            | EngineError::ConflictingTransition { current } => Some((**current).clone()),
            EngineError::NegotiationInProgress { current } => {
                Some(Snapshot::LearningCommitment((**current).clone()))
            }
            EngineError::AlreadyResolved { current, .. } => {
                Some(Snapshot::Session((**current).clone()))
            }
            _ => None,
        }
    }
}
