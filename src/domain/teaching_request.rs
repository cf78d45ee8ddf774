use super::identity::{RequestId, UserId};
use super::money::Amount;
use crate::error::{EngineError, Result, Snapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Pending => f.write_str("PENDING"),
            RequestStatus::Accepted => f.write_str("ACCEPTED"),
            RequestStatus::Rejected => f.write_str("REJECTED"),
        }
    }
}

/// Input for a student's offer to a tutor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTeachingRequest {
    /// Client-chosen identifier; a fresh one is generated when omitted.
    #[serde(default)]
    pub id: RequestId,
    pub tutor_id: UserId,
    pub subject: String,
    pub level: String,
    pub hourly_rate: Amount,
}

/// The addressed tutor's answer to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RequestResponse {
    Accept,
    Reject { reason: Option<String> },
}

/// A student's proposal to a specific tutor, prior to any payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeachingRequest {
    pub id: RequestId,
    pub student_id: UserId,
    pub tutor_id: UserId,
    pub subject: String,
    pub level: String,
    pub hourly_rate: Amount,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub revision: u64,
}

impl TeachingRequest {
    pub fn new(student_id: UserId, new: NewTeachingRequest, now: DateTime<Utc>) -> Result<Self> {
        if new.subject.trim().is_empty() || new.level.trim().is_empty() {
            return Err(EngineError::ValidationError(
                "Subject and level are required".to_string(),
            ));
        }
        if student_id == new.tutor_id {
            return Err(EngineError::ValidationError(
                "A student cannot address a request to themselves".to_string(),
            ));
        }

        Ok(Self {
            id: new.id,
            student_id,
            tutor_id: new.tutor_id,
            subject: new.subject.trim().to_string(),
            level: new.level.trim().to_string(),
            hourly_rate: new.hourly_rate,
            status: RequestStatus::Pending,
            created_at: now,
            responded_at: None,
            rejection_reason: None,
            revision: 0,
        })
    }

    /// Applies the tutor's answer. Only a pending request can be answered.
    pub fn respond(&mut self, response: RequestResponse, now: DateTime<Utc>) -> Result<()> {
        if self.status != RequestStatus::Pending {
            return Err(EngineError::InvalidTransition {
                from: self.status.to_string(),
                action: "respond to",
                current: Box::new(Snapshot::TeachingRequest(self.clone())),
            });
        }

        match response {
            RequestResponse::Accept => self.status = RequestStatus::Accepted,
            RequestResponse::Reject { reason } => {
                self.status = RequestStatus::Rejected;
                self.rejection_reason = reason;
            }
        }
        self.responded_at = Some(now);
        Ok(())
    }
}
