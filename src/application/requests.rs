use super::engine::EngagementEngine;
use crate::domain::events::DomainEvent;
use crate::domain::identity::{Actor, RequestId, Role};
use crate::domain::teaching_request::{
    NewTeachingRequest, RequestResponse, RequestStatus, TeachingRequest,
};
use crate::error::{EngineError, Result};
use tracing::info;

impl EngagementEngine {
    /// A student offers to learn a subject from a specific tutor.
    pub async fn create_teaching_request(
        &self,
        actor: &Actor,
        new: NewTeachingRequest,
    ) -> Result<TeachingRequest> {
        if actor.role != Role::Student {
            return Err(EngineError::Unauthorized {
                actor: actor.id,
                action: "create a teaching request",
            });
        }

        let request = TeachingRequest::new(actor.id, new, self.now())?;
        self.requests.insert(request.clone()).await?;
        info!(
            request_id = %request.id,
            student_id = %request.student_id,
            tutor_id = %request.tutor_id,
            "Teaching request created"
        );

        self.emit(DomainEvent::TeachingRequestCreated {
            request_id: request.id,
            student_id: request.student_id,
            tutor_id: request.tutor_id,
        })
        .await;
        Ok(request)
    }

    /// The addressed tutor accepts or rejects a pending request.
    pub async fn respond_to_teaching_request(
        &self,
        actor: &Actor,
        request_id: RequestId,
        response: RequestResponse,
    ) -> Result<TeachingRequest> {
        let (request, ()) = self
            .mutate(&*self.requests, request_id, |r: &mut TeachingRequest, now| {
                if actor.role != Role::Tutor || actor.id != r.tutor_id {
                    return Err(EngineError::Unauthorized {
                        actor: actor.id,
                        action: "respond to a teaching request addressed to another tutor",
                    });
                }
                r.respond(response.clone(), now)
            })
            .await?;
        info!(request_id = %request.id, status = %request.status, "Teaching request answered");

        let event = match request.status {
            RequestStatus::Accepted => DomainEvent::TeachingRequestAccepted {
                request_id: request.id,
            },
            _ => DomainEvent::TeachingRequestRejected {
                request_id: request.id,
                reason: request.rejection_reason.clone(),
            },
        };
        self.emit(event).await;
        Ok(request)
    }

    pub async fn get_teaching_request(&self, request_id: RequestId) -> Result<TeachingRequest> {
        self.load(&*self.requests, request_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::UserId;
    use crate::domain::money::Amount;
    use crate::infrastructure::in_memory::{
        InMemoryCommitmentStore, InMemorySessionStore, InMemoryTeachingRequestStore,
    };
    use rust_decimal_macros::dec;

    fn engine() -> EngagementEngine {
        EngagementEngine::new(
            Box::new(InMemoryTeachingRequestStore::new()),
            Box::new(InMemoryCommitmentStore::new()),
            Box::new(InMemorySessionStore::new()),
        )
    }

    fn offer(tutor_id: UserId) -> NewTeachingRequest {
        NewTeachingRequest {
            id: RequestId::new(),
            tutor_id,
            subject: "Mathematics".to_string(),
            level: "A-level".to_string(),
            hourly_rate: Amount::new(dec!(35)).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_only_students_create_requests() {
        let engine = engine();
        let tutor = Actor::tutor(UserId::new());

        let result = engine
            .create_teaching_request(&tutor, offer(UserId::new()))
            .await;
        assert!(matches!(result, Err(EngineError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn test_only_addressed_tutor_responds() {
        let engine = engine();
        let student = Actor::student(UserId::new());
        let tutor = Actor::tutor(UserId::new());
        let request = engine
            .create_teaching_request(&student, offer(tutor.id))
            .await
            .unwrap();

        let stranger = Actor::tutor(UserId::new());
        let result = engine
            .respond_to_teaching_request(&stranger, request.id, RequestResponse::Accept)
            .await;
        assert!(matches!(result, Err(EngineError::Unauthorized { .. })));

        let accepted = engine
            .respond_to_teaching_request(&tutor, request.id, RequestResponse::Accept)
            .await
            .unwrap();
        assert_eq!(accepted.status, RequestStatus::Accepted);
        assert_eq!(accepted.revision, 1);

        let again = engine
            .respond_to_teaching_request(
                &tutor,
                request.id,
                RequestResponse::Reject { reason: None },
            )
            .await;
        assert!(matches!(again, Err(EngineError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_missing_request_is_not_found() {
        let result = engine().get_teaching_request(RequestId::new()).await;
        assert!(matches!(result, Err(EngineError::NotFound { .. })));
    }
}
