use crate::domain::commitment::LearningCommitment;
use crate::domain::identity::{CommitmentId, RequestId};
use crate::domain::ports::{CasOutcome, CommitmentStore, Document, DocumentStore, SessionStore};
use crate::domain::session::Session;
use crate::domain::teaching_request::TeachingRequest;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory document store.
///
/// Uses `Arc<RwLock<HashMap<Id, T>>>` to allow shared concurrent access; the
/// compare-and-swap check and the write happen under one write guard.
/// Ideal for testing or deployments where persistence is not required.
#[derive(Clone)]
pub struct InMemoryStore<T: Document> {
    documents: Arc<RwLock<HashMap<T::Id, T>>>,
}

pub type InMemoryTeachingRequestStore = InMemoryStore<TeachingRequest>;
pub type InMemoryCommitmentStore = InMemoryStore<LearningCommitment>;
pub type InMemorySessionStore = InMemoryStore<Session>;

impl<T: Document> InMemoryStore<T> {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn filtered(&self, keep: impl Fn(&T) -> bool) -> Vec<T> {
        let documents = self.documents.read().await;
        documents.values().filter(|d| keep(d)).cloned().collect()
    }
}

impl<T: Document> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl<T: Document> DocumentStore<T> for InMemoryStore<T> {
    async fn insert(&self, doc: T) -> Result<()> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&doc.id()) {
            return Err(EngineError::ValidationError(format!(
                "{} {} already exists",
                T::KIND,
                doc.id()
            )));
        }
        documents.insert(doc.id(), doc);
        Ok(())
    }

    async fn get(&self, id: T::Id) -> Result<Option<T>> {
        let documents = self.documents.read().await;
        Ok(documents.get(&id).cloned())
    }

    async fn compare_and_swap(&self, mut doc: T, expected_revision: u64) -> Result<CasOutcome<T>> {
        let mut documents = self.documents.write().await;
        let current = documents
            .get(&doc.id())
            .ok_or_else(|| EngineError::not_found(T::KIND, doc.id()))?;

        if current.revision() != expected_revision {
            return Ok(CasOutcome::Conflict(current.clone()));
        }

        doc.set_revision(expected_revision + 1);
        documents.insert(doc.id(), doc.clone());
        Ok(CasOutcome::Applied(doc))
    }
}

#[async_trait]
impl CommitmentStore for InMemoryStore<LearningCommitment> {
    async fn find_by_request(&self, request_id: RequestId) -> Result<Option<LearningCommitment>> {
        Ok(self
            .filtered(|c| c.teaching_request_id == request_id)
            .await
            .into_iter()
            .next())
    }

    async fn get_all(&self) -> Result<Vec<LearningCommitment>> {
        let mut all = self.filtered(|_| true).await;
        all.sort_by_key(|c| (c.created_at, c.id));
        Ok(all)
    }

    async fn get_unsettled(&self) -> Result<Vec<LearningCommitment>> {
        let mut unsettled = self.filtered(|c| !c.settled).await;
        unsettled.sort_by_key(|c| (c.created_at, c.id));
        Ok(unsettled)
    }
}

#[async_trait]
impl SessionStore for InMemoryStore<Session> {
    async fn for_commitment(&self, commitment_id: CommitmentId) -> Result<Vec<Session>> {
        let mut sessions = self
            .filtered(|s| s.learning_commitment_id == commitment_id)
            .await;
        sessions.sort_by_key(|s| (s.start_time, s.id));
        Ok(sessions)
    }

    async fn due_for_sweep(&self, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let mut sessions = self
            .filtered(|s| {
                s.status.awaits_attendance()
                    && !s.is_deleted
                    && s.attendance_window.earliest() < now
            })
            .await;
        sessions.sort_by_key(|s| (s.attendance_window.earliest(), s.id));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::{Party, SessionId};
    use crate::domain::session::NewSession;
    use chrono::{Duration, TimeZone};

    fn session(commitment: CommitmentId, start_hour: u32) -> Session {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, start_hour, 0, 0).unwrap();
        Session::new(
            NewSession {
                id: SessionId::new(),
                learning_commitment_id: commitment,
                start_time: start,
                end_time: start + Duration::hours(1),
                is_trial: false,
            },
            Party::Tutor,
            Duration::minutes(30),
            start - Duration::days(1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_in_memory_insert_and_get() {
        let store = InMemorySessionStore::new();
        let s = session(CommitmentId::new(), 10);

        store.insert(s.clone()).await.unwrap();
        let retrieved = store.get(s.id).await.unwrap().unwrap();
        assert_eq!(retrieved, s);

        assert!(store.get(SessionId::new()).await.unwrap().is_none());
        assert!(store.insert(s).await.is_err());
    }

    #[tokio::test]
    async fn test_compare_and_swap_bumps_revision() {
        let store = InMemorySessionStore::new();
        let s = session(CommitmentId::new(), 10);
        store.insert(s.clone()).await.unwrap();

        let mut first = s.clone();
        first.is_trial = true;
        let applied = match store.compare_and_swap(first, 0).await.unwrap() {
            CasOutcome::Applied(doc) => doc,
            CasOutcome::Conflict(_) => panic!("first write should land"),
        };
        assert_eq!(applied.revision, 1);

        // A writer still holding revision 0 loses and sees the current document.
        match store.compare_and_swap(s.clone(), 0).await.unwrap() {
            CasOutcome::Conflict(current) => {
                assert_eq!(current.revision, 1);
                assert!(current.is_trial);
            }
            CasOutcome::Applied(_) => panic!("stale write must not land"),
        }
    }

    #[tokio::test]
    async fn test_compare_and_swap_on_missing_document() {
        let store = InMemorySessionStore::new();
        let result = store
            .compare_and_swap(session(CommitmentId::new(), 10), 0)
            .await;
        assert!(matches!(result, Err(EngineError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_session_queries() {
        let store = InMemorySessionStore::new();
        let commitment = CommitmentId::new();
        let late = session(commitment, 14);
        let early = session(commitment, 9);
        let other = session(CommitmentId::new(), 9);
        for s in [&late, &early, &other] {
            store.insert(s.clone()).await.unwrap();
        }

        let mine = store.for_commitment(commitment).await.unwrap();
        assert_eq!(
            mine.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![early.id, late.id]
        );

        // 09:00-10:00 sessions close at 10:30.
        let noon = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let due = store.due_for_sweep(noon).await.unwrap();
        assert_eq!(due.len(), 2);
        assert!(due.iter().all(|s| s.start_time.format("%H").to_string() == "09"));
    }
}
