use crate::config::EngineConfig;
use crate::domain::events::{DomainEvent, EventEnvelope};
use crate::domain::ports::{
    CasOutcome, ClockRef, CommitmentStoreBox, Document, DocumentStore, EventSinkRef,
    SessionStoreBox, TeachingRequestStoreBox,
};
use crate::error::{EngineError, Result};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::events::TracingEventSink;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// The main entry point for the engagement lifecycle.
///
/// `EngagementEngine` owns the three document stores, the clock and the event
/// sink. It holds no locks of its own: every mutation is a read, a domain
/// transition and a conditional write on a single document, retried on
/// conflict up to `cas_retry_limit` times.
pub struct EngagementEngine {
    pub(crate) requests: TeachingRequestStoreBox,
    pub(crate) commitments: CommitmentStoreBox,
    pub(crate) sessions: SessionStoreBox,
    events: EventSinkRef,
    clock: ClockRef,
    config: EngineConfig,
}

impl EngagementEngine {
    /// Creates a new engine on the system clock, logging events through `tracing`.
    ///
    /// # Arguments
    ///
    /// * `requests` - The store for teaching requests.
    /// * `commitments` - The store for learning commitments.
    /// * `sessions` - The store for sessions.
    pub fn new(
        requests: TeachingRequestStoreBox,
        commitments: CommitmentStoreBox,
        sessions: SessionStoreBox,
    ) -> Self {
        Self {
            requests,
            commitments,
            sessions,
            events: Arc::new(TracingEventSink),
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: ClockRef) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_sink(mut self, events: EventSinkRef) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Publishes an event. A failing sink is logged, never surfaced: the
    /// transition it reports is already stored.
    pub(crate) async fn emit(&self, event: DomainEvent) {
        let envelope = EventEnvelope::new(event, self.now());
        let id = envelope.id;
        if let Err(e) = self.events.publish(envelope).await {
            warn!(event_id = %id, error = %e, "Failed to publish domain event");
        }
    }

    /// Loads a document or fails with `NotFound`.
    pub(crate) async fn load<T, S>(&self, store: &S, id: T::Id) -> Result<T>
    where
        T: Document,
        S: DocumentStore<T> + ?Sized,
    {
        store
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found(T::KIND, id))
    }

    /// Applies `apply` to the latest version of a document and writes it back
    /// with compare-and-swap.
    ///
    /// On a lost race the document is re-read and `apply` runs again on the
    /// fresh state, so a precondition that no longer holds surfaces as the
    /// domain error instead of overwriting the winner. After
    /// `cas_retry_limit` lost races the call fails with
    /// `ConflictingTransition` carrying the stored state. When `apply`
    /// leaves the document unchanged nothing is written.
    pub(crate) async fn mutate<T, S, F, R>(&self, store: &S, id: T::Id, mut apply: F) -> Result<(T, R)>
    where
        T: Document,
        S: DocumentStore<T> + ?Sized,
        F: FnMut(&mut T, DateTime<Utc>) -> Result<R> + Send,
        R: Send,
    {
        let mut attempt = 0;
        loop {
            let current = self.load(store, id).await?;
            let mut next = current.clone();
            let outcome = apply(&mut next, self.now())?;
            if next == current {
                return Ok((current, outcome));
            }

            match store.compare_and_swap(next, current.revision()).await? {
                CasOutcome::Applied(stored) => return Ok((stored, outcome)),
                CasOutcome::Conflict(latest) if attempt >= self.config.cas_retry_limit => {
                    warn!(
                        entity = %T::KIND,
                        id = %id,
                        attempts = attempt + 1,
                        "Giving up after repeated write conflicts"
                    );
                    return Err(EngineError::ConflictingTransition {
                        current: Box::new(latest.into_snapshot()),
                    });
                }
                CasOutcome::Conflict(latest) => {
                    attempt += 1;
                    debug!(
                        entity = %T::KIND,
                        id = %id,
                        revision = latest.revision(),
                        attempt,
                        "Write conflict, retrying on fresh state"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::{RequestId, UserId};
    use crate::domain::money::Amount;
    use crate::domain::teaching_request::{NewTeachingRequest, TeachingRequest};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::events::InMemoryEventSink;
    use crate::infrastructure::in_memory::{
        InMemoryCommitmentStore, InMemorySessionStore, InMemoryTeachingRequestStore,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Loses every compare-and-swap by bumping the stored revision first.
    struct AlwaysContended {
        inner: InMemoryTeachingRequestStore,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore<TeachingRequest> for AlwaysContended {
        async fn insert(&self, doc: TeachingRequest) -> Result<()> {
            self.inner.insert(doc).await
        }

        async fn get(&self, id: RequestId) -> Result<Option<TeachingRequest>> {
            self.inner.get(id).await
        }

        async fn compare_and_swap(
            &self,
            doc: TeachingRequest,
            expected_revision: u64,
        ) -> Result<CasOutcome<TeachingRequest>> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let mut rival = self.inner.get(doc.id).await?.unwrap();
            rival.level = format!("{} (edited)", rival.level);
            self.inner.compare_and_swap(rival, expected_revision).await?;
            self.inner.compare_and_swap(doc, expected_revision).await
        }
    }

    fn engine(config: EngineConfig) -> EngagementEngine {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        EngagementEngine::new(
            Box::new(InMemoryTeachingRequestStore::new()),
            Box::new(InMemoryCommitmentStore::new()),
            Box::new(InMemorySessionStore::new()),
        )
        .with_clock(Arc::new(ManualClock::new(start)))
        .with_event_sink(Arc::new(InMemoryEventSink::new()))
        .with_config(config)
    }

    async fn seeded_store() -> (AlwaysContended, RequestId) {
        let store = AlwaysContended {
            inner: InMemoryTeachingRequestStore::new(),
            writes: AtomicUsize::new(0),
        };
        let request = TeachingRequest::new(
            UserId::new(),
            NewTeachingRequest {
                id: RequestId::new(),
                tutor_id: UserId::new(),
                subject: "Chemistry".to_string(),
                level: "IB".to_string(),
                hourly_rate: Amount::new(dec!(25)).unwrap(),
            },
            Utc::now(),
        )
        .unwrap();
        let id = request.id;
        store.insert(request).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_mutate_gives_up_after_retry_limit() {
        let engine = engine(EngineConfig {
            cas_retry_limit: 2,
            ..EngineConfig::default()
        });
        let (store, id) = seeded_store().await;

        let result = engine
            .mutate(&store, id, |r: &mut TeachingRequest, _| {
                r.subject = "Biology".to_string();
                Ok(())
            })
            .await;

        match result {
            Err(EngineError::ConflictingTransition { current }) => {
                assert_eq!(current.id(), id.0);
            }
            other => panic!("expected a conflict, got {other:?}"),
        }
        assert_eq!(store.writes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_mutate_fails_fast_with_zero_retries() {
        let engine = engine(EngineConfig {
            cas_retry_limit: 0,
            ..EngineConfig::default()
        });
        let (store, id) = seeded_store().await;

        let result = engine
            .mutate(&store, id, |r: &mut TeachingRequest, _| {
                r.subject = "Biology".to_string();
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(EngineError::ConflictingTransition { .. })
        ));
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mutate_skips_write_when_unchanged() {
        let engine = engine(EngineConfig::default());
        let (store, id) = seeded_store().await;

        let (doc, ()) = engine
            .mutate(&store, id, |_: &mut TeachingRequest, _| Ok(()))
            .await
            .unwrap();

        assert_eq!(doc.revision, 0);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }
}
