use crate::domain::events::{DomainEvent, EventEnvelope};
use crate::domain::ports::EventSink;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Writes one structured log line per event. The default sink when no
/// notifier is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()> {
        let payload = serde_json::to_string(&envelope.event)?;
        tracing::info!(
            event_id = %envelope.id,
            occurred_at = %envelope.occurred_at,
            event = %payload,
            "Domain event"
        );
        Ok(())
    }
}

/// Keeps every published event in memory, in publication order.
#[derive(Debug, Default, Clone)]
pub struct InMemoryEventSink {
    events: Arc<RwLock<Vec<EventEnvelope>>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<DomainEvent> {
        let events = self.events.read().await;
        events.iter().map(|e| e.event.clone()).collect()
    }

    pub async fn envelopes(&self) -> Vec<EventEnvelope> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()> {
        self.events.write().await.push(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::CommitmentId;
    use chrono::Utc;

    #[tokio::test]
    async fn test_in_memory_sink_keeps_order() {
        let sink = InMemoryEventSink::new();
        let commitment_id = CommitmentId::new();
        sink.publish(EventEnvelope::new(
            DomainEvent::CancellationRequested {
                commitment_id,
                requested_by: crate::domain::identity::Party::Student,
            },
            Utc::now(),
        ))
        .await
        .unwrap();
        sink.publish(EventEnvelope::new(
            DomainEvent::CancellationEscalated { commitment_id },
            Utc::now(),
        ))
        .await
        .unwrap();

        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            DomainEvent::CancellationEscalated { commitment_id }
        );
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_events() {
        let sink = TracingEventSink;
        let result = sink
            .publish(EventEnvelope::new(
                DomainEvent::PaymentFailed {
                    commitment_id: CommitmentId::new(),
                },
                Utc::now(),
            ))
            .await;
        assert!(result.is_ok());
    }
}
