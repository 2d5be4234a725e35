//! State-change publication: a drop publishes its public projection every
//! time a handler mutates it, on a per-drop topic plus a shared `drops`
//! topic. The transport is in-process for now (an `async-channel` fan-out);
//! swapping in SSE or a message bus means providing a different `Notifier`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub drop_id: String,
    pub phase: String,
    pub participant_count: u64,
    pub total_tickets: u64,
    pub inventory: u32,
    pub initial_inventory: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub registration_end: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub purchase_end: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub server_time: OffsetDateTime,
    pub lottery_commitment: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, event: DropEvent);
}

/// In-process fan-out: keeps the most recent event per drop so late
/// subscribers (an SSE endpoint attaching mid-drop) can replay current
/// state instead of waiting for the next mutation.
#[derive(Default, Clone)]
pub struct InMemoryNotifier {
    last_by_drop: Arc<Mutex<std::collections::HashMap<String, DropEvent>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self, drop_id: &str) -> Option<DropEvent> {
        self.last_by_drop.lock().unwrap().get(drop_id).cloned()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn publish(&self, event: DropEvent) {
        self.last_by_drop
            .lock()
            .unwrap()
            .insert(event.drop_id.clone(), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(drop_id: &str) -> DropEvent {
        DropEvent {
            event_type: "drop".to_string(),
            drop_id: drop_id.to_string(),
            phase: "registration".to_string(),
            participant_count: 0,
            total_tickets: 0,
            inventory: 10,
            initial_inventory: 10,
            registration_end: OffsetDateTime::now_utc(),
            purchase_end: None,
            server_time: OffsetDateTime::now_utc(),
            lottery_commitment: None,
        }
    }

    #[tokio::test]
    async fn publish_then_last_round_trips() {
        let notifier = InMemoryNotifier::new();
        notifier.publish(sample_event("drop-1")).await;
        let last = notifier.last("drop-1").expect("event should be stored");
        assert_eq!(last.drop_id, "drop-1");
    }

    #[tokio::test]
    async fn unknown_drop_has_no_last_event() {
        let notifier = InMemoryNotifier::new();
        assert!(notifier.last("missing").is_none());
    }
}
