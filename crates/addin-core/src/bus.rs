//! Publish/subscribe bus shared through the sandbox.
//!
//! Event name arguments may list several names separated by spaces. Handlers
//! run in subscription order; `once` subscriptions are dropped after their
//! first delivery, and a handler returning [`Propagation::Stop`] ends delivery
//! of that event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    Stop,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &str, payload: &Value) -> Result<Propagation>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
    once: bool,
}

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    events: RwLock<HashMap<String, Vec<Subscription>>>,
}

fn event_names(events: &str) -> impl Iterator<Item = &str> {
    events.split(' ').filter(|e| !e.is_empty())
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, events: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.subscribe(events, handler, false)
    }

    pub fn once(&self, events: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.subscribe(events, handler, true)
    }

    fn subscribe(&self, events: &str, handler: Arc<dyn EventHandler>, once: bool) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut map = self.events.write().unwrap_or_else(PoisonError::into_inner);
        for event in event_names(events) {
            map.entry(event.to_string()).or_default().push(Subscription {
                id,
                handler: Arc::clone(&handler),
                once,
            });
        }
        id
    }

    /// Removes one subscription, or every handler of the events when `id` is
    /// `None`. Returns how many registrations were removed.
    pub fn off(&self, events: &str, id: Option<SubscriptionId>) -> usize {
        let mut map = self.events.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for event in event_names(events) {
            let Some(handlers) = map.get_mut(event) else {
                continue;
            };
            let before = handlers.len();
            match id {
                Some(id) => handlers.retain(|s| s.id != id),
                None => handlers.clear(),
            }
            removed += before - handlers.len();
            if handlers.is_empty() {
                map.remove(event);
            }
        }
        removed
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Delivers `payload` to the handlers of each event. Returns the number
    /// of handler invocations. A handler error aborts delivery and is returned.
    pub async fn raise(&self, events: &str, payload: &Value) -> Result<usize> {
        let mut delivered = 0;
        for event in event_names(events) {
            let subscriptions = self.take_for_delivery(event);
            for subscription in subscriptions {
                delivered += 1;
                if subscription.handler.handle(event, payload).await? == Propagation::Stop {
                    break;
                }
            }
        }
        Ok(delivered)
    }

    /// Snapshot of the event's handlers; `once` entries are removed up front
    /// so a re-entrant raise cannot deliver them twice.
    fn take_for_delivery(&self, event: &str) -> Vec<Subscription> {
        let mut map = self.events.write().unwrap_or_else(PoisonError::into_inner);
        let Some(handlers) = map.get_mut(event) else {
            return Vec::new();
        };
        let snapshot = handlers.clone();
        handlers.retain(|s| !s.once);
        if handlers.is_empty() {
            map.remove(event);
        }
        snapshot
    }
}
