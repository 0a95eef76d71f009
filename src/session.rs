use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::model::Session;

type SessionSlot = Arc<AsyncMutex<Session>>;

/// Conversation state per phone number.
///
/// Each phone gets its own async mutex; a dialogue turn holds the guard from
/// classification until the reply is built, so a customer double-tapping a
/// button is processed strictly one message after the other. Different
/// customers never wait on each other.
pub struct SessionStore {
    slots: Mutex<HashMap<String, SessionSlot>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, SessionSlot>> {
        self.slots.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Locks the customer's session, creating it on first contact.
    pub async fn acquire(&self, phone: &str) -> OwnedMutexGuard<Session> {
        let slot = {
            let mut slots = self.guard();
            slots
                .entry(phone.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(Session::new(phone, Utc::now()))))
                .clone()
        };
        slot.lock_owned().await
    }

    /// Copy of the current session without creating one.
    #[cfg(test)]
    pub async fn snapshot(&self, phone: &str) -> Option<Session> {
        let slot = self.guard().get(phone).cloned()?;
        let session = slot.lock().await;
        Some(session.clone())
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops sessions idle for longer than the TTL. Sessions that are locked or
    /// have a pending acquirer are skipped.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut slots = self.guard();
        let before = slots.len();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(session) => now - session.updated_at <= ttl,
                Err(_) => true,
            }
        });
        before - slots.len()
    }
}

/// Background sweep evicting idle sessions on a fixed period.
pub fn start_eviction_task(store: Arc<SessionStore>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if store.is_empty() {
                continue;
            }
            let evicted = store.evict_idle(Utc::now());
            if evicted > 0 {
                log::info!(
                    "Evicted {} idle sessions, {} remaining",
                    evicted,
                    store.len()
                );
            }
        }
    });
}
