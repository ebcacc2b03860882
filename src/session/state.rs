use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;
use uuid::Uuid;

use crate::images::ImageAsset;
use crate::vision::Analysis;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    NoIdentity,
    AwaitingImage,
    ImageReady,
    Analyzing,
    ResultReady,
}

/// Everything one user has entered so far. Private to that user.
#[derive(Debug, Default)]
pub struct Session {
    pub(super) identity: Option<String>,
    pub(super) image: Option<ImageAsset>,
    pub(super) last: Option<Analysis>,
    // false once a newer image replaced the one `last` was computed from
    pub(super) last_matches_image: bool,
    pub(super) phase: Phase,
}

impl Session {
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn image(&self) -> Option<&ImageAsset> {
        self.image.as_ref()
    }

    pub fn last_analysis(&self) -> Option<&Analysis> {
        self.last.as_ref()
    }

    pub fn last_matches_image(&self) -> bool {
        self.last.is_some() && self.last_matches_image
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

struct Entry {
    handle: SessionHandle,
    touched: Instant,
}

/// Live sessions by id. Each session has its own lock, so one user's actions run one at a time.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Entry>>>,
}

impl SessionStore {
    pub async fn open(&self) -> (Uuid, SessionHandle) {
        let id = Uuid::new_v4();
        let handle = SessionHandle::default();
        let entry = Entry {
            handle: handle.clone(),
            touched: Instant::now(),
        };
        self.inner.write().await.insert(id, entry);
        (id, handle)
    }

    /// Looks a session up and counts as activity on it.
    pub async fn get(&self, id: Uuid) -> Option<SessionHandle> {
        let mut map = self.inner.write().await;
        let entry = map.get_mut(&id)?;
        entry.touched = Instant::now();
        Some(entry.handle.clone())
    }

    pub async fn close(&self, id: Uuid) -> bool {
        self.inner.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Drop sessions nobody touched for `ttl`. A session a request still holds is kept.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, e| e.touched.elapsed() < ttl || Arc::strong_count(&e.handle) > 1);
        before - map.len()
    }

    pub fn spawn_sweeper(&self, ttl: Duration, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let evicted = store.evict_idle(ttl).await;
                if evicted > 0 {
                    let remaining = store.len().await;
                    info!(evicted, remaining, "idle sessions evicted");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_get_close() {
        let store = SessionStore::default();
        let (id, _) = store.open().await;
        let (other, _) = store.open().await;
        assert_ne!(id, other);
        assert_eq!(store.len().await, 2);

        let handle = store.get(id).await.expect("session present");
        assert_eq!(handle.lock().await.phase(), Phase::NoIdentity);

        assert!(store.close(id).await);
        assert!(!store.close(id).await);
        assert!(store.get(id).await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        let store = SessionStore::default();
        let (idle, _) = store.open().await;
        let (busy, held) = store.open().await;

        assert_eq!(store.evict_idle(Duration::ZERO).await, 1);
        assert!(store.get(idle).await.is_none());
        assert!(store.get(busy).await.is_some());

        drop(held);
        assert_eq!(store.evict_idle(Duration::ZERO).await, 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn recent_sessions_survive() {
        let store = SessionStore::default();
        let (id, _) = store.open().await;
        assert_eq!(store.evict_idle(Duration::from_secs(60)).await, 0);
        assert!(store.get(id).await.is_some());
    }

    #[tokio::test]
    async fn sweeper_clears_abandoned_sessions() {
        let store = SessionStore::default();
        store.open().await;
        store.open().await;

        let sweeper = store.spawn_sweeper(Duration::from_millis(10), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.abort();
        assert_eq!(store.len().await, 0);
    }
}
