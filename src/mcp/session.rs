//! Transport-level session tracking
//!
//! Sessions are process-local and in-memory. Expired entries are removed by
//! [`SessionManager::sweep`], which request handlers trigger opportunistically
//! instead of a background timer.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Chance that a single request also runs an eviction sweep.
pub const SWEEP_PROBABILITY: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let idle = now.signed_duration_since(self.last_activity_at);
        idle.to_std().is_ok_and(|idle| idle > ttl)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> String {
        self.create_at(Utc::now()).await
    }

    pub async fn create_at(&self, now: DateTime<Utc>) -> String {
        let id = format!(
            "mcp-session-{}-{}",
            now.timestamp_millis(),
            Uuid::new_v4().simple()
        );
        let session = Session {
            id: id.clone(),
            created_at: now,
            last_activity_at: now,
        };

        self.sessions.write().await.insert(id.clone(), session);
        debug!(session_id = %id, "session created");
        id
    }

    /// Refreshes the session's activity timestamp. `false` means the session
    /// is unknown or already swept.
    pub async fn touch(&self, id: &str) -> bool {
        self.touch_at(id, Utc::now()).await
    }

    pub async fn touch_at(&self, id: &str, now: DateTime<Utc>) -> bool {
        match self.sessions.write().await.get_mut(id) {
            Some(session) => {
                session.last_activity_at = now;
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            debug!(session_id = %id, "session terminated");
        }
        removed
    }

    /// Removes every session idle for longer than `ttl` and returns how many
    /// were evicted.
    pub async fn sweep(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let expired: Vec<String> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|session| session.is_expired(now, ttl))
            .map(|session| session.id.clone())
            .collect();

        if expired.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write().await;
        let mut evicted = 0;
        for id in expired {
            // A touch between the two locks may have revived the session.
            if sessions
                .get(&id)
                .is_some_and(|session| session.is_expired(now, ttl))
            {
                sessions.remove(&id);
                evicted += 1;
            }
        }

        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "expired sessions swept");
        }
        evicted
    }

    pub async fn maybe_sweep(&self, ttl: Duration) -> usize {
        let run = rand::rng().random_bool(SWEEP_PROBABILITY);
        if run {
            self.sweep(Utc::now(), ttl).await
        } else {
            0
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn clear(&self) {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        sessions.clear();
        info!(count, "session table cleared");
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    const TTL: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn created_session_can_be_touched() {
        let manager = SessionManager::new();
        let id = manager.create().await;

        assert!(id.starts_with("mcp-session-"));
        assert!(manager.touch(&id).await);
        assert!(!manager.touch("mcp-session-unknown").await);
    }

    #[tokio::test]
    async fn sweep_evicts_after_ttl() {
        let manager = SessionManager::new();
        let start = Utc::now();
        let id = manager.create_at(start).await;

        assert_eq!(manager.sweep(start + TimeDelta::minutes(59), TTL).await, 0);
        assert!(manager.get(&id).await.is_some());

        assert_eq!(manager.sweep(start + TimeDelta::minutes(61), TTL).await, 1);
        assert!(!manager.touch(&id).await);
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn touch_postpones_eviction() {
        let manager = SessionManager::new();
        let start = Utc::now();
        let id = manager.create_at(start).await;

        assert!(manager.touch_at(&id, start + TimeDelta::minutes(50)).await);
        assert_eq!(manager.sweep(start + TimeDelta::minutes(90), TTL).await, 0);

        let session = manager.get(&id).await.expect("session still active");
        assert_eq!(session.created_at, start);
        assert_eq!(session.last_activity_at, start + TimeDelta::minutes(50));
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let manager = SessionManager::new();
        let now = Utc::now();
        let first = manager.create_at(now).await;
        let second = manager.create_at(now).await;

        assert_ne!(first, second);
        assert_eq!(manager.len().await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_create_touch_and_sweep() {
        let manager = SessionManager::new();
        let mut tasks = Vec::new();

        for worker in 0..16 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let id = manager.create().await;
                    assert!(manager.touch(&id).await);
                    if worker % 4 == 0 {
                        manager.sweep(Utc::now(), TTL).await;
                    }
                }
            }));
        }

        for task in tasks {
            task.await.expect("task should not panic");
        }

        assert_eq!(manager.len().await, 16 * 50);
        manager.clear().await;
        assert!(manager.is_empty().await);
    }
}
