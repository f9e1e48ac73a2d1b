//! Session registry (spec §4.3). Tracks live sessions, heartbeats, and
//! detects staleness. Structured like the teacher's `SessionManager`
//! (`session/mod.rs`) — a thin wrapper that owns in-memory state behind a
//! lock and exposes CRUD plus a periodic maintenance sweep — but holding
//! `Session` records straight from the data model (spec §3) instead of
//! provider-runner handles, since session liveness here has no attached
//! subprocess.

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::store::model::{Session, SessionRole};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Soft staleness levels a dashboard can render without triggering reclaim
/// (spec §4.3 — only `cleanup` reclaims, at the stricter default threshold).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessLevel {
    Ok,
    Warn,
    Danger,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    clock: Arc<dyn Clock>,
    warn_secs: i64,
    danger_secs: i64,
}

impl SessionRegistry {
    pub fn new(clock: Arc<dyn Clock>, warn_secs: i64, danger_secs: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
            warn_secs,
            danger_secs,
        }
    }

    /// Idempotent — updates metadata in place if the id is already known.
    pub async fn register(
        &self,
        session_id: &str,
        role: SessionRole,
        context: &str,
        labels: BTreeSet<String>,
    ) -> Session {
        let now = self.clock.now_utc();
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .and_modify(|s| {
                s.role = role;
                s.context = context.to_string();
                s.labels = labels.clone();
                s.last_heartbeat = now;
            })
            .or_insert_with(|| Session {
                session_id: session_id.to_string(),
                role,
                context: context.to_string(),
                labels,
                started_at: now,
                last_heartbeat: now,
                working_on: None,
            });
        session.clone()
    }

    pub async fn heartbeat(&self, session_id: &str) -> CoreResult<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(s) => {
                s.last_heartbeat = self.clock.now_utc();
                Ok(())
            }
            None => Err(CoreError::NotFound(format!("unknown session {session_id}"))),
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn list(&self) -> Vec<Session> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn set_working_on(&self, session_id: &str, task_id: Option<String>) -> CoreResult<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(s) => {
                s.working_on = task_id;
                Ok(())
            }
            None => Err(CoreError::NotFound(format!("unknown session {session_id}"))),
        }
    }

    pub async fn claim_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .await
            .get(session_id)
            .and_then(|s| s.working_on.as_ref())
            .map(|_| 1)
            .unwrap_or(0)
    }

    /// Remove a session. Returns the task it held, if any, so the caller can
    /// decide whether to release it back to `open` (default) or leave it
    /// `in_progress` on a graceful hand-off (spec §4.3).
    pub async fn end(&self, session_id: &str) -> CoreResult<Option<String>> {
        let mut sessions = self.sessions.write().await;
        match sessions.remove(session_id) {
            Some(s) => Ok(s.working_on),
            None => Err(CoreError::NotFound(format!("unknown session {session_id}"))),
        }
    }

    /// Look up `session_id` and reject it if its heartbeat has aged past
    /// `danger_secs` — callers about to act on a session's behalf (claiming
    /// or completing a task) check this first so a silently-dead session
    /// can't keep mutating the backlog until `cleanup` gets around to it.
    pub async fn ensure_fresh(&self, session_id: &str) -> CoreResult<Session> {
        let session = self
            .get(session_id)
            .await
            .ok_or_else(|| CoreError::NotFound(format!("unknown session {session_id}")))?;
        if self.staleness(&session) == StalenessLevel::Danger {
            return Err(CoreError::Stale(format!(
                "session {session_id} heartbeat expired more than {}s ago",
                self.danger_secs
            )));
        }
        Ok(session)
    }

    /// Staleness relative to `last_heartbeat`, for dashboard rendering only
    /// — never triggers reclaim itself.
    pub fn staleness(&self, session: &Session) -> StalenessLevel {
        let age = (Utc::now() - session.last_heartbeat).num_seconds();
        if age >= self.danger_secs {
            StalenessLevel::Danger
        } else if age >= self.warn_secs {
            StalenessLevel::Warn
        } else {
            StalenessLevel::Ok
        }
    }

    /// Scan for sessions whose heartbeat is older than `threshold_seconds`,
    /// end them, and return `(session_id, released_task_id)` pairs for the
    /// caller to release back to `open` in the Store.
    pub async fn cleanup(&self, threshold_seconds: i64) -> Vec<(String, Option<String>)> {
        let now = Utc::now();
        let stale_ids: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| (now - s.last_heartbeat).num_seconds() > threshold_seconds)
                .map(|s| s.session_id.clone())
                .collect()
        };

        let mut released = Vec::with_capacity(stale_ids.len());
        let mut sessions = self.sessions.write().await;
        for id in stale_ids {
            if let Some(s) = sessions.remove(&id) {
                released.push((id, s.working_on));
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::collections::BTreeSet;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(SystemClock), 60, 120)
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let reg = registry();
        reg.register("s1", SessionRole::Worker, "ctx", BTreeSet::new())
            .await;
        reg.register("s1", SessionRole::Worker, "ctx2", BTreeSet::new())
            .await;
        assert_eq!(reg.list().await.len(), 1);
        assert_eq!(reg.get("s1").await.unwrap().context, "ctx2");
    }

    #[tokio::test]
    async fn heartbeat_unknown_session_errors() {
        let reg = registry();
        assert!(matches!(reg.heartbeat("ghost").await, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn end_returns_held_task() {
        let reg = registry();
        reg.register("s1", SessionRole::Worker, "", BTreeSet::new()).await;
        reg.set_working_on("s1", Some("task-001".into())).await.unwrap();
        let released = reg.end("s1").await.unwrap();
        assert_eq!(released.as_deref(), Some("task-001"));
        assert!(reg.get("s1").await.is_none());
    }

    #[tokio::test]
    async fn cleanup_releases_only_stale_sessions() {
        let reg = registry();
        reg.register("fresh", SessionRole::Worker, "", BTreeSet::new()).await;
        let released = reg.cleanup(180).await;
        assert!(released.is_empty());
    }
}
