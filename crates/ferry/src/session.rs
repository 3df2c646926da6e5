//! Transfer sessions and the single-active-transfer invariant.
//!
//! A [`SessionManager`] is constructed once per process and handed to the
//! orchestrator. It owns every piece of state that outlives one file: the
//! session map, the "a transfer is running" marker, the stop flag, and the
//! consecutive-error [`CircuitBreaker`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use ferry_core::{ChatId, SessionId, Settings};
use ferry_transfer::CircuitBreaker;

use crate::error::{RelayError, Result};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStep {
    /// The operator is still answering the wizard.
    Configuring,
    /// Settings are final; waiting for the run to start.
    Ready,
    Running,
}

/// One clone request: where from, where to, and what to change.
#[derive(Debug, Clone)]
pub struct TransferSession {
    pub id: SessionId,
    pub source: ChatId,
    pub dest: ChatId,
    pub settings: Settings,
    pub step: SessionStep,
    pub created_at: Instant,
}

/// Owns sessions and the process-wide transfer state.
pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, TransferSession>>,
    active: Mutex<Option<SessionId>>,
    next_id: AtomicU64,
    stop: AtomicBool,
    breaker: CircuitBreaker,
    ttl: Duration,
}

impl SessionManager {
    /// `ttl` bounds how long an idle session may linger.
    pub fn new(breaker_threshold: u32, ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
            stop: AtomicBool::new(false),
            breaker: CircuitBreaker::new(breaker_threshold),
            ttl,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, TransferSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self) -> MutexGuard<'_, Option<SessionId>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    pub fn create(&self, source: ChatId, dest: ChatId) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sessions().insert(
            id,
            TransferSession {
                id,
                source,
                dest,
                settings: Settings::default(),
                step: SessionStep::Configuring,
                created_at: Instant::now(),
            },
        );
        debug!(session = %id, source = %source, dest = %dest, "session created");
        id
    }

    pub fn get(&self, id: SessionId) -> Option<TransferSession> {
        self.sessions().get(&id).cloned()
    }

    /// Replace the settings record and mark the session ready.
    pub fn update_settings(&self, id: SessionId, settings: Settings) -> Result<()> {
        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(&id)
            .ok_or(RelayError::SessionNotFound(id))?;
        if session.step == SessionStep::Running {
            return Err(RelayError::AlreadyRunning(id));
        }
        session.settings = settings;
        session.step = SessionStep::Ready;
        Ok(())
    }

    /// Drop a session. A running session is asked to stop instead; its
    /// [`RunGuard`] removes it once the loop exits.
    pub fn cancel(&self, id: SessionId) -> bool {
        if *self.active() == Some(id) {
            self.request_stop();
            return true;
        }
        self.sessions().remove(&id).is_some()
    }

    /// Remove idle sessions older than the TTL. Returns what was removed.
    pub fn expire_stale(&self) -> Vec<SessionId> {
        let active = *self.active();
        let now = Instant::now();
        let mut expired = Vec::new();
        self.sessions().retain(|id, session| {
            let keep = Some(*id) == active || now.duration_since(session.created_at) < self.ttl;
            if !keep {
                expired.push(*id);
            }
            keep
        });
        if !expired.is_empty() {
            info!(count = expired.len(), "expired idle sessions");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Running
    // ─────────────────────────────────────────────────────────────────────────

    /// Mark `id` as the running session.
    ///
    /// Fails if any session is already running. Clears the stop flag and the
    /// circuit breaker. Dropping the returned guard tears the session down.
    pub fn begin(self: &Arc<Self>, id: SessionId) -> Result<RunGuard> {
        let mut active = self.active();
        if let Some(running) = *active {
            return Err(RelayError::AlreadyRunning(running));
        }
        let session = {
            let mut sessions = self.sessions();
            let session = sessions
                .get_mut(&id)
                .ok_or(RelayError::SessionNotFound(id))?;
            session.step = SessionStep::Running;
            session.clone()
        };
        *active = Some(id);
        self.stop.store(false, Ordering::SeqCst);
        self.breaker.reset();

        info!(session = %id, "transfer started");
        Ok(RunGuard {
            manager: Arc::clone(self),
            session,
        })
    }

    pub fn is_running(&self) -> bool {
        self.active().is_some()
    }

    /// Ask the running loop to stop at its next item.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn finish(&self, id: SessionId) {
        self.sessions().remove(&id);
        let mut active = self.active();
        if *active == Some(id) {
            *active = None;
        }
        self.stop.store(false, Ordering::SeqCst);
        info!(session = %id, "transfer torn down");
    }
}

/// Held for the duration of a run. Dropping it removes the session and
/// clears the running marker, on every exit path.
pub struct RunGuard {
    manager: Arc<SessionManager>,
    session: TransferSession,
}

impl RunGuard {
    /// Snapshot of the session as it was when the run began.
    pub fn session(&self) -> &TransferSession {
        &self.session
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.manager.finish(self.session.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<SessionManager> {
        Arc::new(SessionManager::new(5, Duration::from_secs(600)))
    }

    #[test]
    fn test_create_and_configure() {
        let sessions = manager();
        let id = sessions.create(ChatId(1), ChatId(2));
        assert_eq!(sessions.get(id).unwrap().step, SessionStep::Configuring);

        let settings = Settings {
            extra_caption: Some("via ferry".into()),
            ..Default::default()
        };
        sessions.update_settings(id, settings.clone()).unwrap();
        let session = sessions.get(id).unwrap();
        assert_eq!(session.step, SessionStep::Ready);
        assert_eq!(session.settings, settings);
    }

    #[test]
    fn test_single_active_session() {
        let sessions = manager();
        let a = sessions.create(ChatId(1), ChatId(2));
        let b = sessions.create(ChatId(3), ChatId(4));

        let guard = sessions.begin(a).unwrap();
        assert!(sessions.is_running());
        assert!(matches!(
            sessions.begin(b),
            Err(RelayError::AlreadyRunning(running)) if running == a
        ));
        assert!(matches!(
            sessions.update_settings(a, Settings::default()),
            Err(RelayError::AlreadyRunning(_))
        ));

        drop(guard);
        assert!(!sessions.is_running());
        assert!(sessions.get(a).is_none());
        assert!(sessions.begin(b).is_ok());
    }

    #[test]
    fn test_begin_resets_stop_and_breaker() {
        let sessions = manager();
        sessions.request_stop();
        for _ in 0..5 {
            sessions.breaker().record_fault();
        }
        let id = sessions.create(ChatId(1), ChatId(2));
        let _guard = sessions.begin(id).unwrap();
        assert!(!sessions.stop_requested());
        assert!(!sessions.breaker().is_open());
    }

    #[test]
    fn test_cancel_running_requests_stop() {
        let sessions = manager();
        let id = sessions.create(ChatId(1), ChatId(2));
        let guard = sessions.begin(id).unwrap();

        assert!(sessions.cancel(id));
        assert!(sessions.stop_requested());
        assert!(sessions.get(id).is_some());

        drop(guard);
        assert!(sessions.get(id).is_none());
        assert!(!sessions.stop_requested());
    }

    #[test]
    fn test_unknown_session() {
        let sessions = manager();
        assert!(!sessions.cancel(SessionId(99)));
        assert!(matches!(
            sessions.begin(SessionId(99)),
            Err(RelayError::SessionNotFound(_))
        ));
        assert!(!sessions.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions_expire() {
        let sessions = manager();
        let old = sessions.create(ChatId(1), ChatId(2));
        let running = sessions.create(ChatId(5), ChatId(6));
        let _guard = sessions.begin(running).unwrap();

        tokio::time::advance(Duration::from_secs(500)).await;
        let fresh = sessions.create(ChatId(3), ChatId(4));
        tokio::time::advance(Duration::from_secs(200)).await;

        assert_eq!(sessions.expire_stale(), vec![old]);
        assert!(sessions.get(fresh).is_some());
        assert!(sessions.get(running).is_some());
        assert_eq!(sessions.len(), 2);
    }
}
