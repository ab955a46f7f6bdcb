//! In-memory registry of authenticated WebSocket connections.
//!
//! Each connection registers an event channel on connect. The tracker owns
//! the association between connection id, user, and the access token expiry;
//! a background sweep drops expired sessions and pushes a pre-expiry warning
//! to connections approaching theirs so clients can refresh in time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How often the expiry sweep runs.
    pub sweep_interval: Duration,
    /// How far ahead of expiry the warning fires.
    pub expiry_buffer: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            expiry_buffer: Duration::from_secs(120),
        }
    }
}

/// Pushed from the tracker to a connection's task.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The access token is inside the expiry buffer; the client should
    /// refresh now.
    TokenExpiring { expires_in_secs: i64 },
    /// The token expired and the session was dropped by the sweep.
    SessionExpired,
}

struct TrackedSession {
    user_id: Uuid,
    roles: Vec<String>,
    profile_id: Option<Uuid>,
    expires_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    warned: bool,
    events: UnboundedSender<SessionEvent>,
}

/// Snapshot of one tracked session, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub user_id: Uuid,
    pub roles: Vec<String>,
    pub profile_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Point-in-time census of tracked sessions, split by where each one stands
/// relative to its expiry.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStats {
    pub total: usize,
    /// Live but inside the expiry buffer.
    pub expiring_soon: usize,
    /// Past expiry, not yet dropped by the sweep.
    pub expired: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection is not registered")]
    UnknownConnection,
    #[error("refresh token belongs to a different user")]
    SubjectMismatch,
}

pub struct SessionTracker {
    sessions: Mutex<HashMap<String, TrackedSession>>,
    config: TrackerConfig,
}

impl SessionTracker {
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Record an authenticated connection. Re-authentication on the same
    /// connection replaces the previous entry.
    pub async fn authenticate(
        &self,
        connection_id: &str,
        user_id: Uuid,
        roles: Vec<String>,
        profile_id: Option<Uuid>,
        expires_at: DateTime<Utc>,
        events: UnboundedSender<SessionEvent>,
    ) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            connection_id.to_string(),
            TrackedSession {
                user_id,
                roles,
                profile_id,
                expires_at,
                last_activity: Utc::now(),
                warned: false,
                events,
            },
        );
        debug!(connection_id, %user_id, "connection authenticated");
    }

    /// Update the expiry and claims after a token refresh. The new token must
    /// belong to the user already bound to this connection.
    pub async fn refresh(
        &self,
        connection_id: &str,
        user_id: Uuid,
        roles: Vec<String>,
        profile_id: Option<Uuid>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(connection_id)
            .ok_or(SessionError::UnknownConnection)?;
        if session.user_id != user_id {
            warn!(connection_id, "refresh attempted with another user's token");
            return Err(SessionError::SubjectMismatch);
        }
        session.roles = roles;
        session.profile_id = profile_id;
        session.expires_at = expires_at;
        session.last_activity = Utc::now();
        session.warned = false;
        debug!(connection_id, %user_id, "session expiry extended");
        Ok(())
    }

    /// Bump the last-activity timestamp for any inbound traffic.
    pub async fn touch(&self, connection_id: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(connection_id) {
            session.last_activity = Utc::now();
        }
    }

    /// Whether the connection holds a live, unexpired session.
    pub async fn is_authenticated(&self, connection_id: &str) -> bool {
        let sessions = self.sessions.lock().await;
        sessions
            .get(connection_id)
            .is_some_and(|session| session.expires_at > Utc::now())
    }

    pub async fn user(&self, connection_id: &str) -> Option<Uuid> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(connection_id)
            .filter(|session| session.expires_at > Utc::now())
            .map(|session| session.user_id)
    }

    pub async fn session(&self, connection_id: &str) -> Option<SessionInfo> {
        let sessions = self.sessions.lock().await;
        sessions.get(connection_id).map(|session| SessionInfo {
            user_id: session.user_id,
            roles: session.roles.clone(),
            profile_id: session.profile_id,
            expires_at: session.expires_at,
            last_activity: session.last_activity,
        })
    }

    pub async fn disconnect(&self, connection_id: &str) {
        let mut sessions = self.sessions.lock().await;
        if sessions.remove(connection_id).is_some() {
            debug!(connection_id, "connection removed from tracker");
        }
    }

    pub async fn stats(&self) -> TrackerStats {
        let now = Utc::now();
        let warn_before = chrono::Duration::from_std(self.config.expiry_buffer)
            .unwrap_or_else(|_| chrono::Duration::seconds(120));
        let sessions = self.sessions.lock().await;
        let mut stats = TrackerStats {
            total: sessions.len(),
            expiring_soon: 0,
            expired: 0,
        };
        for session in sessions.values() {
            if session.expires_at <= now {
                stats.expired += 1;
            } else if session.expires_at - now <= warn_before {
                stats.expiring_soon += 1;
            }
        }
        stats
    }

    /// One sweep pass: drop expired sessions (telling the connection why)
    /// and warn the ones inside the expiry buffer.
    pub async fn sweep(&self) {
        let now = Utc::now();
        let warn_before = chrono::Duration::from_std(self.config.expiry_buffer)
            .unwrap_or_else(|_| chrono::Duration::seconds(120));
        let mut sessions = self.sessions.lock().await;

        sessions.retain(|connection_id, session| {
            if session.expires_at <= now {
                info!(connection_id, user_id = %session.user_id, "session expired, dropping");
                // Receiver may already be gone on a closing connection.
                let _ = session.events.send(SessionEvent::SessionExpired);
                return false;
            }
            if !session.warned && session.expires_at - now <= warn_before {
                let expires_in_secs = (session.expires_at - now).num_seconds();
                if session.events.send(SessionEvent::TokenExpiring { expires_in_secs }).is_ok() {
                    session.warned = true;
                }
            }
            true
        });
    }

    /// Background sweep loop. Failures cannot escape; the loop always
    /// continues.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn tracker() -> SessionTracker {
        SessionTracker::new(TrackerConfig::default())
    }

    fn rider_roles() -> Vec<String> {
        vec!["rider".to_string()]
    }

    #[tokio::test]
    async fn authenticate_then_query() {
        let tracker = tracker();
        let (tx, _rx) = unbounded_channel();
        let user_id = Uuid::new_v4();
        tracker
            .authenticate(
                "conn-1",
                user_id,
                rider_roles(),
                Some(Uuid::new_v4()),
                Utc::now() + chrono::Duration::minutes(15),
                tx,
            )
            .await;
        assert!(tracker.is_authenticated("conn-1").await);
        assert_eq!(tracker.user("conn-1").await, Some(user_id));
        assert!(!tracker.is_authenticated("conn-2").await);
    }

    #[tokio::test]
    async fn expired_session_is_not_authenticated() {
        let tracker = tracker();
        let (tx, _rx) = unbounded_channel();
        tracker
            .authenticate(
                "conn-1",
                Uuid::new_v4(),
                rider_roles(),
                None,
                Utc::now() - chrono::Duration::seconds(1),
                tx,
            )
            .await;
        assert!(!tracker.is_authenticated("conn-1").await);
        assert_eq!(tracker.user("conn-1").await, None);
    }

    #[tokio::test]
    async fn sweep_drops_expired_and_notifies() {
        let tracker = tracker();
        let (tx, mut rx) = unbounded_channel();
        tracker
            .authenticate(
                "conn-1",
                Uuid::new_v4(),
                rider_roles(),
                None,
                Utc::now() - chrono::Duration::seconds(1),
                tx,
            )
            .await;
        tracker.sweep().await;
        assert_eq!(tracker.stats().await.total, 0);
        assert!(matches!(rx.recv().await, Some(SessionEvent::SessionExpired)));
    }

    #[tokio::test]
    async fn sweep_warns_inside_buffer_once() {
        let tracker = tracker();
        let (tx, mut rx) = unbounded_channel();
        tracker
            .authenticate(
                "conn-1",
                Uuid::new_v4(),
                rider_roles(),
                None,
                Utc::now() + chrono::Duration::seconds(60),
                tx,
            )
            .await;
        tracker.sweep().await;
        tracker.sweep().await;
        let first = rx.try_recv();
        assert!(matches!(first, Ok(SessionEvent::TokenExpiring { .. })));
        assert!(rx.try_recv().is_err()); // warned only once
        assert_eq!(tracker.stats().await.total, 1);
    }

    #[tokio::test]
    async fn sweep_leaves_healthy_sessions_alone() {
        let tracker = tracker();
        let (tx, mut rx) = unbounded_channel();
        tracker
            .authenticate(
                "conn-1",
                Uuid::new_v4(),
                rider_roles(),
                None,
                Utc::now() + chrono::Duration::minutes(15),
                tx,
            )
            .await;
        tracker.sweep().await;
        assert!(rx.try_recv().is_err());
        assert!(tracker.is_authenticated("conn-1").await);
    }

    #[tokio::test]
    async fn refresh_rejects_other_users() {
        let tracker = tracker();
        let (tx, _rx) = unbounded_channel();
        let owner = Uuid::new_v4();
        tracker
            .authenticate(
                "conn-1",
                owner,
                rider_roles(),
                None,
                Utc::now() + chrono::Duration::minutes(1),
                tx,
            )
            .await;
        let outcome = tracker
            .refresh(
                "conn-1",
                Uuid::new_v4(),
                rider_roles(),
                None,
                Utc::now() + chrono::Duration::minutes(15),
            )
            .await;
        assert!(matches!(outcome, Err(SessionError::SubjectMismatch)));

        let outcome = tracker
            .refresh(
                "conn-1",
                owner,
                rider_roles(),
                Some(Uuid::new_v4()),
                Utc::now() + chrono::Duration::minutes(15),
            )
            .await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn refresh_resets_the_warning() {
        let tracker = tracker();
        let (tx, mut rx) = unbounded_channel();
        let owner = Uuid::new_v4();
        tracker
            .authenticate(
                "conn-1",
                owner,
                rider_roles(),
                None,
                Utc::now() + chrono::Duration::seconds(30),
                tx,
            )
            .await;
        tracker.sweep().await;
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::TokenExpiring { .. })));

        tracker
            .refresh(
                "conn-1",
                owner,
                rider_roles(),
                None,
                Utc::now() + chrono::Duration::seconds(30),
            )
            .await
            .unwrap();
        tracker.sweep().await;
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::TokenExpiring { .. })));
    }

    #[tokio::test]
    async fn stats_split_sessions_by_expiry() {
        let tracker = tracker();
        let (tx, _rx) = unbounded_channel();
        tracker
            .authenticate(
                "healthy",
                Uuid::new_v4(),
                rider_roles(),
                None,
                Utc::now() + chrono::Duration::minutes(15),
                tx.clone(),
            )
            .await;
        tracker
            .authenticate(
                "soon",
                Uuid::new_v4(),
                rider_roles(),
                None,
                Utc::now() + chrono::Duration::seconds(60),
                tx.clone(),
            )
            .await;
        tracker
            .authenticate(
                "gone",
                Uuid::new_v4(),
                rider_roles(),
                None,
                Utc::now() - chrono::Duration::seconds(1),
                tx,
            )
            .await;
        let stats = tracker.stats().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.expiring_soon, 1);
        assert_eq!(stats.expired, 1);
    }

    #[tokio::test]
    async fn touch_moves_last_activity_forward() {
        let tracker = tracker();
        let (tx, _rx) = unbounded_channel();
        let profile_id = Uuid::new_v4();
        tracker
            .authenticate(
                "conn-1",
                Uuid::new_v4(),
                rider_roles(),
                Some(profile_id),
                Utc::now() + chrono::Duration::minutes(15),
                tx,
            )
            .await;
        let before = tracker.session("conn-1").await.unwrap();
        assert_eq!(before.roles, rider_roles());
        assert_eq!(before.profile_id, Some(profile_id));

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        tracker.touch("conn-1").await;
        let after = tracker.session("conn-1").await.unwrap();
        assert!(after.last_activity > before.last_activity);
    }

    #[tokio::test]
    async fn disconnect_forgets_the_connection() {
        let tracker = tracker();
        let (tx, _rx) = unbounded_channel();
        tracker
            .authenticate(
                "conn-1",
                Uuid::new_v4(),
                rider_roles(),
                None,
                Utc::now() + chrono::Duration::minutes(15),
                tx,
            )
            .await;
        tracker.disconnect("conn-1").await;
        assert!(!tracker.is_authenticated("conn-1").await);
        assert_eq!(tracker.stats().await.total, 0);
    }
}
