//! Real-time transport: who is connected, and a way to push to them.
//!
//! The WebSocket handler registers sessions here on connect and removes them
//! on disconnect. The notification dispatcher only ever looks sessions up.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{MatchEvent, UserId},
};

/// Events buffered per connection before pushes start failing
pub(crate) const SESSION_BUFFER: usize = 32;

/// Presence lookup used by the dispatcher
#[async_trait]
pub trait PresenceDirectory: Send + Sync {
    async fn try_get_session(&self, user_id: UserId) -> Option<SessionHandle>;
}

/// Sending half of one live connection
#[derive(Debug, Clone)]
pub struct SessionHandle {
    connection_id: Uuid,
    tx: mpsc::Sender<MatchEvent>,
}

impl SessionHandle {
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Queues an event for the connection's writer task without waiting
    ///
    /// A connection that stopped reading fails here instead of stalling the caller.
    pub fn try_send(&self, event: MatchEvent) -> AppResult<()> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => AppError::Internal("session buffer full".to_string()),
            TrySendError::Closed(_) => AppError::Internal("session closed".to_string()),
        })
    }
}

/// In-process presence directory, one live session per user (newest wins)
#[derive(Default)]
pub struct ConnectionHub {
    sessions: RwLock<HashMap<UserId, SessionHandle>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection, replacing any previous one for the user
    pub async fn connect(&self, user_id: UserId) -> (SessionHandle, mpsc::Receiver<MatchEvent>) {
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        let handle = SessionHandle {
            connection_id: Uuid::new_v4(),
            tx,
        };

        let replaced = self
            .sessions
            .write()
            .await
            .insert(user_id, handle.clone())
            .is_some();

        tracing::info!(
            user_id = %user_id,
            connection_id = %handle.connection_id,
            replaced,
            "Session connected"
        );

        (handle, rx)
    }

    /// Removes the user's session if it is still `connection_id`
    pub async fn disconnect(&self, user_id: UserId, connection_id: Uuid) {
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(&user_id)
            .map(|s| s.connection_id == connection_id)
            .unwrap_or(false)
        {
            sessions.remove(&user_id);
            tracing::info!(user_id = %user_id, connection_id = %connection_id, "Session disconnected");
        }
    }

    pub async fn connected_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl PresenceDirectory for ConnectionHub {
    async fn try_get_session(&self, user_id: UserId) -> Option<SessionHandle> {
        self.sessions.read().await.get(&user_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SharedItem, UserSummary};

    fn sample_event() -> MatchEvent {
        MatchEvent::MatchRequestReceived {
            from_user: UserSummary {
                id: Uuid::new_v4(),
                display_name: None,
            },
            item: SharedItem { id: 550, title: None },
        }
    }

    #[tokio::test]
    async fn test_connected_user_receives_pushes() {
        let hub = ConnectionHub::new();
        let user = Uuid::new_v4();
        let (_handle, mut rx) = hub.connect(user).await;

        let session = hub.try_get_session(user).await.unwrap();
        session.try_send(sample_event()).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind(), "match_request_received");
    }

    #[tokio::test]
    async fn test_stale_disconnect_keeps_newer_session() {
        let hub = ConnectionHub::new();
        let user = Uuid::new_v4();
        let (first, _rx1) = hub.connect(user).await;
        let (second, _rx2) = hub.connect(user).await;

        hub.disconnect(user, first.connection_id()).await;
        let current = hub.try_get_session(user).await.unwrap();
        assert_eq!(current.connection_id(), second.connection_id());

        hub.disconnect(user, second.connection_id()).await;
        assert!(hub.try_get_session(user).await.is_none());
        assert_eq!(hub.connected_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_to_dropped_connection_fails() {
        let hub = ConnectionHub::new();
        let user = Uuid::new_v4();
        let (handle, rx) = hub.connect(user).await;
        drop(rx);
        assert!(handle.try_send(sample_event()).is_err());
    }

    #[tokio::test]
    async fn test_full_buffer_fails_without_waiting() {
        let hub = ConnectionHub::new();
        let (handle, _rx) = hub.connect(Uuid::new_v4()).await;
        for _ in 0..SESSION_BUFFER {
            handle.try_send(sample_event()).unwrap();
        }
        assert!(handle.try_send(sample_event()).is_err());
    }
}
