//! Registry of live chat sessions.
//!
//! Every accepted WebSocket is registered here with its resolved identity, a
//! bounded outbound queue and a close token. Removing a session cancels the
//! token, which tears down both halves of its connection.

use dashmap::DashMap;
use log::{debug, info};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::chat::ChatMessage;
use crate::identity::Identity;

/// Default capacity of a session's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Message queued for delivery to one session.
pub type OutboundFrame = Arc<ChatMessage>;

/// Registry-assigned session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to a registered session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    identity: Arc<Identity>,
    outbound: mpsc::Sender<OutboundFrame>,
    closed: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn nickname(&self) -> &str {
        &self.identity.nickname
    }

    /// False once the session has been removed from the registry.
    pub fn is_live(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Token cancelled when the session is removed.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Non-blocking push into the session's outbound queue.
    pub(crate) fn try_deliver(&self, frame: OutboundFrame) -> Result<(), TrySendError<OutboundFrame>> {
        self.outbound.try_send(frame)
    }
}

/// Result of [`ConnectionRegistry::register`].
#[derive(Debug)]
pub struct Registration {
    pub session: SessionHandle,
    /// Consumer side of the session's outbound queue, owned by its delivery worker.
    pub outbound: mpsc::Receiver<OutboundFrame>,
}

/// Concurrent set of live sessions.
#[derive(Debug)]
pub struct ConnectionRegistry {
    sessions: DashMap<SessionId, SessionHandle>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    /// Create a registry whose sessions get `queue_capacity` pending slots each.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Register a new session for `identity`.
    pub fn register(&self, identity: Identity) -> Registration {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let session = SessionHandle {
            id,
            identity: Arc::new(identity),
            outbound: tx,
            closed: CancellationToken::new(),
        };
        self.sessions.insert(id, session.clone());
        info!(
            "Registered session {} for {} ({})",
            id,
            session.nickname(),
            session.identity().addr
        );
        Registration {
            session,
            outbound: rx,
        }
    }

    /// Remove a session and signal its connection to close.
    ///
    /// Returns true only for the call that actually removed it.
    pub fn unregister(&self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some((_, session)) => {
                session.closed.cancel();
                debug!("Unregistered session {} ({})", id, session.nickname());
                true
            }
            None => false,
        }
    }

    /// Visit a point-in-time snapshot of the live sessions.
    ///
    /// No registry lock is held while `visit` runs, so it may call
    /// [`unregister`](Self::unregister).
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&SessionHandle),
    {
        let snapshot: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for session in &snapshot {
            visit(session);
        }
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn identity(name: &str) -> Identity {
        Identity::new(name, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
    }

    #[test]
    fn test_register_assigns_distinct_ids() {
        let registry = ConnectionRegistry::default();
        let a = registry.register(identity("alice"));
        let b = registry.register(identity("bob"));
        assert_ne!(a.session.id(), b.session.id());
        assert_eq!(registry.len(), 2);
        assert_eq!(a.session.nickname(), "alice");
    }

    #[test]
    fn test_unregister_happens_once_and_closes() {
        let registry = ConnectionRegistry::default();
        let reg = registry.register(identity("alice"));
        let id = reg.session.id();

        assert!(reg.session.is_live());
        assert!(registry.unregister(id));
        assert!(!reg.session.is_live());
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_for_each_tolerates_removal_during_visit() {
        let registry = ConnectionRegistry::default();
        let ids: Vec<SessionId> = (0..5)
            .map(|i| registry.register(identity(&format!("user{i}"))).session.id())
            .collect();

        let mut visited = 0;
        registry.for_each(|session| {
            visited += 1;
            registry.unregister(session.id());
        });

        assert_eq!(visited, ids.len());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let registry = ConnectionRegistry::new(0);
        assert_eq!(registry.queue_capacity(), 1);
        let reg = registry.register(identity("alice"));
        assert!(reg.session.try_deliver(Arc::new(sample())).is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_register_and_unregister() {
        let registry = Arc::new(ConnectionRegistry::default());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let reg = registry.register(identity(&format!("user{i}")));
                tokio::task::yield_now().await;
                assert!(registry.unregister(reg.session.id()));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(registry.is_empty());
    }

    fn sample() -> ChatMessage {
        ChatMessage {
            id: 1,
            nickname: "alice".to_string(),
            content: "hi".to_string(),
            kind: crate::chat::MessageKind::Text,
            file_id: None,
            timestamp: crate::chat::now_millis(),
        }
    }
}
