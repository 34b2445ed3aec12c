//! Broadcast hub fanning chat messages out to every live session.

use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;

use crate::chat::ChatMessage;
use crate::identity::Identity;

use super::registry::{ConnectionRegistry, Registration, SessionId};

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions whose queue accepted the message.
    pub delivered: usize,
    /// Sessions disconnected because their queue was full or closed.
    pub dropped: usize,
}

/// WebSocket hub owning the connection registry.
///
/// Delivery never blocks: each session has a bounded queue drained by its
/// own worker, and a session whose queue is full is treated as
/// unresponsive and disconnected.
#[derive(Debug, Default)]
pub struct ChatHub {
    registry: ConnectionRegistry,
}

impl ChatHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            registry: ConnectionRegistry::new(queue_capacity),
        }
    }

    /// Register a new WebSocket session.
    pub fn register(&self, identity: Identity) -> Registration {
        self.registry.register(identity)
    }

    /// Remove a session; returns false if it was already gone.
    pub fn unregister(&self, id: SessionId) -> bool {
        self.registry.unregister(id)
    }

    pub fn is_registered(&self, id: SessionId) -> bool {
        self.registry.contains(id)
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Queue `message` for every live session.
    pub fn broadcast(&self, message: &ChatMessage) -> BroadcastReport {
        let frame = Arc::new(message.clone());
        let mut report = BroadcastReport::default();
        let mut stale: Vec<SessionId> = Vec::new();

        self.registry
            .for_each(|session| match session.try_deliver(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Session {} ({}) outbound queue full, disconnecting",
                        session.id(),
                        session.nickname()
                    );
                    stale.push(session.id());
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        "Session {} ({}) delivery worker gone, disconnecting",
                        session.id(),
                        session.nickname()
                    );
                    stale.push(session.id());
                }
            });

        for id in stale {
            if self.registry.unregister(id) {
                report.dropped += 1;
            }
        }

        debug!(
            "Broadcast message {} to {} session(s), dropped {}",
            message.id, report.delivered, report.dropped
        );
        report
    }
}
