//! Application state shared across handlers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::chat::{ChatRepository, MessagePipeline};
use crate::identity::IdentityResolver;
use crate::storage::BlobStore;
use crate::ws::ChatHub;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Ordered append-then-broadcast path for new messages.
    pub pipeline: Arc<MessagePipeline>,
    /// Live session registry and fan-out.
    pub hub: Arc<ChatHub>,
    /// Read access to the chat log.
    pub repo: ChatRepository,
    /// Attachment blobs.
    pub storage: Arc<dyn BlobStore>,
    /// Address to nickname lookup used by the allow-list middleware.
    pub identities: Arc<IdentityResolver>,
    pub ping_interval: Duration,
    pub max_upload_bytes: usize,
    /// Web client assets, if served.
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    /// Wire the pipeline to the hub and chat log.
    pub fn new(
        repo: ChatRepository,
        hub: Arc<ChatHub>,
        storage: Arc<dyn BlobStore>,
        identities: Arc<IdentityResolver>,
    ) -> Self {
        let pipeline = Arc::new(MessagePipeline::new(repo.clone(), hub.clone()));
        Self {
            pipeline,
            hub,
            repo,
            storage,
            identities,
            ping_interval: Duration::from_secs(30),
            max_upload_bytes: 100 * 1024 * 1024,
            static_dir: None,
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_max_upload_bytes(mut self, limit: usize) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    pub fn with_static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }
}
