//! Ordered persist-and-broadcast pipeline.
//!
//! Every submission appends to the durable log and then hands the stored
//! message to the hub while holding one global lock, so the order clients
//! observe is exactly the log order. Throughput is capped by that lock;
//! chat volume is low enough that this does not matter.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::ws::ChatHub;

use super::models::{ChatMessage, now_millis};
use super::repository::ChatRepository;

/// Serializes "append to log" + "broadcast" per message.
#[derive(Debug)]
pub struct MessagePipeline {
    repo: ChatRepository,
    hub: Arc<ChatHub>,
    sequence: Mutex<()>,
}

impl MessagePipeline {
    pub fn new(repo: ChatRepository, hub: Arc<ChatHub>) -> Self {
        Self {
            repo,
            hub,
            sequence: Mutex::new(()),
        }
    }

    pub fn hub(&self) -> &Arc<ChatHub> {
        &self.hub
    }

    /// Persist and broadcast a text message.
    ///
    /// Nothing is broadcast if the append fails.
    pub async fn submit_text(&self, nickname: &str, content: &str) -> Result<ChatMessage> {
        let _turn = self.sequence.lock().await;

        let message = self
            .repo
            .append_text(nickname, content, now_millis())
            .await
            .inspect_err(|e| error!("Save message from {} failed: {:#}", nickname, e))?;

        self.hub.broadcast(&message);
        debug!("Message {} from {} saved and broadcast", message.id, nickname);
        Ok(message)
    }

    /// Persist an attachment plus its file message atomically, then broadcast.
    pub async fn submit_file(
        &self,
        nickname: &str,
        original_name: &str,
        stored_name: &str,
    ) -> Result<ChatMessage> {
        let _turn = self.sequence.lock().await;

        let (message, attachment) = self
            .repo
            .append_file(nickname, original_name, stored_name, now_millis())
            .await
            .inspect_err(|e| error!("Save file record from {} failed: {:#}", nickname, e))?;

        self.hub.broadcast(&message);
        debug!(
            "File message {} ({} -> {}) from {} saved and broadcast",
            message.id, attachment.original_name, attachment.stored_name, nickname
        );
        Ok(message)
    }
}
