//! Chat log: models, durable repository and the ordered submission pipeline.

mod models;
mod pipeline;
mod repository;

pub use models::{Attachment, ChatMessage, MessageKind, now_millis};
pub use pipeline::MessagePipeline;
pub use repository::{ChatRepository, HISTORY_PAGE_SIZE, PurgeOutcome};
