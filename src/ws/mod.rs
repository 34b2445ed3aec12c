//! Realtime chat over WebSocket.
//!
//! ```text
//!   client ──frame──▶ read path ──▶ MessagePipeline ──append──▶ chat log
//!                                        │
//!                                        ▼ broadcast
//!                                     ChatHub ──try_send──▶ per-session queue
//!                                                                  │
//!   client ◀──────────────────── delivery worker ◀─────────────────┘
//! ```
//!
//! Each session owns a bounded queue. A full queue marks the session as
//! unresponsive: it is removed from the registry and its socket closed.

mod handler;
mod hub;
mod registry;
mod types;

pub use handler::ws_handler;
pub use hub::{BroadcastReport, ChatHub};
pub use registry::{
    ConnectionRegistry, DEFAULT_QUEUE_CAPACITY, OutboundFrame, Registration, SessionHandle,
    SessionId,
};
pub use types::InboundFrame;
