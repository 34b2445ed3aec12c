//! Single-room LAN chat relay.
//!
//! Allow-listed clients exchange text and file messages over WebSocket.
//! Every message is appended to a SQLite log before it is fanned out, so
//! live delivery order always matches history order.

pub mod api;
pub mod chat;
pub mod db;
pub mod identity;
pub mod retention;
pub mod settings;
pub mod storage;
pub mod ws;
