//! Address-based caller identity.
//!
//! Callers are recognised solely by their network address, looked up in a
//! static allow-list file that is reloaded on a fixed period.

mod allowlist;
mod middleware;

use serde::Serialize;
use std::net::IpAddr;

pub use allowlist::{IdentityMap, IdentityResolver};
pub use middleware::require_known_peer;

/// Resolved identity of an allowed caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub nickname: String,
    #[serde(rename = "ip")]
    pub addr: IpAddr,
}

impl Identity {
    pub fn new(nickname: impl Into<String>, addr: IpAddr) -> Self {
        Self {
            nickname: nickname.into(),
            addr,
        }
    }
}
