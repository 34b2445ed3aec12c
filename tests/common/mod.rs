//! Test utilities and common setup.

#![allow(dead_code)]

use axum::Router;
use axum::extract::connect_info::MockConnectInfo;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use lanchat::api::{self, AppState};
use lanchat::chat::ChatRepository;
use lanchat::db::Database;
use lanchat::identity::{IdentityMap, IdentityResolver};
use lanchat::storage::LocalStorage;
use lanchat::ws::ChatHub;

/// Allow-listed as "alice".
pub const ALICE_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
/// Allow-listed as "bob".
pub const BOB_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
/// Not on the allow-list.
pub const STRANGER_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 99));

/// A fully wired application over an in-memory database and temp upload dir.
pub struct TestApp {
    pub state: AppState,
    pub repo: ChatRepository,
    pub hub: Arc<ChatHub>,
    pub files_dir: PathBuf,
    _files: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_queue_capacity(lanchat::ws::DEFAULT_QUEUE_CAPACITY).await
    }

    pub async fn with_queue_capacity(capacity: usize) -> Self {
        let db = Database::in_memory().await.unwrap();
        let repo = ChatRepository::new(db.pool().clone());

        let files = tempfile::tempdir().unwrap();
        let files_dir = files.path().to_path_buf();
        let storage = Arc::new(LocalStorage::new(&files_dir));

        let identities = Arc::new(IdentityResolver::fixed(IdentityMap::from_iter([
            (ALICE_ADDR, "alice".to_string()),
            (BOB_ADDR, "bob".to_string()),
        ])));

        let hub = Arc::new(ChatHub::new(capacity));
        let state = AppState::new(repo.clone(), hub.clone(), storage, identities);

        Self {
            state,
            repo,
            hub,
            files_dir,
            _files: files,
        }
    }

    /// Router whose requests appear to come from `addr`.
    pub fn router_from(&self, addr: IpAddr) -> Router {
        api::create_router(self.state.clone()).layer(MockConnectInfo(SocketAddr::new(addr, 50_000)))
    }

    /// Router whose requests appear to come from alice.
    pub fn router(&self) -> Router {
        self.router_from(ALICE_ADDR)
    }

    /// Serve the real router on an ephemeral loopback port.
    pub async fn spawn_server(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = api::create_router(self.state.clone());
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        addr
    }
}

/// Build a multipart body with one file part under `field`.
pub fn multipart_body(boundary: &str, field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}
