//! WebSocket handler for chat sessions.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::api::AppState;
use crate::identity::Identity;

use super::hub::ChatHub;
use super::registry::{OutboundFrame, Registration, SessionHandle};
use super::types::InboundFrame;

/// Upper bound on the closing handshake with a peer.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// WebSocket upgrade handler.
///
/// GET /ws
pub async fn ws_handler(
    State(state): State<AppState>,
    identity: Identity,
    ws: WebSocketUpgrade,
) -> Response {
    debug!(
        "WebSocket upgrade request from {} ({})",
        identity.nickname, identity.addr
    );
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, identity))
}

/// Run one session: register it, spawn its delivery worker, then process
/// inbound frames in order until either side closes.
async fn handle_ws_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let (sender, mut receiver) = socket.split();
    let nickname = identity.nickname.clone();

    let Registration { session, outbound } = state.hub.register(identity);
    let session_id = session.id();
    let closed = session.close_token();
    info!("WebSocket connected: {} ({})", nickname, session_id);

    let mut send_task = tokio::spawn(deliver(
        sender,
        outbound,
        session,
        state.hub.clone(),
        state.ping_interval,
    ));

    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => {
                debug!("Session {} closed by hub", session_id);
                break;
            }
            next = receiver.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<InboundFrame>(text.as_str()) {
                    Ok(frame) => {
                        // Failures are logged by the pipeline; the sender gets no error frame.
                        let _ = state.pipeline.submit_text(&nickname, &frame.content).await;
                    }
                    Err(e) => {
                        warn!("Failed to parse frame from {}: {} - {}", nickname, e, text.as_str());
                    }
                }
            }
            Some(Ok(Message::Binary(_))) => {
                debug!("Received binary frame from {}, ignoring", nickname);
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                debug!("{} closed the WebSocket", nickname);
                break;
            }
            Some(Err(e)) => {
                info!("Read error from {}: {}", nickname, e);
                break;
            }
        }
    }

    state.hub.unregister(session_id);
    // The worker exits once the token fires; a peer that stopped reading can
    // still hold its final close frame, so it only gets a short grace period.
    match tokio::time::timeout(CLOSE_TIMEOUT, &mut send_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Delivery worker for {} ended abnormally: {}", session_id, e),
        Err(_) => {
            debug!("Delivery worker for {} stuck on write, aborting", session_id);
            send_task.abort();
        }
    }
    info!("WebSocket closed: {} ({})", nickname, session_id);
}

/// Drain the session's outbound queue into the socket, pinging on idle.
///
/// Every write races the close token, so a removed session never stays
/// parked on a peer that stopped reading.
async fn deliver(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    session: SessionHandle,
    hub: Arc<ChatHub>,
    ping_interval: Duration,
) {
    let closed = session.close_token();
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        let message = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                match serde_json::to_string(&*frame) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        warn!("Failed to serialize message {}: {}", frame.id, e);
                        continue;
                    }
                }
            }
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        let kind = if matches!(message, Message::Ping(_)) { "Ping" } else { "Send" };
        tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            result = sender.send(message) => {
                if let Err(e) = result {
                    info!("{} failed to {}: {}", kind, session.nickname(), e);
                    break;
                }
            }
        }
    }

    hub.unregister(session.id());
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
        let _ = sender.send(Message::Close(None)).await;
        let _ = sender.close().await;
    })
    .await;
}
