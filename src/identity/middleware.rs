//! Allow-list boundary middleware and the typed identity extractor.

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use log::warn;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::api::ApiError;

use super::{Identity, IdentityResolver};

/// Reject peers missing from the allow-list; attach [`Identity`] otherwise.
pub async fn require_known_peer(
    State(resolver): State<Arc<IdentityResolver>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let addr: IpAddr = peer.ip().to_canonical();
    let Some(nickname) = resolver.resolve(addr) else {
        warn!("Address {} not in allow-list", addr);
        return Err(ApiError::forbidden(format!("address {addr} is not allowed")));
    };

    request.extensions_mut().insert(Identity::new(nickname, addr));
    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or_else(|| ApiError::forbidden("caller identity was not resolved"))
    }
}
