//! Source address extraction for rate limiting.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;

use crate::app_state::AppState;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Client address used as the rate-limit subject.
///
/// The first `X-Forwarded-For` entry when the gateway trusts its proxy,
/// else the TCP peer address, else `"unknown"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIp(pub String);

impl SourceIp {
    /// Picks the client address from headers and the peer address.
    #[must_use]
    pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> Self {
        if trust_forwarded_for
            && let Some(forwarded) = headers
                .get(X_FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        {
            return Self(forwarded.to_string());
        }
        Self(peer.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string()))
    }
}

impl FromRequestParts<AppState> for SourceIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::resolve(&parts.headers, peer, state.trust_forwarded_for))
    }
}
