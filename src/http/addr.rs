//! Best-effort caller address derivation.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Address recorded when nothing identifies the caller.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Derive the caller address used as rate limit key and log source.
///
/// Prefers the first `X-Forwarded-For` entry, then `X-Real-IP`, then the
/// transport peer's IP without its port.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(first) = header(FORWARDED_FOR)
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
    {
        return first.to_owned();
    }

    if let Some(real_ip) = header(REAL_IP) {
        return real_ip.to_owned();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_SOURCE.to_owned())
}

/// Transport peer address, present when served with connect info.
pub(crate) fn peer_addr(extensions: &axum::http::Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Extractor yielding the derived caller address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientAddr(client_address(
            &parts.headers,
            peer_addr(&parts.extensions),
        )))
    }
}
