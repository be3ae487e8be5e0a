//! Platform Detection (C7).
//!
//! An explicit `X-Platform` header takes priority; absent that, the broker
//! falls back to sniffing `User-Agent` the way a reverse proxy would, since
//! not every client can set custom headers from a browser WebSocket
//! connection attempt.

use axum::http::HeaderMap;
use kvb_protocol::Platform;

pub fn detect(headers: &HeaderMap) -> Platform {
    if let Some(value) = headers.get("x-platform").and_then(|v| v.to_str().ok()) {
        return Platform::parse(value);
    }

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if user_agent.contains("ReactNative") {
        Platform::ReactNative
    } else if user_agent.contains("Mozilla") || user_agent.contains("Chrome") || user_agent.contains("Safari") {
        Platform::Browser
    } else {
        Platform::Server
    }
}
