//! Client address resolution from proxy headers
//!
//! Precedence, first non-empty wins:
//! - `X-Forwarded-For` (leftmost entry)
//! - `X-Real-IP`
//! - `CF-Connecting-IP`
//! - the socket remote address
//!
//! The result is always a best-effort string; `::1` is reported as
//! `127.0.0.1` so loopback traffic keys the same stored rows either way.

use axum::http::HeaderMap;
use std::net::SocketAddr;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";
const CF_CONNECTING_IP: &str = "cf-connecting-ip";

/// Resolve the client address for a request
///
/// # Arguments
/// * `headers` - HTTP request headers
/// * `remote_addr` - The socket remote address (fallback)
pub fn resolve_client_address(headers: &HeaderMap, remote_addr: SocketAddr) -> String {
    let address = extract_forwarded_for(headers)
        .or_else(|| header_value(headers, X_REAL_IP))
        .or_else(|| header_value(headers, CF_CONNECTING_IP))
        // SocketAddr::ip() drops the port and IPv6 brackets
        .unwrap_or_else(|| remote_addr.ip().to_string());

    normalize_loopback(address)
}

/// First entry of the X-Forwarded-For chain
fn extract_forwarded_for(headers: &HeaderMap) -> Option<String> {
    let xff = headers.get(X_FORWARDED_FOR)?.to_str().ok()?;
    let first = xff.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn normalize_loopback(address: String) -> String {
    if address == "::1" {
        "127.0.0.1".to_string()
    } else {
        address
    }
}
