use super::types::{RateLimitContext, PUBLIC_TENANT};
use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Value used when no client address can be determined
pub const UNKNOWN_IP: &str = "unknown";

/// Headers consulted for the client address, in priority order
const IP_HEADER_CHAIN: [&str; 6] = [
    "x-forwarded-for",
    "x-real-ip",
    "proxy-client-ip",
    "wl-proxy-client-ip",
    "http_client_ip",
    "http_x_forwarded_for",
];

/// Derives client IP and tenant from inbound request headers.
///
/// Never fails: absent or malformed values degrade to `"unknown"` / the
/// default tenant.
#[derive(Debug, Clone)]
pub struct RequestMetadataExtractor {
    tenant_header: String,
}

impl RequestMetadataExtractor {
    pub fn new(tenant_header: impl Into<String>) -> Self {
        Self {
            tenant_header: tenant_header.into(),
        }
    }

    /// Resolve the client IP from the proxy header chain, then the socket address
    pub fn extract_client_ip(&self, headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> String {
        IP_HEADER_CHAIN
            .iter()
            .filter_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
            .filter_map(first_forwarded_entry)
            .find(|ip| !ip.eq_ignore_ascii_case(UNKNOWN_IP))
            .map(str::to_string)
            .or_else(|| remote_addr.map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| UNKNOWN_IP.to_string())
    }

    /// Resolve the tenant from the configured header, lowercased and trimmed
    pub fn resolve_tenant(&self, headers: &HeaderMap) -> String {
        headers
            .get(self.tenant_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| PUBLIC_TENANT.to_string())
    }

    /// Capture the per-request context used by every limiter check
    pub fn capture(&self, headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> RateLimitContext {
        RateLimitContext::new(
            self.extract_client_ip(headers, remote_addr),
            self.resolve_tenant(headers),
        )
    }
}

/// First entry of a possibly comma-separated header value
fn first_forwarded_entry(value: &str) -> Option<&str> {
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then_some(first)
}
