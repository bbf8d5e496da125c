//! # Client Address Resolution
//!
//! The socket peer from `ConnectInfo` is the client address unless the
//! service runs behind proxies it trusts. With `n` trusted hops:
//!
//! 1. `X-Forwarded-For`: the entry the outermost trusted proxy appended,
//!    i.e. the `n`th from the right (the leftmost when the list is shorter)
//! 2. `X-Real-IP`
//! 3. The socket peer
//!
//! With no trusted hops both headers are ignored, so a caller cannot pick
//! its own rate-limit key.
//!
//! [`client_addr_middleware`] resolves the address once per request and
//! leaves a [`ClientAddr`] in the request extensions for the rate limiter
//! and the audit layer.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{Extensions, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;

/// How many reverse proxies in front of the service are trusted to set
/// forwarding headers. Zero disables header inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyTrust {
    hops: usize,
}

impl ProxyTrust {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn hops(hops: usize) -> Self {
        Self { hops }
    }

    pub fn trusts_headers(&self) -> bool {
        self.hops > 0
    }
}

/// Resolved client address, attached by [`client_addr_middleware`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub Option<IpAddr>);

fn peer_ip(extensions: &Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn forwarded_for(headers: &HeaderMap, hops: usize) -> Option<IpAddr> {
    let raw = headers.get("x-forwarded-for")?.to_str().ok()?;
    let entries: Vec<&str> = raw.split(',').map(str::trim).collect();
    // The peer is the nearest trusted proxy; each further trusted hop
    // accounts for one entry from the right.
    let index = entries.len().saturating_sub(hops);
    entries.get(index)?.parse().ok()
}

/// Client address for `headers`/`extensions` under `trust`.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions, trust: ProxyTrust) -> Option<IpAddr> {
    if !trust.trusts_headers() {
        return peer_ip(extensions);
    }

    forwarded_for(headers, trust.hops)
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
        })
        .or_else(|| peer_ip(extensions))
}

/// The address resolved for this request; the socket peer when
/// [`client_addr_middleware`] did not run.
pub fn request_client_ip(extensions: &Extensions) -> Option<IpAddr> {
    match extensions.get::<ClientAddr>() {
        Some(ClientAddr(ip)) => *ip,
        None => peer_ip(extensions),
    }
}

/// [`request_client_ip`] rendered for keys and logs; `"unknown"` when unresolvable.
pub fn client_ip_string(extensions: &Extensions) -> String {
    request_client_ip(extensions)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Install with `from_fn_with_state(ProxyTrust::hops(n), client_addr_middleware)`
/// outside every layer that reads the client address.
pub async fn client_addr_middleware(
    State(trust): State<ProxyTrust>,
    mut request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers(), request.extensions(), trust);
    request.extensions_mut().insert(ClientAddr(ip));
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer(addr: &str) -> Extensions {
        let mut extensions = Extensions::new();
        let addr: SocketAddr = addr.parse().unwrap();
        extensions.insert(ConnectInfo(addr));
        extensions
    }

    fn spoofed_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        headers
    }

    #[test]
    fn headers_ignored_without_trusted_proxies() {
        let ip = client_ip(&spoofed_headers(), &peer("192.0.2.10:5555"), ProxyTrust::none()).unwrap();
        assert_eq!(ip.to_string(), "192.0.2.10");
        assert!(client_ip(&spoofed_headers(), &Extensions::new(), ProxyTrust::none()).is_none());
    }

    #[test]
    fn one_trusted_hop_takes_rightmost_entry() {
        let ip = client_ip(&spoofed_headers(), &peer("10.0.0.2:443"), ProxyTrust::hops(1)).unwrap();
        assert_eq!(ip.to_string(), "10.0.0.1");
    }

    #[test]
    fn two_trusted_hops_skip_the_inner_proxy() {
        let ip = client_ip(&spoofed_headers(), &peer("10.0.0.2:443"), ProxyTrust::hops(2)).unwrap();
        assert_eq!(ip.to_string(), "203.0.113.7");
        // More trusted hops than entries: the leftmost entry.
        let ip = client_ip(&spoofed_headers(), &peer("10.0.0.2:443"), ProxyTrust::hops(5)).unwrap();
        assert_eq!(ip.to_string(), "203.0.113.7");
    }

    #[test]
    fn real_ip_when_no_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        let ip = client_ip(&headers, &peer("10.0.0.2:443"), ProxyTrust::hops(1)).unwrap();
        assert_eq!(ip.to_string(), "198.51.100.2");
    }

    #[test]
    fn garbage_header_falls_through() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        let ip = client_ip(&headers, &peer("10.0.0.2:443"), ProxyTrust::hops(1)).unwrap();
        assert_eq!(ip.to_string(), "10.0.0.2");
    }

    #[test]
    fn resolved_address_preferred_over_peer() {
        let mut extensions = peer("10.0.0.2:443");
        assert_eq!(client_ip_string(&extensions), "10.0.0.2");
        extensions.insert(ClientAddr("203.0.113.7".parse().ok()));
        assert_eq!(client_ip_string(&extensions), "203.0.113.7");
        extensions.insert(ClientAddr(None));
        assert_eq!(client_ip_string(&extensions), "unknown");
    }
}
