//! Client IP extraction for middleware.
//!
//! # Resolution Order
//!
//! 1. `X-Forwarded-For`: the first comma-separated entry, if it parses as an IP
//! 2. `X-Real-IP`: if it parses as an IP
//! 3. The peer address of the TCP connection (axum's `ConnectInfo<SocketAddr>`)
//! 4. [`UNKNOWN_IP`] when the server was not started with connect info
//!
//! Header values that do not parse as IP addresses are skipped rather than
//! trusted verbatim, so garbage in a forwarding header can not become a key.
//! Addresses are returned in canonical form (IPv4-mapped IPv6 addresses are
//! rendered as plain IPv4).
//!
//! # Security Warning: IP Spoofing Risk
//!
//! **These functions trust client-provided headers.** A client talking to
//! the service directly can rotate `X-Forwarded-For` values to obtain a
//! fresh rate limit bucket per request. Deploy behind a reverse proxy that
//! overwrites (not appends to) these headers:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::trace;

/// Fallback value when no client IP can be determined.
///
/// Only reachable when the server is not serving with
/// `into_make_service_with_connect_info`; all such requests share one key.
pub const UNKNOWN_IP: &str = "unknown";

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Where the client address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientIp {
    FromXff(IpAddr),
    FromRealIp(IpAddr),
    FromPeer(IpAddr),
    NotFound,
}

/// Parse the first entry of a (possibly comma-separated) IP header.
#[inline]
fn header_ip<B>(req: &Request<B>, name: &str) -> Option<IpAddr> {
    let value = req.headers().get(name)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    first.parse::<IpAddr>().ok().map(|ip| ip.to_canonical())
}

#[inline]
fn resolve<B>(req: &Request<B>) -> ClientIp {
    if let Some(ip) = header_ip(req, X_FORWARDED_FOR) {
        return ClientIp::FromXff(ip);
    }

    if let Some(ip) = header_ip(req, X_REAL_IP) {
        return ClientIp::FromRealIp(ip);
    }

    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return ClientIp::FromPeer(addr.ip().to_canonical());
    }

    ClientIp::NotFound
}

/// Extract the client IP of a request.
///
/// Returns `Cow::Borrowed(UNKNOWN_IP)` without allocating when nothing
/// usable is found.
pub fn extract_client_ip<B>(req: &Request<B>) -> Cow<'static, str> {
    match resolve(req) {
        ClientIp::FromXff(ip) => {
            trace!(client_ip = %ip, "Client IP from X-Forwarded-For");
            Cow::Owned(ip.to_string())
        }
        ClientIp::FromRealIp(ip) => {
            trace!(client_ip = %ip, "Client IP from X-Real-IP");
            Cow::Owned(ip.to_string())
        }
        ClientIp::FromPeer(ip) => Cow::Owned(ip.to_string()),
        ClientIp::NotFound => Cow::Borrowed(UNKNOWN_IP),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn with_peer(peer: &str) -> axum::http::request::Builder {
        let addr: SocketAddr = peer.parse().unwrap();
        Request::builder().extension(ConnectInfo(addr))
    }

    #[test]
    fn test_peer_address_strips_port() {
        let req = with_peer("192.168.1.1:12345").body(Body::empty()).unwrap();
        assert_eq!(extract_client_ip(&req), "192.168.1.1");
    }

    #[test]
    fn test_xff_takes_precedence() {
        let req = with_peer("127.0.0.1:12345")
            .header("x-forwarded-for", "203.0.113.1")
            .header("x-real-ip", "203.0.113.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&req), "203.0.113.1");
    }

    #[test]
    fn test_real_ip_used_without_xff() {
        let req = with_peer("127.0.0.1:12345")
            .header("x-real-ip", "203.0.113.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&req), "203.0.113.2");
    }

    #[test]
    fn test_xff_first_entry_of_chain() {
        let req = Request::builder()
            .header("x-forwarded-for", " 192.168.1.1 , 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&req), "192.168.1.1");
    }

    #[test]
    fn test_invalid_xff_falls_through() {
        let req = with_peer("10.1.2.3:999")
            .header("x-forwarded-for", "not-an-ip")
            .header("x-real-ip", "also-bad")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&req), "10.1.2.3");
    }

    #[test]
    fn test_xff_with_port_is_rejected() {
        let req = with_peer("10.1.2.3:999")
            .header("x-forwarded-for", "192.168.1.1:8080")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&req), "10.1.2.3");
    }

    #[test]
    fn test_ipv6_canonical_forms() {
        let req = Request::builder()
            .header("x-forwarded-for", "2001:0db8:0000::1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&req), "2001:db8::1");

        let req = with_peer("[::ffff:10.0.0.7]:80").body(Body::empty()).unwrap();
        assert_eq!(extract_client_ip(&req), "10.0.0.7");
    }

    #[test]
    fn test_unknown_is_borrowed() {
        let req = Request::builder().body(Body::empty()).unwrap();
        let ip = extract_client_ip(&req);
        assert_eq!(ip, UNKNOWN_IP);
        assert!(matches!(ip, Cow::Borrowed(_)));
    }
}
