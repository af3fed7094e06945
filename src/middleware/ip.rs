//! Client IP resolution for rate limiting and brute force protection.
//!
//! # Resolution Rules
//!
//! When the connection's peer address is known (the server is run with
//! `into_make_service_with_connect_info::<SocketAddr>()`):
//!
//! 1. Peer **not** in `TRUSTED_PROXIES`: the peer address is the client.
//!    Forwarding headers are ignored, since the peer could have written them.
//! 2. Peer trusted: walk `X-Forwarded-For` right to left, skipping trusted
//!    hops; the first untrusted address (or the left-most one) is the client.
//!    Without `X-Forwarded-For`, `X-Real-IP` is used, then the peer itself.
//!
//! An empty `TRUSTED_PROXIES` list trusts every peer. That is only safe when
//! the service is reachable exclusively through a proxy that overwrites
//! (not appends to) the forwarding headers:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```
//!
//! When no peer address is available (e.g. in-process tests) the first
//! `X-Forwarded-For` entry, then `X-Real-IP`, then [`UNKNOWN_IP`] is used.
//!
//! ## The "unknown" Fallback
//!
//! All requests without an identifiable address share the `"unknown"` bucket.
//! Monitor for high "unknown" traffic in production logs.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Fallback IP value when no client IP can be determined.
pub const UNKNOWN_IP: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    /// A bare address is treated as a single-host range.
    ///
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();

        let Some((addr, prefix)) = cidr.split_once('/') else {
            let network: IpAddr = cidr.parse().ok()?;
            return Some(Self {
                prefix_len: max_prefix(&network),
                network,
            });
        };

        let network: IpAddr = addr.parse().ok()?;
        let prefix_len: u8 = prefix.parse().ok()?;
        if prefix_len > max_prefix(&network) {
            return None;
        }

        Some(Self {
            network,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            // Mapped IPv4 peers on a dual-stack socket
            (IpAddr::V4(_), IpAddr::V6(addr)) => addr
                .to_ipv4_mapped()
                .is_some_and(|v4| self.contains(&IpAddr::V4(v4))),
            _ => false,
        }
    }
}

fn max_prefix(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Configuration for trusted proxy validation.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Create a new trusted proxy configuration from CIDR strings.
    ///
    /// Invalid CIDR strings are logged as warnings and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }

        Self { ranges }
    }

    /// Check if trusted proxy validation is enabled (any ranges configured).
    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Returns `true` if `ip` is inside a configured range, or if no ranges
    /// are configured (trust all mode).
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.is_empty() || self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolve the client address for `req`.
///
/// Returns `Cow::Borrowed` only for [`UNKNOWN_IP`].
pub fn resolve_client_ip<B>(req: &Request<B>, trusted: &TrustedProxyConfig) -> Cow<'static, str> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    match peer {
        Some(peer) if !trusted.is_trusted(&peer) => {
            if header_str(req, "x-forwarded-for").is_some() {
                debug!(peer = %peer, "Ignoring X-Forwarded-For from untrusted peer");
            }
            Cow::Owned(peer.to_string())
        }
        Some(peer) => {
            // X-Real-IP only counts when the proxy did not send a chain
            let client = match header_str(req, "x-forwarded-for") {
                Some(chain) => forwarded_client(chain, trusted),
                None => header_str(req, "x-real-ip").and_then(|v| v.trim().parse().ok()),
            }
            .unwrap_or(peer);
            Cow::Owned(client.to_string())
        }
        None => headers_only(req),
    }
}

/// Right-to-left walk of `X-Forwarded-For`, skipping trusted hops.
fn forwarded_client(chain: &str, trusted: &TrustedProxyConfig) -> Option<IpAddr> {
    let hops: Vec<&str> = chain.split(',').map(str::trim).collect();

    for (i, hop) in hops.iter().enumerate().rev() {
        // A garbled chain is not trustworthy; fall back to the peer
        let ip: IpAddr = hop.parse().ok()?;
        if i == 0 || !trusted.is_trusted(&ip) {
            return Some(ip);
        }
    }
    None
}

fn headers_only<B>(req: &Request<B>) -> Cow<'static, str> {
    if let Some(value) = header_str(req, "x-forwarded-for")
        && let Some(first) = value.split(',').next()
    {
        return Cow::Owned(first.trim().to_string());
    }

    if let Some(value) = header_str(req, "x-real-ip") {
        return Cow::Owned(value.trim().to_string());
    }

    Cow::Borrowed(UNKNOWN_IP)
}

#[inline]
fn header_str<'a, B>(req: &'a Request<B>, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_from(peer: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        req
    }

    fn trusted(cidrs: &[&str]) -> TrustedProxyConfig {
        let owned: Vec<String> = cidrs.iter().map(|s| s.to_string()).collect();
        TrustedProxyConfig::new(&owned)
    }

    // ==========================================================================
    // CIDR Range Tests
    // ==========================================================================

    #[test]
    fn test_cidr_parse() {
        assert_eq!(CidrRange::parse("10.0.0.0/8").unwrap().prefix_len, 8);
        assert_eq!(CidrRange::parse("::1/128").unwrap().prefix_len, 128);
        assert_eq!(CidrRange::parse("192.168.1.1").unwrap().prefix_len, 32);
        assert_eq!(CidrRange::parse(" 0.0.0.0/0 ").unwrap().prefix_len, 0);
    }

    #[test]
    fn test_cidr_parse_invalid() {
        assert!(CidrRange::parse("not-an-ip").is_none());
        assert!(CidrRange::parse("10.0.0.0/33").is_none());
        assert!(CidrRange::parse("10.0.0.0/abc").is_none());
    }

    #[test]
    fn test_cidr_contains_ipv4() {
        let cidr = CidrRange::parse("192.168.1.0/24").unwrap();

        assert!(cidr.contains(&"192.168.1.254".parse().unwrap()));
        assert!(!cidr.contains(&"192.168.2.1".parse().unwrap()));
        assert!(!cidr.contains(&"::1".parse().unwrap()));
    }

    #[test]
    fn test_cidr_contains_zero_prefix() {
        let cidr = CidrRange::parse("0.0.0.0/0").unwrap();
        assert!(cidr.contains(&"8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_cidr_contains_mapped_ipv4() {
        let cidr = CidrRange::parse("10.0.0.0/8").unwrap();
        assert!(cidr.contains(&"::ffff:10.1.2.3".parse().unwrap()));
    }

    #[test]
    fn test_trusted_proxy_config_empty_trusts_all() {
        let config = TrustedProxyConfig::new(&[]);
        assert!(!config.is_enabled());
        assert!(config.is_trusted(&"1.2.3.4".parse().unwrap()));
    }

    #[test]
    fn test_trusted_proxy_config_skips_invalid() {
        let config = trusted(&["10.0.0.0/8", "garbage"]);
        assert!(config.is_enabled());
        assert!(config.is_trusted(&"10.9.9.9".parse().unwrap()));
        assert!(!config.is_trusted(&"8.8.8.8".parse().unwrap()));
    }

    // ==========================================================================
    // Resolution Tests
    // ==========================================================================

    #[test]
    fn test_untrusted_peer_ignores_headers() {
        let req = request_from("203.0.113.9:5000", &[("x-forwarded-for", "1.1.1.1")]);
        let ip = resolve_client_ip(&req, &trusted(&["10.0.0.0/8"]));
        assert_eq!(ip, "203.0.113.9");
    }

    #[test]
    fn test_trusted_peer_uses_forwarded_for() {
        let req = request_from(
            "10.0.0.2:5000",
            &[("x-forwarded-for", "198.51.100.7, 10.0.0.5")],
        );
        let ip = resolve_client_ip(&req, &trusted(&["10.0.0.0/8"]));
        assert_eq!(ip, "198.51.100.7");
    }

    #[test]
    fn test_spoofed_left_entry_is_skipped() {
        // Client prepended a fake entry; the proxy appended the real address
        let req = request_from(
            "10.0.0.2:5000",
            &[("x-forwarded-for", "6.6.6.6, 198.51.100.7")],
        );
        let ip = resolve_client_ip(&req, &trusted(&["10.0.0.0/8"]));
        assert_eq!(ip, "198.51.100.7");
    }

    #[test]
    fn test_trust_all_uses_left_most() {
        let req = request_from(
            "10.0.0.2:5000",
            &[("x-forwarded-for", "192.168.1.1, 10.0.0.1")],
        );
        let ip = resolve_client_ip(&req, &TrustedProxyConfig::default());
        assert_eq!(ip, "192.168.1.1");
    }

    #[test]
    fn test_trusted_peer_falls_back_to_real_ip() {
        let req = request_from("10.0.0.2:5000", &[("x-real-ip", "198.51.100.8")]);
        let ip = resolve_client_ip(&req, &trusted(&["10.0.0.0/8"]));
        assert_eq!(ip, "198.51.100.8");
    }

    #[test]
    fn test_trusted_peer_without_headers() {
        let req = request_from("10.0.0.2:5000", &[]);
        let ip = resolve_client_ip(&req, &trusted(&["10.0.0.0/8"]));
        assert_eq!(ip, "10.0.0.2");
    }

    #[test]
    fn test_garbled_chain_falls_back_to_peer() {
        let req = request_from("10.0.0.2:5000", &[("x-forwarded-for", "1.1.1.1, junk")]);
        let ip = resolve_client_ip(&req, &trusted(&["10.0.0.0/8"]));
        assert_eq!(ip, "10.0.0.2");
    }

    #[test]
    fn test_garbled_chain_ignores_real_ip() {
        let req = request_from(
            "10.0.0.2:5000",
            &[("x-forwarded-for", "junk"), ("x-real-ip", "198.51.100.8")],
        );
        let ip = resolve_client_ip(&req, &trusted(&["10.0.0.0/8"]));
        assert_eq!(ip, "10.0.0.2");
    }

    #[test]
    fn test_no_peer_uses_first_forwarded_for() {
        let req = Request::builder()
            .header("x-forwarded-for", "  192.168.1.1  , 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        let ip = resolve_client_ip(&req, &TrustedProxyConfig::default());
        assert_eq!(ip, "192.168.1.1");
    }

    #[test]
    fn test_no_peer_uses_real_ip() {
        let req = Request::builder()
            .header("x-real-ip", "::1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(resolve_client_ip(&req, &TrustedProxyConfig::default()), "::1");
    }

    #[test]
    fn test_no_peer_no_headers_is_unknown_and_borrowed() {
        let req = Request::builder().body(Body::empty()).unwrap();
        let ip = resolve_client_ip(&req, &TrustedProxyConfig::default());
        assert_eq!(ip, UNKNOWN_IP);
        assert!(matches!(ip, Cow::Borrowed(_)));
    }

    #[test]
    fn test_ipv6_peer() {
        let req = request_from("[2001:db8::1]:443", &[]);
        let ip = resolve_client_ip(&req, &trusted(&["10.0.0.0/8"]));
        assert_eq!(ip, "2001:db8::1");
    }
}
