// SSRF Guard - Outbound address policy for webhook delivery
//
// Resolution and validation happen inside the HTTP client's connector, so the
// address that was checked is the address that gets dialed.

use hyper::client::connect::dns::Name;
use reqwest::dns::{Addrs, Resolve, Resolving};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;
use url::{Host, Url};

#[derive(Debug, Clone, Error)]
pub enum SsrfError {
    #[error("host {host} resolves to blocked address {addr}")]
    BlockedAddress { host: String, addr: IpAddr },
    #[error("failed to resolve {host}: {reason}")]
    Resolution { host: String, reason: String },
    #[error("no addresses found for {0}")]
    NoAddresses(String),
    #[error("invalid webhook URL: {0}")]
    InvalidUrl(String),
}

/// Private, loopback, link-local, multicast and otherwise reserved ranges.
pub fn is_blocked_ip(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(ip) => is_blocked_ipv4(ip),
        IpAddr::V6(ip) => is_blocked_ipv6(ip),
    }
}

fn is_blocked_ipv4(ip: &Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();

    ip.is_unspecified()
        || a == 0 // 0.0.0.0/8
        || a == 10 // 10.0.0.0/8
        || a == 127 // loopback
        || (a == 100 && (64..=127).contains(&b)) // carrier-grade NAT
        || (a == 169 && b == 254) // link-local
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
        || (a == 192 && b == 0 && c == 0) // IETF protocol assignments
        || (a == 192 && b == 0 && c == 2) // TEST-NET-1
        || (a == 198 && (b == 18 || b == 19)) // benchmarking
        || (a == 198 && b == 51 && c == 100) // TEST-NET-2
        || (a == 203 && b == 0 && c == 113) // TEST-NET-3
        || a >= 224 // multicast, reserved, broadcast
}

fn is_blocked_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }

    let segments = ip.segments();
    // fc00::/7 unique local
    if segments[0] & 0xfe00 == 0xfc00 {
        return true;
    }
    // fe80::/10 link-local
    if segments[0] & 0xffc0 == 0xfe80 {
        return true;
    }
    // ff00::/8 multicast
    if segments[0] & 0xff00 == 0xff00 {
        return true;
    }
    // 2001:db8::/32 documentation
    if segments[0] == 0x2001 && segments[1] == 0x0db8 {
        return true;
    }

    if let Some(v4) = embedded_ipv4(ip) {
        return is_blocked_ipv4(&v4);
    }
    false
}

/// IPv4 carried inside mapped (::ffff:a.b.c.d), NAT64 (64:ff9b::/96) or
/// compatible (::a.b.c.d) IPv6 addresses.
fn embedded_ipv4(ip: &Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return Some(v4);
    }

    let s = ip.segments();
    let tail = Ipv4Addr::new((s[6] >> 8) as u8, s[6] as u8, (s[7] >> 8) as u8, s[7] as u8);
    if s[0] == 0x0064 && s[1] == 0xff9b && s[2..6].iter().all(|&x| x == 0) {
        return Some(tail);
    }
    if s[..6].iter().all(|&x| x == 0) {
        return Some(tail);
    }
    None
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkPolicy {
    /// Skip address checks entirely. Local development and tests only.
    pub allow_private_networks: bool,
}

impl NetworkPolicy {
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn permissive() -> Self {
        Self {
            allow_private_networks: true,
        }
    }

    pub fn permits(&self, addr: &IpAddr) -> bool {
        self.allow_private_networks || !is_blocked_ip(addr)
    }
}

/// Reject the whole answer if any address is blocked; a mixed answer could
/// otherwise be steered to the internal one.
pub fn validate_addresses(
    host: &str,
    addrs: impl IntoIterator<Item = IpAddr>,
    policy: NetworkPolicy,
) -> Result<Vec<IpAddr>, SsrfError> {
    let addrs: Vec<IpAddr> = addrs.into_iter().collect();
    if addrs.is_empty() {
        return Err(SsrfError::NoAddresses(host.to_string()));
    }

    if let Some(addr) = addrs.iter().find(|addr| !policy.permits(addr)) {
        return Err(SsrfError::BlockedAddress {
            host: host.to_string(),
            addr: *addr,
        });
    }

    Ok(addrs)
}

/// Checks done before a request is built. IP-literal hosts never reach the
/// resolver, so they are validated here.
pub fn check_url(raw_url: &str, policy: NetworkPolicy) -> Result<Url, SsrfError> {
    let url = Url::parse(raw_url).map_err(|e| SsrfError::InvalidUrl(format!("{}: {}", raw_url, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(SsrfError::InvalidUrl(format!("unsupported scheme: {}", other)));
        }
    }

    match url.host() {
        None => return Err(SsrfError::InvalidUrl(format!("no host in {}", raw_url))),
        Some(Host::Ipv4(ip)) => {
            validate_addresses(&ip.to_string(), [IpAddr::V4(ip)], policy)?;
        }
        Some(Host::Ipv6(ip)) => {
            validate_addresses(&ip.to_string(), [IpAddr::V6(ip)], policy)?;
        }
        Some(Host::Domain(_)) => {}
    }

    Ok(url)
}

/// `reqwest` resolver that validates every answer before the connector sees it.
pub struct SsrfSafeResolver {
    resolver: TokioAsyncResolver,
    policy: NetworkPolicy,
}

impl SsrfSafeResolver {
    /// Uses the host's resolver configuration, falling back to public
    /// defaults when none can be read.
    pub fn from_system_conf(policy: NetworkPolicy) -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!("System DNS configuration unavailable ({}), using defaults", e);
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver, policy }
    }
}

impl Resolve for SsrfSafeResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.resolver.clone();
        let policy = self.policy;

        Box::pin(async move {
            let host = name.as_str().to_string();
            let lookup = resolver.lookup_ip(host.as_str()).await.map_err(|e| SsrfError::Resolution {
                host: host.clone(),
                reason: e.to_string(),
            })?;

            let addrs = validate_addresses(&host, lookup.iter(), policy)?;
            // Port 0 lets the connector apply the URL's port.
            let addrs: Addrs = Box::new(addrs.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

/// Client for webhook delivery. Idle connections are not pooled so each
/// attempt resolves again. Redirects are not followed and proxy environment
/// variables are ignored, so every target host goes through the resolver.
pub fn build_client(policy: NetworkPolicy, timeout: Duration) -> Result<reqwest::Client, SsrfError> {
    let resolver = SsrfSafeResolver::from_system_conf(policy);

    reqwest::Client::builder()
        .timeout(timeout)
        .dns_resolver(Arc::new(resolver))
        .pool_max_idle_per_host(0)
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .map_err(|e| SsrfError::InvalidUrl(format!("failed to build HTTP client: {}", e)))
}
