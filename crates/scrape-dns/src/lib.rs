//! A reqwest DNS resolver and client wrapper that refuses to talk to
//! private, loopback, or otherwise non-public IPv4 addresses. Scrape jobs
//! take arbitrary operator-supplied URLs as input; without this guard a
//! job is an SSRF probe into whatever network the service runs on.

mod client;

pub use client::{ClientError, InternalClient, InternalClientBuilder};

use std::fmt;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};

#[derive(Debug, Clone, Copy)]
pub struct NoPublicIPv4Error;

impl fmt::Display for NoPublicIPv4Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no public IPv4 address for host")
    }
}

impl std::error::Error for NoPublicIPv4Error {}

/// True for addresses reachable only from inside a private network:
/// loopback, link-local, RFC1918 private ranges, multicast, broadcast,
/// documentation ranges, and the unspecified address.
pub fn is_global_ipv4(ip: &Ipv4Addr) -> bool {
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || ip.is_documentation())
}

/// A `reqwest::dns::Resolve` implementation that resolves a hostname via
/// the system resolver, then filters the result down to public IPv4
/// addresses only. IPv6 is not supported (same posture as the upstream
/// resolver this is grounded on).
#[derive(Debug, Clone, Default)]
pub struct PublicIPv4Resolver;

impl Resolve for PublicIPv4Resolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_public_ipv4(name)) as Pin<Box<dyn Future<Output = _> + Send>>
    }
}

async fn resolve_public_ipv4(
    name: Name,
) -> Result<Addrs, Box<dyn std::error::Error + Send + Sync>> {
    let host = name.as_str().to_string();
    let lookup = tokio::net::lookup_host((host.as_str(), 0)).await?;

    let addrs: Vec<SocketAddr> = lookup
        .filter(|addr| match addr.ip() {
            IpAddr::V4(v4) => is_global_ipv4(&v4),
            IpAddr::V6(_) => false,
        })
        .collect();

    if addrs.is_empty() {
        return Err(Box::new(NoPublicIPv4Error));
    }

    Ok(Box::new(addrs.into_iter()) as Addrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_private_and_loopback() {
        assert!(!is_global_ipv4(&Ipv4Addr::new(127, 0, 0, 1)));
        assert!(!is_global_ipv4(&Ipv4Addr::new(10, 0, 0, 1)));
        assert!(!is_global_ipv4(&Ipv4Addr::new(192, 168, 1, 1)));
        assert!(!is_global_ipv4(&Ipv4Addr::new(172, 16, 0, 1)));
        assert!(!is_global_ipv4(&Ipv4Addr::new(169, 254, 1, 1)));
    }

    #[test]
    fn accepts_public() {
        assert!(is_global_ipv4(&Ipv4Addr::new(8, 8, 8, 8)));
        assert!(is_global_ipv4(&Ipv4Addr::new(1, 1, 1, 1)));
    }
}
