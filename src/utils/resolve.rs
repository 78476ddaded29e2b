//! Host resolution.
//!
//! Sockets are always opened on literal addresses. Hostnames go through
//! [`resolve`] first, which also reports the address family so callers can
//! pick IPv4 (`legacy_ip`) or IPv6 sockets to match.

use crate::error::{ProtocolError, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// Whether this family means `legacy_ip = true`
    pub fn is_legacy(self) -> bool {
        self == AddressFamily::V4
    }
}

/// A resolved host: one address and its family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedHost {
    pub addr: IpAddr,
    pub family: AddressFamily,
}

impl From<IpAddr> for ResolvedHost {
    fn from(addr: IpAddr) -> Self {
        Self {
            family: AddressFamily::of(&addr),
            addr,
        }
    }
}

/// Resolve `host` to its first address. Literal addresses skip the lookup.
pub async fn resolve(host: &str) -> Result<ResolvedHost> {
    if let Ok(addr) = host.parse::<IpAddr>() {
        return Ok(addr.into());
    }
    let resolved = tokio::net::lookup_host((host, 0))
        .await?
        .next()
        .map(|sock| ResolvedHost::from(sock.ip()))
        .ok_or_else(|| ProtocolError::TransportError(format!("no address found for `{host}`")))?;
    debug!(host, addr = %resolved.addr, "Resolved host");
    Ok(resolved)
}

/// Literal address for a configured host.
///
/// Without a host, clients target loopback and servers bind the unspecified
/// address, in the family chosen by `legacy_ip`.
pub fn literal_addr(host: Option<&str>, legacy_ip: bool, listening: bool) -> Result<IpAddr> {
    match host {
        Some(host) => host.parse::<IpAddr>().map_err(|_| {
            ProtocolError::ConfigError(format!(
                "host `{host}` is not an IP address; resolve it first"
            ))
        }),
        None => Ok(match (legacy_ip, listening) {
            (true, true) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            (true, false) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            (false, true) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            (false, false) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        }),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn test_literal_resolution_skips_lookup() {
        let v4 = resolve("192.0.2.1").await.unwrap();
        assert_eq!(v4.family, AddressFamily::V4);
        assert!(v4.family.is_legacy());
        let v6 = resolve("2001:db8::1").await.unwrap();
        assert_eq!(v6.family, AddressFamily::V6);
    }

    #[test]
    fn test_default_addresses() {
        assert_eq!(literal_addr(None, true, false).unwrap(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(literal_addr(None, false, true).unwrap(), IpAddr::V6(Ipv6Addr::UNSPECIFIED));
        assert!(matches!(
            literal_addr(Some("example.com"), true, false),
            Err(ProtocolError::ConfigError(_))
        ));
    }
}
