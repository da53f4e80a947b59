//! DNS resolution through a single configured name server
//!
//! Installed on the default transport when a client sets `dns_server`.
//! Lookups go only to that server; the system resolver is bypassed.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use hickory_resolver::config::{LookupIpStrategy, NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};

use super::error::HttpError;

const DEFAULT_DNS_PORT: u16 = 53;

/// `reqwest` resolver that queries one name server over UDP/TCP
#[derive(Clone)]
pub struct NameServerResolver {
    resolver: Arc<TokioAsyncResolver>,
    server: SocketAddr,
}

impl std::fmt::Debug for NameServerResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameServerResolver").field("server", &self.server).finish()
    }
}

impl NameServerResolver {
    /// Create a resolver for `server` (`ip` or `ip:port`, IPv6 as `[ip]:port`).
    ///
    /// # Errors
    /// Returns [`HttpError::Config`] when the address cannot be parsed.
    pub fn new(server: &str) -> Result<Self, HttpError> {
        let server = parse_server(server)?;

        let group = NameServerConfigGroup::from_ips_clear(&[server.ip()], server.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], group);
        let mut opts = ResolverOpts::default();
        opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;

        Ok(Self { resolver: Arc::new(TokioAsyncResolver::tokio(config, opts)), server })
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }
}

impl Resolve for NameServerResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = Arc::clone(&self.resolver);
        Box::pin(async move {
            let lookup = resolver.lookup_ip(name.as_str()).await?;
            let addrs: Vec<SocketAddr> = lookup.iter().map(|ip| SocketAddr::new(ip, 0)).collect();
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok(addrs)
        })
    }
}

fn parse_server(server: &str) -> Result<SocketAddr, HttpError> {
    let server = server.trim();
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let bare = server.trim_start_matches('[').trim_end_matches(']');
    bare.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_DNS_PORT))
        .map_err(|_| HttpError::Config(format!("invalid dns server '{server}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_forms() {
        assert_eq!(parse_server("10.0.0.2").unwrap(), "10.0.0.2:53".parse().unwrap());
        assert_eq!(parse_server("10.0.0.2:5353").unwrap(), "10.0.0.2:5353".parse().unwrap());
        assert_eq!(parse_server("[::1]:5353").unwrap(), "[::1]:5353".parse().unwrap());
        assert_eq!(parse_server("::1").unwrap(), "[::1]:53".parse().unwrap());
        assert!(parse_server("dns.example").is_err());
    }

    #[tokio::test]
    async fn builds_resolver() {
        let resolver = NameServerResolver::new("127.0.0.1:5353").unwrap();
        assert_eq!(resolver.server().port(), 5353);
    }
}
