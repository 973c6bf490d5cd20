pub mod rdns;

pub use rdns::*;

use async_trait::async_trait;
use std::net::IpAddr;

use crate::error::TraceError;

/// Name resolution used by the engine
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    /// Resolve a hostname to all of its addresses
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, TraceError>;

    /// Best-effort reverse lookup
    async fn reverse(&self, ip: IpAddr) -> Option<String>;
}

/// Prefer the first IPv4 address, else the first address of any family
pub fn pick_address(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

/// Sanitize a string for safe terminal display by removing control characters.
pub fn sanitize_display(s: &str) -> String {
    s.chars().filter(|c| !c.is_control()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_prefers_ipv4() {
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        let v4: IpAddr = "192.0.2.7".parse().unwrap();

        assert_eq!(pick_address(&[v6, v4]), Some(v4));
        assert_eq!(pick_address(&[v6]), Some(v6));
        assert_eq!(pick_address(&[]), None);
    }

    #[test]
    fn test_sanitize_display_strips_escapes() {
        assert_eq!(sanitize_display("evil\x1b[31m.example"), "evil[31m.example");
        assert_eq!(sanitize_display("router.lan"), "router.lan");
    }
}
