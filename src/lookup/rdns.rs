use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::TraceError;
use crate::lookup::Resolver;

/// DNS cache entry
struct CacheEntry {
    hostname: Option<String>,
    cached_at: Instant,
}

/// Forward and reverse DNS with a reverse-lookup cache
pub struct DnsLookup {
    resolver: TokioAsyncResolver,
    cache: RwLock<HashMap<IpAddr, CacheEntry>>,
    cache_ttl: Duration,
}

impl DnsLookup {
    /// Use the system resolver configuration, falling back to public defaults
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            debug!(error = %e, "System resolver config unavailable, using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });

        Self {
            resolver,
            cache: RwLock::new(HashMap::new()),
            cache_ttl: Duration::from_secs(3600), // 1 hour
        }
    }

    fn cached(&self, ip: IpAddr) -> Option<Option<String>> {
        let cache = self.cache.read();
        cache
            .get(&ip)
            .filter(|entry| entry.cached_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.hostname.clone())
    }
}

impl Default for DnsLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resolver for DnsLookup {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, TraceError> {
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| TraceError::Resolve {
                hostname: host.to_string(),
                source: Box::new(e),
            })?;
        Ok(lookup.iter().collect())
    }

    /// Lookup reverse DNS for an IP, using cache
    async fn reverse(&self, ip: IpAddr) -> Option<String> {
        if let Some(hostname) = self.cached(ip) {
            return hostname;
        }

        let hostname = match self.resolver.reverse_lookup(ip).await {
            Ok(lookup) => lookup.iter().next().map(|name| {
                let s = name.to_string();
                // Remove trailing dot
                s.trim_end_matches('.').to_string()
            }),
            Err(_) => None,
        };

        self.cache.write().insert(
            ip,
            CacheEntry {
                hostname: hostname.clone(),
                cached_at: Instant::now(),
            },
        );

        hostname
    }
}
