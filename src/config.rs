use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cli::Args;
use crate::defaults::Defaults;

/// Shortest allowed repeat interval
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);
/// Shortest allowed probe timeout
pub const MIN_TIMEOUT: Duration = Duration::from_millis(500);
/// Upper bound on hops to keep the per-tick probe count sane
pub const MAX_HOPS: u8 = 64;
/// Default lookahead past the hop frontier
pub const DEFAULT_LOOKAHEAD: u8 = 3;

/// Trace configuration, owned by the engine and adjustable at runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Hostname or literal IP to trace
    pub target_host: String,
    /// Time between dispatch rounds
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    /// Per-probe timeout
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Number of hop slots (1..=64)
    pub max_hops: u8,
    /// How many hops past the frontier are probed each round
    pub lookahead: u8,
    /// Number of dispatch rounds before the trace stops itself (None = infinite)
    pub count: Option<u64>,
    /// Enable opportunistic reverse DNS for hop addresses
    pub dns_enabled: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            target_host: String::new(),
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
            max_hops: 30,
            lookahead: DEFAULT_LOOKAHEAD,
            count: None,
            dns_enabled: true,
        }
    }
}

impl TraceConfig {
    pub fn new(target_host: impl Into<String>) -> Self {
        Self {
            target_host: target_host.into(),
            ..Self::default()
        }
    }

    /// Build from CLI args layered over file defaults
    pub fn from_args(args: &Args, defaults: &Defaults) -> Self {
        let base = Self::default();
        let mut config = Self {
            target_host: args.target.clone(),
            interval: args
                .interval
                .or(defaults.interval)
                .and_then(secs_to_duration)
                .unwrap_or(base.interval),
            timeout: args
                .timeout
                .or(defaults.timeout)
                .and_then(secs_to_duration)
                .unwrap_or(base.timeout),
            max_hops: args.max_hops.or(defaults.max_hops).unwrap_or(base.max_hops),
            lookahead: args.lookahead.or(defaults.lookahead).unwrap_or(base.lookahead),
            count: if args.count == 0 { None } else { Some(args.count) },
            dns_enabled: !args.no_dns && defaults.dns.unwrap_or(true),
        };
        config.normalize();
        config
    }

    /// Clamp every field into its documented bounds
    pub fn normalize(&mut self) {
        self.target_host = self.target_host.trim().to_string();
        self.interval = clamp_interval(self.interval);
        self.timeout = clamp_timeout(self.timeout);
        self.max_hops = clamp_max_hops(self.max_hops);
        self.lookahead = self.lookahead.min(MAX_HOPS);
    }
}

impl From<&Args> for TraceConfig {
    fn from(args: &Args) -> Self {
        Self::from_args(args, &Defaults::default())
    }
}

pub fn clamp_interval(interval: Duration) -> Duration {
    interval.max(MIN_INTERVAL)
}

pub fn clamp_timeout(timeout: Duration) -> Duration {
    timeout.max(MIN_TIMEOUT)
}

pub fn clamp_max_hops(max_hops: u8) -> u8 {
    max_hops.clamp(1, MAX_HOPS)
}

/// Seconds from the CLI or defaults file; None for negative or non-finite input
fn secs_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// Serde helper for Duration
mod duration_serde {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
