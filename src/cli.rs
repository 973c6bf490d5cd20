use clap::Parser;
use std::path::PathBuf;

use crate::config::MAX_HOPS;
use crate::probe::DEFAULT_BASE_PORT;

/// Continuously probe every hop toward a target and report loss and latency
#[derive(Parser, Debug, Clone)]
#[command(name = "pathprobe")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Target host to trace (IP address or hostname)
    #[arg(required = true)]
    pub target: String,

    /// Number of dispatch rounds before stopping (0 = infinite)
    #[arg(short = 'c', long = "count", default_value = "0")]
    pub count: u64,

    /// Probe interval in seconds
    #[arg(short = 'i', long = "interval")]
    pub interval: Option<f64>,

    /// Probe timeout in seconds
    #[arg(long = "timeout")]
    pub timeout: Option<f64>,

    /// Maximum number of hops
    #[arg(short = 'm', long = "max-hops")]
    pub max_hops: Option<u8>,

    /// Hops probed past the discovery frontier each round
    #[arg(long = "lookahead")]
    pub lookahead: Option<u8>,

    /// Base destination port for UDP probes (hop number is added)
    #[arg(long = "port", default_value_t = DEFAULT_BASE_PORT)]
    pub port: u16,

    /// Skip reverse DNS lookups
    #[arg(long = "no-dns")]
    pub no_dns: bool,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Path to a TOML defaults file (default: ~/.config/pathprobe/config.toml)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if self.target.trim().is_empty() {
            return Err("Target cannot be empty".into());
        }

        if let Some(interval) = self.interval
            && interval <= 0.0
        {
            return Err("Interval must be positive".into());
        }

        if let Some(timeout) = self.timeout
            && timeout <= 0.0
        {
            return Err("Timeout must be positive".into());
        }

        if let Some(max_hops) = self.max_hops {
            if max_hops == 0 {
                return Err("Max hops must be at least 1".into());
            }
            if max_hops > MAX_HOPS {
                return Err(format!("Max hops cannot exceed {}", MAX_HOPS));
            }
        }

        if self.port as u32 + MAX_HOPS as u32 > u16::MAX as u32 {
            return Err(format!("Port too high: {} (max {})", self.port, u16::MAX - MAX_HOPS as u16));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_defaults() {
        let args = Args::parse_from(["pathprobe", "example.com"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.port, DEFAULT_BASE_PORT);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let args = Args::parse_from(["pathprobe", "example.com", "-i", "0"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["pathprobe", "example.com", "-m", "0"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["pathprobe", "example.com", "-m", "65"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["pathprobe", "  "]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["pathprobe", "example.com", "--port", "65500"]);
        assert!(args.validate().is_err());
    }
}
