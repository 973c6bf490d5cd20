use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Latency reported for a probe that got no answer
pub const FAILED_LATENCY_MS: f64 = -1.0;

/// Display placeholder for an unresolved name or unknown address
pub const UNKNOWN: &str = "---";

/// Outcome of a single probe attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub hop_number: u8,
    pub probe_id: u64,
    pub ip_address: Option<IpAddr>,
    pub hostname: Option<String>,
    /// Round-trip time in milliseconds, negative on failure
    pub latency_ms: f64,
    pub success: bool,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn success(
        hop_number: u8,
        probe_id: u64,
        responder: IpAddr,
        hostname: Option<String>,
        latency_ms: f64,
    ) -> Self {
        Self {
            hop_number,
            probe_id,
            ip_address: Some(responder),
            hostname,
            latency_ms: latency_ms.max(0.0),
            success: true,
            error: None,
        }
    }

    pub fn failure(hop_number: u8, probe_id: u64, destination: IpAddr, error: impl Into<String>) -> Self {
        Self {
            hop_number,
            probe_id,
            ip_address: Some(destination),
            hostname: None,
            latency_ms: FAILED_LATENCY_MS,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Running statistics for one hop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopRecord {
    pub hop_number: u8,
    pub hostname: Option<String>,
    pub ip_address: Option<IpAddr>,
    pub sent: u64,
    pub received: u64,
    pub best: Option<f64>,
    pub avg: Option<f64>,
    pub worst: Option<f64>,
    /// Every successful RTT in milliseconds, in arrival order
    pub samples: Vec<f64>,
}

impl HopRecord {
    pub fn new(hop_number: u8) -> Self {
        Self {
            hop_number,
            hostname: None,
            ip_address: None,
            sent: 0,
            received: 0,
            best: None,
            avg: None,
            worst: None,
            samples: Vec::new(),
        }
    }

    /// Record a probe that got no answer
    pub fn record_failure(&mut self) {
        self.sent += 1;
    }

    /// Record an answered probe
    pub fn record_success(&mut self, responder: IpAddr, latency_ms: f64) {
        self.sent += 1;
        self.received += 1;
        self.ip_address = Some(responder);
        self.samples.push(latency_ms);

        self.best = Some(self.best.map_or(latency_ms, |b| b.min(latency_ms)));
        self.worst = Some(self.worst.map_or(latency_ms, |w| w.max(latency_ms)));

        // Recomputed from samples rather than incrementally so avg is exactly the mean
        let sum: f64 = self.samples.iter().sum();
        self.avg = Some(sum / self.samples.len() as f64);
    }

    /// Loss percentage for this hop
    pub fn loss_pct(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            (1.0 - (self.received as f64 / self.sent as f64)) * 100.0
        }
    }

    /// Most recent RTT
    pub fn last(&self) -> Option<f64> {
        self.samples.last().copied()
    }

    /// Population standard deviation of the samples
    pub fn stddev(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let mean = self.avg?;
        let variance = self
            .samples
            .iter()
            .map(|s| (s - mean).powi(2))
            .sum::<f64>()
            / self.samples.len() as f64;
        Some(variance.sqrt())
    }

    pub fn display_host(&self) -> &str {
        self.hostname.as_deref().unwrap_or(UNKNOWN)
    }

    pub fn display_ip(&self) -> String {
        self.ip_address
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }
}
