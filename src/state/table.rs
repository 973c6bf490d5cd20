//! The shared hop table.
//!
//! One `HopTable` lives behind a single lock for the whole engine. The phase
//! and run generation are stored next to the hops so every "is this run still
//! live" check happens under the same lock as the write it guards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use super::hop::{HopRecord, ProbeResult};

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TracePhase {
    #[default]
    Idle,
    Resolving,
    Tracing,
    Stopped,
    Failed,
}

impl TracePhase {
    /// Resolving and tracing both count as a run in progress
    pub fn is_running(self) -> bool {
        matches!(self, Self::Resolving | Self::Tracing)
    }
}

/// What a successful merge asks the caller to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Merged {
    /// Address to reverse-resolve, if the hop has no name yet
    pub lookup: Option<IpAddr>,
}

#[derive(Debug, Default)]
pub struct HopTable {
    phase: TracePhase,
    generation: u64,
    hops: Vec<HopRecord>,
    resolved: Option<IpAddr>,
    started_at: Option<DateTime<Utc>>,
}

impl HopTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> TracePhase {
        self.phase
    }

    pub fn resolved(&self) -> Option<IpAddr> {
        self.resolved
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn clear_resolved(&mut self) {
        self.resolved = None;
    }

    /// Start a new run. Returns its generation, or None if one is already in progress.
    pub fn begin_resolving(&mut self) -> Option<u64> {
        if self.phase.is_running() {
            return None;
        }
        self.generation += 1;
        self.phase = TracePhase::Resolving;
        self.hops.clear();
        self.started_at = Some(Utc::now());
        Some(self.generation)
    }

    /// Allocate every hop slot and enter the tracing phase
    pub fn begin_tracing(&mut self, generation: u64, target: IpAddr, max_hops: u8) -> bool {
        if generation != self.generation || self.phase != TracePhase::Resolving {
            return false;
        }
        self.resolved = Some(target);
        self.hops = (1..=max_hops).map(HopRecord::new).collect();
        self.phase = TracePhase::Tracing;
        true
    }

    /// End the given run after a resolution failure
    pub fn fail(&mut self, generation: u64) -> bool {
        self.end(generation, TracePhase::Failed)
    }

    /// End the given run normally
    pub fn finish(&mut self, generation: u64) -> bool {
        self.end(generation, TracePhase::Stopped)
    }

    /// End whatever run is current. No-op if nothing is running.
    pub fn stop(&mut self) -> bool {
        self.finish(self.generation)
    }

    fn end(&mut self, generation: u64, phase: TracePhase) -> bool {
        if generation != self.generation || !self.phase.is_running() {
            return false;
        }
        self.phase = phase;
        // Bumped so anything still holding the old generation is recognizably stale
        self.generation += 1;
        true
    }

    /// True while the given run is tracing
    pub fn is_live(&self, generation: u64) -> bool {
        generation == self.generation && self.phase == TracePhase::Tracing
    }

    pub fn hop(&self, hop_number: u8) -> Option<&HopRecord> {
        if hop_number == 0 {
            return None;
        }
        self.hops.get(hop_number as usize - 1)
    }

    fn hop_mut(&mut self, hop_number: u8) -> Option<&mut HopRecord> {
        if hop_number == 0 {
            return None;
        }
        self.hops.get_mut(hop_number as usize - 1)
    }

    /// Fold a probe result into its hop. Returns None for stale or out-of-range results.
    pub fn merge(&mut self, generation: u64, result: &ProbeResult) -> Option<Merged> {
        if !self.is_live(generation) {
            return None;
        }
        let hop = self.hop_mut(result.hop_number)?;

        match (result.success, result.ip_address) {
            (true, Some(responder)) => {
                hop.record_success(responder, result.latency_ms);
                if hop.hostname.is_none()
                    && let Some(name) = result.hostname.as_ref().filter(|n| !n.is_empty())
                {
                    hop.hostname = Some(name.clone());
                }
            }
            _ => hop.record_failure(),
        }

        let lookup = match (&hop.hostname, hop.ip_address) {
            (None, Some(ip)) => Some(ip),
            _ => None,
        };
        Some(Merged { lookup })
    }

    /// Apply a late reverse-lookup result. Discarded unless the run is live and
    /// the hop still shows the address that was looked up.
    pub fn patch_hostname(&mut self, generation: u64, hop_number: u8, ip: IpAddr, hostname: String) -> bool {
        if !self.is_live(generation) {
            return false;
        }
        match self.hop_mut(hop_number) {
            Some(hop) if hop.hostname.is_none() && hop.ip_address == Some(ip) => {
                hop.hostname = Some(hostname);
                true
            }
            _ => false,
        }
    }

    /// Copy of every hop
    pub fn snapshot(&self) -> Vec<HopRecord> {
        self.hops.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn target() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5))
    }

    fn router(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
    }

    fn tracing_table(max_hops: u8) -> (HopTable, u64) {
        let mut table = HopTable::new();
        let generation = table.begin_resolving().unwrap();
        assert!(table.begin_tracing(generation, target(), max_hops));
        (table, generation)
    }

    #[test]
    fn test_lifecycle() {
        let mut table = HopTable::new();
        assert_eq!(table.phase(), TracePhase::Idle);
        assert!(!table.stop());

        let generation = table.begin_resolving().unwrap();
        assert_eq!(table.phase(), TracePhase::Resolving);
        assert!(table.begin_resolving().is_none());
        assert!(table.snapshot().is_empty());

        assert!(table.begin_tracing(generation, target(), 5));
        assert_eq!(table.phase(), TracePhase::Tracing);
        assert_eq!(table.snapshot().len(), 5);
        assert_eq!(table.resolved(), Some(target()));

        assert!(table.stop());
        assert_eq!(table.phase(), TracePhase::Stopped);
        assert!(!table.stop());

        // Data survives stop until the next run begins
        assert_eq!(table.snapshot().len(), 5);
        assert!(table.begin_resolving().is_some());
        assert!(table.snapshot().is_empty());
    }

    #[test]
    fn test_fail_only_matches_own_generation() {
        let mut table = HopTable::new();
        let generation = table.begin_resolving().unwrap();

        assert!(!table.fail(generation + 7));
        assert!(table.fail(generation));
        assert_eq!(table.phase(), TracePhase::Failed);
        assert!(!table.begin_tracing(generation, target(), 3));
    }

    #[test]
    fn test_merge_success_and_failure() {
        let (mut table, generation) = tracing_table(4);

        let ok = ProbeResult::success(2, 1, router(2), None, 12.0);
        let merged = table.merge(generation, &ok).unwrap();
        assert_eq!(merged.lookup, Some(router(2)));

        let lost = ProbeResult::failure(2, 2, target(), "timeout");
        table.merge(generation, &lost).unwrap();

        let hop = table.hop(2).unwrap();
        assert_eq!(hop.sent, 2);
        assert_eq!(hop.received, 1);
        assert_eq!(hop.ip_address, Some(router(2)));
        assert_eq!(hop.samples, vec![12.0]);
    }

    #[test]
    fn test_failure_on_fresh_hop_needs_no_lookup() {
        let (mut table, generation) = tracing_table(4);
        let lost = ProbeResult::failure(1, 1, target(), "timeout");
        assert_eq!(table.merge(generation, &lost).unwrap().lookup, None);
        assert!(table.hop(1).unwrap().ip_address.is_none());
    }

    #[test]
    fn test_merge_adopts_reported_hostname() {
        let (mut table, generation) = tracing_table(2);
        let ok = ProbeResult::success(1, 1, router(1), Some("gw.lan".into()), 1.0);

        assert_eq!(table.merge(generation, &ok).unwrap().lookup, None);
        assert_eq!(table.hop(1).unwrap().display_host(), "gw.lan");
    }

    #[test]
    fn test_merge_rejects_stale_and_out_of_range() {
        let (mut table, generation) = tracing_table(3);

        assert!(table.merge(generation, &ProbeResult::success(0, 1, router(1), None, 1.0)).is_none());
        assert!(table.merge(generation, &ProbeResult::success(4, 1, router(1), None, 1.0)).is_none());

        table.stop();
        assert!(table.merge(generation, &ProbeResult::success(1, 1, router(1), None, 1.0)).is_none());
        assert_eq!(table.hop(1).unwrap().sent, 0);
    }

    #[test]
    fn test_patch_hostname_guards() {
        let (mut table, generation) = tracing_table(3);
        table.merge(generation, &ProbeResult::success(1, 1, router(1), None, 1.0));

        // Address moved on since the lookup was issued
        assert!(!table.patch_hostname(generation, 1, router(9), "old.example".into()));
        // Hop does not exist
        assert!(!table.patch_hostname(generation, 9, router(1), "nowhere".into()));

        assert!(table.patch_hostname(generation, 1, router(1), "r1.example".into()));
        assert_eq!(table.hop(1).unwrap().display_host(), "r1.example");

        // Already named
        assert!(!table.patch_hostname(generation, 1, router(1), "other".into()));
    }

    #[test]
    fn test_patch_after_stop_is_discarded() {
        let (mut table, generation) = tracing_table(3);
        table.merge(generation, &ProbeResult::success(1, 1, router(1), None, 1.0));
        table.stop();

        assert!(!table.patch_hostname(generation, 1, router(1), "late.example".into()));
        assert!(table.hop(1).unwrap().hostname.is_none());
    }

    #[test]
    fn test_invariants_hold_over_mixed_results() {
        let (mut table, generation) = tracing_table(1);
        for i in 0..50u64 {
            let result = if i % 3 == 0 {
                ProbeResult::failure(1, i, target(), "timeout")
            } else {
                ProbeResult::success(1, i, router(1), None, (i * 7 % 23) as f64 + 0.5)
            };
            table.merge(generation, &result);

            let hop = table.hop(1).unwrap();
            assert!(hop.received <= hop.sent);
            if let (Some(b), Some(a), Some(w)) = (hop.best, hop.avg, hop.worst) {
                assert!(b <= a && a <= w);
                let mean = hop.samples.iter().sum::<f64>() / hop.samples.len() as f64;
                assert!((a - mean).abs() < 1e-9);
            }
        }
    }

    use proptest::prelude::*;

    proptest! {
        /// Any mix of successes and failures keeps the hop statistics consistent
        #[test]
        fn proptest_merge_keeps_stats_consistent(
            outcomes in prop::collection::vec(prop::option::of(0.0f64..5_000.0), 1..200)
        ) {
            let (mut table, generation) = tracing_table(1);
            for (i, outcome) in outcomes.iter().enumerate() {
                let result = match outcome {
                    Some(latency) => ProbeResult::success(1, i as u64, router(1), None, *latency),
                    None => ProbeResult::failure(1, i as u64, target(), "timeout"),
                };
                prop_assert!(table.merge(generation, &result).is_some());
            }

            let hop = table.hop(1).unwrap();
            prop_assert_eq!(hop.sent, outcomes.len() as u64);
            prop_assert!(hop.received <= hop.sent);
            prop_assert_eq!(hop.received as usize, hop.samples.len());
            prop_assert!((0.0..=100.0).contains(&hop.loss_pct()));

            if let (Some(best), Some(avg), Some(worst)) = (hop.best, hop.avg, hop.worst) {
                let mean = hop.samples.iter().sum::<f64>() / hop.samples.len() as f64;
                prop_assert!((avg - mean).abs() < 1e-6);
                prop_assert!(best <= avg + 1e-9 && avg <= worst + 1e-9);
            } else {
                prop_assert_eq!(hop.received, 0);
            }
        }
    }
}
