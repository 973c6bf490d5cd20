//! State shared between the engine handle, its control loop, the probe
//! worker and reverse-lookup tasks.
//!
//! Every mutation takes the table's write lock and publishes its event while
//! still holding it, so observers see events in the same order the table
//! changed. Nothing publishes for a run after that run's `Finished`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::state::{HopRecord, HopTable, Merged, ProbeResult, TracePhase};
use crate::trace::events::TraceEvent;

pub struct SharedTrace {
    table: RwLock<HopTable>,
    events: broadcast::Sender<TraceEvent>,
}

impl SharedTrace {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            table: RwLock::new(HopTable::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TraceEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: TraceEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn phase(&self) -> TracePhase {
        self.table.read().phase()
    }

    pub fn resolved(&self) -> Option<IpAddr> {
        self.table.read().resolved()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.table.read().started_at()
    }

    pub fn snapshot(&self) -> Vec<HopRecord> {
        self.table.read().snapshot()
    }

    pub fn clear_resolved(&self) {
        self.table.write().clear_resolved();
    }

    pub fn begin_resolving(&self) -> Option<u64> {
        self.table.write().begin_resolving()
    }

    pub fn begin_tracing(&self, generation: u64, target: IpAddr, max_hops: u8) -> bool {
        self.table.write().begin_tracing(generation, target, max_hops)
    }

    pub fn merge(&self, generation: u64, result: &ProbeResult) -> Option<Merged> {
        let mut table = self.table.write();
        let merged = table.merge(generation, result)?;
        self.publish(TraceEvent::SnapshotUpdated(table.snapshot()));
        Some(merged)
    }

    pub fn patch_hostname(&self, generation: u64, hop: u8, ip: IpAddr, hostname: String) -> bool {
        let mut table = self.table.write();
        if !table.patch_hostname(generation, hop, ip, hostname) {
            return false;
        }
        self.publish(TraceEvent::SnapshotUpdated(table.snapshot()));
        true
    }

    /// Resolution failed: report it, then close the run
    pub fn fail(&self, generation: u64, message: String) -> bool {
        let mut table = self.table.write();
        if !table.fail(generation) {
            return false;
        }
        self.publish(TraceEvent::Error(message));
        self.publish(TraceEvent::Finished);
        true
    }

    /// Close the given run if it is still current
    pub fn finish(&self, generation: u64) -> bool {
        let mut table = self.table.write();
        if !table.finish(generation) {
            return false;
        }
        self.publish(TraceEvent::Finished);
        true
    }

    /// Close whatever run is current
    pub fn stop(&self) -> bool {
        let mut table = self.table.write();
        if !table.stop() {
            return false;
        }
        self.publish(TraceEvent::Finished);
        true
    }
}

/// Read-only handle to the live table, usable from any thread
#[derive(Clone)]
pub struct SnapshotReader {
    shared: Arc<SharedTrace>,
}

impl SnapshotReader {
    pub(crate) fn new(shared: Arc<SharedTrace>) -> Self {
        Self { shared }
    }

    pub fn snapshot(&self) -> Vec<HopRecord> {
        self.shared.snapshot()
    }

    pub fn phase(&self) -> TracePhase {
        self.shared.phase()
    }

    pub fn is_running(&self) -> bool {
        self.shared.phase().is_running()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TraceEvent> {
        self.shared.subscribe()
    }
}
