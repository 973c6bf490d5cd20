//! The probe worker.
//!
//! A single task owns every `Prober` of a run. The control loop hands it work
//! over an unbounded queue and never waits on it. Completed probes come back
//! on the worker's results channel and are merged into the shared table from
//! here; reverse lookups for newly seen addresses are spawned per hop.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::lookup::{Resolver, sanitize_display};
use crate::probe::{Prober, Transport};
use crate::state::ProbeResult;
use crate::trace::shared::SharedTrace;

/// Work handed from the control loop to the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    Probe {
        hop: u8,
        destination: IpAddr,
        timeout: Duration,
        probe_id: u64,
    },
}

pub struct ProbeWorker {
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn Resolver>,
    shared: Arc<SharedTrace>,
    generation: u64,
    dns_enabled: bool,
    probers: HashMap<u8, Prober>,
    /// At most one reverse lookup in flight per hop
    lookups: HashMap<u8, JoinHandle<()>>,
}

impl ProbeWorker {
    pub fn new(
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn Resolver>,
        shared: Arc<SharedTrace>,
        generation: u64,
        dns_enabled: bool,
    ) -> Self {
        Self {
            transport,
            resolver,
            shared,
            generation,
            dns_enabled,
            probers: HashMap::new(),
            lookups: HashMap::new(),
        }
    }

    pub fn spawn(
        self,
        commands: mpsc::UnboundedReceiver<WorkerCommand>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(commands, cancel))
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<WorkerCommand>, cancel: CancellationToken) {
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command, &results_tx),
                    None => break,
                },
                Some(result) = results_rx.recv() => self.merge(result),
            }
        }

        self.shutdown();
    }

    fn handle(&mut self, command: WorkerCommand, results: &mpsc::UnboundedSender<ProbeResult>) {
        match command {
            WorkerCommand::Probe {
                hop,
                destination,
                timeout,
                probe_id,
            } => {
                let transport = &self.transport;
                let prober = self
                    .probers
                    .entry(hop)
                    .or_insert_with(|| Prober::new(transport.clone(), results.clone()));
                prober.set_target(destination, hop);
                prober.set_timeout(timeout);
                trace!(hop, probe_id, "Dispatching probe");
                prober.start(probe_id);
            }
        }
    }

    fn merge(&mut self, result: ProbeResult) {
        let hop = result.hop_number;
        let Some(merged) = self.shared.merge(self.generation, &result) else {
            trace!(hop, probe_id = result.probe_id, "Discarding result for inactive run");
            return;
        };

        if self.dns_enabled
            && let Some(ip) = merged.lookup
        {
            self.spawn_lookup(hop, ip);
        }
    }

    fn spawn_lookup(&mut self, hop: u8, ip: IpAddr) {
        if self.lookups.get(&hop).is_some_and(|task| !task.is_finished()) {
            return;
        }

        let resolver = self.resolver.clone();
        let shared = self.shared.clone();
        let generation = self.generation;
        let task = tokio::spawn(async move {
            let Some(name) = resolver.reverse(ip).await else {
                return;
            };
            if !shared.patch_hostname(generation, hop, ip, sanitize_display(&name)) {
                trace!(hop, %ip, "Discarding late reverse lookup");
            }
        });
        self.lookups.insert(hop, task);
    }

    /// Cancel every in-flight probe and lookup and release the probers
    fn shutdown(&mut self) {
        for prober in self.probers.values_mut() {
            prober.stop();
        }
        self.probers.clear();
        for (_, task) in self.lookups.drain() {
            task.abort();
        }
        debug!(generation = self.generation, "Probe worker stopped");
    }
}
