use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::{self, TraceConfig};
use crate::error::TraceError;
use crate::lookup::{Resolver, pick_address};
use crate::probe::Transport;
use crate::state::{HopRecord, TracePhase};
use crate::trace::events::{EVENT_CAPACITY, TraceEvent};
use crate::trace::frontier::HopFrontier;
use crate::trace::shared::{SharedTrace, SnapshotReader};
use crate::trace::worker::{ProbeWorker, WorkerCommand};

/// Extra wait after the last round of a counted trace, on top of the probe timeout
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Handles to the tasks of one run
struct RunHandle {
    cancel: CancellationToken,
    interval: watch::Sender<Duration>,
    timeout: watch::Sender<Duration>,
    _task: JoinHandle<()>,
}

/// The trace orchestrator.
///
/// Owns the configuration, resolves the target, drives the repeat schedule
/// and merges probe results into the hop table. `start()` spawns onto the
/// current tokio runtime and must be called from within one.
pub struct TraceEngine {
    config: TraceConfig,
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn Resolver>,
    shared: Arc<SharedTrace>,
    run: Option<RunHandle>,
}

impl TraceEngine {
    pub fn new(mut config: TraceConfig, transport: Arc<dyn Transport>, resolver: Arc<dyn Resolver>) -> Self {
        config.normalize();
        Self {
            config,
            transport,
            resolver,
            shared: Arc::new(SharedTrace::new(EVENT_CAPACITY)),
            run: None,
        }
    }

    /// Change the target. Ignored while a run is in progress.
    pub fn set_target(&mut self, host: &str) {
        if self.is_running() {
            debug!(host, "Ignoring target change while running");
            return;
        }
        self.config.target_host = host.trim().to_string();
        self.shared.clear_resolved();
    }

    /// Takes effect immediately; a running timer is re-armed with the new period
    pub fn set_interval(&mut self, interval: Duration) {
        self.config.interval = config::clamp_interval(interval);
        if let Some(run) = &self.run {
            let _ = run.interval.send(self.config.interval);
        }
    }

    /// Applies to every probe dispatched from now on
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = config::clamp_timeout(timeout);
        if let Some(run) = &self.run {
            let _ = run.timeout.send(self.config.timeout);
        }
    }

    /// Read at the next `start()`
    pub fn set_max_hops(&mut self, max_hops: u8) {
        self.config.max_hops = config::clamp_max_hops(max_hops);
    }

    /// Read at the next `start()`
    pub fn set_lookahead(&mut self, lookahead: u8) {
        self.config.lookahead = lookahead.min(config::MAX_HOPS);
    }

    /// Begin a run. Returns false if one is already in progress, no target is
    /// set, or there is no tokio runtime to run on. Resolution happens in the
    /// background.
    pub fn start(&mut self) -> bool {
        if self.config.target_host.is_empty() {
            return false;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!(host = %self.config.target_host, "Cannot start trace outside a tokio runtime");
            return false;
        }
        let Some(generation) = self.shared.begin_resolving() else {
            return false;
        };
        if let Some(previous) = self.run.take() {
            previous.cancel.cancel();
        }
        debug!(host = %self.config.target_host, generation, "Starting trace");

        let cancel = CancellationToken::new();
        let (interval_tx, interval_rx) = watch::channel(self.config.interval);
        let (timeout_tx, timeout_rx) = watch::channel(self.config.timeout);

        let run = TraceRun {
            config: self.config.clone(),
            generation,
            cached: self.shared.resolved(),
            transport: self.transport.clone(),
            resolver: self.resolver.clone(),
            shared: self.shared.clone(),
            cancel: cancel.clone(),
            interval: interval_rx,
            timeout: timeout_rx,
        };
        let task = tokio::spawn(run.run());

        self.run = Some(RunHandle {
            cancel,
            interval: interval_tx,
            timeout: timeout_tx,
            _task: task,
        });
        true
    }

    /// End the current run. Safe to call repeatedly or before any start.
    pub fn stop(&mut self) {
        if self.shared.stop() {
            debug!(host = %self.config.target_host, "Trace stopped");
        }
        if let Some(run) = self.run.take() {
            run.cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.phase().is_running()
    }

    pub fn phase(&self) -> TracePhase {
        self.shared.phase()
    }

    pub fn target(&self) -> &str {
        &self.config.target_host
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Address the target resolved to, if known
    pub fn resolved_target(&self) -> Option<IpAddr> {
        self.shared.resolved()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.shared.started_at()
    }

    /// Copy of the current hop table
    pub fn snapshot(&self) -> Vec<HopRecord> {
        self.shared.snapshot()
    }

    /// Cloneable snapshot handle for other threads or tasks
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader::new(self.shared.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TraceEvent> {
        self.shared.subscribe()
    }
}

impl Drop for TraceEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the control loop of one run owns
struct TraceRun {
    config: TraceConfig,
    generation: u64,
    cached: Option<IpAddr>,
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn Resolver>,
    shared: Arc<SharedTrace>,
    cancel: CancellationToken,
    interval: watch::Receiver<Duration>,
    timeout: watch::Receiver<Duration>,
}

impl TraceRun {
    async fn run(mut self) {
        let destination = match self.resolve().await {
            Some(Ok(ip)) => ip,
            Some(Err(e)) => {
                warn!(host = %self.config.target_host, error = %e, "Target resolution failed");
                self.shared.fail(self.generation, e.to_string());
                return;
            }
            // Cancelled mid-lookup
            None => return,
        };

        if !self
            .shared
            .begin_tracing(self.generation, destination, self.config.max_hops)
        {
            return;
        }
        debug!(host = %self.config.target_host, %destination, "Tracing");

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let worker = ProbeWorker::new(
            self.transport.clone(),
            self.resolver.clone(),
            self.shared.clone(),
            self.generation,
            self.config.dns_enabled,
        )
        .spawn(commands_rx, self.cancel.clone());

        self.schedule(destination, &commands).await;

        drop(commands);
        let _ = worker.await;
    }

    /// None if cancelled before resolution finished
    async fn resolve(&self) -> Option<Result<IpAddr, TraceError>> {
        let host = &self.config.target_host;
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(Ok(ip));
        }
        if let Some(ip) = self.cached {
            return Some(Ok(ip));
        }

        let addrs = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            addrs = self.resolver.resolve(host) => addrs,
        };
        Some(addrs.and_then(|addrs| pick_address(&addrs).ok_or_else(|| TraceError::NoAddresses(host.clone()))))
    }

    /// Repeat-interval dispatch loop
    async fn schedule(&mut self, destination: IpAddr, commands: &mpsc::UnboundedSender<WorkerCommand>) {
        let mut frontier = HopFrontier::new(self.config.max_hops, self.config.lookahead);
        // Mark the current period seen so a change made while resolving
        // does not displace the immediate first round
        let period = *self.interval.borrow_and_update();
        let mut ticker = create_ticker(period, Instant::now());
        let mut next_probe_id: u64 = 0;
        let mut rounds: u64 = 0;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = self.interval.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let period = *self.interval.borrow_and_update();
                    trace!(?period, "Re-arming trace timer");
                    ticker = create_ticker(period, Instant::now() + period);
                }
                _ = ticker.tick() => {
                    let timeout = *self.timeout.borrow();
                    for hop in frontier.window() {
                        next_probe_id += 1;
                        let command = WorkerCommand::Probe {
                            hop,
                            destination,
                            timeout,
                            probe_id: next_probe_id,
                        };
                        if commands.send(command).is_err() {
                            return;
                        }
                    }
                    frontier.advance();
                    rounds += 1;

                    if self.config.count.is_some_and(|count| rounds >= count) {
                        self.drain(timeout).await;
                        break;
                    }
                }
            }
        }
    }

    /// Let the last round's probes land, then close the run
    async fn drain(&self, timeout: Duration) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(timeout + DRAIN_GRACE) => {
                if self.shared.finish(self.generation) {
                    debug!(host = %self.config.target_host, "Probe count reached");
                }
            }
        }
        self.cancel.cancel();
    }
}

fn create_ticker(period: Duration, start: Instant) -> Interval {
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
