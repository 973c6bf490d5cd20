//! Single-hop prober.
//!
//! A `Prober` owns at most one in-flight attempt. Every `start()` that
//! actually transmits ends in exactly one `ProbeResult` on the results
//! channel, unless `stop()` gets there first.

use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::MIN_TIMEOUT;
use crate::error::ProbeError;
use crate::probe::transport::{ProbeRequest, Reply, Transport};
use crate::state::ProbeResult;

pub struct Prober {
    transport: Arc<dyn Transport>,
    results: mpsc::UnboundedSender<ProbeResult>,
    destination: Option<IpAddr>,
    hop: u8,
    timeout: Duration,
    /// Probe id of the attempt in flight. Cleared by whoever ends the attempt first.
    in_flight: Arc<Mutex<Option<u64>>>,
    cancel: Option<CancellationToken>,
}

impl Prober {
    pub fn new(transport: Arc<dyn Transport>, results: mpsc::UnboundedSender<ProbeResult>) -> Self {
        Self {
            transport,
            results,
            destination: None,
            hop: 0,
            timeout: MIN_TIMEOUT,
            in_flight: Arc::new(Mutex::new(None)),
            cancel: None,
        }
    }

    pub fn set_target(&mut self, destination: IpAddr, hop: u8) {
        self.destination = Some(destination);
        self.hop = hop;
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Send one probe. No-op while an attempt is already in flight or no target is set.
    pub fn start(&mut self, probe_id: u64) {
        let Some(destination) = self.destination else {
            return;
        };
        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.is_some() {
                trace!(hop = self.hop, probe_id, "Prober busy, skipping dispatch");
                return;
            }
            *in_flight = Some(probe_id);
        }

        let sent_at = Instant::now();
        let deadline = sent_at + self.timeout;
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());

        let request = ProbeRequest {
            destination,
            hop: self.hop,
            probe_id,
        };
        let transport = self.transport.clone();
        let results = self.results.clone();
        let in_flight = self.in_flight.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = tokio::time::timeout_at(deadline, exchange(transport, request)) => outcome,
            };

            let result = match outcome {
                Ok(Ok(reply)) => {
                    let rtt = reply.received_at.saturating_duration_since(sent_at);
                    ProbeResult::success(
                        request.hop,
                        probe_id,
                        reply.responder,
                        reply.hostname,
                        rtt.as_secs_f64() * 1000.0,
                    )
                }
                Ok(Err(e)) => ProbeResult::failure(request.hop, probe_id, destination, e.to_string()),
                Err(_) => ProbeResult::failure(request.hop, probe_id, destination, ProbeError::Timeout.to_string()),
            };

            // Leave the running state before emitting; losing this race means stop() won
            {
                let mut current = in_flight.lock();
                if *current != Some(probe_id) {
                    trace!(hop = request.hop, probe_id, "Dropping result of cancelled probe");
                    return;
                }
                *current = None;
            }
            let _ = results.send(result);
        });
    }

    /// Cancel the attempt in flight. Its result is never emitted.
    pub fn stop(&mut self) {
        *self.in_flight.lock() = None;
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

impl Drop for Prober {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Transmit and wait for the inbound notification
async fn exchange(transport: Arc<dyn Transport>, request: ProbeRequest) -> Result<Reply, ProbeError> {
    let pending = transport.send_probe(&request).await?;
    pending
        .await
        .map_err(|_| ProbeError::Transport("reply channel closed".into()))?
}
