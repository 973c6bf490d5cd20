//! Pluggable probe transport.

use async_trait::async_trait;
use std::net::IpAddr;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::ProbeError;

/// One probe unit to transmit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRequest {
    pub destination: IpAddr,
    /// Hop ordinal, also used as the IP TTL by socket transports
    pub hop: u8,
    /// Identifier handed out by the engine, unique within a run
    pub probe_id: u64,
}

/// Inbound answer to a probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub responder: IpAddr,
    /// Name reported by the transport itself, if any
    pub hostname: Option<String>,
    pub received_at: Instant,
}

impl Reply {
    pub fn new(responder: IpAddr) -> Self {
        Self {
            responder,
            hostname: None,
            received_at: Instant::now(),
        }
    }
}

/// Notification channel for a sent probe. Resolves with the reply or with a
/// transport error; dropping it tells the transport nobody is listening.
pub type PendingReply = oneshot::Receiver<Result<Reply, ProbeError>>;

/// Sends probes and reports their replies
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Transmit one probe unit.
    ///
    /// An `Err` here means nothing went out. Failures after transmission are
    /// delivered through the returned `PendingReply`.
    async fn send_probe(&self, request: &ProbeRequest) -> Result<PendingReply, ProbeError>;
}
