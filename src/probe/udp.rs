use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::ProbeError;
use crate::probe::transport::{PendingReply, ProbeRequest, Reply, Transport};

/// Classic traceroute base port; the hop number is added per probe
pub const DEFAULT_BASE_PORT: u16 = 33434;

/// Probe payload size
pub const UDP_PAYLOAD_SIZE: usize = 32;

/// Magic bytes following the probe id
const MAGIC: [u8; 3] = [0x50, 0x50, 0x42]; // "PPB"

/// Build a UDP probe payload carrying the probe id for correlation
pub fn build_udp_payload(probe_id: u64) -> Vec<u8> {
    let mut payload = vec![0u8; UDP_PAYLOAD_SIZE];

    payload[0..8].copy_from_slice(&probe_id.to_be_bytes());
    payload[8..11].copy_from_slice(&MAGIC);
    payload[11] = 0x01; // Version

    // Fill remaining bytes with pattern
    for (i, byte) in payload[12..].iter_mut().enumerate() {
        *byte = (i & 0xFF) as u8;
    }

    payload
}

/// Extract the probe id from a payload built by `build_udp_payload`
pub fn extract_probe_id(payload: &[u8]) -> Option<u64> {
    if payload.len() < 12 || payload[8..11] != MAGIC {
        return None;
    }
    let mut id = [0u8; 8];
    id.copy_from_slice(&payload[0..8]);
    Some(u64::from_be_bytes(id))
}

/// Create a nonblocking DGRAM UDP socket with the hop limit applied
fn create_probe_socket(destination: IpAddr, ttl: u8) -> Result<Socket, ProbeError> {
    let (domain, bind_addr) = match destination {
        IpAddr::V4(_) => (Domain::IPV4, SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)),
        IpAddr::V6(_) => (Domain::IPV6, SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)),
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    if destination.is_ipv6() {
        socket.set_unicast_hops_v6(ttl as u32)?;
    } else {
        socket.set_ttl(ttl as u32)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(bind_addr))?;

    Ok(socket)
}

/// Socket-backed transport.
///
/// Each probe gets its own connected UDP socket with the IP TTL set to the hop
/// number. A datagram back from the destination, or an ICMP port unreachable
/// (surfaced by the kernel as `ConnectionRefused`), counts as the reply. An
/// echoed payload carrying another probe's id is ignored.
///
/// `IP_RECVERR` is not enabled, so ICMP time-exceeded from routers short of
/// the destination is never seen: intermediate hops show as lost with this
/// transport and only the destination's hop reports latency.
#[derive(Debug, Clone, Copy)]
pub struct UdpTransport {
    base_port: u16,
}

impl UdpTransport {
    pub fn new(base_port: u16) -> Self {
        Self { base_port }
    }

    fn port_for(&self, hop: u8) -> u16 {
        self.base_port.saturating_add(hop as u16)
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_PORT)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_probe(&self, request: &ProbeRequest) -> Result<PendingReply, ProbeError> {
        let socket = create_probe_socket(request.destination, request.hop)?;
        let socket = UdpSocket::from_std(socket.into())?;

        socket
            .connect(SocketAddr::new(request.destination, self.port_for(request.hop)))
            .await?;
        let sent = socket.send(&build_udp_payload(request.probe_id)).await?;
        if sent == 0 {
            return Err(ProbeError::Transport("no bytes sent".into()));
        }

        let (mut tx, rx) = oneshot::channel();
        let destination = request.destination;
        let probe_id = request.probe_id;
        tokio::spawn(async move {
            let mut buffer = [0u8; 512];
            let reply = loop {
                let received = tokio::select! {
                    // Prober timed out or was stopped
                    _ = tx.closed() => return,
                    received = socket.recv(&mut buffer) => received,
                };

                match received {
                    Ok(n) => match extract_probe_id(&buffer[..n]) {
                        Some(echoed) if echoed != probe_id => {
                            trace!(probe_id, echoed, "Ignoring echo of another probe");
                        }
                        _ => break Ok(Reply::new(destination)),
                    },
                    Err(e) if e.kind() == ErrorKind::ConnectionRefused => break Ok(Reply::new(destination)),
                    Err(e) => break Err(ProbeError::from(e)),
                }
            };
            let _ = tx.send(reply);
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_udp_payload_roundtrip() {
        let payload = build_udp_payload(0x0102_0304_0506_0708);
        assert_eq!(payload.len(), UDP_PAYLOAD_SIZE);
        assert_eq!(extract_probe_id(&payload), Some(0x0102_0304_0506_0708));
    }

    #[test]
    fn test_udp_payload_magic_validation() {
        let mut payload = build_udp_payload(9);
        payload[9] = 0;
        assert!(extract_probe_id(&payload).is_none());
        assert!(extract_probe_id(&payload[..5]).is_none());
    }

    #[test]
    fn test_port_per_hop() {
        let transport = UdpTransport::new(33434);
        assert_eq!(transport.port_for(1), 33435);
        assert_eq!(UdpTransport::new(u16::MAX).port_for(4), u16::MAX);
    }

    #[tokio::test]
    async fn test_loopback_echo_counts_as_reply() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_port = server.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buffer = [0u8; 512];
            if let Ok((n, peer)) = server.recv_from(&mut buffer).await {
                assert_eq!(extract_probe_id(&buffer[..n]), Some(42));
                let _ = server.send_to(&buffer[..n], peer).await;
            }
        });

        let transport = UdpTransport::new(server_port - 1);
        let request = ProbeRequest {
            destination: IpAddr::V4(Ipv4Addr::LOCALHOST),
            hop: 1,
            probe_id: 42,
        };
        let pending = transport.send_probe(&request).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply.responder, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_echo_of_other_id_is_ignored() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_port = server.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buffer = [0u8; 512];
            if let Ok((n, peer)) = server.recv_from(&mut buffer).await {
                let _ = server.send_to(&build_udp_payload(7), peer).await;
                tokio::time::sleep(Duration::from_millis(200)).await;
                let _ = server.send_to(&buffer[..n], peer).await;
            }
        });

        let transport = UdpTransport::new(server_port - 1);
        let request = ProbeRequest {
            destination: IpAddr::V4(Ipv4Addr::LOCALHOST),
            hop: 1,
            probe_id: 42,
        };
        let sent_at = tokio::time::Instant::now();
        let pending = transport.send_probe(&request).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // Only the matching echo, sent 200ms later, completes the exchange
        assert!(reply.received_at.duration_since(sent_at) >= Duration::from_millis(150));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_closed_port_counts_as_reply() {
        // Grab a free port, then release it so nothing is listening
        let port = {
            let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            probe.local_addr().unwrap().port()
        };

        let transport = UdpTransport::new(port - 2);
        let request = ProbeRequest {
            destination: IpAddr::V4(Ipv4Addr::LOCALHOST),
            hop: 2,
            probe_id: 1,
        };
        let pending = transport.send_probe(&request).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(reply.is_ok());
    }

    use proptest::prelude::*;

    proptest! {
        /// Arbitrary bytes never panic the payload parser
        #[test]
        fn proptest_extract_probe_id_no_panic(data in prop::collection::vec(0u8..=255, 0..64)) {
            let _ = extract_probe_id(&data);
        }
    }
}
