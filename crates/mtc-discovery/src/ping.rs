//! ICMP echo sweep

use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::network::NetworkProbe;

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_PAYLOAD: &[u8] = b"mtconnect-discovery";

static NEXT_SEQUENCE: AtomicU16 = AtomicU16::new(1);

/// Send one ICMP echo request and wait for the reply.
///
/// Uses an unprivileged datagram ICMP socket. Returns `Ok(false)` when the
/// host does not answer within `timeout`, and `Err` only when the platform
/// does not allow ICMP sockets at all. Blocking; call from
/// `spawn_blocking`.
pub fn icmp_echo(address: IpAddr, timeout: Duration) -> io::Result<bool> {
    let IpAddr::V4(v4) = address else {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "ICMPv6 echo is not supported",
        ));
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4))?;
    Ok(echo_on(&socket, v4, timeout).unwrap_or(false))
}

fn echo_on(socket: &Socket, address: Ipv4Addr, timeout: Duration) -> io::Result<bool> {
    let target = SockAddr::from(SocketAddr::new(IpAddr::V4(address), 0));
    socket.set_write_timeout(Some(timeout))?;
    socket.connect(&target)?;

    let sequence = NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    socket.send(&echo_request(sequence))?;

    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 512];
    let mut reader = socket;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        socket.set_read_timeout(Some(remaining))?;
        let n = reader.read(&mut buf)?;
        if n >= 8 && buf[0] == ICMP_ECHO_REPLY {
            return Ok(true);
        }
    }
}

/// Build an echo request. The kernel rewrites the identifier on datagram
/// ICMP sockets, so it is left zero.
fn echo_request(sequence: u16) -> Vec<u8> {
    let mut packet = vec![ICMP_ECHO_REQUEST, 0, 0, 0, 0, 0];
    packet.extend_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(ICMP_PAYLOAD);
    let checksum = internet_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    packet
}

/// RFC 1071 ones' complement checksum
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Pings every address of a scan, spaced by a fixed delay
pub struct PingSweeper {
    network: Arc<dyn NetworkProbe>,
    delay: Duration,
    timeout: Duration,
}

impl PingSweeper {
    pub fn new(network: Arc<dyn NetworkProbe>, delay: Duration, timeout: Duration) -> Self {
        Self {
            network,
            delay,
            timeout,
        }
    }

    /// Return the addresses that answered, in input order.
    ///
    /// Addresses that cannot be pinged on this platform are kept, so the
    /// port stage still gets to try them. Returns early with whatever has
    /// answered so far when `cancel` fires.
    pub async fn sweep(&self, addresses: &[IpAddr], cancel: &CancellationToken) -> Vec<IpAddr> {
        let mut pings = JoinSet::new();

        for (index, &address) in addresses.iter().enumerate() {
            if index > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
            let network = self.network.clone();
            let timeout = self.timeout;
            pings.spawn(async move { (index, address, network.ping(address, timeout).await) });
        }

        let mut responsive = Vec::new();
        let mut unsupported_logged = false;
        loop {
            let joined = tokio::select! {
                _ = cancel.cancelled() => {
                    pings.abort_all();
                    break;
                }
                joined = pings.join_next() => joined,
            };
            let Some(result) = joined else { break };
            let Ok((index, address, outcome)) = result else {
                continue;
            };
            match outcome {
                Ok(true) => {
                    debug!(%address, "Ping reply");
                    responsive.push((index, address));
                }
                Ok(false) => {}
                Err(e) => {
                    if !unsupported_logged {
                        warn!(error = %e, "ICMP unavailable, probing every address");
                        unsupported_logged = true;
                    }
                    responsive.push((index, address));
                }
            }
        }

        responsive.sort_by_key(|(index, _)| *index);
        responsive.into_iter().map(|(_, address)| address).collect()
    }
}
