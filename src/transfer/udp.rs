//! UDP IXFR probes: the first thing tried for a zone with a disk SOA
//! already on file.

use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::soa::SoaSnapshot;
use crate::wire;
use crate::zone::StoredName;

/// Initial-AXFR / retry backoff base, per the SOA state machine.
pub const T0: Duration = Duration::from_secs(10);

/// Pick a jittered deadline of `T0 + random(0, T0)`, matching the retry
/// scheduling rule for a zone that has never successfully transferred.
pub fn jittered_t0() -> Duration {
    let jitter_ms = rand::rng().random_range(0..T0.as_millis() as u64);
    T0 + Duration::from_millis(jitter_ms)
}

/// Generate a fresh 16-bit query ID.
pub fn new_query_id() -> u16 {
    rand::rng().random()
}

/// The outcome of sending a UDP probe and waiting for a reply.
#[derive(Debug)]
pub enum ProbeResult {
    /// A datagram was received; the caller must still run it through the
    /// reply validator.
    Reply(bytes::Bytes),
    /// No reply arrived before the deadline.
    Timeout,
    /// A socket-level error occurred (e.g. ICMP port-unreachable surfaced
    /// as a connection error).
    Error(UdpProbeError),
}

/// An error encountered sending or waiting for a UDP probe.
#[derive(Debug)]
pub enum UdpProbeError {
    Io(std::io::Error),
}

impl From<std::io::Error> for UdpProbeError {
    fn from(err: std::io::Error) -> Self {
        UdpProbeError::Io(err)
    }
}

impl std::fmt::Display for UdpProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UdpProbeError::Io(err) => write!(f, "UDP probe I/O error: {err}"),
        }
    }
}

impl std::error::Error for UdpProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UdpProbeError::Io(err) => Some(err),
        }
    }
}

/// Send an IXFR query to `master` and wait up to `deadline` for a reply.
///
/// A fresh socket is opened for each probe and torn down immediately
/// afterwards: there is no long-lived per-zone UDP socket to manage.
pub async fn probe(
    zone: &StoredName,
    master: SocketAddr,
    query_id: u16,
    soa_disk: &SoaSnapshot,
    deadline: Duration,
) -> ProbeResult {
    let local_addr: SocketAddr = if master.is_ipv6() {
        "[::]:0".parse().unwrap()
    } else {
        "0.0.0.0:0".parse().unwrap()
    };

    let socket = match UdpSocket::bind(local_addr).await {
        Ok(s) => s,
        Err(err) => return ProbeResult::Error(err.into()),
    };
    if let Err(err) = socket.connect(master).await {
        return ProbeResult::Error(err.into());
    }

    let query = wire::build_ixfr_query(zone, query_id, soa_disk);
    if let Err(err) = socket.send(&query).await {
        return ProbeResult::Error(err.into());
    }

    let mut buf = vec![0u8; 4096];
    match tokio::time::timeout(deadline, socket.recv(&mut buf)).await {
        Ok(Ok(n)) => {
            debug!(zone = %zone, master = %master, bytes = n, "received UDP reply");
            buf.truncate(n);
            ProbeResult::Reply(bytes::Bytes::from(buf))
        }
        Ok(Err(err)) => {
            warn!(zone = %zone, master = %master, %err, "UDP probe failed");
            ProbeResult::Error(err.into())
        }
        Err(_) => ProbeResult::Timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_one_t0_of_the_base() {
        for _ in 0..100 {
            let d = jittered_t0();
            assert!(d >= T0);
            assert!(d <= T0 * 2);
        }
    }
}
