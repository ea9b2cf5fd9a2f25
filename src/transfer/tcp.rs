//! TCP-based AXFR/IXFR transfers: connect, write a length-prefixed query,
//! read back a length-prefixed reply.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::soa::SoaSnapshot;
use crate::wire;
use crate::zone::StoredName;

/// The outcome of a single TCP transfer attempt.
#[derive(Debug)]
pub enum TransferResult {
    /// The complete reply message (length prefix stripped).
    Reply(bytes::Bytes),
    /// Connect, write, or read failed, or the deadline elapsed.
    Failed(TcpTransferError),
}

/// An error encountered running a TCP transfer.
#[derive(Debug)]
pub enum TcpTransferError {
    Io(std::io::Error),
    /// The built query exceeded the 16-bit TCP length prefix.
    QueryTooLarge(usize),
    /// The transfer did not finish before its deadline.
    Timeout,
}

impl From<std::io::Error> for TcpTransferError {
    fn from(err: std::io::Error) -> Self {
        TcpTransferError::Io(err)
    }
}

impl std::fmt::Display for TcpTransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TcpTransferError::Io(err) => write!(f, "TCP transfer I/O error: {err}"),
            TcpTransferError::QueryTooLarge(len) => {
                write!(f, "query of {len} bytes exceeds the 16-bit TCP length prefix")
            }
            TcpTransferError::Timeout => write!(f, "TCP transfer deadline elapsed"),
        }
    }
}

impl std::error::Error for TcpTransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TcpTransferError::Io(err) => Some(err),
            TcpTransferError::QueryTooLarge(_) | TcpTransferError::Timeout => None,
        }
    }
}

/// Run one TCP transfer against `master`.
///
/// This implementation reads a single reply message per connection. Per
/// the design notes, multi-message AXFR streaming (where a large zone is
/// split across several length-prefixed messages on the same connection)
/// is not implemented; a zone whose answer doesn't fit in one TCP message
/// will appear to the validator as an incomplete/malformed reply.
pub async fn transfer(
    zone: &StoredName,
    master: SocketAddr,
    query_id: u16,
    soa_disk: Option<&SoaSnapshot>,
    timeout: Duration,
) -> TransferResult {
    match tokio::time::timeout(timeout, run(zone, master, query_id, soa_disk)).await {
        Ok(Ok(reply)) => TransferResult::Reply(reply),
        Ok(Err(err)) => TransferResult::Failed(err),
        Err(_) => TransferResult::Failed(TcpTransferError::Timeout),
    }
}

async fn run(
    zone: &StoredName,
    master: SocketAddr,
    query_id: u16,
    soa_disk: Option<&SoaSnapshot>,
) -> Result<bytes::Bytes, TcpTransferError> {
    let mut stream = TcpStream::connect(master).await?;
    stream.set_nodelay(true)?;

    let query = match soa_disk {
        Some(soa) => wire::build_ixfr_query(zone, query_id, soa),
        None => wire::build_axfr_query(zone, query_id),
    };

    let len =
        u16::try_from(query.len()).map_err(|_| TcpTransferError::QueryTooLarge(query.len()))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&query).await?;

    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let reply_len = u16::from_be_bytes(len_buf) as usize;

    let mut reply = vec![0u8; reply_len];
    stream.read_exact(&mut reply).await?;

    debug!(zone = %zone, master = %master, bytes = reply_len, "received TCP reply");
    Ok(bytes::Bytes::from(reply))
}
