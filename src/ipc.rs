//! The single-byte command channel shared with the parent (authoritative
//! server) process.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;

use crate::config::IpcConfig;

/// A command sent by the parent process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Stop accepting new work and exit once current transfers settle.
    Quit,
    /// Stop immediately.
    Shutdown,
}

/// The outcome of waiting for the next byte on the parent channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Command(Command),
    /// A byte outside the known command set; logged and otherwise ignored.
    Unknown(u8),
    /// The parent closed its end of the channel. Per the protocol, this is
    /// equivalent to an explicit shutdown command.
    Eof,
}

const CMD_QUIT: u8 = 1;
const CMD_SHUTDOWN: u8 = 2;
const CMD_RELOAD: u8 = 3;

/// The parent IPC channel.
///
/// `None` when the coordinator is running standalone (`IpcConfig::Disabled`),
/// in which case reads never yield a command and writes are dropped.
pub struct Channel {
    inner: Option<pipe::Receiver>,
    writer: Option<pipe::Sender>,
}

impl Channel {
    pub async fn open(config: &IpcConfig) -> Result<Self, IpcError> {
        match config {
            IpcConfig::Disabled => Ok(Self {
                inner: None,
                writer: None,
            }),
            IpcConfig::Pipe { path } => {
                let rx = pipe::OpenOptions::new().open_receiver(path)?;
                let tx = pipe::OpenOptions::new().open_sender(path)?;
                Ok(Self {
                    inner: Some(rx),
                    writer: Some(tx),
                })
            }
        }
    }

    /// Wait for the next command from the parent.
    ///
    /// Never resolves if IPC is disabled, which is intentional: it simply
    /// never contributes an event to the dispatcher's `select!`.
    pub async fn recv(&mut self) -> Result<Event, IpcError> {
        let Some(rx) = self.inner.as_mut() else {
            std::future::pending::<()>().await;
            unreachable!();
        };

        let mut buf = [0u8; 1];
        let n = rx.read(&mut buf).await?;
        if n == 0 {
            return Ok(Event::Eof);
        }

        Ok(match buf[0] {
            CMD_QUIT => Event::Command(Command::Quit),
            CMD_SHUTDOWN => Event::Command(Command::Shutdown),
            other => Event::Unknown(other),
        })
    }

    /// Ask the parent to reload the zones most recently committed to the
    /// diff log.
    pub async fn request_reload(&mut self) -> Result<(), IpcError> {
        if let Some(tx) = self.writer.as_mut() {
            tx.write_all(&[CMD_RELOAD]).await?;
        }
        Ok(())
    }
}

/// An error encountered opening or using the parent IPC channel.
#[derive(Debug)]
pub enum IpcError {
    Io(std::io::Error),
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        IpcError::Io(err)
    }
}

impl std::fmt::Display for IpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpcError::Io(err) => write!(f, "parent IPC channel error: {err}"),
        }
    }
}

impl std::error::Error for IpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IpcError::Io(err) => Some(err),
        }
    }
}
