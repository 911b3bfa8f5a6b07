//! A single relayed connection

use crate::error::RelayError;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Bytes moved per read
pub const CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Relaying,
    Closed,
}

/// Byte counts for a finished session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Source to destination
    pub bytes_out: u64,
    /// Destination to source
    pub bytes_in: u64,
}

/// An accepted connection paired with its destination connection
#[derive(Debug)]
pub struct ProxySession {
    peer: SocketAddr,
    destination: SocketAddr,
    source_stream: TcpStream,
    destination_stream: TcpStream,
    state: SessionState,
}

impl ProxySession {
    /// Connect to `destination` on behalf of an accepted `source`
    pub async fn connect(
        source: TcpStream,
        peer: SocketAddr,
        destination: SocketAddr,
    ) -> Result<Self, RelayError> {
        trace!(peer = %peer, destination = %destination, state = ?SessionState::Connecting, "Opening session");
        let destination_stream = TcpStream::connect(destination).await.map_err(|e| {
            RelayError::ProxyConnectionRefused {
                destination,
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            peer,
            destination,
            source_stream: source,
            destination_stream,
            state: SessionState::Relaying,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Relay bytes both ways until either side reaches EOF or errors.
    ///
    /// Both sockets are closed when this returns.
    pub async fn relay(mut self) -> SessionStats {
        let mut stats = SessionStats::default();
        let mut up = [0u8; CHUNK_SIZE];
        let mut down = [0u8; CHUNK_SIZE];

        {
            let (mut source_read, mut source_write) = self.source_stream.split();
            let (mut dest_read, mut dest_write) = self.destination_stream.split();

            loop {
                tokio::select! {
                    read = source_read.read(&mut up) => match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if dest_write.write_all(&up[..n]).await.is_err() {
                                break;
                            }
                            stats.bytes_out += n as u64;
                        }
                    },
                    read = dest_read.read(&mut down) => match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if source_write.write_all(&down[..n]).await.is_err() {
                                break;
                            }
                            stats.bytes_in += n as u64;
                        }
                    },
                }
            }

            let _ = dest_write.shutdown().await;
            let _ = source_write.shutdown().await;
        }

        self.state = SessionState::Closed;
        debug!(
            peer = %self.peer,
            destination = %self.destination,
            bytes_out = stats.bytes_out,
            bytes_in = stats.bytes_in,
            state = ?self.state,
            "Session closed"
        );
        stats
    }
}
