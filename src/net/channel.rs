use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::Result;

/// Number of channels currently open, across the whole process.
static OPEN_CHANNELS: AtomicUsize = AtomicUsize::new(0);

/// Number of byte channels currently open.
///
/// The count covers every [`Channel`] in the process; tests use it to
/// assert that a finished session released both of its connections.
#[must_use]
pub fn open_channel_count() -> usize {
    OPEN_CHANNELS.load(Ordering::SeqCst)
}

/// How long `has_pending_input` waits for a byte that is already in
/// flight. Data queued on the socket is reported immediately; the grace
/// period only matters for a segment that left the peer but has not been
/// delivered yet.
const PEEK_GRACE: Duration = Duration::from_millis(25);

/// A bidirectional, stream-oriented TCP byte channel.
///
/// One channel carries the RTSP control conversation, a second one the
/// framed audio packets. Sends are all-or-fail; receives return whatever
/// the socket has.
pub struct Channel {
    stream: TcpStream,
}

impl Channel {
    /// Open a channel to `host:port`.
    ///
    /// # Errors
    /// Returns [`crate::AirTunesError::Network`] when the connection
    /// cannot be established.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        OPEN_CHANNELS.fetch_add(1, Ordering::SeqCst);
        Ok(Self { stream })
    }

    /// Send the whole buffer.
    ///
    /// # Errors
    /// Returns [`crate::AirTunesError::Network`] when the write fails;
    /// a partial write is a failure.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Receive up to `buf.len()` bytes. Returns the number of bytes
    /// read; 0 means the peer closed the connection.
    ///
    /// # Errors
    /// Returns [`crate::AirTunesError::Network`] when the read fails.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let received = self.stream.read(buf).await?;
        Ok(received)
    }

    /// True when at least one byte is readable without consuming it.
    pub async fn has_pending_input(&self) -> bool {
        let mut probe = [0u8; 1];
        matches!(
            tokio::time::timeout(PEEK_GRACE, self.stream.peek(&mut probe)).await,
            Ok(Ok(n)) if n > 0
        )
    }

    /// Local address of the channel.
    ///
    /// # Errors
    /// Returns [`crate::AirTunesError::Network`] when the socket address
    /// cannot be retrieved.
    pub fn local_ip(&self) -> Result<IpAddr> {
        Ok(self.stream.local_addr()?.ip())
    }

    /// Remote address of the channel.
    ///
    /// # Errors
    /// Returns [`crate::AirTunesError::Network`] when the socket address
    /// cannot be retrieved.
    pub fn peer_ip(&self) -> Result<IpAddr> {
        Ok(self.stream.peer_addr()?.ip())
    }

    /// Shut the channel down cleanly.
    ///
    /// # Errors
    /// Returns [`crate::AirTunesError::Network`] when the shutdown fails.
    /// The channel is released either way.
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        OPEN_CHANNELS.fetch_sub(1, Ordering::SeqCst);
    }
}
