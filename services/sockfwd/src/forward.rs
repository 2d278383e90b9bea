//! Per-connection forwarding.
//!
//! Each accepted connection is paired with a freshly dialed connection to
//! the destination, and two independent tasks copy bytes between them, one
//! per direction:
//!
//! ```text
//! accepted --(upstream)--> dialed
//! accepted <-(downstream)- dialed
//! ```
//!
//! A direction ends at EOF or on the first read/write error. It then shuts
//! down the socket it was feeding in both directions, so the opposite task
//! reading that socket hits EOF and ends too. Either peer going away
//! therefore tears the whole pair down.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn, Instrument};

use crate::buffer::BufferPool;
use crate::endpoint::{Connection, ConnectionReader, ConnectionWriter, Endpoint};
use crate::stats::{Direction, Stats};

/// Forwards accepted connections to a fixed destination.
#[derive(Debug)]
pub struct Forwarder {
    destination: Endpoint,
    pool: Arc<BufferPool>,
    stats: Arc<Stats>,
    /// Suppress the per-connection log line.
    quiet: bool,
}

impl Forwarder {
    pub fn new(destination: Endpoint, pool: Arc<BufferPool>, stats: Arc<Stats>) -> Self {
        Self {
            destination,
            pool,
            stats,
            quiet: false,
        }
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn destination(&self) -> &Endpoint {
        &self.destination
    }

    /// Forward one accepted connection.
    ///
    /// Returns once the destination dial has completed and, on success, the
    /// two copy tasks are running. A failed dial closes `accepted` and
    /// leaves the stats untouched.
    pub async fn handle(self: Arc<Self>, accepted: Connection) {
        let dialed = match self.destination.dial().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(
                    destination = %self.destination,
                    error = %e,
                    "Destination dial failed"
                );
                drop(accepted);
                return;
            }
        };

        let (total, current) = self.stats.record_connection_start();
        if !self.quiet {
            info!(total, open = current, "connection #{} ({} open)", total, current);
        }

        let (accepted_read, accepted_write) = accepted.into_split();
        let (dialed_read, dialed_write) = dialed.into_split();
        let open = Arc::new(OpenConnection {
            stats: Arc::clone(&self.stats),
        });

        tokio::spawn(
            pump(
                accepted_read,
                dialed_write,
                Arc::clone(&self.pool),
                Arc::clone(&self.stats),
                Direction::Upstream,
                Arc::clone(&open),
            )
            .in_current_span(),
        );
        tokio::spawn(
            pump(
                dialed_read,
                accepted_write,
                Arc::clone(&self.pool),
                Arc::clone(&self.stats),
                Direction::Downstream,
                open,
            )
            .in_current_span(),
        );
    }
}

/// Live-connection marker shared by both copy tasks of one connection.
///
/// Dropped when the second task finishes, which is when the connection's
/// forwarding has fully terminated.
struct OpenConnection {
    stats: Arc<Stats>,
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.stats.record_connection_end();
    }
}

/// Copy one direction, then close the socket it was writing to.
async fn pump(
    mut reader: ConnectionReader,
    mut writer: ConnectionWriter,
    pool: Arc<BufferPool>,
    stats: Arc<Stats>,
    direction: Direction,
    open: Arc<OpenConnection>,
) {
    let mut buf = pool.acquire();
    let (bytes, result) = copy_with_buffer(&mut reader, &mut writer, &mut buf).await;
    buf.release();

    stats.record_bytes(direction, bytes);
    match result {
        Ok(()) => debug!(direction = direction.as_str(), bytes, "Copy finished"),
        Err(e) => debug!(direction = direction.as_str(), bytes, error = %e, "Copy ended"),
    }

    // Wakes the opposite direction, which is reading this same socket.
    if let Err(e) = writer.close() {
        if e.kind() != io::ErrorKind::NotConnected {
            debug!(direction = direction.as_str(), error = %e, "Socket close failed");
        }
    }
    drop(reader);
    drop(writer);
    drop(open);
}

/// Copy `reader` into `writer` through `buf` until EOF or error.
///
/// Returns the number of bytes fully written along with how the copy ended.
async fn copy_with_buffer<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
) -> (u64, io::Result<()>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut copied = 0u64;
    loop {
        let n = match reader.read(buf).await {
            Ok(0) => return (copied, Ok(())),
            Ok(n) => n,
            Err(e) => return (copied, Err(e)),
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            return (copied, Err(e));
        }
        copied += n as u64;
    }
}
