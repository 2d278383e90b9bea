//! Test harness for forwarder integration tests.
//!
//! Provides echo backends over TCP and Unix sockets, and an in-process
//! forwarder with direct access to its stats and control handler.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use sockfwd::{
    BufferPool, Connection, ControlHandler, Endpoint, ForwardError, Forwarder, Listener, Stats,
    Transport,
};

async fn echo<S>(mut stream: S, bytes: Arc<AtomicU64>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                bytes.fetch_add(n as u64, Ordering::Relaxed);
                if stream.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

#[allow(dead_code)]
pub struct TcpEchoBackend {
    pub endpoint: Endpoint,
    pub connections: Arc<AtomicU64>,
    pub bytes_received: Arc<AtomicU64>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl TcpEchoBackend {
    pub async fn spawn() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let endpoint = Endpoint::new(Transport::Tcp, listener.local_addr()?.to_string());
        let connections = Arc::new(AtomicU64::new(0));
        let bytes_received = Arc::new(AtomicU64::new(0));

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let conn_clone = Arc::clone(&connections);
        let bytes_clone = Arc::clone(&bytes_received);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, _)) => {
                                conn_clone.fetch_add(1, Ordering::Relaxed);
                                tokio::spawn(echo(stream, Arc::clone(&bytes_clone)));
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            endpoint,
            connections,
            bytes_received,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }
}

impl Drop for TcpEchoBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[allow(dead_code)]
pub struct UnixEchoBackend {
    pub endpoint: Endpoint,
    pub connections: Arc<AtomicU64>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl UnixEchoBackend {
    pub async fn spawn(path: &Path) -> io::Result<Self> {
        let listener = UnixListener::bind(path)?;
        let endpoint = Endpoint::new(Transport::Unix, path.display().to_string());
        let connections = Arc::new(AtomicU64::new(0));

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let conn_clone = Arc::clone(&connections);

        tokio::spawn(async move {
            let bytes = Arc::new(AtomicU64::new(0));
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, _)) => {
                                conn_clone.fetch_add(1, Ordering::Relaxed);
                                tokio::spawn(echo(stream, Arc::clone(&bytes)));
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            endpoint,
            connections,
            shutdown_tx: Some(shutdown_tx),
        })
    }
}

impl Drop for UnixEchoBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// A running forwarder inside the test process.
#[allow(dead_code)]
pub struct ForwarderHandle {
    /// Where clients connect.
    pub source: Endpoint,
    pub stats: Arc<Stats>,
    pub pool: Arc<BufferPool>,
    pub control: ControlHandler,
    accept_loop: JoinHandle<()>,
}

#[allow(dead_code)]
impl ForwarderHandle {
    pub async fn spawn(source: &Endpoint, destination: Endpoint) -> Result<Self, ForwardError> {
        let listener = Listener::bind(source).await?;
        let source = listener.local_endpoint()?;

        let stats = Arc::new(Stats::new());
        let pool = Arc::new(BufferPool::new());
        let forwarder = Arc::new(
            Forwarder::new(destination, Arc::clone(&pool), Arc::clone(&stats)).with_quiet(true),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_loop = tokio::spawn(listener.run(forwarder, shutdown_rx));
        let control = ControlHandler::new(Arc::clone(&stats), Arc::clone(&pool), shutdown_tx);

        Ok(Self {
            source,
            stats,
            pool,
            control,
            accept_loop,
        })
    }

    /// Forwarder listening on an ephemeral localhost TCP port.
    pub async fn spawn_tcp(destination: Endpoint) -> Result<Self, ForwardError> {
        Self::spawn(&Endpoint::new(Transport::Tcp, "127.0.0.1:0"), destination).await
    }

    pub async fn connect(&self) -> io::Result<Connection> {
        self.source.dial().await
    }

    /// Wait until the open-connection gauge reaches `expected`.
    pub async fn wait_for_current(&self, expected: i64) -> bool {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.stats.current() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Wait for the accept loop to exit after a shutdown command.
    pub async fn join(self) -> io::Result<()> {
        tokio::time::timeout(Duration::from_secs(2), self.accept_loop)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "accept loop still running"))?
            .map_err(io::Error::other)
    }
}

/// Send `payload`, collect as many bytes back, then close the connection.
///
/// Writing and reading run concurrently so payloads larger than the socket
/// buffers cannot stall against the echo.
#[allow(dead_code)]
pub async fn roundtrip(conn: Connection, payload: Vec<u8>) -> io::Result<Vec<u8>> {
    let (mut read_half, mut write_half) = conn.into_split();
    let len = payload.len();

    let writer = tokio::spawn(async move {
        write_half.write_all(&payload).await?;
        Ok::<_, io::Error>(write_half)
    });

    let mut received = vec![0u8; len];
    read_half.read_exact(&mut received).await?;
    let write_half = writer.await.map_err(io::Error::other)??;

    drop(write_half);
    drop(read_half);
    Ok(received)
}

#[allow(dead_code)]
pub fn socket_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}
