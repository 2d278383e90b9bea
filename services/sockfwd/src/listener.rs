//! Source listener and accept loop.
//!
//! The listener binds the source endpoint once at startup. Its accept loop
//! hands every accepted connection to a spawned forwarder task and goes
//! straight back to accepting; it stops only when shutdown is signalled.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use crate::endpoint::{Connection, Endpoint, Transport};
use crate::error::ForwardError;
use crate::forward::Forwarder;

enum Socket {
    Tcp(TcpListener),
    Unix {
        listener: UnixListener,
        path: PathBuf,
        /// Accepts so far, used to label unnamed peers.
        accepted: AtomicU64,
    },
}

/// A bound source endpoint.
pub struct Listener {
    endpoint: Endpoint,
    socket: Socket,
}

impl Listener {
    /// Bind the source endpoint.
    ///
    /// Fails if the port is taken, the socket path already exists, or the
    /// caller lacks permission.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, ForwardError> {
        let bind_error = |source: io::Error| ForwardError::Bind {
            endpoint: endpoint.to_string(),
            source,
        };

        let socket = match endpoint.transport() {
            Transport::Tcp => Socket::Tcp(
                TcpListener::bind(endpoint.address())
                    .await
                    .map_err(bind_error)?,
            ),
            Transport::Unix => {
                let path = PathBuf::from(endpoint.address());
                Socket::Unix {
                    listener: UnixListener::bind(&path).map_err(bind_error)?,
                    path,
                    accepted: AtomicU64::new(0),
                }
            }
        };

        let listener = Self {
            endpoint: endpoint.clone(),
            socket,
        };
        debug!(endpoint = %listener.local_endpoint()?, "Listener bound");
        Ok(listener)
    }

    /// The endpoint this listener is actually bound to.
    ///
    /// For TCP this carries the OS-assigned port when bound to port 0.
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        match &self.socket {
            Socket::Tcp(listener) => Ok(Endpoint::new(
                Transport::Tcp,
                listener.local_addr()?.to_string(),
            )),
            Socket::Unix { .. } => Ok(self.endpoint.clone()),
        }
    }

    /// Accept the next connection.
    ///
    /// Returns the connection and a printable peer label.
    pub async fn accept(&self) -> io::Result<(Connection, String)> {
        match &self.socket {
            Socket::Tcp(listener) => {
                let (stream, peer_addr) = listener.accept().await?;
                Ok((Connection::Tcp(stream), peer_addr.to_string()))
            }
            Socket::Unix {
                listener,
                path,
                accepted,
            } => {
                let (stream, peer_addr) = listener.accept().await?;
                let seq = accepted.fetch_add(1, Ordering::Relaxed) + 1;
                // Unix peers are almost always unnamed.
                let peer = match peer_addr.as_pathname() {
                    Some(peer_path) => peer_path.display().to_string(),
                    None => format!("{}#{}", path.display(), seq),
                };
                Ok((Connection::Unix(stream), peer))
            }
        }
    }

    /// Run the accept loop until `shutdown` becomes `true`.
    ///
    /// Accept errors are logged and the loop continues immediately. The
    /// listening socket is closed when this returns.
    pub async fn run(self, forwarder: Arc<Forwarder>, mut shutdown: watch::Receiver<bool>) {
        info!(
            source = %self.endpoint,
            destination = %forwarder.destination(),
            "listening on {} and forwarding to {}",
            self.endpoint,
            forwarder.destination()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                accepted = self.accept() => match accepted {
                    Ok((conn, peer)) => {
                        let forwarder = Arc::clone(&forwarder);
                        tokio::spawn(
                            forwarder
                                .handle(conn)
                                .instrument(tracing::info_span!("connection", peer = %peer)),
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("Shutdown sender dropped, stopping listener");
                        break;
                    }
                }
            }
        }

        info!(source = %self.endpoint, "Listener closed");
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Socket::Unix { path, .. } = &self.socket {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to remove socket file");
                }
            }
        }
    }
}
