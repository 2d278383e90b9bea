//! Endpoint parsing and dialing.
//!
//! Endpoints are written as `scheme://address`, where the scheme is `tcp`
//! or `unix`:
//!
//! ```text
//! tcp://0.0.0.0:9000
//! unix:///run/app.sock
//! unix:/run/app.sock
//! ```

use std::fmt;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use nix::sys::socket::{shutdown, Shutdown};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{tcp, unix, TcpStream, UnixStream};

use crate::error::ForwardError;

const SCHEME_SEPARATOR: &str = "://";
const UNIX_PREFIX: &str = "unix:";

/// Socket transport of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Unix,
}

impl Transport {
    pub fn scheme(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Unix => "unix",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// A parsed listen or dial target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    transport: Transport,
    address: String,
}

impl Endpoint {
    /// Create an endpoint from already validated parts.
    pub fn new(transport: Transport, address: impl Into<String>) -> Self {
        Self {
            transport,
            address: address.into(),
        }
    }

    /// Parse an endpoint string.
    ///
    /// The input is split on the first `://`. A `unix` scheme yields a
    /// filesystem path (with any leading `unix:` stripped), a `tcp` scheme
    /// yields a `host:port`. The short `unix:/path` form is also accepted.
    pub fn parse(input: &str) -> Result<Self, ForwardError> {
        let (transport, address) = match input.split_once(SCHEME_SEPARATOR) {
            Some((scheme, rest)) => match scheme {
                "tcp" => (Transport::Tcp, rest),
                "unix" => (
                    Transport::Unix,
                    rest.strip_prefix(UNIX_PREFIX).unwrap_or(rest),
                ),
                _ => return Err(ForwardError::invalid_endpoint(input, "unknown scheme")),
            },
            None => match input.strip_prefix(UNIX_PREFIX) {
                Some(path) => (Transport::Unix, path),
                None => {
                    return Err(ForwardError::invalid_endpoint(
                        input,
                        "missing scheme separator",
                    ))
                }
            },
        };

        if address.is_empty() {
            return Err(ForwardError::invalid_endpoint(input, "empty address"));
        }

        Ok(Self::new(transport, address))
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// `host:port` for TCP, filesystem path for Unix.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Open a new connection to this endpoint.
    pub async fn dial(&self) -> io::Result<Connection> {
        match self.transport {
            Transport::Tcp => TcpStream::connect(self.address.as_str())
                .await
                .map(Connection::Tcp),
            Transport::Unix => UnixStream::connect(&self.address)
                .await
                .map(Connection::Unix),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.transport, SCHEME_SEPARATOR, self.address)
    }
}

impl FromStr for Endpoint {
    type Err = ForwardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A connected byte stream over either transport.
#[derive(Debug)]
pub enum Connection {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Connection {
    pub fn transport(&self) -> Transport {
        match self {
            Connection::Tcp(_) => Transport::Tcp,
            Connection::Unix(_) => Transport::Unix,
        }
    }

    /// Split into owned halves that can move to separate tasks.
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        match self {
            Connection::Tcp(stream) => {
                let (read, write) = stream.into_split();
                (ConnectionReader::Tcp(read), ConnectionWriter::Tcp(write))
            }
            Connection::Unix(stream) => {
                let (read, write) = stream.into_split();
                (ConnectionReader::Unix(read), ConnectionWriter::Unix(write))
            }
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Connection::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Connection::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Connection::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Connection::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Read half of a [`Connection`].
#[derive(Debug)]
pub enum ConnectionReader {
    Tcp(tcp::OwnedReadHalf),
    Unix(unix::OwnedReadHalf),
}

/// Write half of a [`Connection`].
#[derive(Debug)]
pub enum ConnectionWriter {
    Tcp(tcp::OwnedWriteHalf),
    Unix(unix::OwnedWriteHalf),
}

impl ConnectionWriter {
    /// Shut the whole socket down in both directions.
    ///
    /// Unlike dropping a half, this reaches the socket itself: a task
    /// blocked reading the matching [`ConnectionReader`] sees EOF and the
    /// peer sees the connection end.
    pub fn close(&self) -> io::Result<()> {
        shutdown(self.as_raw_fd(), Shutdown::Both).map_err(io::Error::from)
    }
}

impl AsRawFd for ConnectionWriter {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            ConnectionWriter::Tcp(half) => half.as_ref().as_raw_fd(),
            ConnectionWriter::Unix(half) => half.as_ref().as_raw_fd(),
        }
    }
}

impl AsyncRead for ConnectionReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnectionReader::Tcp(half) => Pin::new(half).poll_read(cx, buf),
            ConnectionReader::Unix(half) => Pin::new(half).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnectionWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ConnectionWriter::Tcp(half) => Pin::new(half).poll_write(cx, buf),
            ConnectionWriter::Unix(half) => Pin::new(half).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnectionWriter::Tcp(half) => Pin::new(half).poll_flush(cx),
            ConnectionWriter::Unix(half) => Pin::new(half).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnectionWriter::Tcp(half) => Pin::new(half).poll_shutdown(cx),
            ConnectionWriter::Unix(half) => Pin::new(half).poll_shutdown(cx),
        }
    }
}
