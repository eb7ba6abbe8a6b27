//! Channel to a companion process and per-call framed connections.
//!
//! A [`Channel`] is the addressable link to one companion. Every RPC call
//! opens its own [`Connection`], sends the [`Call`] opener, and then
//! exchanges frames until the companion's trailer.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use handset_proto::{Call, ClientFrame, Request, Response, ServerFrame};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Connect timeout for TCP endpoints.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Monotonic counter for channel generation numbers.
static CHANNEL_SEQ: AtomicU64 = AtomicU64::new(1);

/// Address a companion listens on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[non_exhaustive]
pub enum Endpoint {
    /// Unix domain socket path.
    #[cfg(unix)]
    Unix(PathBuf),
    /// TCP address.
    Tcp(SocketAddr),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "{addr}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = String;

    /// Parses `unix:/path/to.sock` or `host:port`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            #[cfg(unix)]
            return Ok(Self::Unix(PathBuf::from(path)));
            #[cfg(not(unix))]
            return Err(format!("unix sockets are not supported here: {path}"));
        }
        let addr = s.strip_prefix("tcp://").unwrap_or(s);
        addr.to_socket_addrs()
            .map_err(|e| format!("invalid endpoint '{s}': {e}"))?
            .next()
            .map(Self::Tcp)
            .ok_or_else(|| format!("endpoint '{s}' resolved to no address"))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Endpoint> for String {
    fn from(e: Endpoint) -> Self {
        e.to_string()
    }
}

/// The live link to a companion process.
///
/// Cloning shares the shut-down flag, so a clone observes [`stop`] on the
/// original. A restart never mutates a channel; it produces a new one.
///
/// [`stop`]: crate::CompanionRunner::stop
#[derive(Debug, Clone)]
pub struct Channel {
    /// Where the companion listens.
    endpoint: Endpoint,
    /// Generation number, unique per process.
    id: u64,
    /// Set once the channel has been released.
    shutdown: Arc<AtomicBool>,
}

impl Channel {
    /// Creates an open channel to `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            id: CHANNEL_SEQ.fetch_add(1, Ordering::Relaxed),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The companion's address.
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Generation number of this channel.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns `true` once the channel has been released.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Marks the channel released. Returns `false` if it already was.
    pub fn shutdown(&self) -> bool {
        !self.shutdown.swap(true, Ordering::SeqCst)
    }

    /// Opens a connection and sends the call opener.
    pub(crate) fn open(&self, call: &Call) -> Result<Connection> {
        if self.is_shutdown() {
            return Err(Error::transport(format!(
                "channel {} to {} is shut down",
                self.id, self.endpoint
            )));
        }
        tracing::debug!(channel = self.id, method = call.method(), "open call");
        let mut conn = Connection {
            stream: Stream::connect(&self.endpoint).map_err(Error::Transport)?,
        };
        write_frame(&mut conn.stream, call)?;
        Ok(conn)
    }

    /// Performs a unary call.
    pub(crate) fn unary(&self, req: Request) -> Result<Response> {
        let mut conn = self.open(&Call::Unary(req))?;
        let resp = match conn.recv::<Response>()? {
            ServerFrame::Msg(resp) => resp,
            ServerFrame::Trailer(status) if status.is_ok() => {
                return Err(Error::Protocol("unary call ended without a response".into()));
            }
            ServerFrame::Trailer(status) => return Err(Error::from_status(status)),
        };
        conn.finish::<Response>()?;
        Ok(resp)
    }

    /// Performs a unary call that must answer [`Response::Ok`].
    pub(crate) fn unary_ok(&self, req: Request) -> Result<()> {
        match self.unary(req)? {
            Response::Ok => Ok(()),
            other => Err(Error::Protocol(format!("expected Ok, got {other:?}"))),
        }
    }
}

/// Byte stream to the companion.
#[derive(Debug)]
pub(crate) enum Stream {
    /// Unix domain socket.
    #[cfg(unix)]
    Unix(UnixStream),
    /// TCP socket.
    Tcp(TcpStream),
}

impl Stream {
    /// Connects to `endpoint`.
    fn connect(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => UnixStream::connect(path).map(Self::Unix),
            Endpoint::Tcp(addr) => {
                let s = TcpStream::connect_timeout(addr, CONNECT_TIMEOUT)?;
                s.set_nodelay(true)?;
                Ok(Self::Tcp(s))
            }
        }
    }

    /// Clones the handle so reading and writing can happen on two threads.
    pub(crate) fn try_clone(&self) -> io::Result<Self> {
        match self {
            #[cfg(unix)]
            Self::Unix(s) => s.try_clone().map(Self::Unix),
            Self::Tcp(s) => s.try_clone().map(Self::Tcp),
        }
    }

    /// Closes both directions, unblocking any reader.
    pub(crate) fn shutdown(&self) {
        let _ = match self {
            #[cfg(unix)]
            Self::Unix(s) => s.shutdown(Shutdown::Both),
            Self::Tcp(s) => s.shutdown(Shutdown::Both),
        };
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            #[cfg(unix)]
            Self::Unix(s) => s.read(buf),
            Self::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            #[cfg(unix)]
            Self::Unix(s) => s.write(buf),
            Self::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            Self::Unix(s) => s.flush(),
            Self::Tcp(s) => s.flush(),
        }
    }
}

/// Writes one frame. A message that cannot be encoded is a local protocol
/// error; anything else is the connection failing.
fn write_frame<W: Write>(w: &mut W, msg: &impl Serialize) -> Result<()> {
    handset_proto::encode(w, msg).map_err(|e| match e.kind() {
        io::ErrorKind::InvalidData => Error::Protocol(format!("cannot encode frame: {e}")),
        _ => Error::Transport(e),
    })
}

/// One framed RPC call in progress.
#[derive(Debug)]
pub(crate) struct Connection {
    /// The underlying socket.
    stream: Stream,
}

impl Connection {
    /// Sends one request message.
    pub(crate) fn send<T: Serialize>(&mut self, msg: T) -> Result<()> {
        write_frame(&mut self.stream, &ClientFrame::Msg(msg))
    }

    /// Half-closes the request side of the call.
    pub(crate) fn close_send<T: Serialize>(&mut self) -> Result<()> {
        write_frame(&mut self.stream, &ClientFrame::<T>::Close)
    }

    /// Receives one frame. End of stream before a trailer is a transport failure.
    pub(crate) fn recv<T: DeserializeOwned>(&mut self) -> Result<ServerFrame<T>> {
        handset_proto::decode(&mut self.stream).map_err(Error::Transport)
    }

    /// Drains messages until the trailer and converts it into a result.
    pub(crate) fn finish<T: DeserializeOwned>(&mut self) -> Result<()> {
        loop {
            match self.recv::<T>()? {
                ServerFrame::Msg(_) => {}
                ServerFrame::Trailer(status) if status.is_ok() => return Ok(()),
                ServerFrame::Trailer(status) => return Err(Error::from_status(status)),
            }
        }
    }

    /// Splits into a request writer and a response reader.
    pub(crate) fn split(self) -> Result<(Self, Self)> {
        let reader = self.stream.try_clone().map_err(Error::Transport)?;
        Ok((self, Self { stream: reader }))
    }

    /// Aborts the call in both directions.
    pub(crate) fn abort(&self) {
        self.stream.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_endpoint() {
        let e: Endpoint = "127.0.0.1:10882".parse().unwrap();
        assert_eq!(e, Endpoint::Tcp("127.0.0.1:10882".parse().unwrap()));
        let e: Endpoint = "tcp://127.0.0.1:9000".parse().unwrap();
        assert_eq!(e.to_string(), "127.0.0.1:9000");
    }

    #[cfg(unix)]
    #[test]
    fn parses_unix_endpoint() {
        let e: Endpoint = "unix:/tmp/companion.sock".parse().unwrap();
        assert_eq!(e, Endpoint::Unix(PathBuf::from("/tmp/companion.sock")));
        assert_eq!(e.to_string(), "unix:/tmp/companion.sock");
    }

    #[test]
    fn rejects_garbage_endpoint() {
        assert!("not an endpoint".parse::<Endpoint>().is_err());
    }

    #[test]
    fn shutdown_is_idempotent_and_shared() {
        let ch = Channel::new("127.0.0.1:1".parse().unwrap());
        let clone = ch.clone();
        assert!(!clone.is_shutdown());
        assert!(ch.shutdown());
        assert!(!ch.shutdown());
        assert!(clone.is_shutdown());
    }

    #[test]
    fn shut_down_channel_refuses_calls_as_transport_failure() {
        let ch = Channel::new("127.0.0.1:1".parse().unwrap());
        ch.shutdown();
        let err = ch.unary(Request::Ping).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn oversized_frame_is_local_error() {
        let mut out = Vec::new();
        let chunk = vec![0u8; handset_proto::MAX_FRAME as usize + 1];
        let err = write_frame(&mut out, &ClientFrame::Msg(chunk)).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "{err:?}");
        assert!(!err.is_transport());
        assert!(out.is_empty());
    }

    #[test]
    fn write_failure_is_transport_error() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::ErrorKind::BrokenPipe.into())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let err = write_frame(&mut Broken, &ClientFrame::<u8>::Close).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn channels_get_distinct_ids() {
        let a = Channel::new("127.0.0.1:1".parse().unwrap());
        let b = Channel::new("127.0.0.1:1".parse().unwrap());
        assert_ne!(a.id(), b.id());
    }
}
