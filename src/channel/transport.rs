//! Channel transport — addressing, listening and dialing
//!
//! Production traffic uses the hypervisor socket family (`vsock:<cid>:<port>`).
//! A loopback TCP fallback (`tcp:<host>:<port>`) runs the same protocol for
//! development and tests on machines without enclave support.

use crate::error::EnclaveError;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

/// Wildcard CID used when binding inside the enclave
pub const VSOCK_CID_ANY: u32 = u32::MAX;

/// A bidirectional byte stream carrying channel traffic
pub trait ChannelStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ChannelStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedStream = Box<dyn ChannelStream>;

/// Where a channel endpoint lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAddr {
    Vsock { cid: u32, port: u32 },
    Tcp(SocketAddr),
}

impl ChannelAddr {
    pub fn vsock(cid: u32, port: u32) -> Self {
        ChannelAddr::Vsock { cid, port }
    }

    /// Same address family and port, different enclave CID
    ///
    /// TCP addresses are returned unchanged.
    pub fn with_cid(self, cid: u32) -> Self {
        match self {
            ChannelAddr::Vsock { port, .. } => ChannelAddr::Vsock { cid, port },
            tcp => tcp,
        }
    }
}

impl fmt::Display for ChannelAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelAddr::Vsock { cid, port } if *cid == VSOCK_CID_ANY => {
                write!(f, "vsock:any:{}", port)
            }
            ChannelAddr::Vsock { cid, port } => write!(f, "vsock:{}:{}", cid, port),
            ChannelAddr::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

impl FromStr for ChannelAddr {
    type Err = EnclaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |why: &str| EnclaveError::Config(format!("invalid channel address '{}': {}", s, why));

        let (scheme, rest) = s.split_once(':').ok_or_else(|| bad("missing scheme"))?;
        match scheme {
            "vsock" => {
                let (cid, port) = rest
                    .split_once(':')
                    .ok_or_else(|| bad("expected vsock:<cid>:<port>"))?;
                let cid = match cid {
                    "any" => VSOCK_CID_ANY,
                    n => n.parse().map_err(|_| bad("cid is not a number"))?,
                };
                let port = port.parse().map_err(|_| bad("port is not a number"))?;
                Ok(ChannelAddr::Vsock { cid, port })
            }
            "tcp" => rest
                .parse()
                .map(ChannelAddr::Tcp)
                .map_err(|_| bad("expected tcp:<ip>:<port>")),
            _ => Err(bad("scheme must be vsock or tcp")),
        }
    }
}

/// Accepting side of the channel
pub enum ChannelListener {
    #[cfg(target_os = "linux")]
    Vsock(tokio_vsock::VsockListener),
    Tcp(TcpListener),
}

impl ChannelListener {
    pub async fn bind(addr: &ChannelAddr) -> io::Result<Self> {
        match *addr {
            #[cfg(target_os = "linux")]
            ChannelAddr::Vsock { cid, port } => {
                let listener =
                    tokio_vsock::VsockListener::bind(tokio_vsock::VsockAddr::new(cid, port))?;
                Ok(ChannelListener::Vsock(listener))
            }
            #[cfg(not(target_os = "linux"))]
            ChannelAddr::Vsock { .. } => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "vsock is only available on Linux",
            )),
            ChannelAddr::Tcp(sock) => Ok(ChannelListener::Tcp(TcpListener::bind(sock).await?)),
        }
    }

    pub fn local_addr(&self) -> io::Result<ChannelAddr> {
        match self {
            #[cfg(target_os = "linux")]
            ChannelListener::Vsock(l) => {
                let addr = l.local_addr()?;
                Ok(ChannelAddr::Vsock {
                    cid: addr.cid(),
                    port: addr.port(),
                })
            }
            ChannelListener::Tcp(l) => Ok(ChannelAddr::Tcp(l.local_addr()?)),
        }
    }

    /// Wait for the next connection; returns the stream and a printable peer
    pub async fn accept(&mut self) -> io::Result<(BoxedStream, String)> {
        match self {
            #[cfg(target_os = "linux")]
            ChannelListener::Vsock(l) => {
                let (stream, peer) = l.accept().await?;
                Ok((
                    Box::new(stream) as BoxedStream,
                    format!("vsock:{}:{}", peer.cid(), peer.port()),
                ))
            }
            ChannelListener::Tcp(l) => {
                let (stream, peer) = l.accept().await?;
                Ok((Box::new(stream) as BoxedStream, format!("tcp:{}", peer)))
            }
        }
    }
}

/// Bound an in-flight dial by `timeout`
///
/// Exceeding the bound is a definite failure, never a retry trigger.
pub async fn with_connect_timeout<F>(
    addr: &ChannelAddr,
    timeout: Duration,
    dial: F,
) -> Result<BoxedStream, EnclaveError>
where
    F: Future<Output = io::Result<BoxedStream>>,
{
    match tokio::time::timeout(timeout, dial).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(EnclaveError::ChannelConnect {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(EnclaveError::ConnectTimeout {
            addr: addr.to_string(),
            timeout,
        }),
    }
}

async fn dial(addr: ChannelAddr) -> io::Result<BoxedStream> {
    match addr {
        #[cfg(target_os = "linux")]
        ChannelAddr::Vsock { cid, port } => {
            let stream =
                tokio_vsock::VsockStream::connect(tokio_vsock::VsockAddr::new(cid, port)).await?;
            Ok(Box::new(stream) as BoxedStream)
        }
        #[cfg(not(target_os = "linux"))]
        ChannelAddr::Vsock { .. } => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "vsock is only available on Linux",
        )),
        ChannelAddr::Tcp(sock) => {
            let stream = TcpStream::connect(sock).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as BoxedStream)
        }
    }
}

/// Dial `addr`, giving up after `timeout`
pub async fn connect(addr: &ChannelAddr, timeout: Duration) -> Result<BoxedStream, EnclaveError> {
    with_connect_timeout(addr, timeout, dial(*addr)).await
}
