use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{io, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream},
    net::TcpStream,
    sync::mpsc,
};
use tracing::warn;

/// Byte stream handed out by a connected transport.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedIo = Box<dyn AsyncStream>;

/// Raw byte-stream transport.
///
/// Framing (peek the header, wait for a full frame, read exactly that
/// many bytes) happens on top of the returned stream.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> io::Result<BoxedIo>;

    /// Human readable endpoint, used in log fields.
    fn describe(&self) -> String;
}

/// TCP transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpTransportConfig {
    pub host: String,
    #[serde(default = "TcpTransportConfig::default_port")]
    pub port: u16,
    #[serde(default = "TcpTransportConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// TCP_NODELAY option. Defaults to true for low-latency small PDUs
    #[serde(default = "TcpTransportConfig::default_tcp_nodelay")]
    pub tcp_nodelay: bool,
}

impl TcpTransportConfig {
    fn default_port() -> u16 {
        102
    }

    fn default_connect_timeout_ms() -> u64 {
        10_000
    }

    fn default_tcp_nodelay() -> bool {
        true
    }
}

/// Plain TCP transport (ISO-on-TCP runs on port 102).
#[derive(Debug, Clone)]
pub struct TcpTransport {
    config: TcpTransportConfig,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        Self { config }
    }

    pub fn from_host(host: impl Into<String>, port: u16) -> Self {
        Self::new(TcpTransportConfig {
            host: host.into(),
            port,
            connect_timeout_ms: TcpTransportConfig::default_connect_timeout_ms(),
            tcp_nodelay: TcpTransportConfig::default_tcp_nodelay(),
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> io::Result<BoxedIo> {
        let addr = (self.config.host.as_str(), self.config.port);
        let stream = tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            TcpStream::connect(addr),
        )
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))??;
        if let Err(e) = stream.set_nodelay(self.config.tcp_nodelay) {
            warn!(endpoint = %self.describe(), error = %e, "failed to set TCP_NODELAY");
        }
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("tcp://{}:{}", self.config.host, self.config.port)
    }
}

/// In-memory transport for simulators and tests.
///
/// Every `connect` creates a fresh duplex pipe and hands the peer half to
/// the paired [`DuplexAcceptor`].
#[derive(Debug)]
pub struct DuplexTransport {
    capacity: usize,
    peers: mpsc::UnboundedSender<DuplexStream>,
}

/// Server side of a [`DuplexTransport`].
#[derive(Debug)]
pub struct DuplexAcceptor {
    peers: mpsc::UnboundedReceiver<DuplexStream>,
}

impl DuplexTransport {
    pub fn new(capacity: usize) -> (Self, DuplexAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                capacity,
                peers: tx,
            },
            DuplexAcceptor { peers: rx },
        )
    }
}

impl DuplexAcceptor {
    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        self.peers.recv().await
    }
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn connect(&self) -> io::Result<BoxedIo> {
        let (client, server) = tokio::io::duplex(self.capacity);
        self.peers
            .send(server)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "no acceptor"))?;
        Ok(Box::new(client))
    }

    fn describe(&self) -> String {
        "duplex://memory".to_string()
    }
}
