//! Host-side channel client
//!
//! Strict ping-pong: every request waits for exactly one response before the
//! next request may be written on the same connection.

use super::protocol::{ChannelConfig, ChannelMessage};
use super::transport::{self, BoxedStream, ChannelAddr};
use crate::error::EnclaveError;
use log::{debug, info};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// A connected client. Dropping it closes the connection.
pub struct ChannelClient {
    stream: BoxedStream,
    peer: ChannelAddr,
    config: ChannelConfig,
    buf: Vec<u8>,
    exchanges: u64,
}

impl ChannelClient {
    /// Dial the enclave, bounded by the configured connect timeout
    pub async fn connect(addr: ChannelAddr, config: &ChannelConfig) -> Result<Self, EnclaveError> {
        info!("Connecting to enclave via {}...", addr);
        let stream = transport::connect(&addr, config.connect_timeout).await?;
        info!("Connected to enclave at {}", addr);
        Ok(Self::from_stream(stream, addr, config))
    }

    /// Wrap an already established stream
    pub fn from_stream(stream: BoxedStream, peer: ChannelAddr, config: &ChannelConfig) -> Self {
        Self {
            stream,
            peer,
            config: config.clone(),
            buf: vec![0u8; config.response_buffer_size()],
            exchanges: 0,
        }
    }

    /// Write one request and read exactly one response
    ///
    /// An end-of-stream before any response byte is reported as an
    /// `UnexpectedEof` I/O error: the peer hung up mid-exchange. Empty or
    /// oversized requests are refused before anything is written.
    pub async fn request(
        &mut self,
        message: &ChannelMessage,
    ) -> Result<ChannelMessage, EnclaveError> {
        self.config.check_request(message)?;
        debug!("Sending {} bytes to {}", message.len(), self.peer);
        self.stream.write_all(message.as_bytes()).await?;
        self.stream.flush().await?;

        let n = self.stream.read(&mut self.buf).await?;
        if n == 0 {
            return Err(EnclaveError::ChannelIo(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{} closed the connection before responding", self.peer),
            )));
        }

        self.exchanges += 1;
        let response = ChannelMessage::new(&self.buf[..n]);
        debug!("Received {} bytes from {}", n, self.peer);
        Ok(response)
    }

    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    pub fn peer(&self) -> ChannelAddr {
        self.peer
    }

    /// Close the connection, flushing any pending writes
    pub async fn close(mut self) -> Result<(), EnclaveError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
