//! Enclave-side channel server
//!
//! The accept loop spawns one task per connection. Handlers share nothing
//! mutable: each owns its stream for its whole lifetime, and the processor is
//! shared read-only. There is no cap on concurrent connections.

use super::protocol::{ChannelConfig, RequestProcessor, SigningMarker};
use super::transport::{ChannelAddr, ChannelListener};
use crate::error::EnclaveError;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// How a connection handler finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Requests answered before the peer closed
    pub exchanges: u64,
}

/// Serve one connection: read a request, process it, write one response, repeat
///
/// A clean end-of-stream ends the session without error. Any other read or
/// write failure is logged and returned. The stream is shut down and dropped
/// exactly once on every path.
pub async fn handle_connection<S, P>(
    mut stream: S,
    processor: &P,
    max_message_size: usize,
    conn_id: &str,
) -> Result<SessionSummary, EnclaveError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: RequestProcessor + ?Sized,
{
    let result = serve_session(&mut stream, processor, max_message_size, conn_id).await;

    info!("[{}] Closing client connection.", conn_id);
    if let Err(e) = stream.shutdown().await {
        // Peer may already be gone; the stream is released on drop regardless
        warn!("[{}] shutdown failed: {}", conn_id, e);
    }

    result
}

async fn serve_session<S, P>(
    stream: &mut S,
    processor: &P,
    max_message_size: usize,
    conn_id: &str,
) -> Result<SessionSummary, EnclaveError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: RequestProcessor + ?Sized,
{
    let mut buf = vec![0u8; max_message_size];
    let mut exchanges = 0u64;

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => return Ok(SessionSummary { exchanges }),
            Ok(n) => n,
            Err(e) => {
                error!("[{}] failed to read from connection: {}", conn_id, e);
                return Err(EnclaveError::ChannelIo(e));
            }
        };

        let request = &buf[..n];
        info!(
            "[{}] Received message: {}",
            conn_id,
            String::from_utf8_lossy(request)
        );

        let response = processor.process(request);
        info!(
            "[{}] Sending response: {}",
            conn_id,
            String::from_utf8_lossy(&response)
        );

        if let Err(e) = stream.write_all(&response).await {
            error!("[{}] failed to write to connection: {}", conn_id, e);
            return Err(EnclaveError::ChannelIo(e));
        }
        exchanges += 1;
    }
}

/// Accepts connections and runs a handler task for each
pub struct ChannelServer {
    config: ChannelConfig,
    processor: Arc<dyn RequestProcessor>,
}

impl ChannelServer {
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_processor(config, SigningMarker)
    }

    pub fn with_processor(config: ChannelConfig, processor: impl RequestProcessor) -> Self {
        Self {
            config,
            processor: Arc::new(processor),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Bind a listener on `addr`
    pub async fn bind(addr: &ChannelAddr) -> Result<ChannelListener, EnclaveError> {
        let listener = ChannelListener::bind(addr).await.map_err(|source| {
            EnclaveError::ChannelConnect {
                addr: addr.to_string(),
                source,
            }
        })?;
        match listener.local_addr() {
            Ok(local) => info!("Listening on {}", local),
            Err(_) => info!("Listening on {}", addr),
        }
        Ok(listener)
    }

    /// Run the accept loop forever
    ///
    /// Accept failures are logged and the loop continues.
    pub async fn serve(&self, mut listener: ChannelListener) {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                    continue;
                }
            };

            let conn_id = uuid::Uuid::new_v4().to_string();
            info!("[{}] Accepted connection from: {}", conn_id, peer);

            let processor = Arc::clone(&self.processor);
            let max = self.config.max_message_size;
            tokio::spawn(async move {
                // Failures are already logged inside the handler
                if let Ok(summary) =
                    handle_connection(stream, processor.as_ref(), max, &conn_id).await
                {
                    info!(
                        "[{}] Session ended after {} exchange(s)",
                        conn_id, summary.exchanges
                    );
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::client::ChannelClient;
    use crate::channel::protocol::{ChannelMessage, PROCESSED_MARKER};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{duplex, ReadBuf};

    async fn spawn_server() -> (ChannelAddr, ChannelConfig) {
        let config = ChannelConfig {
            connect_timeout: Duration::from_secs(2),
            ..ChannelConfig::default()
        };
        let listener = ChannelServer::bind(&"tcp:127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ChannelServer::new(config.clone());
        tokio::spawn(async move { server.serve(listener).await });
        (addr, config)
    }

    /// A stream whose reads always fail with a transport fault
    struct FaultyStream {
        shutdowns: usize,
    }

    impl AsyncRead for FaultyStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "injected fault",
            )))
        }
    }

    impl AsyncWrite for FaultyStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.shutdowns += 1;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_handler_answers_until_peer_closes() {
        let (mut client, server_end) = duplex(4096);
        let handler = tokio::spawn(async move {
            handle_connection(server_end, &SigningMarker, 1024, "test").await
        });

        for msg in [b"one".as_slice(), b"two".as_slice(), b"three".as_slice()] {
            client.write_all(msg).await.unwrap();
            let mut buf = [0u8; 64];
            let n = client.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], SigningMarker.process(msg).as_slice());
        }
        drop(client);

        let summary = handler.await.unwrap().unwrap();
        assert_eq!(summary.exchanges, 3);
    }

    #[tokio::test]
    async fn test_close_while_blocked_on_read_is_clean() {
        let (client, server_end) = duplex(4096);
        let handler = tokio::spawn(async move {
            handle_connection(server_end, &SigningMarker, 1024, "idle").await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(client);

        let summary = handler.await.unwrap().expect("clean close must not be an error");
        assert_eq!(summary.exchanges, 0);
    }

    #[tokio::test]
    async fn test_io_fault_is_reported_and_stream_closed_once() {
        let mut stream = FaultyStream { shutdowns: 0 };
        let err = handle_connection(&mut stream, &SigningMarker, 1024, "faulty")
            .await
            .unwrap_err();
        assert!(matches!(err, EnclaveError::ChannelIo(_)));
        assert_eq!(stream.shutdowns, 1);
    }

    #[tokio::test]
    async fn test_ping_then_ping2_on_same_connection() {
        let (addr, config) = spawn_server().await;
        let mut client = ChannelClient::connect(addr, &config).await.unwrap();

        let first = client.request(&ChannelMessage::from("ping")).await.unwrap();
        let second = client.request(&ChannelMessage::from("ping2")).await.unwrap();

        assert!(first.to_text().contains("ping"));
        assert!(first.as_bytes().starts_with(PROCESSED_MARKER));
        assert!(second.to_text().contains("ping2"));
        assert_ne!(first, second);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_deterministic_for_arbitrary_payloads() {
        let (addr, config) = spawn_server().await;
        let mut client = ChannelClient::connect(addr, &config).await.unwrap();

        let payloads: Vec<Vec<u8>> = vec![
            vec![0u8],
            (0..=255u8).collect(),
            vec![0xAB; 512],
            (0..config.max_message_size).map(|i| (i % 251) as u8).collect(),
        ];

        for payload in payloads {
            for _ in 0..2 {
                let response = client.request(&ChannelMessage::new(payload.clone())).await.unwrap();
                assert_eq!(response.into_bytes(), SigningMarker.process(&payload));
            }
        }
    }

    #[tokio::test]
    async fn test_many_concurrent_connections_without_crosstalk() {
        let (addr, config) = spawn_server().await;

        let clients = (0..64).map(|i| {
            let config = config.clone();
            async move {
                let mut client = ChannelClient::connect(addr, &config).await.unwrap();
                let mut responses = Vec::new();
                for round in 0..3 {
                    let msg = ChannelMessage::from(format!("client-{}-round-{}", i, round));
                    let response = client.request(&msg).await.unwrap();
                    responses.push((msg, response));
                }
                responses
            }
        });

        for responses in futures::future::join_all(clients).await {
            for (msg, response) in responses {
                assert_eq!(response.into_bytes(), SigningMarker.process(msg.as_bytes()));
            }
        }
    }

    #[tokio::test]
    async fn test_custom_processor() {
        let config = ChannelConfig::default();
        let listener = ChannelServer::bind(&"tcp:127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ChannelServer::with_processor(config.clone(), |req: &[u8]| -> Vec<u8> {
            req.iter().rev().copied().collect()
        });
        tokio::spawn(async move { server.serve(listener).await });

        let mut client = ChannelClient::connect(addr, &config).await.unwrap();
        let response = client.request(&ChannelMessage::from("abc")).await.unwrap();
        assert_eq!(response.as_bytes(), b"cba");
    }
}
