//! Channel protocol — request/response semantics shared by both roles
//!
//! One write is one logical message and one read is one logical message.
//! The transport is a byte stream, so boundaries are only preserved when each
//! side strictly alternates: write one request, read one response. Back-to-back
//! writes may be coalesced by the transport; callers must not pipeline.

use crate::error::EnclaveError;
use std::io;
use std::time::Duration;

/// Well-known channel port the enclave listens on
pub const DEFAULT_CHANNEL_PORT: u32 = 5000;

/// Maximum bytes accepted by a single read
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024;

/// Upper bound for dialing the enclave
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Canonical address of the first enclave launched on a host
pub const DEFAULT_ENCLAVE_CID: u32 = 3;

/// Prefix marking a payload as processed on the trusted side
pub const PROCESSED_MARKER: &[u8] = b"ENCLAVE_SIGNED:";

/// Per-component channel settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub max_message_size: usize,
    pub connect_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ChannelConfig {
    /// Read buffer large enough for a processed response to a max-size request
    pub fn response_buffer_size(&self) -> usize {
        self.max_message_size + PROCESSED_MARKER.len()
    }

    /// A request must be non-empty and fit in one read on the enclave side
    ///
    /// An empty write puts nothing on the wire, so the peer never answers; an
    /// oversized one is split across reads and answered in pieces.
    pub fn check_request(&self, message: &ChannelMessage) -> Result<(), EnclaveError> {
        if message.is_empty() {
            return Err(EnclaveError::ChannelIo(io::Error::new(
                io::ErrorKind::InvalidInput,
                "refusing to send an empty request",
            )));
        }
        if message.len() > self.max_message_size {
            return Err(EnclaveError::ChannelIo(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "request of {} bytes exceeds the {}-byte message limit",
                    message.len(),
                    self.max_message_size
                ),
            )));
        }
        Ok(())
    }
}

/// An opaque payload exchanged over the channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelMessage(Vec<u8>);

impl ChannelMessage {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self(payload.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lossy UTF-8 view, for logs
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl From<&str> for ChannelMessage {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for ChannelMessage {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<Vec<u8>> for ChannelMessage {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

/// Server-side processing applied to every request
///
/// Implementations must be deterministic and must not drop or reorder bytes
/// of the request. They are shared by all connection handlers, so they take
/// `&self` only.
pub trait RequestProcessor: Send + Sync + 'static {
    fn process(&self, request: &[u8]) -> Vec<u8>;
}

/// Stand-in for a sensitive operation: prefixes the request with a fixed marker
#[derive(Debug, Clone, Copy, Default)]
pub struct SigningMarker;

impl RequestProcessor for SigningMarker {
    fn process(&self, request: &[u8]) -> Vec<u8> {
        let mut response = Vec::with_capacity(PROCESSED_MARKER.len() + request.len());
        response.extend_from_slice(PROCESSED_MARKER);
        response.extend_from_slice(request);
        response
    }
}

impl<F> RequestProcessor for F
where
    F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
{
    fn process(&self, request: &[u8]) -> Vec<u8> {
        self(request)
    }
}

/// Strip the processed marker from a response, if present
pub fn strip_marker(response: &[u8]) -> Option<&[u8]> {
    response.strip_prefix(PROCESSED_MARKER)
}
