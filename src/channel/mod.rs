//! Enclave channel — request/response messaging over a virtual socket
//!
//! - **Protocol**: message unit, defaults, and the server-side processing hook
//! - **Transport**: vsock (or loopback TCP) addressing, listen and dial
//! - **Client**: host-side strict ping-pong requests
//! - **Server**: enclave-side accept loop with one task per connection

pub mod client;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::ChannelClient;
pub use protocol::{
    strip_marker, ChannelConfig, ChannelMessage, RequestProcessor, SigningMarker,
    DEFAULT_CHANNEL_PORT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_ENCLAVE_CID, DEFAULT_MAX_MESSAGE_SIZE,
    PROCESSED_MARKER,
};
pub use server::{handle_connection, ChannelServer, SessionSummary};
pub use transport::{
    connect, with_connect_timeout, BoxedStream, ChannelAddr, ChannelListener, ChannelStream,
    VSOCK_CID_ANY,
};
