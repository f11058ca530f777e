//! Error taxonomy for the enclave lifecycle
//!
//! Every fatal failure names the stage it happened in, so an operator can tell
//! a launch failure from a trust failure from a transport failure at a glance.

use crate::lifecycle::EnclaveStatus;
use std::time::Duration;

/// Errors raised while launching, attesting, talking to or tearing down an enclave
#[derive(Debug, thiserror::Error)]
pub enum EnclaveError {
    /// The control interface did not produce a running instance
    #[error("launch failed: {0}")]
    Launch(String),

    /// No attestation document could be obtained
    #[error("attestation document retrieval failed: {0}")]
    AttestationRetrieval(String),

    /// A document was obtained but does not match the expected policy
    #[error("attestation verification failed: {0}")]
    AttestationMismatch(String),

    #[error("failed to connect to {addr}: {source}")]
    ChannelConnect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// A read or write on an established connection failed
    #[error("channel I/O failed: {0}")]
    ChannelIo(#[from] std::io::Error),

    /// Best-effort cleanup failed
    #[error("termination failed: {0}")]
    Termination(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: EnclaveStatus,
        to: EnclaveStatus,
    },
}

impl EnclaveError {
    /// Stable name of the lifecycle stage this error belongs to
    pub fn stage(&self) -> &'static str {
        match self {
            EnclaveError::Launch(_) => "launch",
            EnclaveError::AttestationRetrieval(_) => "attestation",
            EnclaveError::AttestationMismatch(_) => "verification",
            EnclaveError::ChannelConnect { .. } | EnclaveError::ConnectTimeout { .. } => "connect",
            EnclaveError::ChannelIo(_) => "exchange",
            EnclaveError::Termination(_) => "terminate",
            EnclaveError::Config(_) => "config",
            EnclaveError::InvalidTransition { .. } => "state",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, EnclaveError::ConnectTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, EnclaveError>;
