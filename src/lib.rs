//! Enclave host — launch, attest and talk to a hardware-isolated enclave
//!
//! The host launches an enclave through an external control tool, checks its
//! attestation measurements against an expected policy, exchanges
//! request/response messages with it over a virtual socket, and always tears
//! it down afterwards. The enclave side runs the matching channel server.

pub mod attestation;
pub mod channel;
pub mod config;
pub mod error;
pub mod lifecycle;

pub use attestation::{verify, AttestationDocument, ExpectedMeasurementPolicy};
pub use channel::{ChannelAddr, ChannelClient, ChannelConfig, ChannelMessage, ChannelServer};
pub use error::EnclaveError;
pub use lifecycle::{EnclaveControl, EnclaveStatus, LifecycleController, NitroCli};
