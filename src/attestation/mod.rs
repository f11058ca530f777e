//! Attestation — decide whether a launched enclave booted the expected code
//!
//! - **Document**: named measurement digests retrieved from the enclave
//! - **Verifier**: exact comparison against the operator's expected policy

pub mod document;
pub mod verifier;

pub use document::{AttestationDocument, ExpectedMeasurementPolicy, PCR0};
pub use verifier::{evaluate, verify, AttestationVerdict};
