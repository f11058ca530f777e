//! Enclave lifecycle — launch, attest, communicate, tear down
//!
//! - **Enclave**: the launched instance and its forward-only status machine
//! - **Control**: seam to the external control tool (`nitro-cli`)
//! - **Controller**: the sequential orchestration with guaranteed teardown

pub mod control;
pub mod controller;
pub mod enclave;

pub use control::{EnclaveControl, LaunchInfo, LaunchRequest, NitroCli};
pub use controller::{
    KmsOptions, LifecycleConfig, LifecycleController, LifecycleReport, ReadinessWait,
};
pub use enclave::{EnclaveInstance, EnclaveStatus};
