//! External enclave-control interface
//!
//! The control tool is a separate process that creates, queries and destroys
//! enclaves and reports results as JSON on standard output. `EnclaveControl`
//! is the synchronous seam the lifecycle controller drives; `NitroCli` is the
//! process-backed implementation.

use crate::attestation::AttestationDocument;
use crate::error::EnclaveError;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{Command, Output};

/// Parameters for launching an enclave
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub image_path: PathBuf,
    pub name: String,
    pub cpu_count: u32,
    pub memory_mib: u64,
    pub debug_mode: bool,
}

impl Default for LaunchRequest {
    fn default() -> Self {
        Self {
            image_path: PathBuf::new(),
            name: String::new(),
            cpu_count: 1,
            memory_mib: 256,
            debug_mode: true,
        }
    }
}

/// What the control tool reports after a successful launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchInfo {
    #[serde(rename = "EnclaveID")]
    pub enclave_id: String,
    #[serde(rename = "EnclaveName", default)]
    pub enclave_name: Option<String>,
    #[serde(rename = "EnclaveCID", default)]
    pub enclave_cid: Option<u64>,
    #[serde(rename = "NumberOfCPUs", default)]
    pub cpu_count: Option<u32>,
    #[serde(rename = "MemoryMiB", default)]
    pub memory_mib: Option<u64>,
}

impl LaunchInfo {
    pub fn new(enclave_id: impl Into<String>) -> Self {
        Self {
            enclave_id: enclave_id.into(),
            enclave_name: None,
            enclave_cid: None,
            cpu_count: None,
            memory_mib: None,
        }
    }

    /// Parse the launch response, rejecting a missing or empty identifier
    pub fn from_json(data: &[u8]) -> Result<Self, EnclaveError> {
        let info: LaunchInfo = serde_json::from_slice(data).map_err(|e| {
            EnclaveError::Launch(format!("failed to decode launch response JSON: {}", e))
        })?;
        if info.enclave_id.trim().is_empty() {
            return Err(EnclaveError::Launch(
                "launch response carries an empty EnclaveID".into(),
            ));
        }
        Ok(info)
    }

    /// The reported CID, if it fits a channel address
    pub fn cid(&self) -> Option<u32> {
        self.enclave_cid.and_then(|c| u32::try_from(c).ok())
    }
}

/// Operations the lifecycle controller needs from the control tool
///
/// Calls are blocking and complete before the next lifecycle step starts.
/// Implementations run on the caller's executor thread, including from the
/// teardown path when a run is dropped, so they should return promptly.
pub trait EnclaveControl {
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchInfo, EnclaveError>;

    fn attestation_document(&self, enclave_id: &str) -> Result<AttestationDocument, EnclaveError>;

    /// Must be safe to call on an enclave that already stopped
    fn terminate(&self, enclave_id: &str) -> Result<(), EnclaveError>;
}

/// Control interface backed by the `nitro-cli` executable
#[derive(Debug, Clone)]
pub struct NitroCli {
    program: PathBuf,
}

impl Default for NitroCli {
    fn default() -> Self {
        Self::new("nitro-cli")
    }
}

impl NitroCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    fn run(&self, args: &[String]) -> std::io::Result<Output> {
        Command::new(&self.program).args(args).output()
    }

    fn launch_args(request: &LaunchRequest) -> Vec<String> {
        let mut args = vec![
            "run-enclave".to_string(),
            "--eif-path".to_string(),
            request.image_path.display().to_string(),
            "--enclave-name".to_string(),
            request.name.clone(),
            "--cpu-count".to_string(),
            request.cpu_count.to_string(),
            "--memory".to_string(),
            request.memory_mib.to_string(),
        ];
        if request.debug_mode {
            args.push("--debug-mode".to_string());
        }
        args
    }
}

/// Render a failed invocation with its exit status and standard error
fn failure_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{}\n{}", output.status, stderr.trim_end())
}

impl EnclaveControl for NitroCli {
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchInfo, EnclaveError> {
        info!(
            "Launching enclave '{}' with EIF: {}",
            request.name,
            request.image_path.display()
        );
        let output = self
            .run(&Self::launch_args(request))
            .map_err(|e| EnclaveError::Launch(format!("failed to run {}: {}", self.program.display(), e)))?;
        if !output.status.success() {
            return Err(EnclaveError::Launch(format!(
                "error launching enclave: {}",
                failure_text(&output)
            )));
        }

        let info = LaunchInfo::from_json(&output.stdout)?;
        info!(
            "Enclave launched successfully with EnclaveID: {}",
            info.enclave_id
        );
        Ok(info)
    }

    fn attestation_document(&self, enclave_id: &str) -> Result<AttestationDocument, EnclaveError> {
        info!("Requesting attestation document for EnclaveID: {}", enclave_id);
        let args = [
            "get-attestation-document".to_string(),
            "--enclave-id".to_string(),
            enclave_id.to_string(),
            "--decode".to_string(),
        ];
        let output = self.run(&args).map_err(|e| {
            EnclaveError::AttestationRetrieval(format!(
                "failed to run {}: {}",
                self.program.display(),
                e
            ))
        })?;
        if !output.status.success() {
            return Err(EnclaveError::AttestationRetrieval(format!(
                "error getting attestation document: {}",
                failure_text(&output)
            )));
        }

        let doc = AttestationDocument::from_json(&output.stdout)?;
        info!("Attestation document retrieved successfully.");
        Ok(doc)
    }

    fn terminate(&self, enclave_id: &str) -> Result<(), EnclaveError> {
        info!("Terminating enclave with EnclaveID: {}", enclave_id);
        let args = [
            "terminate-enclave".to_string(),
            "--enclave-id".to_string(),
            enclave_id.to_string(),
        ];
        let output = self.run(&args).map_err(|e| {
            EnclaveError::Termination(format!("failed to run {}: {}", self.program.display(), e))
        })?;
        if !output.status.success() {
            let text = failure_text(&output);
            warn!("failed to terminate enclave {}: {}", enclave_id, text);
            return Err(EnclaveError::Termination(text));
        }
        info!("Enclave {} terminated successfully.", enclave_id);
        Ok(())
    }
}
