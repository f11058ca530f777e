//! Enclave instance and its status state machine
//!
//! Status only moves forward:
//!
//! ```text
//! NotLaunched -> Launching -> Running -> Attested -> Communicating -> Terminated
//!                                    \-> AttestationFailed ------------/
//! ```
//!
//! `TerminationFailed` is reachable from any non-terminal status.

use crate::error::EnclaveError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an enclave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnclaveStatus {
    NotLaunched,
    Launching,
    Running,
    Attested,
    AttestationFailed,
    Communicating,
    Terminated,
    TerminationFailed,
}

impl EnclaveStatus {
    pub fn name(&self) -> &str {
        match self {
            EnclaveStatus::NotLaunched => "not launched",
            EnclaveStatus::Launching => "launching",
            EnclaveStatus::Running => "running",
            EnclaveStatus::Attested => "attested",
            EnclaveStatus::AttestationFailed => "attestation failed",
            EnclaveStatus::Communicating => "communicating",
            EnclaveStatus::Terminated => "terminated",
            EnclaveStatus::TerminationFailed => "termination failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EnclaveStatus::Terminated | EnclaveStatus::TerminationFailed
        )
    }

    /// Whether an instance exists in this status and therefore needs teardown
    pub fn owns_instance(&self) -> bool {
        !matches!(
            self,
            EnclaveStatus::NotLaunched | EnclaveStatus::Launching
        ) && !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: EnclaveStatus) -> bool {
        use EnclaveStatus::*;

        if self.is_terminal() {
            return false;
        }
        if next == TerminationFailed {
            return true;
        }
        matches!(
            (*self, next),
            (NotLaunched, Launching)
                | (Launching, Running)
                | (Running, Attested)
                | (Running, AttestationFailed)
                | (Attested, Communicating)
                | (Running, Terminated)
                | (Attested, Terminated)
                | (AttestationFailed, Terminated)
                | (Communicating, Terminated)
        )
    }
}

impl std::fmt::Display for EnclaveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A launched enclave, exclusively owned by the lifecycle controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnclaveInstance {
    /// Identifier assigned by the control interface
    pub id: String,
    pub name: String,
    pub cpu_count: u32,
    pub memory_mib: u64,
    /// Channel address reported at launch, if any
    pub cid: Option<u32>,
    pub launched_at: DateTime<Utc>,
    status: EnclaveStatus,
    history: Vec<EnclaveStatus>,
}

impl EnclaveInstance {
    /// Record a freshly launched enclave; it starts out `Running`
    pub fn running(
        id: impl Into<String>,
        name: impl Into<String>,
        cpu_count: u32,
        memory_mib: u64,
        cid: Option<u32>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cpu_count,
            memory_mib,
            cid,
            launched_at: Utc::now(),
            status: EnclaveStatus::Running,
            history: vec![EnclaveStatus::Running],
        }
    }

    pub fn status(&self) -> EnclaveStatus {
        self.status
    }

    /// Every status this instance has held, oldest first
    pub fn history(&self) -> &[EnclaveStatus] {
        &self.history
    }

    /// Move to `next`, rejecting backwards or out-of-order transitions
    pub fn transition(&mut self, next: EnclaveStatus) -> Result<(), EnclaveError> {
        if !self.status.can_transition_to(next) {
            return Err(EnclaveError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        log::debug!("Enclave {}: {} -> {}", self.id, self.status, next);
        self.status = next;
        self.history.push(next);
        Ok(())
    }

    pub fn summary(&self) -> String {
        format!(
            "enclave '{}' id={} cpus={} memory={}MiB cid={} status={}",
            self.name,
            self.id,
            self.cpu_count,
            self.memory_mib,
            self.cid
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.status
        )
    }
}
