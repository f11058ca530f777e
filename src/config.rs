//! Process configuration for the host and enclave binaries
//!
//! Arguments are parsed with clap, then checked for presence and converted
//! into component configs before any lifecycle step begins.

use crate::attestation::{ExpectedMeasurementPolicy, PCR0};
use crate::channel::{ChannelAddr, ChannelConfig, ChannelMessage, DEFAULT_MAX_MESSAGE_SIZE};
use crate::error::EnclaveError;
use crate::lifecycle::{KmsOptions, LaunchRequest, LifecycleConfig, ReadinessWait};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Host side: launch an enclave, verify it, exchange messages, tear it down
#[derive(Debug, Clone, Parser)]
#[command(name = "enclave-host", version, about)]
pub struct HostArgs {
    /// Path to the Enclave Image File (.eif)
    #[arg(long)]
    pub eif_path: Option<PathBuf>,

    /// Name for the enclave
    #[arg(long)]
    pub enclave_name: Option<String>,

    /// Number of vCPUs for the enclave
    #[arg(long, default_value_t = 1)]
    pub cpu_count: u32,

    /// Memory (MiB) for the enclave
    #[arg(long, default_value_t = 256)]
    pub memory_mib: u64,

    /// Expected PCR0 measurement for attestation
    #[arg(long)]
    pub expected_measurement: Option<String>,

    /// Additional expected measurement as NAME=DIGEST (repeatable)
    #[arg(long = "measurement", value_name = "NAME=DIGEST")]
    pub measurements: Vec<String>,

    /// ARN of the KMS key for secret unwrapping (optional)
    #[arg(long)]
    pub kms_key_arn: Option<String>,

    /// AWS region for KMS operations (required with --kms-key-arn)
    #[arg(long)]
    pub aws_region: Option<String>,

    /// Channel address to dial (vsock:<cid>:<port> or tcp:<ip>:<port>)
    #[arg(long, default_value = "vsock:3:5000")]
    pub channel: ChannelAddr,

    #[arg(long, default_value_t = 5)]
    pub connect_timeout_secs: u64,

    /// Fixed delay before attestation, when not probing
    #[arg(long, default_value_t = 10)]
    pub settle_secs: u64,

    /// Probe the channel up to N times instead of a fixed delay
    #[arg(long)]
    pub probe_attempts: Option<u32>,

    #[arg(long, default_value_t = 500)]
    pub probe_interval_ms: u64,

    /// Message to send (repeatable); one request/response each
    #[arg(long = "message")]
    pub messages: Vec<String>,

    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,

    /// Launch without debug mode
    #[arg(long)]
    pub no_debug_mode: bool,

    /// Control tool executable
    #[arg(long, default_value = "nitro-cli")]
    pub nitro_cli: PathBuf,
}

impl HostArgs {
    /// Check required arguments and build the lifecycle config
    pub fn into_config(self) -> Result<LifecycleConfig, EnclaveError> {
        let mut missing = Vec::new();
        if self.eif_path.as_ref().map_or(true, |p| p.as_os_str().is_empty()) {
            missing.push("--eif-path");
        }
        if self.enclave_name.as_deref().map_or(true, str::is_empty) {
            missing.push("--enclave-name");
        }
        let has_pcr0 = self
            .expected_measurement
            .as_deref()
            .map_or(false, |m| !m.is_empty());
        if !has_pcr0 && self.measurements.is_empty() {
            missing.push("--expected-measurement");
        }
        if !missing.is_empty() {
            return Err(EnclaveError::Config(format!(
                "Missing required arguments: {}",
                missing.join(", ")
            )));
        }

        if self.cpu_count == 0 || self.memory_mib == 0 {
            return Err(EnclaveError::Config(
                "--cpu-count and --memory-mib must be positive".into(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(EnclaveError::Config(
                "--connect-timeout-secs must be positive".into(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(EnclaveError::Config(
                "--max-message-size must be positive".into(),
            ));
        }

        let mut policy = ExpectedMeasurementPolicy::parse_pairs(&self.measurements)?;
        if let Some(pcr0) = self.expected_measurement.filter(|m| !m.is_empty()) {
            policy.insert(PCR0, pcr0);
        }

        let kms = match (self.kms_key_arn, self.aws_region) {
            (Some(key_arn), Some(region)) => Some(KmsOptions { key_arn, region }),
            (Some(_), None) => {
                return Err(EnclaveError::Config(
                    "--aws-region is required with --kms-key-arn".into(),
                ))
            }
            (None, _) => None,
        };

        let readiness = match self.probe_attempts {
            Some(attempts) if attempts > 0 => ReadinessWait::Probe {
                attempts,
                interval: Duration::from_millis(self.probe_interval_ms),
            },
            _ => ReadinessWait::Fixed(Duration::from_secs(self.settle_secs)),
        };

        let mut config = LifecycleConfig {
            launch: LaunchRequest {
                image_path: self.eif_path.unwrap_or_default(),
                name: self.enclave_name.unwrap_or_default(),
                cpu_count: self.cpu_count,
                memory_mib: self.memory_mib,
                debug_mode: !self.no_debug_mode,
            },
            policy,
            channel_addr: self.channel,
            channel: ChannelConfig {
                max_message_size: self.max_message_size,
                connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            },
            readiness,
            kms,
            ..LifecycleConfig::default()
        };
        if !self.messages.is_empty() {
            config.messages = self.messages.into_iter().map(ChannelMessage::from).collect();
        }
        for (i, message) in config.messages.iter().enumerate() {
            config.channel.check_request(message).map_err(|e| {
                EnclaveError::Config(format!("--message #{}: {}", i + 1, e))
            })?;
        }
        Ok(config)
    }
}

/// Enclave side: serve the channel protocol
#[derive(Debug, Clone, Parser)]
#[command(name = "enclave-server", version, about)]
pub struct ServerArgs {
    /// Address to listen on (vsock:any:<port> inside the enclave)
    #[arg(long, default_value = "vsock:any:5000")]
    pub listen: ChannelAddr,

    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,
}

impl ServerArgs {
    pub fn into_config(self) -> Result<(ChannelAddr, ChannelConfig), EnclaveError> {
        if self.max_message_size == 0 {
            return Err(EnclaveError::Config(
                "--max-message-size must be positive".into(),
            ));
        }
        let config = ChannelConfig {
            max_message_size: self.max_message_size,
            ..ChannelConfig::default()
        };
        Ok((self.listen, config))
    }
}
