//! Enclave lifecycle controller
//!
//! Drives one enclave through launch, readiness, attestation and message
//! exchange, strictly in that order. Once an instance exists, teardown is
//! attempted exactly once on every exit path: success, failure, or the run
//! future being dropped part-way.

use super::control::{EnclaveControl, LaunchInfo, LaunchRequest};
use super::enclave::{EnclaveInstance, EnclaveStatus};
use crate::attestation::{evaluate, ExpectedMeasurementPolicy};
use crate::channel::{
    connect, ChannelAddr, ChannelClient, ChannelConfig, ChannelMessage, DEFAULT_CHANNEL_PORT,
    DEFAULT_ENCLAVE_CID,
};
use crate::error::EnclaveError;
use log::{error, info, warn};
use std::time::Duration;

/// How to wait for the enclave's channel listener to come up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessWait {
    /// Sleep for a fixed settle delay
    Fixed(Duration),
    /// Dial the channel up to `attempts` times, `interval` apart, sending nothing
    Probe { attempts: u32, interval: Duration },
}

impl Default for ReadinessWait {
    fn default() -> Self {
        ReadinessWait::Fixed(Duration::from_secs(10))
    }
}

/// Key-management options; accepted but not acted on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsOptions {
    pub key_arn: String,
    pub region: String,
}

/// Everything the controller needs for one run
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub launch: LaunchRequest,
    pub policy: ExpectedMeasurementPolicy,
    /// Where to dial; a vsock CID reported at launch takes precedence
    pub channel_addr: ChannelAddr,
    pub channel: ChannelConfig,
    pub readiness: ReadinessWait,
    /// Requests sent, one exchange each, on a single connection
    pub messages: Vec<ChannelMessage>,
    pub kms: Option<KmsOptions>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            launch: LaunchRequest::default(),
            policy: ExpectedMeasurementPolicy::default(),
            channel_addr: ChannelAddr::vsock(DEFAULT_ENCLAVE_CID, DEFAULT_CHANNEL_PORT),
            channel: ChannelConfig::default(),
            readiness: ReadinessWait::default(),
            messages: vec![ChannelMessage::from("Hello from Parent!")],
            kms: None,
        }
    }
}

/// What happened during a run
#[derive(Debug)]
pub struct LifecycleReport {
    /// Present once launch succeeded
    pub instance: Option<EnclaveInstance>,
    /// Verdict of steps 1-5; teardown never changes it
    pub outcome: Result<(), EnclaveError>,
    /// Responses received, in request order
    pub responses: Vec<ChannelMessage>,
    /// Teardown result; `None` when there was nothing to tear down
    pub termination: Option<Result<(), EnclaveError>>,
}

impl LifecycleReport {
    fn launch_failed(err: EnclaveError) -> Self {
        Self {
            instance: None,
            outcome: Err(err),
            responses: Vec::new(),
            termination: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn final_status(&self) -> EnclaveStatus {
        self.instance
            .as_ref()
            .map(EnclaveInstance::status)
            .unwrap_or(EnclaveStatus::NotLaunched)
    }

    /// Full status history, including the pre-launch states
    pub fn history(&self) -> Vec<EnclaveStatus> {
        let mut history = vec![EnclaveStatus::NotLaunched, EnclaveStatus::Launching];
        if let Some(instance) = &self.instance {
            history.extend_from_slice(instance.history());
        }
        history
    }

    /// Process exit status for this run
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Terminates the enclave exactly once, on drop if not done explicitly
struct Teardown<'a, C: EnclaveControl + ?Sized> {
    control: &'a C,
    instance: &'a mut EnclaveInstance,
    attempted: bool,
}

impl<'a, C: EnclaveControl + ?Sized> Teardown<'a, C> {
    fn new(control: &'a C, instance: &'a mut EnclaveInstance) -> Self {
        Self {
            control,
            instance,
            attempted: false,
        }
    }

    fn instance(&mut self) -> &mut EnclaveInstance {
        &mut *self.instance
    }

    /// Returns `None` if termination was already attempted
    fn terminate(&mut self) -> Option<Result<(), EnclaveError>> {
        if self.attempted {
            return None;
        }
        self.attempted = true;

        let result = self.control.terminate(&self.instance.id);
        let next = match &result {
            Ok(()) => EnclaveStatus::Terminated,
            Err(e) => {
                warn!("Warning: failed to terminate enclave {}: {}", self.instance.id, e);
                EnclaveStatus::TerminationFailed
            }
        };
        if let Err(e) = self.instance.transition(next) {
            warn!("{}", e);
        }
        Some(result)
    }
}

impl<C: EnclaveControl + ?Sized> Drop for Teardown<'_, C> {
    fn drop(&mut self) {
        if !self.attempted {
            warn!(
                "Lifecycle interrupted, tearing down enclave {}",
                self.instance.id
            );
            let _ = self.terminate();
        }
    }
}

/// Owns one enclave run from launch to teardown
pub struct LifecycleController<C: EnclaveControl> {
    control: C,
    config: LifecycleConfig,
}

impl<C: EnclaveControl> LifecycleController<C> {
    pub fn new(control: C, config: LifecycleConfig) -> Self {
        Self { control, config }
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Run the full lifecycle
    pub async fn run(&self) -> LifecycleReport {
        let launch = match self.launch() {
            Ok(info) => info,
            Err(e) => {
                error!("Failed to launch enclave: {}", e);
                return LifecycleReport::launch_failed(e);
            }
        };

        let request = &self.config.launch;
        let mut instance = EnclaveInstance::running(
            launch.enclave_id.clone(),
            launch
                .enclave_name
                .clone()
                .unwrap_or_else(|| request.name.clone()),
            launch.cpu_count.unwrap_or(request.cpu_count),
            launch.memory_mib.unwrap_or(request.memory_mib),
            launch.cid(),
        );
        info!("Launched {}", instance.summary());

        let mut responses = Vec::new();
        let (outcome, termination) = {
            let mut teardown = Teardown::new(&self.control, &mut instance);
            let outcome = self.drive(teardown.instance(), &mut responses).await;
            if let Err(e) = &outcome {
                error!("Lifecycle failed at {} stage: {}", e.stage(), e);
            }
            (outcome, teardown.terminate())
        };

        info!("Final state: {}", instance.summary());
        LifecycleReport {
            instance: Some(instance),
            outcome,
            responses,
            termination,
        }
    }

    fn launch(&self) -> Result<LaunchInfo, EnclaveError> {
        let request = &self.config.launch;
        if request.cpu_count == 0 || request.memory_mib == 0 {
            return Err(EnclaveError::Launch(
                "cpu count and memory must be positive".into(),
            ));
        }
        for message in &self.config.messages {
            self.config.channel.check_request(message).map_err(|e| {
                EnclaveError::Config(format!("unsendable message: {}", e))
            })?;
        }
        self.control.launch(request)
    }

    /// Steps 3-5; any error aborts the remaining steps
    async fn drive(
        &self,
        instance: &mut EnclaveInstance,
        responses: &mut Vec<ChannelMessage>,
    ) -> Result<(), EnclaveError> {
        let addr = self.channel_addr(instance);
        self.wait_until_ready(addr).await;

        self.attest(instance)?;

        if let Some(kms) = &self.config.kms {
            info!(
                "KMS key ARN provided ({}) in region {}. Secret unwrapping is not performed.",
                kms.key_arn, kms.region
            );
        }

        instance.transition(EnclaveStatus::Communicating)?;
        let mut client = ChannelClient::connect(addr, &self.config.channel).await?;
        for message in &self.config.messages {
            info!("Sending message: {}", message.to_text());
            let response = client.request(message).await?;
            info!("Parent received response: {}", response.to_text());
            responses.push(response);
        }
        if let Err(e) = client.close().await {
            warn!("Failed to close channel cleanly: {}", e);
        }
        Ok(())
    }

    fn attest(&self, instance: &mut EnclaveInstance) -> Result<(), EnclaveError> {
        let doc = match self.control.attestation_document(&instance.id) {
            Ok(doc) => doc,
            Err(e) => {
                instance.transition(EnclaveStatus::AttestationFailed)?;
                return Err(e);
            }
        };

        let verdict = evaluate(Some(&doc), &self.config.policy);
        if !verdict.is_trusted() {
            instance.transition(EnclaveStatus::AttestationFailed)?;
            return Err(EnclaveError::AttestationMismatch(verdict.reason()));
        }

        instance.transition(EnclaveStatus::Attested)?;
        Ok(())
    }

    /// Prefer the CID reported at launch over the configured default
    pub fn channel_addr(&self, instance: &EnclaveInstance) -> ChannelAddr {
        match instance.cid {
            Some(cid) => self.config.channel_addr.with_cid(cid),
            None => self.config.channel_addr,
        }
    }

    async fn wait_until_ready(&self, addr: ChannelAddr) {
        match &self.config.readiness {
            ReadinessWait::Fixed(delay) => {
                info!("Giving enclave {:?} to start its channel listener...", delay);
                tokio::time::sleep(*delay).await;
            }
            ReadinessWait::Probe { attempts, interval } => {
                for attempt in 1..=*attempts {
                    match connect(&addr, self.config.channel.connect_timeout).await {
                        Ok(_probe) => {
                            info!("Channel listener at {} is reachable", addr);
                            return;
                        }
                        Err(e) => {
                            info!("Readiness probe {}/{} failed: {}", attempt, attempts, e);
                            if attempt < *attempts {
                                tokio::time::sleep(*interval).await;
                            }
                        }
                    }
                }
                warn!(
                    "Channel listener at {} not reachable after {} probe(s), continuing",
                    addr, attempts
                );
            }
        }
    }
}
