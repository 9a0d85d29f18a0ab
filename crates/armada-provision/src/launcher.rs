//! Instance launch state machine
//!
//! Drives one candidate machine from request to "worker ready". The machine
//! advances strictly forward through its states; each state either succeeds,
//! retries under a shared backoff budget, or fails with a classified error
//! the scheduler can react to:
//!
//! ```text
//! CapacityCheck (spot only)
//!     │
//!     ├── Submit        on-demand run, or spot bid + fulfillment wait
//!     ├── Tag           Name + labels
//!     ├── WaitRunning   cloud-side running state
//!     ├── Describe      public DNS assigned (retried; DNS is asynchronous)
//!     ├── WaitWorker    worker agent answers its offers endpoint
//!     └── Done
//! ```
//!
//! A launcher is single-use: construct, `run`, read `result`, discard.

use crate::capacity::{CapacityProbe, DEFAULT_PROBE_COUNT, DEFAULT_PROBE_DEADLINE};
use crate::catalog::MachineType;
use crate::config::LaunchSpec;
use crate::userdata::{self, UserDataArgs};
use armada_core::{
    CloudClient, CloudLaunch, ErrorKind, InstanceId, InstanceMeta, ProvisionError, RegistryAuth,
    Result, WorkerProbe,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Attempt ceiling, shared across states as a conservative total bound
const MAX_TRIES: u32 = 5;

/// Initial backoff delay; doubled per retry, reset on state advance
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Root volume size in GiB
const ROOT_VOLUME_GIB: i32 = 200;

/// How long a spot bid stays valid
const DEFAULT_BID_VALIDITY: Duration = Duration::from_secs(60);

/// Headroom on top of bid validity before the fulfillment wait is abandoned
const DEFAULT_SPOT_WAIT_GRACE: Duration = Duration::from_secs(10);

/// Spot fulfillment poll cadence and ceiling
const DEFAULT_SPOT_POLL_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_SPOT_POLL_ATTEMPTS: u32 = 40;

/// Per-attempt ceiling on the worker offers request
const DEFAULT_OFFERS_TIMEOUT: Duration = Duration::from_secs(10);

/// Spot request status codes that end the fulfillment wait. The stock SDK
/// waiter does not treat request-canceled-and-instance-running as a
/// success, so the wait is a small state machine of our own.
const SPOT_SUCCESS_CODES: &[&str] = &["fulfilled", "request-canceled-and-instance-running"];
const SPOT_FAILURE_CODES: &[&str] = &[
    "schedule-expired",
    "canceled-before-fulfillment",
    "bad-parameters",
    "system-error",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    CapacityCheck,
    Submit,
    Tag,
    WaitRunning,
    Describe,
    WaitWorker,
    Done,
}

impl State {
    fn next(self) -> State {
        match self {
            State::CapacityCheck => State::Submit,
            State::Submit => State::Tag,
            State::Tag => State::WaitRunning,
            State::WaitRunning => State::Describe,
            State::Describe => State::WaitWorker,
            State::WaitWorker | State::Done => State::Done,
        }
    }

    fn name(self) -> &'static str {
        match self {
            State::CapacityCheck => "capacity-check",
            State::Submit => "submit",
            State::Tag => "tag",
            State::WaitRunning => "wait-running",
            State::Describe => "describe",
            State::WaitWorker => "wait-worker",
            State::Done => "done",
        }
    }
}

/// Launches one instance of one machine type. Single-use.
pub struct Launcher {
    machine: MachineType,
    spec: LaunchSpec,
    cloud: Arc<dyn CloudClient>,
    probe: Arc<dyn WorkerProbe>,
    auth: Arc<dyn RegistryAuth>,

    retry_delay: Duration,
    capacity_count: i32,
    capacity_deadline: Duration,
    bid_validity: Duration,
    spot_wait_grace: Duration,
    spot_poll_interval: Duration,
    spot_poll_attempts: u32,
    offers_timeout: Duration,

    result: Option<Result<InstanceMeta>>,
}

impl Launcher {
    /// A launcher for one instance of `machine`, configured by `spec`
    pub fn new(
        machine: MachineType,
        spec: LaunchSpec,
        cloud: Arc<dyn CloudClient>,
        probe: Arc<dyn WorkerProbe>,
        auth: Arc<dyn RegistryAuth>,
    ) -> Self {
        Self {
            machine,
            spec,
            cloud,
            probe,
            auth,
            retry_delay: DEFAULT_RETRY_DELAY,
            capacity_count: DEFAULT_PROBE_COUNT,
            capacity_deadline: DEFAULT_PROBE_DEADLINE,
            bid_validity: DEFAULT_BID_VALIDITY,
            spot_wait_grace: DEFAULT_SPOT_WAIT_GRACE,
            spot_poll_interval: DEFAULT_SPOT_POLL_INTERVAL,
            spot_poll_attempts: DEFAULT_SPOT_POLL_ATTEMPTS,
            offers_timeout: DEFAULT_OFFERS_TIMEOUT,
            result: None,
        }
    }

    /// Override the initial backoff delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Override the spot capacity dry-run count
    pub fn with_capacity_count(mut self, count: i32) -> Self {
        self.capacity_count = count;
        self
    }

    /// Override the capacity check deadline
    pub fn with_capacity_deadline(mut self, deadline: Duration) -> Self {
        self.capacity_deadline = deadline;
        self
    }

    /// Override the spot bid validity window and the extra headroom given
    /// to the fulfillment wait past it
    pub fn with_bid_validity(mut self, validity: Duration, grace: Duration) -> Self {
        self.bid_validity = validity;
        self.spot_wait_grace = grace;
        self
    }

    /// Override the spot fulfillment poll cadence and attempt ceiling
    pub fn with_spot_poll(mut self, interval: Duration, attempts: u32) -> Self {
        self.spot_poll_interval = interval;
        self.spot_poll_attempts = attempts;
        self
    }

    /// Override the per-attempt worker offers timeout
    pub fn with_offers_timeout(mut self, timeout: Duration) -> Self {
        self.offers_timeout = timeout;
        self
    }

    /// The machine type this launcher is driving
    pub fn machine(&self) -> &MachineType {
        &self.machine
    }

    /// Run the state machine to completion. Returns when the worker is
    /// ready, the failure is classified, or `cancel` fires.
    pub async fn run(&mut self, cancel: &CancellationToken) {
        let outcome = self.drive(cancel).await;
        if let Err(err) = &outcome {
            debug!(
                instance_type = %self.machine.name,
                error = %err,
                "launch failed"
            );
        }
        self.result = Some(outcome);
    }

    /// The launch outcome; `None` until [`run`](Self::run) has returned.
    pub fn result(&self) -> Option<&Result<InstanceMeta>> {
        self.result.as_ref()
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<InstanceMeta> {
        let mut state = State::CapacityCheck;
        let mut tries: u32 = 0;
        let mut delay = self.retry_delay;
        let mut instance_id: Option<InstanceId> = None;
        let mut meta: Option<InstanceMeta> = None;

        while state != State::Done {
            if cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }

            let step: Result<()> = match state {
                State::CapacityCheck => self.check_capacity().await,
                State::Submit => match self.submit(cancel).await {
                    Ok(id) => {
                        info!(
                            instance_id = %id,
                            instance_type = %self.machine.name,
                            resources = %self.machine.resources,
                            spot = self.spec.spot,
                            "launched instance"
                        );
                        instance_id = Some(id);
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                State::Tag => match &instance_id {
                    Some(id) => self.tag(id).await,
                    None => Err(ProvisionError::other("no instance id to tag")),
                },
                State::WaitRunning => match &instance_id {
                    Some(id) => self.cloud.wait_running(id).await,
                    None => Err(ProvisionError::other("no instance id to wait on")),
                },
                State::Describe => match &instance_id {
                    Some(id) => match self.describe(id).await {
                        Ok(m) => {
                            meta = Some(m);
                            Ok(())
                        }
                        Err(e) => Err(e),
                    },
                    None => Err(ProvisionError::other("no instance id to describe")),
                },
                State::WaitWorker => {
                    // Describe only advances once the DNS is present.
                    let dns = meta
                        .as_ref()
                        .and_then(|m| m.public_dns.clone())
                        .unwrap_or_default();
                    self.wait_worker(&dns).await
                }
                State::Done => unreachable!("done is not a runnable state"),
            };

            let err = match step {
                Ok(()) => {
                    tries = 0;
                    delay = self.retry_delay;
                    state = state.next();
                    continue;
                }
                Err(err) => err.classify(),
            };

            match err.kind() {
                // The scheduler reacts to these; retrying here would only
                // hide them.
                ErrorKind::Fatal | ErrorKind::Unavailable | ErrorKind::Cancelled => {
                    return Err(err)
                }
                ErrorKind::Temporary | ErrorKind::Timeout => {}
                ErrorKind::Unknown => {
                    warn!(
                        state = state.name(),
                        instance_type = %self.machine.name,
                        error = %err,
                        "launch step failed"
                    );
                }
            }
            if tries == MAX_TRIES {
                return Err(err);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProvisionError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            tries += 1;
            delay *= 2;
        }

        meta.ok_or_else(|| ProvisionError::other("launch finished without instance metadata"))
    }

    async fn check_capacity(&self) -> Result<()> {
        if !self.spec.spot {
            return Ok(());
        }
        let probe = CapacityProbe::new(Arc::clone(&self.cloud))
            .with_count(self.capacity_count)
            .with_deadline(self.capacity_deadline);
        if !probe.has_capacity(&self.spec.image, &self.machine.name).await? {
            return Err(ProvisionError::unavailable(
                "spot capacity is likely exhausted",
            ));
        }
        Ok(())
    }

    async fn submit(&self, cancel: &CancellationToken) -> Result<InstanceId> {
        let login_command = self.auth.login_command().await?;
        let ssh_key = self.spec.ssh_key.clone().unwrap_or_default();
        if ssh_key.is_empty() {
            debug!("instance launch: missing public SSH key");
        }
        let user_data = userdata::render_base64(&UserDataArgs {
            login_command,
            worker_config: self.spec.worker_config.clone(),
            worker_image: self.spec.worker_image.clone(),
            ssh_key,
            device_name: userdata::device_name(self.machine.nvme),
            count: 1,
            mortal: true,
        });

        let launch = CloudLaunch {
            instance_type: self.machine.name.clone(),
            image_id: self.spec.image.clone(),
            ebs_optimized: self.machine.ebs_optimized,
            security_group: self.spec.security_group.clone(),
            instance_profile_arn: self.spec.instance_profile.clone(),
            key_name: self.spec.key_name.clone().filter(|k| !k.is_empty()),
            user_data,
            root_volume_gib: ROOT_VOLUME_GIB,
            data_volume_gib: self.spec.ebs_size_gib,
            data_volume_type: self.spec.ebs_type.clone(),
            client_token: (!self.spec.spot).then(idempotency_token),
        };

        if self.spec.spot {
            self.submit_spot(&launch, cancel).await
        } else {
            self.cloud.run_instance(&launch).await
        }
    }

    async fn submit_spot(
        &self,
        launch: &CloudLaunch,
        cancel: &CancellationToken,
    ) -> Result<InstanceId> {
        let request_id = self
            .cloud
            .request_spot(launch, self.spec.bid_price, self.bid_validity)
            .await?;
        debug!(
            request_id,
            instance_type = %self.machine.name,
            "waiting for spot fulfillment"
        );

        // Cap the wait past the bid validity in case the request gets stuck
        // server-side.
        let ceiling = self.bid_validity + self.spot_wait_grace;
        let wait = self.wait_spot_fulfillment(&request_id, cancel);
        match tokio::time::timeout(ceiling, wait).await {
            Err(_) => {
                return Err(ProvisionError::unavailable(format!(
                    "spot request {request_id} not fulfilled within {ceiling:?}"
                )))
            }
            Ok(Err(ProvisionError::Cancelled)) => return Err(ProvisionError::Cancelled),
            // Unfulfilled by the deadline means spot is unavailable as far
            // as the scheduler is concerned; it can pick another type.
            Ok(Err(err)) => {
                return Err(ProvisionError::unavailable(format!(
                    "spot fulfillment: {err}"
                )))
            }
            Ok(Ok(())) => {}
        }

        let request = self.cloud.describe_spot_request(&request_id).await?;
        let id = request.instance_id.ok_or_else(|| {
            ProvisionError::other(format!(
                "spot request {request_id} fulfilled without an instance id"
            ))
        })?;
        debug!(request_id, instance_id = %id, "spot request fulfilled");
        Ok(id)
    }

    async fn wait_spot_fulfillment(
        &self,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for attempt in 0..self.spot_poll_attempts {
            if cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }
            let request = self.cloud.describe_spot_request(request_id).await?;
            let code = request.status_code.as_str();
            if SPOT_SUCCESS_CODES.contains(&code) {
                return Ok(());
            }
            if SPOT_FAILURE_CODES.contains(&code) {
                return Err(ProvisionError::unavailable(format!(
                    "spot request {request_id}: {code}"
                )));
            }
            debug!(request_id, attempt, code, "spot request pending");
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProvisionError::Cancelled),
                _ = tokio::time::sleep(self.spot_poll_interval) => {}
            }
        }
        Err(ProvisionError::timeout(format!(
            "spot request {request_id} still pending after {} polls",
            self.spot_poll_attempts
        )))
    }

    async fn tag(&self, id: &InstanceId) -> Result<()> {
        let mut tags = vec![("Name".to_string(), self.spec.tag.clone())];
        tags.extend(
            self.spec
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        self.cloud.create_tags(id, &tags).await
    }

    async fn describe(&self, id: &InstanceId) -> Result<InstanceMeta> {
        let meta = self.cloud.describe_instance(id).await?;
        if meta.public_dns.as_deref().map_or(true, str::is_empty) {
            // Public DNS is assigned asynchronously after launch.
            return Err(ProvisionError::temporary(format!(
                "instance {id} has no public DNS name yet"
            )));
        }
        Ok(meta)
    }

    async fn wait_worker(&self, dns: &str) -> Result<()> {
        let offers = tokio::time::timeout(self.offers_timeout, self.probe.offers(dns)).await;
        match offers {
            Err(_) => Err(ProvisionError::timeout(format!(
                "worker at {dns} did not answer within {:?}",
                self.offers_timeout
            ))),
            // The agent container has not bound its port yet.
            Ok(Err(ProvisionError::Http(msg))) if msg.ends_with("connection refused") => {
                Err(ProvisionError::temporary(msg))
            }
            Ok(Err(err)) => Err(err),
            Ok(Ok(offers)) => {
                debug!(dns, offers = offers.len(), "worker is ready");
                Ok(())
            }
        }
    }
}

// Client-side idempotency token: 8 random bytes, hex-encoded.
fn idempotency_token() -> String {
    format!("{:016x}", rand::random::<u64>())
}
