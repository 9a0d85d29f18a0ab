//! EC2 implementation of the cloud instance API
//!
//! Maps the [`CloudClient`] operations onto `aws-sdk-ec2` calls. SDK errors
//! are surfaced with their service error code string preserved so the
//! launcher's classification can recognize capacity exhaustion.

use armada_core::{
    CloudClient, CloudLaunch, InstanceId, InstanceMeta, ProvisionError, Result, SpotRequest,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::types::{
    BlockDeviceMapping, EbsBlockDevice, IamInstanceProfileSpecification, Instance,
    InstanceStateName, InstanceType, RequestSpotLaunchSpecification,
    RunInstancesMonitoringEnabled, ShutdownBehavior, Tag, VolumeType,
};
use aws_sdk_ec2::Client;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant, SystemTime};
use tracing::debug;

/// Root device holding the OS and container images
const ROOT_DEVICE: &str = "/dev/xvda";

/// Data device the worker mounts for its working set
const DATA_DEVICE: &str = "/dev/xvdb";

/// Poll cadence for the running-state wait
const WAIT_RUNNING_POLL: Duration = Duration::from_secs(5);

/// Ceiling on the running-state wait
const WAIT_RUNNING_TIMEOUT: Duration = Duration::from_secs(600);

/// `CloudClient` backed by the EC2 API.
#[derive(Debug, Clone)]
pub struct Ec2Cloud {
    client: Client,
}

impl Ec2Cloud {
    /// Wrap an existing SDK client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client for `region` from the ambient credential chain
    pub async fn from_env(region: impl Into<String>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.into()))
            .load()
            .await;
        Self::new(Client::new(&config))
    }

    fn block_devices(launch: &CloudLaunch) -> Vec<BlockDeviceMapping> {
        vec![
            // The root device for the OS, container images, etc.
            BlockDeviceMapping::builder()
                .device_name(ROOT_DEVICE)
                .ebs(
                    EbsBlockDevice::builder()
                        .delete_on_termination(true)
                        .volume_size(launch.root_volume_gib)
                        .volume_type(VolumeType::Gp2)
                        .build(),
                )
                .build(),
            // The data device used for all worker data.
            BlockDeviceMapping::builder()
                .device_name(DATA_DEVICE)
                .ebs(
                    EbsBlockDevice::builder()
                        .delete_on_termination(true)
                        .volume_size(launch.data_volume_gib)
                        .volume_type(VolumeType::from(launch.data_volume_type.as_str()))
                        .build(),
                )
                .build(),
        ]
    }
}

fn sdk_err<E>(context: &str, err: E) -> ProvisionError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
{
    let code = err.code().map(str::to_string);
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{err:?}"));
    ProvisionError::cloud(code, format!("{context}: {message}"))
}

fn instance_meta(instance: &Instance) -> Result<InstanceMeta> {
    let id = instance
        .instance_id()
        .ok_or_else(|| ProvisionError::other("describe-instances returned an instance without an id"))?;
    let launch_time = instance
        .launch_time()
        .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
        .unwrap_or_else(Utc::now);
    Ok(InstanceMeta {
        id: InstanceId::new(id),
        instance_type: instance
            .instance_type()
            .map(|t| t.as_str().to_string())
            .unwrap_or_default(),
        public_dns: instance.public_dns_name().map(str::to_string),
        private_ip: instance.private_ip_address().map(str::to_string),
        launch_time,
    })
}

#[async_trait]
impl CloudClient for Ec2Cloud {
    async fn dry_run_capacity(&self, image_id: &str, instance_type: &str, count: i32) -> Result<()> {
        self.client
            .run_instances()
            .dry_run(true)
            .min_count(count)
            .max_count(count)
            .image_id(image_id)
            .instance_type(InstanceType::from(instance_type))
            .send()
            .await
            .map_err(|e| sdk_err("ec2.run-instances dry run", e))?;
        Ok(())
    }

    async fn run_instance(&self, launch: &CloudLaunch) -> Result<InstanceId> {
        let mut req = self
            .client
            .run_instances()
            .image_id(&launch.image_id)
            .min_count(1)
            .max_count(1)
            .set_block_device_mappings(Some(Self::block_devices(launch)))
            .disable_api_termination(false)
            .ebs_optimized(launch.ebs_optimized)
            .iam_instance_profile(
                IamInstanceProfileSpecification::builder()
                    .arn(&launch.instance_profile_arn)
                    .build(),
            )
            .instance_initiated_shutdown_behavior(ShutdownBehavior::Terminate)
            .instance_type(InstanceType::from(launch.instance_type.as_str()))
            .monitoring(RunInstancesMonitoringEnabled::builder().enabled(true).build())
            .set_key_name(launch.key_name.clone())
            .user_data(&launch.user_data)
            .security_group_ids(&launch.security_group);
        if let Some(token) = &launch.client_token {
            req = req.client_token(token);
        }

        let resp = req.send().await.map_err(|e| sdk_err("ec2.run-instances", e))?;
        let instances = resp.instances();
        if instances.len() != 1 {
            return Err(ProvisionError::other(format!(
                "ec2.run-instances: expected 1 instance, got {}",
                instances.len()
            )));
        }
        instances[0]
            .instance_id()
            .map(InstanceId::new)
            .ok_or_else(|| ProvisionError::other("ec2.run-instances: missing instance id"))
    }

    async fn request_spot(
        &self,
        launch: &CloudLaunch,
        bid_usd: f64,
        valid_for: Duration,
    ) -> Result<String> {
        debug!(instance_type = %launch.instance_type, bid_usd, "submitting spot request");
        let spec = RequestSpotLaunchSpecification::builder()
            .image_id(&launch.image_id)
            .ebs_optimized(launch.ebs_optimized)
            .instance_type(InstanceType::from(launch.instance_type.as_str()))
            .set_block_device_mappings(Some(Self::block_devices(launch)))
            .set_key_name(launch.key_name.clone())
            .user_data(&launch.user_data)
            .security_group_ids(&launch.security_group)
            .build();

        let resp = self
            .client
            .request_spot_instances()
            .valid_until(aws_sdk_ec2::primitives::DateTime::from(
                SystemTime::now() + valid_for,
            ))
            .spot_price(format!("{bid_usd:.3}"))
            .launch_specification(spec)
            .send()
            .await
            .map_err(|e| sdk_err("ec2.request-spot-instances", e))?;

        let requests = resp.spot_instance_requests();
        if requests.len() != 1 {
            return Err(ProvisionError::other(format!(
                "ec2.request-spot-instances: expected 1 request, got {}",
                requests.len()
            )));
        }
        requests[0]
            .spot_instance_request_id()
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ProvisionError::other("ec2.request-spot-instances: empty request id")
            })
    }

    async fn describe_spot_request(&self, request_id: &str) -> Result<SpotRequest> {
        let resp = self
            .client
            .describe_spot_instance_requests()
            .spot_instance_request_ids(request_id)
            .send()
            .await
            .map_err(|e| sdk_err("ec2.describe-spot-instance-requests", e))?;

        let requests = resp.spot_instance_requests();
        if requests.len() != 1 {
            return Err(ProvisionError::other(format!(
                "ec2.describe-spot-instance-requests {request_id}: expected 1 entry, got {}",
                requests.len()
            )));
        }
        let req = &requests[0];
        Ok(SpotRequest {
            id: request_id.to_string(),
            status_code: req
                .status()
                .and_then(|s| s.code())
                .unwrap_or_default()
                .to_string(),
            instance_id: req.instance_id().map(InstanceId::new),
        })
    }

    async fn create_tags(&self, id: &InstanceId, tags: &[(String, String)]) -> Result<()> {
        let tags: Vec<Tag> = tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect();
        self.client
            .create_tags()
            .resources(id.as_str())
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| sdk_err("ec2.create-tags", e))?;
        Ok(())
    }

    async fn wait_running(&self, id: &InstanceId) -> Result<()> {
        let start = Instant::now();
        loop {
            let meta = self
                .client
                .describe_instances()
                .instance_ids(id.as_str())
                .send()
                .await
                .map_err(|e| sdk_err("ec2.describe-instances", e))?;

            let state = meta
                .reservations()
                .first()
                .and_then(|r| r.instances().first())
                .and_then(|i| i.state())
                .and_then(|s| s.name().cloned());

            match state {
                Some(InstanceStateName::Running) => return Ok(()),
                Some(InstanceStateName::Terminated) | Some(InstanceStateName::ShuttingDown) => {
                    return Err(ProvisionError::other(format!(
                        "instance {id} terminated while waiting for running state"
                    )))
                }
                _ => {}
            }

            if start.elapsed() >= WAIT_RUNNING_TIMEOUT {
                return Err(ProvisionError::timeout(format!(
                    "instance {id} did not enter running state within {WAIT_RUNNING_TIMEOUT:?}"
                )));
            }
            tokio::time::sleep(WAIT_RUNNING_POLL).await;
        }
    }

    async fn describe_instance(&self, id: &InstanceId) -> Result<InstanceMeta> {
        let resp = self
            .client
            .describe_instances()
            .instance_ids(id.as_str())
            .send()
            .await
            .map_err(|e| sdk_err("ec2.describe-instances", e))?;

        let reservations = resp.reservations();
        if reservations.len() != 1 || reservations[0].instances().len() != 1 {
            return Err(ProvisionError::other(format!(
                "ec2.describe-instances {id}: invalid output"
            )));
        }
        instance_meta(&reservations[0].instances()[0])
    }
}
