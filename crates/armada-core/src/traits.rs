//! Core traits for Armada
//!
//! The CloudClient trait defines the interface the provisioning core uses to
//! talk to the cloud instance API. The launcher works through this interface
//! ONLY - never concrete SDK types - so every launch path can be driven
//! against a scripted in-memory cloud in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::types::{InstanceId, Resources};

/// Parameters for a single instance launch, shared between the on-demand and
/// spot submission paths.
#[derive(Debug, Clone)]
pub struct CloudLaunch {
    /// Machine type name, e.g. "m5.4xlarge"
    pub instance_type: String,

    /// Image (AMI) identifier
    pub image_id: String,

    /// Request an EBS-optimized launch
    pub ebs_optimized: bool,

    /// Security group id
    pub security_group: String,

    /// IAM instance profile ARN
    pub instance_profile_arn: String,

    /// SSH key pair name; empty means none
    pub key_name: Option<String>,

    /// Base64-encoded first-boot user data
    pub user_data: String,

    /// Root volume size in GiB
    pub root_volume_gib: i32,

    /// Data volume size in GiB
    pub data_volume_gib: i32,

    /// Data volume type, e.g. "gp2"
    pub data_volume_type: String,

    /// Client-side idempotency token; only set on the on-demand path
    pub client_token: Option<String>,
}

/// Status of a spot instance request
#[derive(Debug, Clone)]
pub struct SpotRequest {
    /// Spot request id
    pub id: String,

    /// The service's status code string, e.g. "fulfilled" or
    /// "pending-evaluation"
    pub status_code: String,

    /// Instance id, once the request has been fulfilled
    pub instance_id: Option<InstanceId>,
}

/// Metadata describing a launched instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceMeta {
    /// Instance id
    pub id: InstanceId,

    /// Machine type name
    pub instance_type: String,

    /// Public DNS name; assigned asynchronously after launch
    pub public_dns: Option<String>,

    /// Private IP address
    pub private_ip: Option<String>,

    /// Launch time
    pub launch_time: DateTime<Utc>,
}

/// Cloud instance API, keyed by opaque string instance ids.
///
/// Implementations must report service errors with their stable string error
/// codes so the launcher can classify capacity exhaustion.
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Dry-run a launch of `count` instances of the given type.
    ///
    /// The service signals "would have been accepted" through a
    /// DryRunOperation error; a non-error return means the request actually
    /// ran, which callers must treat as a bug.
    async fn dry_run_capacity(&self, image_id: &str, instance_type: &str, count: i32)
        -> Result<()>;

    /// Launch one on-demand instance
    async fn run_instance(&self, launch: &CloudLaunch) -> Result<InstanceId>;

    /// Submit a spot request with the given bid, valid for `valid_for`.
    /// Returns the spot request id; fulfillment is polled separately.
    async fn request_spot(
        &self,
        launch: &CloudLaunch,
        bid_usd: f64,
        valid_for: Duration,
    ) -> Result<String>;

    /// Fetch the current status of a spot request
    async fn describe_spot_request(&self, request_id: &str) -> Result<SpotRequest>;

    /// Apply tags to an instance
    async fn create_tags(&self, id: &InstanceId, tags: &[(String, String)]) -> Result<()>;

    /// Block until the instance has entered running state
    async fn wait_running(&self, id: &InstanceId) -> Result<()>;

    /// Fetch instance metadata
    async fn describe_instance(&self, id: &InstanceId) -> Result<InstanceMeta>;
}

/// A resource advertisement published by a worker agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    /// Offer id, unique per worker
    pub id: String,

    /// Resources available under this offer
    pub available: Resources,
}

/// Liveness probe against the worker agent on a newly-booted machine.
/// Retry policy belongs to the caller, not the probe.
#[async_trait]
pub trait WorkerProbe: Send + Sync {
    /// Request the worker's offer list. A non-error return means the worker
    /// is ready to accept work.
    async fn offers(&self, dns: &str) -> Result<Vec<Offer>>;
}

/// Produces the container-registry login command embedded verbatim into the
/// instance's first-boot user data.
#[async_trait]
pub trait RegistryAuth: Send + Sync {
    async fn login_command(&self) -> Result<String>;
}
