//! Spot capacity pre-check
//!
//! Spot bids can dangle for minutes before the service gives up on them. A
//! dry-run launch of a healthy margin of instances answers "would a bid for
//! this type be accepted right now" in one round trip, which keeps the
//! try-another-type loop short.

use armada_core::{CloudClient, ProvisionError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default number of instances to dry-run. Empirical; a single instance
/// passes the dry run even when real capacity is nearly gone.
pub const DEFAULT_PROBE_COUNT: i32 = 20;

/// Default deadline for the dry-run round trip
pub const DEFAULT_PROBE_DEADLINE: Duration = Duration::from_secs(30);

/// Predicts whether a spot request for an instance type can be fulfilled.
pub struct CapacityProbe {
    cloud: Arc<dyn CloudClient>,
    count: i32,
    deadline: Duration,
}

impl CapacityProbe {
    /// Probe through the given cloud client with default count and deadline
    pub fn new(cloud: Arc<dyn CloudClient>) -> Self {
        Self {
            cloud,
            count: DEFAULT_PROBE_COUNT,
            deadline: DEFAULT_PROBE_DEADLINE,
        }
    }

    /// Override the dry-run instance count
    pub fn with_count(mut self, count: i32) -> Self {
        self.count = count;
        self
    }

    /// Override the round-trip deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Whether the service would currently accept a launch of
    /// [`count`](Self::with_count) instances of `instance_type`.
    ///
    /// The service reports "would have been accepted" as a DryRunOperation
    /// error. A stalled API call is taken as a negative answer; this holds
    /// up empirically. Any other cloud error is the caller's to classify.
    pub async fn has_capacity(&self, image_id: &str, instance_type: &str) -> Result<bool> {
        debug!(instance_type, count = self.count, "dry-run capacity check");
        let check = self.cloud.dry_run_capacity(image_id, instance_type, self.count);
        match tokio::time::timeout(self.deadline, check).await {
            Err(_) => {
                debug!(instance_type, "capacity check deadline expired");
                Ok(false)
            }
            Ok(Ok(())) => Err(ProvisionError::other(
                "dry-run launch unexpectedly succeeded",
            )),
            Ok(Err(err)) if err.cloud_code() == Some("DryRunOperation") => Ok(true),
            Ok(Err(ProvisionError::Timeout(_))) => Ok(false),
            Ok(Err(err)) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_core::{CloudLaunch, InstanceId, InstanceMeta, SpotRequest};
    use async_trait::async_trait;
    use std::sync::Mutex;

    // Dry-run behavior is scripted per test; everything else is unreachable.
    struct DryRunCloud {
        results: Mutex<Vec<Result<()>>>,
        delay: Option<Duration>,
    }

    impl DryRunCloud {
        fn new(results: Vec<Result<()>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results),
                delay: None,
            })
        }

        fn stalled() -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(Vec::new()),
                delay: Some(Duration::from_secs(3600)),
            })
        }
    }

    #[async_trait]
    impl CloudClient for DryRunCloud {
        async fn dry_run_capacity(&self, _image: &str, _ty: &str, _count: i32) -> Result<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.results.lock().unwrap().remove(0)
        }

        async fn run_instance(&self, _launch: &CloudLaunch) -> Result<InstanceId> {
            unreachable!()
        }

        async fn request_spot(
            &self,
            _launch: &CloudLaunch,
            _bid: f64,
            _valid_for: Duration,
        ) -> Result<String> {
            unreachable!()
        }

        async fn describe_spot_request(&self, _id: &str) -> Result<SpotRequest> {
            unreachable!()
        }

        async fn create_tags(&self, _id: &InstanceId, _tags: &[(String, String)]) -> Result<()> {
            unreachable!()
        }

        async fn wait_running(&self, _id: &InstanceId) -> Result<()> {
            unreachable!()
        }

        async fn describe_instance(&self, _id: &InstanceId) -> Result<InstanceMeta> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_dry_run_error_means_capacity() {
        let cloud = DryRunCloud::new(vec![Err(ProvisionError::cloud(
            Some("DryRunOperation".into()),
            "request would have succeeded",
        ))]);
        let probe = CapacityProbe::new(cloud);
        assert!(probe.has_capacity("ami-1", "m5.large").await.unwrap());
    }

    #[tokio::test]
    async fn test_other_cloud_error_propagates() {
        let cloud = DryRunCloud::new(vec![Err(ProvisionError::cloud(
            Some("InsufficientInstanceCapacity".into()),
            "no capacity",
        ))]);
        let probe = CapacityProbe::new(cloud);
        let err = probe.has_capacity("ami-1", "m5.large").await.unwrap_err();
        assert_eq!(err.cloud_code(), Some("InsufficientInstanceCapacity"));
    }

    #[tokio::test]
    async fn test_unexpected_success_is_an_error() {
        let cloud = DryRunCloud::new(vec![Ok(())]);
        let probe = CapacityProbe::new(cloud);
        assert!(probe.has_capacity("ami-1", "m5.large").await.is_err());
    }

    #[tokio::test]
    async fn test_stalled_api_means_no_capacity() {
        let probe =
            CapacityProbe::new(DryRunCloud::stalled()).with_deadline(Duration::from_millis(20));
        assert!(!probe.has_capacity("ami-1", "m5.large").await.unwrap());
    }
}
