//! Launch configuration
//!
//! The option bundle a Launcher is created with. Everything here is
//! per-cluster static configuration; the machine type itself comes from the
//! availability oracle at selection time.

use armada_core::Labels;
use serde::{Deserialize, Serialize};

/// Options recognized by a Launcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Bid on the spot market instead of launching on-demand
    #[serde(default)]
    pub spot: bool,

    /// Spot bid price in USD per hour; ignored for on-demand
    #[serde(default)]
    pub bid_price: f64,

    /// Image (AMI) id
    pub image: String,

    /// Security group id
    pub security_group: String,

    /// IAM instance profile ARN
    pub instance_profile: String,

    /// SSH key pair name registered with the cloud; empty means none
    #[serde(default)]
    pub key_name: Option<String>,

    /// SSH public key body installed on the instance
    #[serde(default)]
    pub ssh_key: Option<String>,

    /// EBS data volume type
    #[serde(default = "default_ebs_type")]
    pub ebs_type: String,

    /// EBS data volume size in GiB
    #[serde(default = "default_ebs_size_gib")]
    pub ebs_size_gib: i32,

    /// Region whose price table and API endpoint are used
    #[serde(default = "default_region")]
    pub region: String,

    /// Value of the Name tag applied to launched instances
    #[serde(default = "default_tag")]
    pub tag: String,

    /// Additional labels applied as cloud tags
    #[serde(default)]
    pub labels: Labels,

    /// Worker agent container image
    #[serde(default = "default_worker_image")]
    pub worker_image: String,

    /// Serialized worker configuration (a YAML document) shipped to the
    /// instance via user data
    #[serde(default)]
    pub worker_config: String,
}

fn default_ebs_type() -> String {
    "gp2".to_string()
}

fn default_ebs_size_gib() -> i32 {
    200
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_tag() -> String {
    "armada-worker".to_string()
}

fn default_worker_image() -> String {
    "armada/worker:latest".to_string()
}

impl Default for LaunchSpec {
    fn default() -> Self {
        Self {
            spot: false,
            bid_price: 0.0,
            image: String::new(),
            security_group: String::new(),
            instance_profile: String::new(),
            key_name: None,
            ssh_key: None,
            ebs_type: default_ebs_type(),
            ebs_size_gib: default_ebs_size_gib(),
            region: default_region(),
            tag: default_tag(),
            labels: Labels::new(),
            worker_image: default_worker_image(),
            worker_config: String::new(),
        }
    }
}

impl LaunchSpec {
    /// Create a spec for the given image
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Bid on the spot market at the given price
    pub fn with_spot(mut self, bid_price: f64) -> Self {
        self.spot = true;
        self.bid_price = bid_price;
        self
    }

    /// Set the security group id
    pub fn with_security_group(mut self, sg: impl Into<String>) -> Self {
        self.security_group = sg.into();
        self
    }

    /// Set the IAM instance profile ARN
    pub fn with_instance_profile(mut self, arn: impl Into<String>) -> Self {
        self.instance_profile = arn.into();
        self
    }

    /// Install an SSH key pair: the cloud-registered name and the public key body
    pub fn with_key_pair(mut self, name: impl Into<String>, public_key: impl Into<String>) -> Self {
        self.key_name = Some(name.into());
        self.ssh_key = Some(public_key.into());
        self
    }

    /// Set the data volume type and size
    pub fn with_ebs(mut self, volume_type: impl Into<String>, size_gib: i32) -> Self {
        self.ebs_type = volume_type.into();
        self.ebs_size_gib = size_gib;
        self
    }

    /// Set the region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set the Name tag value
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Add a label, applied as a cloud tag
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set the worker agent container image
    pub fn with_worker_image(mut self, image: impl Into<String>) -> Self {
        self.worker_image = image.into();
        self
    }

    /// Set the serialized worker configuration
    pub fn with_worker_config(mut self, yaml: impl Into<String>) -> Self {
        self.worker_config = yaml.into();
        self
    }
}
