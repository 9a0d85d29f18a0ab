//! Armada Core - Shared types and traits
//!
//! This crate defines the core abstractions used across:
//! - armada-provision (instance provisioning core)
//! - armada-scheduler (cluster-level placement, external to this repo)
//!
//! Key types:
//! - CloudClient trait (interface to the cloud instance API)
//! - WorkerProbe / RegistryAuth traits (worker agent collaborators)
//! - Resources and the classified provisioning error taxonomy

pub mod error;
pub mod traits;
pub mod types;

pub use error::*;
pub use traits::*;
pub use types::*;
