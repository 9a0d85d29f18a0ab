//! # Armada Provisioning Core
//!
//! Rents virtual machines from the cloud to run containerized compute
//! workers.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler (external)
//! ├── Availability  ←──  catalog + recent capacity failures
//! ├── Launcher      ───  one instance: request → worker ready
//! │     ├── CapacityProbe   (spot dry-run pre-check)
//! │     └── HttpWorkerProbe (agent liveness)
//! └── Ec2Cloud      ───  the cloud API, behind CloudClient
//! ```
//!
//! The scheduler asks [`Availability`] for a candidate machine type, hands
//! it to a [`Launcher`], and waits on the outcome. A launcher that fails
//! with an unavailable classification feeds back into the oracle via
//! [`Availability::mark_unavailable`], and the scheduler picks another
//! type; retryable failures never leave the launcher.
//!
//! Nothing here persists: a restart forgets recent capacity failures, which
//! is acceptable because cooldowns are minutes long.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod availability;
pub mod capacity;
pub mod catalog;
pub mod config;
pub mod ec2;
pub mod launcher;
pub mod userdata;
pub mod worker;

// ============================================================================
// Public exports - selection
// ============================================================================

pub use availability::Availability;
pub use catalog::{Catalog, MachineType, RawMachineType, MEMORY_HEADROOM};

// ============================================================================
// Public exports - launching
// ============================================================================

pub use capacity::{CapacityProbe, DEFAULT_PROBE_COUNT};
pub use config::LaunchSpec;
pub use launcher::Launcher;

// ============================================================================
// Public exports - collaborators
// ============================================================================

pub use auth::StaticRegistryAuth;
pub use ec2::Ec2Cloud;
pub use worker::{HttpWorkerProbe, WORKER_PORT};

// Core types used throughout the public API
pub use armada_core::{
    CloudClient, ErrorKind, InstanceId, InstanceMeta, Offer, ProvisionError, RegistryAuth,
    Resources, Result, WorkerProbe,
};
