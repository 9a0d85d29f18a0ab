//! Container registry authentication
//!
//! The worker agent pulls its container image at first boot, so every
//! instance ships with a registry login script in its user data. The
//! [`RegistryAuth`] seam produces that script's command line; the static
//! implementation here covers registries whose login command is issued out
//! of band (or public registries, with an empty command).

use armada_core::{RegistryAuth, Result};
use async_trait::async_trait;

/// A fixed, preconfigured login command.
#[derive(Debug, Clone)]
pub struct StaticRegistryAuth {
    command: String,
}

impl StaticRegistryAuth {
    /// Use the given command verbatim
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// No login; the worker image is publicly pullable
    pub fn none() -> Self {
        Self::new("true")
    }
}

#[async_trait]
impl RegistryAuth for StaticRegistryAuth {
    async fn login_command(&self) -> Result<String> {
        Ok(self.command.clone())
    }
}
