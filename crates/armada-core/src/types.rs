//! Core types shared across Armada components

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a cloud instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key-value labels applied to instances as cloud tags
pub type Labels = HashMap<String, String>;

/// A resource bundle, used both as a demand and as a machine capability.
///
/// Disk is zero for demands that do not care about local storage; machine
/// capabilities report it as the attachable data-volume ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// CPU count
    pub cpu: u16,

    /// Memory in bytes
    pub mem: u64,

    /// Disk in bytes
    pub disk: u64,
}

impl Resources {
    pub const fn new(cpu: u16, mem: u64, disk: u64) -> Self {
        Self { cpu, mem, disk }
    }

    /// Component-wise partial order: `self` fits within `other` iff every
    /// component of `self` is less than or equal to the same component of
    /// `other`.
    pub fn fits_within(&self, other: &Resources) -> bool {
        self.cpu <= other.cpu && self.mem <= other.mem && self.disk <= other.disk
    }
}

const GIB: u64 = 1 << 30;

/// Convert a GiB figure to bytes
pub const fn gib(n: u64) -> u64 {
    n * GIB
}

impl std::fmt::Display for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cpu={} mem={:.1}GiB disk={:.1}GiB",
            self.cpu,
            self.mem as f64 / GIB as f64,
            self.disk as f64 / GIB as f64
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_within_is_componentwise() {
        let small = Resources::new(2, gib(4), 0);
        let big = Resources::new(8, gib(32), gib(100));

        assert!(small.fits_within(&big));
        assert!(!big.fits_within(&small));

        // Incomparable: more CPU, less memory.
        let wide = Resources::new(16, gib(2), 0);
        assert!(!wide.fits_within(&big));
        assert!(!big.fits_within(&wide));
    }

    #[test]
    fn test_fits_within_is_reflexive() {
        let r = Resources::new(4, gib(8), gib(10));
        assert!(r.fits_within(&r));
    }

    #[test]
    fn test_instance_id_display() {
        let id = InstanceId::new("i-0123456789abcdef0");
        assert_eq!(id.to_string(), "i-0123456789abcdef0");
        assert_eq!(id.as_str(), "i-0123456789abcdef0");
    }
}
