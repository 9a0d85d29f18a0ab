//! Machine type catalog
//!
//! An immutable reference table of launchable machine types: resources,
//! regional on-demand prices, spot eligibility, storage attachment style.
//! Entries are derived once at startup from static catalog data and sorted
//! in descending order of memory, which makes "the biggest thing we could
//! ever launch" an O(1) lookup and keeps cost-minimization scans predictable.

use armada_core::{gib, Resources};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fraction of nominal memory reserved as headroom for the worker agent
pub const MEMORY_HEADROOM: f64 = 0.05;

/// A catalog entry as it appears in static catalog data, before derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMachineType {
    /// Machine type name, e.g. "r5.4xlarge"
    pub name: String,

    /// CPU count
    pub vcpu: u16,

    /// Nominal memory in GiB, as advertised by the cloud
    pub memory_gib: f64,

    /// Region -> on-demand price in fractional dollars per hour
    #[serde(default)]
    pub price: HashMap<String, f64>,

    /// Whether this is a current-generation type. Only current-generation
    /// types are offered on the spot market.
    #[serde(default)]
    pub current_generation: bool,

    /// Whether attached EBS volumes appear as NVMe devices
    #[serde(default)]
    pub nvme: bool,

    /// Whether to request an EBS-optimized launch
    #[serde(default)]
    pub ebs_optimized: bool,
}

/// A derived, immutable machine type description.
#[derive(Debug, Clone)]
pub struct MachineType {
    /// Machine type name
    pub name: String,

    /// Resources presented by this type. Memory is discounted by
    /// [`MEMORY_HEADROOM`] from the nominal figure; disk is not included
    /// here since data volumes are sized per launch.
    pub resources: Resources,

    /// Region -> on-demand price in fractional dollars per hour
    pub price: HashMap<String, f64>,

    /// Whether this type may be launched via the spot market
    pub spot_ok: bool,

    /// Whether attached EBS volumes appear as NVMe devices
    pub nvme: bool,

    /// Whether to request an EBS-optimized launch
    pub ebs_optimized: bool,
}

impl MachineType {
    fn derive(raw: RawMachineType) -> Self {
        // "t2" types are the only current-generation types not offered on
        // the spot market.
        let spot_ok = raw.current_generation && !raw.name.starts_with("t2.");
        Self {
            resources: Resources::new(
                raw.vcpu,
                ((1.0 - MEMORY_HEADROOM) * raw.memory_gib * gib(1) as f64) as u64,
                0,
            ),
            spot_ok,
            name: raw.name,
            price: raw.price,
            nvme: raw.nvme,
            ebs_optimized: raw.ebs_optimized,
        }
    }

    /// On-demand price for `region`, if the type is sold there
    pub fn price_in(&self, region: &str) -> Option<f64> {
        self.price.get(region).copied().filter(|p| *p > 0.0)
    }
}

/// The fixed collection of machine types known to this process.
#[derive(Debug, Clone)]
pub struct Catalog {
    types: Vec<MachineType>,
}

impl Catalog {
    /// Build a catalog from raw entries, deriving resources and sorting
    /// descending by memory.
    pub fn new(raw: impl IntoIterator<Item = RawMachineType>) -> Self {
        let mut types: Vec<MachineType> = raw.into_iter().map(MachineType::derive).collect();
        types.sort_by(|a, b| b.resources.mem.cmp(&a.resources.mem));
        Self { types }
    }

    /// Parse a catalog from its JSON representation
    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        let raw: Vec<RawMachineType> = serde_json::from_str(data)?;
        Ok(Self::new(raw))
    }

    /// Look up a type by name
    pub fn lookup(&self, name: &str) -> Option<&MachineType> {
        self.types.iter().find(|t| t.name == name)
    }

    /// All types, in descending-memory order
    pub fn types(&self) -> &[MachineType] {
        &self.types
    }

    /// Number of types in the catalog
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the catalog has no types at all
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, vcpu: u16, memory_gib: f64, price: f64) -> RawMachineType {
        RawMachineType {
            name: name.to_string(),
            vcpu,
            memory_gib,
            price: HashMap::from([("us-west-2".to_string(), price)]),
            current_generation: true,
            nvme: false,
            ebs_optimized: false,
        }
    }

    #[test]
    fn test_sorted_descending_by_memory() {
        let catalog = Catalog::new(vec![
            raw("small", 2, 4.0, 0.10),
            raw("big", 16, 64.0, 1.00),
            raw("med", 8, 16.0, 0.40),
        ]);

        let names: Vec<&str> = catalog.types().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["big", "med", "small"]);
    }

    #[test]
    fn test_memory_headroom_discount() {
        let catalog = Catalog::new(vec![raw("m", 4, 16.0, 0.20)]);
        let t = catalog.lookup("m").unwrap();
        assert_eq!(t.resources.mem, ((1.0 - 0.05) * 16.0 * gib(1) as f64) as u64);
        assert_eq!(t.resources.cpu, 4);
    }

    #[test]
    fn test_spot_eligibility_excludes_t2_and_old_generations() {
        let mut t2 = raw("t2.large", 2, 8.0, 0.09);
        t2.current_generation = true;
        let mut old = raw("m1.large", 2, 7.5, 0.18);
        old.current_generation = false;

        let catalog = Catalog::new(vec![t2, old, raw("m5.large", 2, 8.0, 0.10)]);
        assert!(!catalog.lookup("t2.large").unwrap().spot_ok);
        assert!(!catalog.lookup("m1.large").unwrap().spot_ok);
        assert!(catalog.lookup("m5.large").unwrap().spot_ok);
    }

    #[test]
    fn test_price_in_skips_absent_and_zero() {
        let mut entry = raw("m5.large", 2, 8.0, 0.10);
        entry.price.insert("eu-west-1".to_string(), 0.0);
        let catalog = Catalog::new(vec![entry]);
        let t = catalog.lookup("m5.large").unwrap();

        assert_eq!(t.price_in("us-west-2"), Some(0.10));
        assert_eq!(t.price_in("eu-west-1"), None);
        assert_eq!(t.price_in("ap-south-1"), None);
    }

    #[test]
    fn test_from_json() {
        let catalog = Catalog::from_json(
            r#"[
                {"name": "c5.2xlarge", "vcpu": 8, "memory_gib": 16.0,
                 "price": {"us-west-2": 0.34}, "current_generation": true,
                 "nvme": true, "ebs_optimized": true}
            ]"#,
        )
        .unwrap();

        let t = catalog.lookup("c5.2xlarge").unwrap();
        assert!(t.nvme);
        assert!(t.ebs_optimized);
        assert!(t.spot_ok);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_lookup_missing() {
        let catalog = Catalog::new(vec![]);
        assert!(catalog.lookup("nope").is_none());
        assert!(catalog.is_empty());
    }
}
