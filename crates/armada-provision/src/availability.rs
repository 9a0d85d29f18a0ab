//! Instance type selection under observed availability
//!
//! Wraps the catalog with a mutable view of which types recently failed to
//! launch for capacity reasons. A marked type is skipped by selection
//! queries until its cooldown expires; entries are never deleted, they age
//! out. The map is the only mutable shared state in the provisioning core
//! and is guarded by a mutex held only across map access, never across
//! network calls.

use crate::catalog::{Catalog, MachineType};
use armada_core::Resources;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Selection queries over the catalog, honoring recent launch failures.
///
/// Shared by many concurrent scheduler callers; all methods take `&self`.
#[derive(Debug)]
pub struct Availability {
    catalog: Catalog,
    region: String,
    cooldown: Duration,
    unavailable: Mutex<HashMap<String, Instant>>,
}

impl Availability {
    /// `cooldown` is how long a marked type stays out of selection;
    /// `region` keys the price table reads.
    pub fn new(catalog: Catalog, region: impl Into<String>, cooldown: Duration) -> Self {
        Self {
            catalog,
            region: region.into(),
            cooldown,
            unavailable: Mutex::new(HashMap::new()),
        }
    }

    /// The region whose price table selection reads
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Record a capacity failure for `name`. Fire-and-forget; the entry
    /// expires [`cooldown`](Self::new) from now.
    pub fn mark_unavailable(&self, name: &str) {
        debug!(instance_type = name, "marking instance type unavailable");
        self.unavailable
            .lock()
            .unwrap()
            .insert(name.to_string(), Instant::now());
    }

    // Names whose last capacity failure is younger than the cooldown,
    // snapshotted against a single `now`.
    fn fresh_unavailable(&self) -> HashMap<String, Instant> {
        let now = Instant::now();
        let map = self.unavailable.lock().unwrap();
        map.iter()
            .filter(|(_, at)| now.duration_since(**at) < self.cooldown)
            .map(|(name, at)| (name.clone(), *at))
            .collect()
    }

    /// The largest catalog entry, ignoring availability. The scheduler uses
    /// this to cap demands at what could ever be launched.
    pub fn max(&self) -> Option<&MachineType> {
        self.catalog.types().first()
    }

    /// The largest entry currently believed available. `spot_only`
    /// restricts the scan to spot-eligible types.
    pub fn max_available(&self, spot_only: bool) -> Option<&MachineType> {
        let fresh = self.fresh_unavailable();
        self.catalog
            .types()
            .iter()
            .find(|t| !fresh.contains_key(&t.name) && (!spot_only || t.spot_ok))
    }

    /// The cheapest available entry satisfying `demand`, by this region's
    /// on-demand price table. Types without a positive regional price are
    /// skipped. Equal prices resolve toward larger machines (iteration
    /// order). When nothing satisfies the demand, falls back to
    /// [`max_available`](Self::max_available) so the caller always receives
    /// something if anything is available at all.
    pub fn min_available(&self, demand: Resources, spot_only: bool) -> Option<&MachineType> {
        let fresh = self.fresh_unavailable();
        let mut best: Option<(&MachineType, f64)> = None;
        for candidate in self.catalog.types() {
            if fresh.contains_key(&candidate.name) || (spot_only && !candidate.spot_ok) {
                continue;
            }
            let Some(price) = candidate.price_in(&self.region) else {
                continue;
            };
            if !demand.fits_within(&candidate.resources) {
                continue;
            }
            if best.map_or(true, |(_, best_price)| price < best_price) {
                best = Some((candidate, price));
            }
        }
        best.map(|(t, _)| t)
            .or_else(|| self.max_available(spot_only))
    }

    /// The named entry, if it exists and is currently believed available.
    pub fn by_name(&self, name: &str) -> Option<&MachineType> {
        let fresh = self.fresh_unavailable();
        if fresh.contains_key(name) {
            return None;
        }
        self.catalog.lookup(name)
    }
}
