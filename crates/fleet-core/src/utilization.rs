//! Utilization math shared by the scaling policy and the status endpoint.
//!
//! Raw usage comes from the hosting control-plane in absolute units
//! (bytes, percent-of-a-core). Utilization is that usage expressed as a
//! percentage of the deployment's current limits. Values above 100 are
//! kept as-is: they signal over-commit and the policy relies on them.

use serde::{Deserialize, Serialize};

use crate::tier::ResourceLimits;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Absolute resource usage reported for one server.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawUsage {
    pub memory_bytes: u64,
    /// CPU usage in percent of one core (150.0 = one and a half cores).
    pub cpu_absolute: f64,
    pub disk_bytes: u64,
}

/// Usage as a percentage of the current limits.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Utilization {
    pub memory_pct: f64,
    pub cpu_pct: f64,
    pub disk_pct: f64,
}

impl Utilization {
    /// Compute utilization of `usage` against `limits`.
    ///
    /// A zero limit yields 0% for that dimension. Negative or non-finite
    /// inputs are clamped to 0; there is no upper clamp.
    pub fn compute(usage: &RawUsage, limits: &ResourceLimits) -> Self {
        Self {
            memory_pct: percent(usage.memory_bytes as f64 / BYTES_PER_MB, limits.memory_mb),
            cpu_pct: percent(usage.cpu_absolute, limits.cpu_percent),
            disk_pct: percent(usage.disk_bytes as f64 / BYTES_PER_MB, limits.disk_mb),
        }
    }

    /// The highest of the three dimensions.
    pub fn peak(&self) -> f64 {
        self.memory_pct.max(self.cpu_pct).max(self.disk_pct)
    }

    /// True if any dimension is strictly above `threshold`.
    pub fn any_above(&self, threshold: f64) -> bool {
        self.peak() > threshold
    }

    /// True if every dimension is strictly below `threshold`.
    pub fn all_below(&self, threshold: f64) -> bool {
        self.peak() < threshold
    }

    /// Whether the customer should be told an upgrade is recommended.
    pub fn upgrade_recommended(&self, threshold: f64) -> bool {
        self.any_above(threshold)
    }
}

fn percent(used: f64, limit: u64) -> f64 {
    if limit == 0 || !used.is_finite() {
        return 0.0;
    }
    (used / limit as f64 * 100.0).max(0.0)
}
