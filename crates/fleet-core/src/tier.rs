//! Tier table: the only legal resource packages a deployment can run at.
//!
//! Tiers are totally ordered (`starter < pro < business`). Automatic
//! scaling moves one step at a time along that order; resource limits are
//! always looked up from the table, never interpolated.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A named resource package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Starter,
    Pro,
    Business,
}

impl Tier {
    /// All tiers, lowest first.
    pub const ALL: [Tier; 3] = [Tier::Starter, Tier::Pro, Tier::Business];

    /// The tier one step above, or `None` at the ceiling.
    pub fn next(self) -> Option<Tier> {
        match self {
            Tier::Starter => Some(Tier::Pro),
            Tier::Pro => Some(Tier::Business),
            Tier::Business => None,
        }
    }

    /// The tier one step below, or `None` at the bottom.
    pub fn prev(self) -> Option<Tier> {
        match self {
            Tier::Starter => None,
            Tier::Pro => Some(Tier::Starter),
            Tier::Business => Some(Tier::Pro),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Starter => "starter",
            Tier::Pro => "pro",
            Tier::Business => "business",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starter" => Ok(Tier::Starter),
            "pro" => Ok(Tier::Pro),
            "business" => Ok(Tier::Business),
            other => Err(ConfigError::UnknownTier(other.to_string())),
        }
    }
}

/// Resource bounds applied to a hosted instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit in MiB.
    pub memory_mb: u64,
    /// CPU limit in percent of one core (100 = one full core).
    pub cpu_percent: u64,
    /// Disk limit in MiB.
    pub disk_mb: u64,
}

/// Static mapping from tier to resource bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierTable {
    steps: BTreeMap<Tier, ResourceLimits>,
}

impl Default for TierTable {
    fn default() -> Self {
        let mut steps = BTreeMap::new();
        steps.insert(
            Tier::Starter,
            ResourceLimits {
                memory_mb: 512,
                cpu_percent: 50,
                disk_mb: 1024,
            },
        );
        steps.insert(
            Tier::Pro,
            ResourceLimits {
                memory_mb: 1024,
                cpu_percent: 100,
                disk_mb: 4096,
            },
        );
        steps.insert(
            Tier::Business,
            ResourceLimits {
                memory_mb: 2048,
                cpu_percent: 200,
                disk_mb: 10240,
            },
        );
        Self { steps }
    }
}

impl TierTable {
    /// Build a table from explicit steps. Every tier must be present and
    /// limits must not shrink as the tier grows.
    pub fn new(steps: BTreeMap<Tier, ResourceLimits>) -> Result<Self, ConfigError> {
        for tier in Tier::ALL {
            if !steps.contains_key(&tier) {
                return Err(ConfigError::Invalid(format!("tier table is missing {tier}")));
            }
        }

        let table = Self { steps };
        for tier in Tier::ALL {
            let Some(next) = tier.next() else { continue };
            let lo = table.limits(tier);
            let hi = table.limits(next);
            let grows = hi.memory_mb > lo.memory_mb
                || hi.cpu_percent > lo.cpu_percent
                || hi.disk_mb > lo.disk_mb;
            let shrinks = hi.memory_mb < lo.memory_mb
                || hi.cpu_percent < lo.cpu_percent
                || hi.disk_mb < lo.disk_mb;
            if !grows || shrinks {
                return Err(ConfigError::Invalid(format!(
                    "tier {next} must be strictly larger than {tier}"
                )));
            }
        }
        Ok(table)
    }

    /// Limits for a tier.
    pub fn limits(&self, tier: Tier) -> ResourceLimits {
        // Constructors guarantee every tier is present.
        self.steps[&tier]
    }

    /// Whether `limits` is exactly the table entry for `tier`.
    pub fn is_step(&self, tier: Tier, limits: &ResourceLimits) -> bool {
        self.limits(tier) == *limits
    }

    /// The highest tier in the table.
    pub fn ceiling(&self) -> Tier {
        Tier::Business
    }

    /// Iterate over `(tier, limits)` lowest first.
    pub fn iter(&self) -> impl Iterator<Item = (Tier, ResourceLimits)> + '_ {
        self.steps.iter().map(|(t, l)| (*t, *l))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_ordered() {
        assert!(Tier::Starter < Tier::Pro);
        assert!(Tier::Pro < Tier::Business);
        assert_eq!(Tier::Starter.next(), Some(Tier::Pro));
        assert_eq!(Tier::Business.next(), None);
        assert_eq!(Tier::Starter.prev(), None);
        assert_eq!(Tier::Business.prev(), Some(Tier::Pro));
    }

    #[test]
    fn tier_parses_case_insensitively() {
        assert_eq!("Pro".parse::<Tier>().unwrap(), Tier::Pro);
        assert_eq!(" business ".parse::<Tier>().unwrap(), Tier::Business);
        assert!("enterprise".parse::<Tier>().is_err());
    }

    #[test]
    fn tier_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Tier::Business).unwrap(), "\"business\"");
    }

    #[test]
    fn default_table_is_valid() {
        let table = TierTable::default();
        let rebuilt = TierTable::new(table.steps.clone()).unwrap();
        assert_eq!(rebuilt, table);
        assert_eq!(table.iter().count(), 3);
    }

    #[test]
    fn is_step_rejects_interpolated_limits() {
        let table = TierTable::default();
        let pro = table.limits(Tier::Pro);
        assert!(table.is_step(Tier::Pro, &pro));

        let halfway = ResourceLimits {
            memory_mb: 768,
            ..pro
        };
        assert!(!table.is_step(Tier::Pro, &halfway));
        assert!(!table.is_step(Tier::Starter, &pro));
    }

    #[test]
    fn new_rejects_missing_tier() {
        let mut steps = TierTable::default().steps;
        steps.remove(&Tier::Pro);
        assert!(TierTable::new(steps).is_err());
    }

    #[test]
    fn new_rejects_shrinking_tier() {
        let mut steps = TierTable::default().steps;
        steps.insert(
            Tier::Business,
            ResourceLimits {
                memory_mb: 4096,
                cpu_percent: 50,
                disk_mb: 20480,
            },
        );
        assert!(TierTable::new(steps).is_err());
    }
}
