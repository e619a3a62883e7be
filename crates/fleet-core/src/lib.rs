//! fleet-core: shared types for the bot-fleet controller.
//!
//! Holds the tier table, the single utilization calculator used by both the
//! scaling policy and the customer status view, and the `fleet.toml`
//! configuration model.

pub mod config;
pub mod duration;
pub mod error;
pub mod tier;
pub mod utilization;

pub use config::FleetConfig;
pub use duration::{epoch_secs, parse_duration};
pub use error::ConfigError;
pub use tier::{ResourceLimits, Tier, TierTable};
pub use utilization::{RawUsage, Utilization};
