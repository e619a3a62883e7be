//! fleet-state: persistent deployment store for the bot-fleet controller.
//!
//! Backed by redb (pure-Rust embedded database). Stores:
//! - Deployments and their lifecycle/resource record
//! - Append-only history: resource samples, scaling events, the action log
//! - Per-deployment leases serializing mutations across workers

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
