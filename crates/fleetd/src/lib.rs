//! fleetd: the bot fleet controller daemon.
//!
//! Assembles the store, hosting client, monitor, policy, executor and pass
//! driver from `fleet.toml`, and exposes them as a long-running HTTP service
//! or as one-shot maintenance commands.

pub mod app;
pub mod telemetry;

pub use app::{Fleet, load_config};
