//! fleet-monitor: resource sampling for hosted deployments.
//!
//! The [`ResourceMonitor`] turns the control-plane's absolute usage into
//! percentages of the deployment's tier limits (via the shared utilization
//! calculator) and appends them to the store. Failed reads are tracked per
//! deployment so operators see sampling outages in health status.

pub mod monitor;
pub mod tracker;

pub use monitor::{MonitorError, Observation, ResourceMonitor};
pub use tracker::ProbeResult;
