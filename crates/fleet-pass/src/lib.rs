//! fleet-pass: drives one monitoring pass over the fleet.
//!
//! ```text
//! run_pass
//!   └─ list active deployments ─► queue
//!        └─ N workers, each until queue empty or budget spent:
//!             hold? ─► skip
//!             monitor.sample_at ─► drift? ─► skip
//!             policy.decide ─► provisioner.update_resources (expected tier)
//! ```
//!
//! Failures are isolated per deployment and reported in the
//! [`PassSummary`]; only an overlapping pass or an unreadable store fail
//! the pass as a whole.

pub mod driver;
pub mod reconcile;
pub mod summary;

pub use driver::{DRIFT_REASON, PassDriver, PassError, PassOptions};
pub use reconcile::{MissingServer, OrphanServer, ReconcileReport, StatusMismatch, reconcile};
pub use summary::{DetailOutcome, PassDetail, PassSummary};
