//! fleet-autoscale: tier-stepped scaling decisions.
//!
//! The policy is a pure function of a deployment, its recent samples, its
//! scaling history and the tier table. It performs no I/O; the pass driver
//! feeds it and hands the decision to the provisioning executor.
//!
//! # Decision order
//!
//! ```text
//! last event younger than cooldown          → no change, "cooldown"
//! drop samples taken before the last applied resize
//! last M samples all have some metric > upper:
//!     tier is ceiling                       → no change, "already at ceiling tier"
//!     otherwise                             → up one step
//! last N samples all have every metric < lower:
//!     tier <= purchased floor               → no change, "at purchased floor tier"
//!     otherwise                             → down one step
//! fewer than M fresh samples                → no change, "insufficient samples"
//! otherwise                                 → no change, "within bounds"
//! ```

pub mod policy;

pub use policy::{ScalingDecision, ScalingHistory, ScalingPolicy, reason};
