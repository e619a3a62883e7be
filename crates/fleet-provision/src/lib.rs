//! fleet-provision: the provisioning executor.
//!
//! Owns the deployment lifecycle state machine:
//!
//! ```text
//! provisioning ──► active ◄──► suspended
//!      │             │             │
//!      └─────────────┴─────────────┴──► terminated | error
//! ```
//!
//! and the only path by which a deployment's resources change. Manual
//! (admin) and automatic (pass) callers share the same operations, so both
//! get the same locking, retry and audit guarantees.

pub mod error;
pub mod executor;
mod lease;
pub mod notify;

pub use error::ProvisionError;
pub use executor::{ProvisionRequest, Provisioner, ResizeRequest, ResizeResult};
pub use notify::{Notification, NotificationKind, Notifier, NotifyError, WebhookNotifier};
