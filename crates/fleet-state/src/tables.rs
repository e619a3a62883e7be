//! redb table definitions for the deployment store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! History tables use `{deployment_id}:{timestamp:020}:{seq:06}` keys so a
//! prefix range over one deployment is already in time order.

use redb::TableDefinition;

/// Deployments keyed by deployment id.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Resource samples (append-only, prunable).
pub const SAMPLES: TableDefinition<&str, &[u8]> = TableDefinition::new("samples");

/// Scaling events (append-only, never pruned).
pub const SCALING_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("scaling_events");

/// Executor action log (append-only, never pruned).
pub const ACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("actions");

/// Per-deployment exclusive leases keyed by deployment id.
pub const LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");

/// Shape shared by every table above.
pub(crate) type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;
