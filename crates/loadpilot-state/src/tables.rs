//! redb table definitions for persisted controller state.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized types).
//! Ordered collections use zero-padded sequence numbers as keys.

use redb::TableDefinition;

/// Current allocation per resource, keyed by component id.
pub const ALLOCATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("allocations");

/// Load-balancing performance counters, keyed by algorithm name.
pub const ALGORITHMS: TableDefinition<&str, &[u8]> = TableDefinition::new("algorithms");

/// Selection weight, keyed by component id.
pub const WEIGHTS: TableDefinition<&str, &[u8]> = TableDefinition::new("weights");

/// Recent scaling decisions keyed by `{sequence:020}`.
pub const DECISIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("decisions");

/// Effectiveness score history, keyed by component id.
pub const EFFECTIVENESS: TableDefinition<&str, &[u8]> = TableDefinition::new("effectiveness");

/// Completed request records keyed by `{sequence:020}`.
pub const COMPLETIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("completions");

/// Single-value entries (active algorithm, save time).
pub const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
