//! loadpilot-state — entities, capacity registry, and persisted state.
//!
//! # Architecture
//!
//! ```text
//! CapacityRegistry (Arc<RwLock<HashMap>>, process-wide)
//!   ├── get / snapshot        ← load balancer, rule engine, dashboard
//!   ├── update_load           ← request processor
//!   ├── set_allocation        ← scaling executor
//!   └── set_health            ← health monitor
//!
//! StateStore (redb)
//!   └── save_snapshot / load_snapshot ← controller, on a timer and at shutdown
//! ```
//!
//! Persisted values are JSON-serialized into redb's `&[u8]` columns. Rows
//! that no longer decode are skipped on load so the schema can evolve
//! without breaking restarts.

pub mod error;
pub mod registry;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use registry::CapacityRegistry;
pub use store::StateStore;
pub use types::*;

pub use loadpilot_core::types::*;
