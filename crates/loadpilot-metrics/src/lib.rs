//! loadpilot-metrics — observability for loadpilot components.
//!
//! Tracks per-component request outcomes (counts, smoothed latency,
//! throughput), abstracts where utilization readings come from, and
//! renders dashboard reports in Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! MetricsStore
//!   ├── record_completion() ← request processor, per finished request
//!   ├── get() / snapshot()  → load balancer, rule engine, dashboard
//!
//! MetricsSource (trait)
//!   ├── TaskLoadSource      → utilization derived from task load and allocation
//!   └── FixtureSource       → fixed readings for tests
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod collector;
pub mod prometheus;
pub mod report;
pub mod source;

pub use collector::MetricsStore;
pub use prometheus::render_prometheus;
pub use report::{
    ComponentReport, MetricsReport, ProcessorCounters, SystemReport, load_distribution_score,
};
pub use source::{FixtureSource, MetricsSource, TaskLoadSource};
