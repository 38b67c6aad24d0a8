//! loadpilot-health — component health and alerting.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor (background loop)
//!   ├── ProbeFn per component → ProbeResult
//!   ├── HealthTracker (consecutive failures / recoveries)
//!   ├── CapacityRegistry::set_health (unhealthy → FAILED)
//!   └── Optional HealthCallback on status change
//!
//! AlertManager (shared, cheap to clone)
//!   ├── keyed by (component, alert type)
//!   ├── cooldown de-duplication of repeat raises
//!   └── auto-resolution into a bounded history
//! ```
//!
//! Probes are injectable. The default probe watches each component's
//! success rate over the requests completed since the previous probe, so
//! a component that was taken out of rotation gets a clean slate once
//! it stops failing.

pub mod alerts;
pub mod checker;
pub mod monitor;

pub use alerts::{AlertManager, RaiseOutcome, SYSTEM_COMPONENT, severity_for};
pub use checker::{HealthTracker, ProbeFn, ProbeFuture, ProbeResult, metrics_probe};
pub use monitor::{HealthCallback, HealthFuture, HealthMonitor};
