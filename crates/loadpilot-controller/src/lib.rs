//! loadpilot-controller — the process-wide owner of every store and loop.
//!
//! # Architecture
//!
//! ```text
//! Controller::builder(config).build()
//!   ├── CapacityRegistry + MetricsStore    (shared by every loop)
//!   ├── LoadBalancer + AlgorithmOptimizer
//!   ├── RequestProcessor (bounded queue)
//!   ├── HealthMonitor → AlertManager (component failed / recovered)
//!   ├── ScalingController (monitor → decision → executor)
//!   └── StateStore (restored before start, saved on a timer and at shutdown)
//!
//! start()    spawns one task per loop on a shared watch shutdown
//! shutdown() signals, awaits every task, then persists final state
//! ```

pub mod controller;
pub mod error;

pub use controller::{AlertsReport, Controller, ControllerBuilder};
pub use error::{ControllerError, ControllerResult};
