//! loadpilot-autoscale — rule-driven, confidence-gated resource scaling.
//!
//! # Architecture
//!
//! ```text
//! ScalingController
//!   ├── RuleEngine      threshold rules per (component, trigger), cooldowns
//!   ├── DecisionEngine  target allocation + confidence score
//!   └── ScalingExecutor pending list, batch of 3, hourly and global caps
//! ```
//!
//! Readings come from a `MetricsSource`; applied allocations are written
//! back into the `CapacityRegistry`, where the load balancer and the
//! utilization source see them on the next tick.

pub mod decision;
pub mod error;
pub mod executor;
pub mod rules;
pub mod scaler;

pub use decision::{
    ConfidenceSignals, DecisionEngine, DecisionSettings, EFFECTIVENESS_FAILURE,
    EFFECTIVENESS_SUCCESS,
};
pub use error::{ScalingError, ScalingResult};
pub use executor::{
    CapViolation, ExecutionOutcome, ExecutionReport, ExecutorSettings, ScaleCallback,
    ScalingExecutor,
};
pub use rules::{ComponentReading, RuleEngine, RuleTrigger};
pub use scaler::{ComponentScalingReport, ScalingController, ScalingReport, ScalingStats};
