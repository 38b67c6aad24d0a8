//! Error types for the autoscaler.

use thiserror::Error;

use loadpilot_state::StateError;

pub type ScalingResult<T> = Result<T, ScalingError>;

#[derive(Debug, Error)]
pub enum ScalingError {
    /// The rule is disabled; every other rule keeps running.
    #[error("rule {rule} misconfigured: {reason}")]
    RuleMisconfigured { rule: String, reason: String },

    #[error("no scaling policy for component: {0}")]
    UnknownComponent(String),

    #[error("scale callback failed: {0}")]
    Callback(String),

    #[error(transparent)]
    State(#[from] StateError),
}
