//! Error types for controller start-up and persistence.

use thiserror::Error;

use loadpilot_core::ConfigError;
use loadpilot_state::StateError;

pub type ControllerResult<T> = Result<T, ControllerError>;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// Fatal at start-up.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("state persistence failed: {0}")]
    State(#[from] StateError),

    #[error("controller already started")]
    AlreadyStarted,
}
