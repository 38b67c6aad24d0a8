//! loadpilot-core — shared enumerations and configuration.
//!
//! Every decision point in loadpilot (algorithm selection, status
//! derivation, trigger evaluation) switches over one of the tagged
//! enumerations in [`types`]. The [`config`] module parses the static
//! startup configuration (`loadpilot.toml`) and validates it before any
//! control loop starts.

pub mod config;
pub mod types;

pub use config::{
    AlertSettings, ComponentConfig, ConfigError, ConfigResult, ControllerSettings, HealthSettings,
    LoadPilotConfig, PersistenceSettings, PolicyConfig, RuleConfig, ScalingSettings,
};
pub use types::*;
