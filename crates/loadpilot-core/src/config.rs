//! loadpilot.toml configuration parser.
//!
//! Per-component capacity and scaling policy are static startup
//! configuration; nothing here is re-derived at runtime. Every setting
//! has a default so a minimal file only needs its `[[components]]`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::*;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that abort controller initialization.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("no components configured")]
    NoComponents,

    #[error("duplicate component id: {0}")]
    DuplicateComponent(String),

    #[error("component {0}: max_concurrent_tasks must be positive")]
    InvalidCapacity(String),

    #[error("component {component}: {resource} min allocation {min} exceeds max {max}")]
    InvalidBounds {
        component: String,
        resource: ResourceType,
        min: f64,
        max: f64,
    },

    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoadPilotConfig {
    pub controller: ControllerSettings,
    pub scaling: ScalingSettings,
    pub alerts: AlertSettings,
    pub health: HealthSettings,
    pub persistence: PersistenceSettings,
    pub components: Vec<ComponentConfig>,
}

/// Request queue, processor, and load balancer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// How long a dequeue waits before the processor re-checks shutdown.
    pub dequeue_timeout_ms: u64,
    pub max_in_flight: usize,
    /// Algorithm active at startup (unless restored from persisted state).
    pub algorithm: Algorithm,
    /// System load ratio (0.0–1.0) above which low-priority work is shed.
    pub load_shed_threshold: f64,
    /// Load percent at which a component becomes BUSY.
    pub busy_threshold: f64,
    /// Load percent at which a component becomes OVERLOADED.
    pub overload_threshold: f64,
    /// Smoothing factor for the latency moving average.
    pub latency_alpha: f64,
    pub completion_history: usize,
    pub throughput_window_secs: u64,
    pub optimizer_interval_secs: u64,
    pub optimizer_min_samples: u64,
    /// Most recent outcomes per algorithm the optimizer ranks on.
    pub optimizer_window: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            max_retries: 3,
            retry_backoff_ms: 500,
            dequeue_timeout_ms: 1000,
            max_in_flight: 256,
            algorithm: Algorithm::Adaptive,
            load_shed_threshold: 0.95,
            busy_threshold: 70.0,
            overload_threshold: 90.0,
            latency_alpha: 0.1,
            completion_history: 100,
            throughput_window_secs: 60,
            optimizer_interval_secs: 60,
            optimizer_min_samples: 10,
            optimizer_window: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingSettings {
    pub min_confidence: f64,
    /// Decisions executed per executor cycle.
    pub batch_size: usize,
    pub monitor_interval_secs: u64,
    pub executor_interval_secs: u64,
    pub decision_max_age_secs: u64,
    pub decision_history: usize,
    /// Number of recent effectiveness scores averaged into confidence.
    pub effectiveness_window: usize,
    /// Mean decision spacing that earns full stability confidence.
    pub stability_reference_secs: f64,
    /// System-wide allocation cap per resource, summed across components.
    pub global_max: ResourceVector,
}

impl Default for ScalingSettings {
    fn default() -> Self {
        Self {
            min_confidence: 70.0,
            batch_size: 3,
            monitor_interval_secs: 30,
            executor_interval_secs: 10,
            decision_max_age_secs: 300,
            decision_history: 1000,
            effectiveness_window: 10,
            stability_reference_secs: 300.0,
            global_max: ResourceVector::uniform(1000.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub latency_warning_ms: f64,
    pub latency_critical_ms: f64,
    /// Cooldown for load, utilization, latency and health alerts.
    pub load_cooldown_secs: u64,
    /// Cooldown for queue and scaling alerts.
    pub scaling_cooldown_secs: u64,
    pub queue_backlog_ratio: f64,
    pub history: usize,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            warning_threshold: 70.0,
            critical_threshold: 90.0,
            latency_warning_ms: 500.0,
            latency_critical_ms: 1000.0,
            load_cooldown_secs: 300,
            scaling_cooldown_secs: 900,
            queue_backlog_ratio: 0.8,
            history: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub interval_secs: u64,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
    /// Requests a component must have served before the default probe
    /// judges its success rate.
    pub min_requests: u64,
    pub min_success_rate: f64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            unhealthy_threshold: 3,
            healthy_threshold: 1,
            min_requests: 20,
            min_success_rate: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// State file. Persistence is disabled when unset.
    pub path: Option<PathBuf>,
    pub interval_secs: u64,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            path: None,
            interval_secs: 300,
        }
    }
}

/// Static capacity and scaling policy for one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub id: ComponentId,
    pub max_concurrent_tasks: u32,
    /// Utilization caps in percent.
    #[serde(default = "default_max_utilization")]
    pub max_utilization: ResourceVector,
    #[serde(default = "default_one")]
    pub weight: f64,
    #[serde(default = "default_one")]
    pub priority_multiplier: f64,
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub strategy: ScalingStrategy,
    pub min_allocation: ResourceVector,
    pub max_allocation: ResourceVector,
    /// Allocation at startup; defaults to `min_allocation`.
    pub initial_allocation: Option<ResourceVector>,
    pub scale_up_factor: f64,
    pub scale_down_factor: f64,
    pub max_scale_up_per_hour: u32,
    pub max_scale_down_per_hour: u32,
    pub rules: Vec<RuleConfig>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            strategy: ScalingStrategy::Reactive,
            min_allocation: ResourceVector::uniform(0.5),
            max_allocation: ResourceVector::uniform(4.0),
            initial_allocation: None,
            scale_up_factor: 1.5,
            scale_down_factor: 0.8,
            max_scale_up_per_hour: 6,
            max_scale_down_per_hour: 3,
            rules: Vec::new(),
        }
    }
}

impl PolicyConfig {
    /// Allocation the component starts from and falls back to when
    /// persisted state has nothing for it.
    pub fn baseline_allocation(&self) -> ResourceVector {
        self.initial_allocation.unwrap_or(self.min_allocation)
    }
}

/// One threshold rule for a `(component, trigger)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub trigger: TriggerType,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    #[serde(default = "default_up_action")]
    pub scale_up_action: ScalingAction,
    #[serde(default = "default_down_action")]
    pub scale_down_action: ScalingAction,
    /// Multiplicative step; defaults to the policy's scale-up factor.
    #[serde(default)]
    pub scale_up_step: Option<f64>,
    /// Multiplicative step; defaults to the policy's scale-down factor.
    #[serde(default)]
    pub scale_down_step: Option<f64>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Resource to adjust; defaults to the trigger's own resource.
    #[serde(default)]
    pub resource: Option<ResourceType>,
}

fn default_max_utilization() -> ResourceVector {
    ResourceVector::uniform(100.0)
}

fn default_one() -> f64 {
    1.0
}

fn default_up_action() -> ScalingAction {
    ScalingAction::ScaleUp
}

fn default_down_action() -> ScalingAction {
    ScalingAction::ScaleDown
}

fn default_cooldown() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl LoadPilotConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: LoadPilotConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check for errors that must abort initialization.
    ///
    /// Rule-level problems are not checked here: a misconfigured rule is
    /// disabled when the rule engine loads it and the rest keep running.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.components.is_empty() {
            return Err(ConfigError::NoComponents);
        }

        let mut seen = HashSet::new();
        for c in &self.components {
            if !seen.insert(c.id.as_str()) {
                return Err(ConfigError::DuplicateComponent(c.id.clone()));
            }
            if c.max_concurrent_tasks == 0 {
                return Err(ConfigError::InvalidCapacity(c.id.clone()));
            }
            for resource in ResourceType::ALL {
                let min = c.policy.min_allocation.get(resource);
                let max = c.policy.max_allocation.get(resource);
                if min > max {
                    return Err(ConfigError::InvalidBounds {
                        component: c.id.clone(),
                        resource,
                        min,
                        max,
                    });
                }
            }
        }

        let ctl = &self.controller;
        if ctl.queue_capacity == 0 {
            return Err(ConfigError::InvalidSetting(
                "controller.queue_capacity must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&ctl.latency_alpha) || ctl.latency_alpha == 0.0 {
            return Err(ConfigError::InvalidSetting(
                "controller.latency_alpha must be in (0, 1]".into(),
            ));
        }
        if ctl.optimizer_window as u64 <= ctl.optimizer_min_samples {
            return Err(ConfigError::InvalidSetting(
                "controller.optimizer_window must exceed optimizer_min_samples".into(),
            ));
        }
        if ctl.busy_threshold >= ctl.overload_threshold {
            return Err(ConfigError::InvalidSetting(
                "controller.busy_threshold must be below overload_threshold".into(),
            ));
        }
        if self.alerts.warning_threshold >= self.alerts.critical_threshold {
            return Err(ConfigError::InvalidSetting(
                "alerts.warning_threshold must be below critical_threshold".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.scaling.min_confidence) {
            return Err(ConfigError::InvalidSetting(
                "scaling.min_confidence must be in [0, 100]".into(),
            ));
        }
        Ok(())
    }

    /// Look up a component's configuration by id.
    pub fn component(&self, id: &str) -> Option<&ComponentConfig> {
        self.components.iter().find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[[components]]
id = "price-feed"
max_concurrent_tasks = 10
"#;

    #[test]
    fn parse_minimal_uses_defaults() {
        let config = LoadPilotConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.components.len(), 1);
        assert_eq!(config.controller.queue_capacity, 1000);
        assert_eq!(config.controller.algorithm, Algorithm::Adaptive);
        assert_eq!(config.scaling.min_confidence, 70.0);
        assert_eq!(config.scaling.batch_size, 3);

        let c = &config.components[0];
        assert_eq!(c.weight, 1.0);
        assert_eq!(c.max_utilization.cpu, 100.0);
        assert_eq!(c.policy.max_allocation.cpu, 4.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_component() {
        let toml_str = r#"
[controller]
algorithm = "least_connections"

[scaling.global_max]
cpu = 10.0
memory = 32.0

[[components]]
id = "executor"
max_concurrent_tasks = 4
weight = 2.5

[components.policy]
strategy = "conservative"
min_allocation = { cpu = 1.0, memory = 1.0 }
max_allocation = { cpu = 4.0, memory = 8.0, network = 1.0, storage = 1.0 }

[[components.policy.rules]]
trigger = "cpu"
scale_up_threshold = 80.0
scale_down_threshold = 30.0
scale_up_step = 1.3
cooldown_secs = 120
"#;
        let config = LoadPilotConfig::parse(toml_str).unwrap();
        assert_eq!(config.controller.algorithm, Algorithm::LeastConnections);
        assert_eq!(config.scaling.global_max.cpu, 10.0);
        assert_eq!(config.scaling.global_max.network, 0.0);

        let c = config.component("executor").unwrap();
        assert_eq!(c.weight, 2.5);
        assert_eq!(c.policy.strategy, ScalingStrategy::Conservative);
        assert_eq!(c.policy.rules.len(), 1);

        let rule = &c.policy.rules[0];
        assert_eq!(rule.trigger, TriggerType::Cpu);
        assert_eq!(rule.scale_up_step, Some(1.3));
        assert_eq!(rule.scale_up_action, ScalingAction::ScaleUp);
        assert!(rule.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn min_above_max_is_fatal() {
        let mut config = LoadPilotConfig::parse(MINIMAL).unwrap();
        config.components[0].policy.min_allocation.memory = 8.0;

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidBounds { resource: ResourceType::Memory, .. }
        ));
    }

    #[test]
    fn duplicate_components_rejected() {
        let mut config = LoadPilotConfig::parse(MINIMAL).unwrap();
        config.components.push(config.components[0].clone());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateComponent(id)) if id == "price-feed"
        ));
    }

    #[test]
    fn empty_config_rejected() {
        let config = LoadPilotConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::NoComponents)));
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut config = LoadPilotConfig::parse(MINIMAL).unwrap();
        config.components[0].max_concurrent_tasks = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCapacity(_))));
    }

    #[test]
    fn optimizer_window_must_exceed_min_samples() {
        let mut config = LoadPilotConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.controller.optimizer_window, 200);
        config.controller.optimizer_window = 10;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSetting(_))));
    }

    #[test]
    fn baseline_defaults_to_min_allocation() {
        let policy = PolicyConfig::default();
        assert_eq!(policy.baseline_allocation(), policy.min_allocation);

        let policy = PolicyConfig {
            initial_allocation: Some(ResourceVector::uniform(2.0)),
            ..PolicyConfig::default()
        };
        assert_eq!(policy.baseline_allocation().cpu, 2.0);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = LoadPilotConfig::parse(MINIMAL).unwrap();
        let rendered = config.to_toml_string().unwrap();
        let reparsed = LoadPilotConfig::parse(&rendered).unwrap();
        assert_eq!(reparsed.components[0].id, "price-feed");
    }

    #[test]
    fn example_config_is_valid() {
        let config =
            LoadPilotConfig::parse(include_str!("../../../loadpilot.example.toml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.components.len(), 2);

        let executor = config.component("trade-executor").unwrap();
        assert_eq!(executor.policy.rules.len(), 2);
        assert_eq!(executor.policy.rules[1].resource, Some(ResourceType::Cpu));
        assert!(config.persistence.path.is_some());
    }
}
