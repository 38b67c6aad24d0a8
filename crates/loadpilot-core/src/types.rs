//! Shared types used across loadpilot crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a logical component.
pub type ComponentId = String;

// ── Resources ─────────────────────────────────────────────────────

/// The four resource dimensions every component is sized along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Cpu,
    Memory,
    Network,
    Storage,
}

impl ResourceType {
    pub const ALL: [ResourceType; 4] = [
        ResourceType::Cpu,
        ResourceType::Memory,
        ResourceType::Network,
        ResourceType::Storage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Cpu => "cpu",
            ResourceType::Memory => "memory",
            ResourceType::Network => "network",
            ResourceType::Storage => "storage",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per resource dimension.
///
/// Used for utilization percentages, utilization caps, and allocations
/// alike; the meaning comes from the field holding it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceVector {
    pub cpu: f64,
    pub memory: f64,
    pub network: f64,
    pub storage: f64,
}

impl ResourceVector {
    /// The same value in every dimension.
    pub const fn uniform(value: f64) -> Self {
        Self {
            cpu: value,
            memory: value,
            network: value,
            storage: value,
        }
    }

    pub fn get(&self, resource: ResourceType) -> f64 {
        match resource {
            ResourceType::Cpu => self.cpu,
            ResourceType::Memory => self.memory,
            ResourceType::Network => self.network,
            ResourceType::Storage => self.storage,
        }
    }

    pub fn set(&mut self, resource: ResourceType, value: f64) {
        match resource {
            ResourceType::Cpu => self.cpu = value,
            ResourceType::Memory => self.memory = value,
            ResourceType::Network => self.network = value,
            ResourceType::Storage => self.storage = value,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceType, f64)> + '_ {
        ResourceType::ALL.into_iter().map(|r| (r, self.get(r)))
    }
}

// ── Component state ───────────────────────────────────────────────

/// Derived availability status of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    #[default]
    Available,
    Busy,
    Overloaded,
    Maintenance,
    Failed,
}

impl ComponentStatus {
    /// Whether the load balancer may route work to a component in this status.
    pub fn accepts_work(&self) -> bool {
        !matches!(self, ComponentStatus::Failed | ComponentStatus::Maintenance)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Available => "available",
            ComponentStatus::Busy => "busy",
            ComponentStatus::Overloaded => "overloaded",
            ComponentStatus::Maintenance => "maintenance",
            ComponentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health status as determined by health probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

// ── Workload ──────────────────────────────────────────────────────

/// Request priority. Declaration order is numeric order, lowest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Minimal = 1,
    Low = 2,
    #[default]
    Normal = 3,
    High = 4,
    Critical = 5,
}

impl Priority {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// The kind of work a request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadType {
    PriceUpdate,
    OpportunityDetection,
    TradeExecution,
    RiskAssessment,
    DataAggregation,
    Maintenance,
}

// ── Load balancing ────────────────────────────────────────────────

/// Selectable load-balancing algorithm.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    LeastResponseTime,
    ResourceBased,
    PerformanceBased,
    #[default]
    Adaptive,
}

impl Algorithm {
    pub const ALL: [Algorithm; 7] = [
        Algorithm::RoundRobin,
        Algorithm::WeightedRoundRobin,
        Algorithm::LeastConnections,
        Algorithm::LeastResponseTime,
        Algorithm::ResourceBased,
        Algorithm::PerformanceBased,
        Algorithm::Adaptive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "round_robin",
            Algorithm::WeightedRoundRobin => "weighted_round_robin",
            Algorithm::LeastConnections => "least_connections",
            Algorithm::LeastResponseTime => "least_response_time",
            Algorithm::ResourceBased => "resource_based",
            Algorithm::PerformanceBased => "performance_based",
            Algorithm::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown algorithm: {s}"))
    }
}

// ── Scaling ───────────────────────────────────────────────────────

/// Metric a scaling rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Cpu,
    Memory,
    Network,
    Storage,
    Latency,
    Throughput,
    ErrorRate,
    TaskLoad,
}

impl TriggerType {
    /// Resource adjusted when a rule on this trigger fires and names no
    /// resource of its own. Non-resource signals scale compute.
    pub fn default_resource(&self) -> ResourceType {
        match self {
            TriggerType::Cpu => ResourceType::Cpu,
            TriggerType::Memory => ResourceType::Memory,
            TriggerType::Network => ResourceType::Network,
            TriggerType::Storage => ResourceType::Storage,
            TriggerType::Latency
            | TriggerType::Throughput
            | TriggerType::ErrorRate
            | TriggerType::TaskLoad => ResourceType::Cpu,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Cpu => "cpu",
            TriggerType::Memory => "memory",
            TriggerType::Network => "network",
            TriggerType::Storage => "storage",
            TriggerType::Latency => "latency",
            TriggerType::Throughput => "throughput",
            TriggerType::ErrorRate => "error_rate",
            TriggerType::TaskLoad => "task_load",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a scaling change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    Up,
    Down,
}

/// Action attached to a rule threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    ScaleOut,
    ScaleIn,
    Maintain,
}

impl ScalingAction {
    /// `None` for `Maintain`, which never changes an allocation.
    pub fn direction(&self) -> Option<ScaleDirection> {
        match self {
            ScalingAction::ScaleUp | ScalingAction::ScaleOut => Some(ScaleDirection::Up),
            ScalingAction::ScaleDown | ScalingAction::ScaleIn => Some(ScaleDirection::Down),
            ScalingAction::Maintain => None,
        }
    }
}

/// Per-component scaling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScalingStrategy {
    #[default]
    Reactive,
    Predictive,
    Proactive,
    Adaptive,
    Conservative,
    Aggressive,
}

impl ScalingStrategy {
    /// Points added to the minimum confidence a decision needs.
    pub fn confidence_offset(&self) -> f64 {
        match self {
            ScalingStrategy::Conservative => 10.0,
            ScalingStrategy::Aggressive => -10.0,
            ScalingStrategy::Reactive
            | ScalingStrategy::Predictive
            | ScalingStrategy::Proactive
            | ScalingStrategy::Adaptive => 0.0,
        }
    }

    /// Whether observed values are extrapolated by their recent trend
    /// before being compared against rule thresholds.
    pub fn uses_trend(&self) -> bool {
        matches!(self, ScalingStrategy::Predictive | ScalingStrategy::Proactive)
    }
}

// ── Alerts ────────────────────────────────────────────────────────

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Alert type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    HighLoad,
    ResourceUtilization(ResourceType),
    HighLatency,
    ComponentFailed,
    QueueBacklog,
    ScalingCapReached,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertType::HighLoad => write!(f, "HighLoad"),
            AlertType::ResourceUtilization(r) => write!(f, "ResourceUtilization({r})"),
            AlertType::HighLatency => write!(f, "HighLatency"),
            AlertType::ComponentFailed => write!(f, "ComponentFailed"),
            AlertType::QueueBacklog => write!(f, "QueueBacklog"),
            AlertType::ScalingCapReached => write!(f, "ScalingCapReached"),
        }
    }
}
