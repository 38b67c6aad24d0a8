//! Domain entities for loadpilot.
//!
//! These types represent capacity, metrics, requests, scaling rules and
//! decisions, alerts, and the persisted controller snapshot. All types
//! serialize to JSON for the state store and the dashboard API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use loadpilot_core::config::{ComponentConfig, PolicyConfig, RuleConfig};
use loadpilot_core::types::*;

// ── Capacity ──────────────────────────────────────────────────────

/// Load thresholds (percent of `max_concurrent_tasks`) for status derivation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusThresholds {
    pub busy: f64,
    pub overload: f64,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            busy: 70.0,
            overload: 90.0,
        }
    }
}

/// Capacity, current usage, and status of one component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentCapacity {
    pub component: ComponentId,
    pub max_concurrent_tasks: u32,
    /// Utilization caps in percent.
    pub max_utilization: ResourceVector,
    /// Latest measured utilization in percent.
    pub current_utilization: ResourceVector,
    /// Tasks currently executing. May exceed the maximum; overload is a
    /// status, not a rejection.
    pub current_tasks: u32,
    /// Resources currently allocated to the component.
    pub allocation: ResourceVector,
    pub status: ComponentStatus,
    pub health: HealthStatus,
    pub maintenance: bool,
    pub weight: f64,
    pub priority_multiplier: f64,
    /// Unix timestamp (seconds) of the last mutation.
    pub updated_at: u64,
}

impl ComponentCapacity {
    pub fn new(component: impl Into<ComponentId>, max_concurrent_tasks: u32) -> Self {
        Self {
            component: component.into(),
            max_concurrent_tasks,
            max_utilization: ResourceVector::uniform(100.0),
            current_utilization: ResourceVector::default(),
            current_tasks: 0,
            allocation: ResourceVector::default(),
            status: ComponentStatus::Available,
            health: HealthStatus::Unknown,
            maintenance: false,
            weight: 1.0,
            priority_multiplier: 1.0,
            updated_at: epoch_secs(),
        }
    }

    /// Build the startup capacity record from static configuration.
    pub fn from_config(config: &ComponentConfig) -> Self {
        Self {
            max_utilization: config.max_utilization,
            allocation: config.policy.baseline_allocation(),
            weight: config.weight,
            priority_multiplier: config.priority_multiplier,
            ..Self::new(config.id.clone(), config.max_concurrent_tasks)
        }
    }

    /// `current_tasks / max_concurrent_tasks * 100`.
    pub fn load_percent(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            return 100.0;
        }
        f64::from(self.current_tasks) / f64::from(self.max_concurrent_tasks) * 100.0
    }

    /// Remaining utilization headroom (percent points) for a resource.
    pub fn headroom(&self, resource: ResourceType) -> f64 {
        (self.max_utilization.get(resource) - self.current_utilization.get(resource)).max(0.0)
    }

    /// Failed probes mark a component unhealthy; unknown counts as healthy.
    pub fn is_healthy(&self) -> bool {
        self.health != HealthStatus::Unhealthy
    }

    /// Derive status from health, maintenance flag, and task load.
    pub fn derive_status(&self, thresholds: &StatusThresholds) -> ComponentStatus {
        if !self.is_healthy() {
            return ComponentStatus::Failed;
        }
        if self.maintenance {
            return ComponentStatus::Maintenance;
        }
        let load = self.load_percent();
        if load >= thresholds.overload {
            ComponentStatus::Overloaded
        } else if load >= thresholds.busy {
            ComponentStatus::Busy
        } else {
            ComponentStatus::Available
        }
    }
}

// ── Metrics ───────────────────────────────────────────────────────

/// Rolling request counters for one component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ComponentMetrics {
    pub component: ComponentId,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    /// Exponentially smoothed latency.
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    /// Completions per second over the throughput window.
    pub throughput: f64,
    pub last_updated: u64,
}

impl ComponentMetrics {
    pub fn new(component: impl Into<ComponentId>) -> Self {
        Self {
            component: component.into(),
            ..Self::default()
        }
    }

    pub fn completed(&self) -> u64 {
        self.successful_requests + self.failed_requests
    }

    /// Success percentage over completed requests; 100 with no history.
    pub fn success_rate(&self) -> f64 {
        match self.completed() {
            0 => 100.0,
            n => self.successful_requests as f64 / n as f64 * 100.0,
        }
    }

    pub fn error_rate(&self) -> f64 {
        100.0 - self.success_rate()
    }
}

// ── Requests ──────────────────────────────────────────────────────

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// A unit of work submitted by a producer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadRequest {
    #[serde(default = "next_request_id")]
    pub id: String,
    pub workload_type: WorkloadType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub estimated_duration_ms: u64,
    #[serde(default)]
    pub resource_requirements: HashMap<ResourceType, f64>,
    #[serde(default)]
    pub preferred_components: Vec<ComponentId>,
    #[serde(default)]
    pub avoid_components: Vec<ComponentId>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Unix timestamp (milliseconds) after which the request is void.
    #[serde(default)]
    pub deadline: Option<u64>,
    /// Unix timestamp (milliseconds) of submission.
    #[serde(default = "epoch_millis")]
    pub submitted_at: u64,
}

fn default_max_retries() -> u32 {
    3
}

/// Generate a process-unique request id.
pub fn next_request_id() -> String {
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("req-{}-{seq}", epoch_millis())
}

impl WorkloadRequest {
    pub fn new(workload_type: WorkloadType, priority: Priority) -> Self {
        Self {
            id: next_request_id(),
            workload_type,
            priority,
            estimated_duration_ms: 0,
            resource_requirements: HashMap::new(),
            preferred_components: Vec::new(),
            avoid_components: Vec::new(),
            retry_count: 0,
            max_retries: default_max_retries(),
            deadline: None,
            submitted_at: epoch_millis(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.estimated_duration_ms = ms;
        self
    }

    pub fn with_requirement(mut self, resource: ResourceType, amount: f64) -> Self {
        self.resource_requirements.insert(resource, amount);
        self
    }

    pub fn prefer(mut self, component: impl Into<ComponentId>) -> Self {
        self.preferred_components.push(component.into());
        self
    }

    pub fn avoid(mut self, component: impl Into<ComponentId>) -> Self {
        self.avoid_components.push(component.into());
        self
    }

    pub fn with_deadline(mut self, deadline_ms: u64) -> Self {
        self.deadline = Some(deadline_ms);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Required amount of a resource, zero when unspecified.
    pub fn requirement(&self, resource: ResourceType) -> f64 {
        self.resource_requirements
            .get(&resource)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.deadline.is_some_and(|d| now_ms > d)
    }
}

/// Why a request never reached a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    QueueFull,
    NoHealthyComponent,
    DeadlineExceeded,
    ShuttingDown,
}

/// Final outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum RequestOutcome {
    Succeeded,
    Failed,
    Rejected(RejectReason),
    Shed,
}

/// Archived record of a finished request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionRecord {
    pub request_id: String,
    pub workload_type: WorkloadType,
    pub priority: Priority,
    #[serde(default)]
    pub component: Option<ComponentId>,
    #[serde(default)]
    pub algorithm: Option<Algorithm>,
    pub outcome: RequestOutcome,
    #[serde(default)]
    pub latency_ms: f64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub error: Option<String>,
    /// Unix timestamp (milliseconds).
    pub completed_at: u64,
}

// ── Scaling ───────────────────────────────────────────────────────

/// Threshold rule for one `(component, trigger)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingRule {
    pub id: String,
    pub component: ComponentId,
    pub trigger: TriggerType,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub scale_up_action: ScalingAction,
    pub scale_down_action: ScalingAction,
    /// Multiplicative step applied on scale-up (> 1).
    pub scale_up_step: f64,
    /// Multiplicative step applied on scale-down (< 1).
    pub scale_down_step: f64,
    /// Allocation bounds for the rule's resource.
    pub min_value: f64,
    pub max_value: f64,
    pub cooldown_secs: u64,
    pub enabled: bool,
    /// Unix timestamp (seconds) the rule last fired.
    pub last_triggered: Option<u64>,
    pub resource: ResourceType,
}

impl ScalingRule {
    pub fn from_config(component: &str, rule: &RuleConfig, policy: &PolicyConfig) -> Self {
        let resource = rule.resource.unwrap_or_else(|| rule.trigger.default_resource());
        Self {
            id: rule
                .id
                .clone()
                .unwrap_or_else(|| format!("{component}:{}", rule.trigger)),
            component: component.to_string(),
            trigger: rule.trigger,
            scale_up_threshold: rule.scale_up_threshold,
            scale_down_threshold: rule.scale_down_threshold,
            scale_up_action: rule.scale_up_action,
            scale_down_action: rule.scale_down_action,
            scale_up_step: rule.scale_up_step.unwrap_or(policy.scale_up_factor),
            scale_down_step: rule.scale_down_step.unwrap_or(policy.scale_down_factor),
            min_value: rule
                .min_value
                .unwrap_or_else(|| policy.min_allocation.get(resource)),
            max_value: rule
                .max_value
                .unwrap_or_else(|| policy.max_allocation.get(resource)),
            cooldown_secs: rule.cooldown_secs,
            enabled: rule.enabled,
            last_triggered: None,
            resource,
        }
    }

    /// Describe the first configuration problem, if any.
    pub fn misconfiguration(&self) -> Option<String> {
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Some(format!(
                "scale_down_threshold {} must be below scale_up_threshold {}",
                self.scale_down_threshold, self.scale_up_threshold
            ));
        }
        if self.min_value > self.max_value {
            return Some(format!(
                "min_value {} exceeds max_value {}",
                self.min_value, self.max_value
            ));
        }
        if self.min_value < 0.0 || !self.max_value.is_finite() {
            return Some("allocation bounds must be finite and non-negative".to_string());
        }
        if self.scale_up_step <= 1.0 {
            return Some(format!("scale_up_step {} must exceed 1", self.scale_up_step));
        }
        if self.scale_down_step <= 0.0 || self.scale_down_step >= 1.0 {
            return Some(format!(
                "scale_down_step {} must be in (0, 1)",
                self.scale_down_step
            ));
        }
        None
    }

    /// Whether the rule is still cooling down at `now` (seconds).
    pub fn in_cooldown(&self, now: u64) -> bool {
        self.last_triggered
            .is_some_and(|t| now.saturating_sub(t) < self.cooldown_secs)
    }
}

/// Scaling policy and live allocation of one component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentScalingPolicy {
    pub component: ComponentId,
    pub strategy: ScalingStrategy,
    pub min_allocation: ResourceVector,
    pub max_allocation: ResourceVector,
    pub scale_up_factor: f64,
    pub scale_down_factor: f64,
    pub max_scale_up_per_hour: u32,
    pub max_scale_down_per_hour: u32,
    /// Kept in sync with the registry by the scaling executor.
    pub current_allocation: ResourceVector,
    pub rules: Vec<ScalingRule>,
}

impl ComponentScalingPolicy {
    pub fn from_config(config: &ComponentConfig) -> Self {
        let policy = &config.policy;
        Self {
            component: config.id.clone(),
            strategy: policy.strategy,
            min_allocation: policy.min_allocation,
            max_allocation: policy.max_allocation,
            scale_up_factor: policy.scale_up_factor,
            scale_down_factor: policy.scale_down_factor,
            max_scale_up_per_hour: policy.max_scale_up_per_hour,
            max_scale_down_per_hour: policy.max_scale_down_per_hour,
            current_allocation: policy.baseline_allocation(),
            rules: policy
                .rules
                .iter()
                .map(|r| ScalingRule::from_config(&config.id, r, policy))
                .collect(),
        }
    }

    /// Clamp a value into the policy's bounds for a resource.
    pub fn clamp(&self, resource: ResourceType, value: f64) -> f64 {
        value
            .max(self.min_allocation.get(resource))
            .min(self.max_allocation.get(resource))
    }
}

/// A confidence-scored proposal to change one resource allocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingDecision {
    pub id: String,
    pub component: ComponentId,
    pub trigger: TriggerType,
    pub action: ScalingAction,
    pub resource: ResourceType,
    #[serde(default)]
    pub rule_id: String,
    /// Metric reading that fired the rule.
    #[serde(default)]
    pub metric_value: f64,
    /// Threshold the reading crossed.
    #[serde(default)]
    pub threshold: f64,
    pub current_allocation: f64,
    pub target_allocation: f64,
    pub change_percent: f64,
    #[serde(default)]
    pub reason: String,
    /// Composite confidence in `[0, 100]`.
    pub confidence: f64,
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub executed: bool,
    #[serde(default)]
    pub success: bool,
    /// Back-filled once the outcome is known.
    #[serde(default)]
    pub effectiveness: Option<f64>,
    /// Unix timestamp (seconds).
    pub created_at: u64,
    #[serde(default)]
    pub executed_at: Option<u64>,
}

impl ScalingDecision {
    pub fn direction(&self) -> Option<ScaleDirection> {
        self.action.direction()
    }

    /// Allocation delta the decision applies.
    pub fn delta(&self) -> f64 {
        self.target_allocation - self.current_allocation
    }
}

// ── Alerts ────────────────────────────────────────────────────────

/// A threshold or overload alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub component: ComponentId,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    /// Unix timestamp (seconds) the alert was raised.
    pub created_at: u64,
    pub resolved: bool,
    #[serde(default)]
    pub resolved_at: Option<u64>,
    /// Raises suppressed into this alert by cooldown de-duplication.
    #[serde(default)]
    pub suppressed: u32,
}

// ── Load-balancer performance ─────────────────────────────────────

/// Outcome counters for one load-balancing algorithm, either all-time or
/// over its most recent requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlgorithmPerformance {
    pub algorithm: Algorithm,
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub successful_requests: u64,
    #[serde(default)]
    pub total_latency_ms: f64,
    #[serde(default)]
    pub distribution_score_sum: f64,
    #[serde(default)]
    pub distribution_samples: u64,
    /// Unix timestamp (seconds) the algorithm was last active.
    #[serde(default)]
    pub last_used: u64,
}

impl AlgorithmPerformance {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            total_requests: 0,
            successful_requests: 0,
            total_latency_ms: 0.0,
            distribution_score_sum: 0.0,
            distribution_samples: 0,
            last_used: 0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        match self.total_requests {
            0 => 0.0,
            n => self.successful_requests as f64 / n as f64 * 100.0,
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        match self.total_requests {
            0 => 0.0,
            n => self.total_latency_ms / n as f64,
        }
    }

    /// Mean load-distribution score observed while active; 100 unsampled.
    pub fn load_distribution_score(&self) -> f64 {
        match self.distribution_samples {
            0 => 100.0,
            n => self.distribution_score_sum / n as f64,
        }
    }

    /// Composite ranking score used by the algorithm optimizer.
    pub fn score(&self) -> f64 {
        let latency_score = (100.0 - self.avg_latency_ms() / 10.0).clamp(0.0, 100.0);
        0.4 * self.success_rate() + 0.3 * latency_score + 0.3 * self.load_distribution_score()
    }
}

/// Record of the optimizer (or an operator) changing the active algorithm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlgorithmSwitch {
    pub from: Algorithm,
    pub to: Algorithm,
    pub score: f64,
    pub at: u64,
}

// ── Persisted snapshot ────────────────────────────────────────────

/// Everything the controller persists across restarts.
///
/// Missing sections load as empty, and empty sections leave the
/// component's configured baseline in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ControllerSnapshot {
    pub saved_at: u64,
    pub active_algorithm: Option<Algorithm>,
    pub current_allocations: HashMap<ComponentId, ResourceVector>,
    pub algorithm_performance: HashMap<Algorithm, AlgorithmPerformance>,
    pub component_weights: HashMap<ComponentId, f64>,
    pub recent_decisions: Vec<ScalingDecision>,
    pub effectiveness_history: HashMap<ComponentId, Vec<f64>>,
    pub completions: Vec<CompletionRecord>,
}

pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
