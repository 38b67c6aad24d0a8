//! Dashboard report types and load-distribution scoring.

use serde::{Deserialize, Serialize};

use loadpilot_state::{
    Algorithm, AlgorithmPerformance, AlgorithmSwitch, ComponentCapacity, ComponentId,
    ComponentMetrics, ComponentStatus, HealthStatus, ResourceVector,
};

/// Per-component row of the metrics report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentReport {
    pub component: ComponentId,
    pub status: ComponentStatus,
    pub health: HealthStatus,
    pub load_percent: f64,
    pub current_tasks: u32,
    pub max_concurrent_tasks: u32,
    /// Utilization in percent per resource.
    pub resource_utilization: ResourceVector,
    pub allocation: ResourceVector,
    pub weight: f64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub throughput: f64,
    pub total_requests: u64,
}

impl ComponentReport {
    pub fn new(capacity: &ComponentCapacity, metrics: Option<&ComponentMetrics>) -> Self {
        let empty = ComponentMetrics::new(capacity.component.clone());
        let metrics = metrics.unwrap_or(&empty);
        Self {
            component: capacity.component.clone(),
            status: capacity.status,
            health: capacity.health,
            load_percent: capacity.load_percent(),
            current_tasks: capacity.current_tasks,
            max_concurrent_tasks: capacity.max_concurrent_tasks,
            resource_utilization: capacity.current_utilization,
            allocation: capacity.allocation,
            weight: capacity.weight,
            success_rate: metrics.success_rate(),
            avg_latency_ms: metrics.avg_latency_ms,
            throughput: metrics.throughput,
            total_requests: metrics.total_requests,
        }
    }
}

/// Request processor counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ProcessorCounters {
    pub submitted: u64,
    pub accepted: u64,
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rejected: u64,
    pub retried: u64,
    pub shed: u64,
    pub in_flight: u64,
}

/// System-wide section of the metrics report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemReport {
    pub active_algorithm: Algorithm,
    pub load_distribution_score: f64,
    pub system_load_ratio: f64,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub healthy_components: usize,
    pub total_components: usize,
    pub processor: ProcessorCounters,
    pub algorithm_performance: Vec<AlgorithmPerformance>,
    pub recent_switches: Vec<AlgorithmSwitch>,
}

/// Response of the metrics query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsReport {
    pub components: Vec<ComponentReport>,
    pub system: SystemReport,
}

/// 100 minus the coefficient of variation (in percent) of per-component
/// load, clamped to `[0, 100]`. Perfectly even load scores 100.
pub fn load_distribution_score(loads: &[f64]) -> f64 {
    if loads.len() < 2 {
        return 100.0;
    }
    let n = loads.len() as f64;
    let mean = loads.iter().sum::<f64>() / n;
    if mean <= f64::EPSILON {
        return 100.0;
    }
    let variance = loads.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / n;
    let cv = variance.sqrt() / mean * 100.0;
    (100.0 - cv).clamp(0.0, 100.0)
}
