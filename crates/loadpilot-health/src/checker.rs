//! Health probe logic.
//!
//! A probe turns a component's capacity record and metrics into a
//! [`ProbeResult`]; a [`HealthTracker`] smooths those results with
//! consecutive-failure and recovery thresholds.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use loadpilot_core::HealthSettings;
use loadpilot_state::{ComponentCapacity, ComponentId, ComponentMetrics, HealthStatus};

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The component is serving requests normally.
    Healthy,
    /// The component answered but is failing its work.
    Unhealthy,
    /// The probe itself could not be executed.
    Failed,
}

pub type ProbeFuture = Pin<Box<dyn Future<Output = ProbeResult> + Send>>;

/// Injectable probe. Receives the latest capacity record and metrics.
pub type ProbeFn =
    Arc<dyn Fn(ComponentCapacity, Option<ComponentMetrics>) -> ProbeFuture + Send + Sync>;

/// Tracks consecutive probe results for a single component.
#[derive(Debug)]
pub struct HealthTracker {
    status: HealthStatus,
    consecutive_failures: u32,
    /// Consecutive success count (for recovery).
    consecutive_successes: u32,
    /// Threshold before marking unhealthy.
    unhealthy_threshold: u32,
    /// Successes needed to recover from unhealthy.
    healthy_threshold: u32,
}

impl HealthTracker {
    pub fn new(settings: &HealthSettings) -> Self {
        Self::with_thresholds(settings.unhealthy_threshold, settings.healthy_threshold)
    }

    pub fn with_thresholds(unhealthy_threshold: u32, healthy_threshold: u32) -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            unhealthy_threshold: unhealthy_threshold.max(1),
            healthy_threshold: healthy_threshold.max(1),
        }
    }

    /// Record a probe result and return the new health status.
    pub fn record(&mut self, result: ProbeResult) -> HealthStatus {
        match result {
            ProbeResult::Healthy => {
                self.consecutive_failures = 0;
                self.consecutive_successes += 1;

                if self.consecutive_successes >= self.healthy_threshold {
                    if self.status == HealthStatus::Unhealthy {
                        debug!(
                            successes = self.consecutive_successes,
                            "component recovered to healthy"
                        );
                    }
                    self.status = HealthStatus::Healthy;
                }
            }
            ProbeResult::Unhealthy | ProbeResult::Failed => {
                self.consecutive_successes = 0;
                self.consecutive_failures += 1;

                if self.consecutive_failures >= self.unhealthy_threshold {
                    if self.status != HealthStatus::Unhealthy {
                        warn!(
                            failures = self.consecutive_failures,
                            threshold = self.unhealthy_threshold,
                            "component marked unhealthy"
                        );
                    }
                    self.status = HealthStatus::Unhealthy;
                }
            }
        }

        self.status
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Default probe: judges the success rate of the requests a component
/// completed since it was last probed.
///
/// A window with fewer than `min_requests` completions is inconclusive
/// and counts as healthy, which lets a component that was taken out of
/// rotation (and so stopped receiving work) recover.
pub fn metrics_probe(min_requests: u64, min_success_rate: f64) -> ProbeFn {
    // component → (successful, failed) at the previous probe
    let seen: Arc<Mutex<HashMap<ComponentId, (u64, u64)>>> = Arc::default();

    Arc::new(move |capacity: ComponentCapacity, metrics: Option<ComponentMetrics>| -> ProbeFuture {
        let result = match metrics {
            None => ProbeResult::Healthy,
            Some(m) => {
                let mut seen = seen.lock().unwrap_or_else(|e| e.into_inner());
                let (ok_before, failed_before) =
                    seen.get(&capacity.component).copied().unwrap_or((0, 0));
                let ok = m.successful_requests.saturating_sub(ok_before);
                let failed = m.failed_requests.saturating_sub(failed_before);

                if ok + failed < min_requests {
                    ProbeResult::Healthy
                } else {
                    seen.insert(
                        capacity.component.clone(),
                        (m.successful_requests, m.failed_requests),
                    );
                    let rate = ok as f64 / (ok + failed) as f64 * 100.0;
                    if rate < min_success_rate {
                        ProbeResult::Unhealthy
                    } else {
                        ProbeResult::Healthy
                    }
                }
            }
        };
        Box::pin(async move { result })
    })
}
