//! Scaling executor — applies decisions under rate and capacity caps.
//!
//! Decisions wait in a pending list that is re-sorted every cycle by
//! confidence (then trigger), highest first. Each cycle applies at most
//! `batch_size` of them. Before applying, every decision is checked
//! against the rule cooldown of its `(component, trigger)`, the policy's
//! hourly scale-up/scale-down caps, and, for increases, the system-wide
//! allocation cap of its resource. Decisions failing a check are dropped;
//! the rule engine will propose again if the condition persists.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use loadpilot_core::ScalingSettings;
use loadpilot_state::{
    CapacityRegistry, ComponentId, ComponentScalingPolicy, ResourceType, ResourceVector,
    ScaleDirection, ScalingDecision, TriggerType,
};

use crate::error::{ScalingError, ScalingResult};

/// Window of the per-component scale-up/scale-down caps.
pub const HOUR_SECS: u64 = 3600;

/// Tolerance for float accumulation in the global cap check.
const CAP_EPSILON: f64 = 1e-9;

/// Callback type for performing scaling actions against real infrastructure.
///
/// The executor calls this with (component, resource, target allocation)
/// before recording the new allocation. An error leaves the allocation
/// unchanged and marks the decision failed.
pub type ScaleCallback = Box<dyn Fn(&str, ResourceType, f64) -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>;

/// Why a decision was dropped without being applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapViolation {
    /// The component already scaled `limit` times in this direction
    /// within the last hour.
    Hourly { direction: ScaleDirection, limit: u32 },
    /// Applying the change would push the system-wide total over its cap.
    Global {
        resource: ResourceType,
        total: f64,
        limit: f64,
    },
    /// The same `(component, trigger)` was applied too recently.
    Cooldown { remaining_secs: u64 },
}

impl fmt::Display for CapViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapViolation::Hourly { direction, limit } => {
                write!(f, "hourly {direction:?} cap of {limit} reached")
            }
            CapViolation::Global {
                resource,
                total,
                limit,
            } => write!(f, "global {resource} cap exceeded: {total:.2} > {limit:.2}"),
            CapViolation::Cooldown { remaining_secs } => {
                write!(f, "cooling down for another {remaining_secs}s")
            }
        }
    }
}

/// Result of executing one decision.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Applied { from: f64, to: f64 },
    Rejected(CapViolation),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub decision: ScalingDecision,
    pub outcome: ExecutionOutcome,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub batch_size: usize,
    /// Pending decisions older than this are discarded on refresh.
    pub max_age_secs: u64,
    /// Executed decisions kept in history.
    pub history: usize,
    pub global_max: ResourceVector,
}

impl From<&ScalingSettings> for ExecutorSettings {
    fn from(s: &ScalingSettings) -> Self {
        Self {
            batch_size: s.batch_size,
            max_age_secs: s.decision_max_age_secs,
            history: s.decision_history,
            global_max: s.global_max,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&ScalingSettings::default())
    }
}

pub struct ScalingExecutor {
    registry: CapacityRegistry,
    settings: ExecutorSettings,
    policies: HashMap<ComponentId, ComponentScalingPolicy>,
    pending: Vec<ScalingDecision>,
    /// Application times inside the last hour, per direction.
    hourly: HashMap<(ComponentId, ScaleDirection), VecDeque<u64>>,
    /// Last application time and cooldown, per trigger.
    last_applied: HashMap<(ComponentId, TriggerType), (u64, u64)>,
    history: VecDeque<ScalingDecision>,
    scale_fn: Option<ScaleCallback>,
}

impl ScalingExecutor {
    pub fn new(registry: CapacityRegistry, settings: ExecutorSettings) -> Self {
        Self {
            registry,
            settings,
            policies: HashMap::new(),
            pending: Vec::new(),
            hourly: HashMap::new(),
            last_applied: HashMap::new(),
            history: VecDeque::new(),
            scale_fn: None,
        }
    }

    /// Set the callback used to perform scaling.
    pub fn with_scale_fn(mut self, f: ScaleCallback) -> Self {
        self.set_scale_fn(f);
        self
    }

    pub fn set_scale_fn(&mut self, f: ScaleCallback) {
        self.scale_fn = Some(f);
    }

    pub fn register_policy(&mut self, policy: ComponentScalingPolicy) {
        self.policies.insert(policy.component.clone(), policy);
    }

    pub fn policy(&self, component: &str) -> Option<&ComponentScalingPolicy> {
        self.policies.get(component)
    }

    /// Current allocation of every component with a policy.
    pub fn allocations(&self) -> HashMap<ComponentId, ResourceVector> {
        self.policies
            .iter()
            .map(|(id, p)| (id.clone(), p.current_allocation))
            .collect()
    }

    /// Sum of one resource's current allocation across all policies.
    pub fn total_allocation(&self, resource: ResourceType) -> f64 {
        self.policies
            .values()
            .map(|p| p.current_allocation.get(resource))
            .sum()
    }

    /// Queue a decision. A pending decision for the same
    /// `(component, trigger)` is replaced.
    pub fn enqueue(&mut self, decision: ScalingDecision) -> ScalingResult<()> {
        if !self.policies.contains_key(&decision.component) {
            return Err(ScalingError::UnknownComponent(decision.component));
        }
        self.pending
            .retain(|d| !(d.component == decision.component && d.trigger == decision.trigger));
        debug!(component = %decision.component, id = %decision.id, confidence = decision.confidence, "decision queued");
        self.pending.push(decision);
        Ok(())
    }

    pub fn pending(&self) -> &[ScalingDecision] {
        &self.pending
    }

    /// Drop aged decisions and re-sort the rest, highest confidence first.
    pub fn refresh(&mut self, now: u64) {
        let max_age = self.settings.max_age_secs;
        self.pending.retain(|d| {
            let fresh = now.saturating_sub(d.created_at) <= max_age;
            if !fresh {
                debug!(component = %d.component, id = %d.id, "pending decision expired");
            }
            fresh
        });
        self.pending.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.trigger.cmp(&a.trigger))
        });
    }

    /// Scale actions counted against a direction's hourly cap at `now`.
    pub fn hourly_count(&mut self, component: &str, direction: ScaleDirection, now: u64) -> u32 {
        let Some(times) = self.hourly.get_mut(&(component.to_string(), direction)) else {
            return 0;
        };
        while times.front().is_some_and(|t| now.saturating_sub(*t) >= HOUR_SECS) {
            times.pop_front();
        }
        times.len() as u32
    }

    /// Check a decision against cooldown, hourly, and global caps.
    pub fn check(&mut self, decision: &ScalingDecision, now: u64) -> Result<(), CapViolation> {
        if let Some((at, cooldown)) = self
            .last_applied
            .get(&(decision.component.clone(), decision.trigger))
        {
            let elapsed = now.saturating_sub(*at);
            if elapsed < *cooldown {
                return Err(CapViolation::Cooldown {
                    remaining_secs: cooldown - elapsed,
                });
            }
        }

        let Some(direction) = decision.direction() else {
            return Ok(());
        };
        let limit = self
            .policies
            .get(&decision.component)
            .map_or(0, |p| match direction {
                ScaleDirection::Up => p.max_scale_up_per_hour,
                ScaleDirection::Down => p.max_scale_down_per_hour,
            });
        if self.hourly_count(&decision.component, direction, now) >= limit {
            return Err(CapViolation::Hourly { direction, limit });
        }

        let delta = decision.delta();
        if delta > 0.0 {
            let current = self
                .policies
                .get(&decision.component)
                .map_or(decision.current_allocation, |p| {
                    p.current_allocation.get(decision.resource)
                });
            let total = self.total_allocation(decision.resource) - current + decision.target_allocation;
            let limit = self.settings.global_max.get(decision.resource);
            if total > limit + CAP_EPSILON {
                return Err(CapViolation::Global {
                    resource: decision.resource,
                    total,
                    limit,
                });
            }
        }

        Ok(())
    }

    /// Refresh, then execute up to one batch of pending decisions.
    pub async fn run_cycle(&mut self, now: u64) -> Vec<ExecutionReport> {
        self.refresh(now);
        let take = self.settings.batch_size.min(self.pending.len());
        let batch: Vec<ScalingDecision> = self.pending.drain(..take).collect();

        let mut reports = Vec::with_capacity(batch.len());
        for decision in batch {
            reports.push(self.execute(decision, now).await);
        }
        reports
    }

    async fn execute(&mut self, mut decision: ScalingDecision, now: u64) -> ExecutionReport {
        if let Err(violation) = self.check(&decision, now) {
            warn!(
                component = %decision.component,
                trigger = %decision.trigger,
                %violation,
                "scaling decision dropped"
            );
            return ExecutionReport {
                decision,
                outcome: ExecutionOutcome::Rejected(violation),
            };
        }

        let outcome = match self.apply(&decision).await {
            Ok(from) => {
                info!(
                    component = %decision.component,
                    resource = %decision.resource,
                    from,
                    to = decision.target_allocation,
                    confidence = decision.confidence,
                    "allocation applied"
                );
                if let Some(direction) = decision.direction() {
                    self.hourly
                        .entry((decision.component.clone(), direction))
                        .or_default()
                        .push_back(now);
                }
                self.last_applied.insert(
                    (decision.component.clone(), decision.trigger),
                    (now, decision.cooldown_secs),
                );
                decision.success = true;
                ExecutionOutcome::Applied {
                    from,
                    to: decision.target_allocation,
                }
            }
            Err(e) => {
                warn!(component = %decision.component, error = %e, "scaling action failed");
                decision.success = false;
                ExecutionOutcome::Failed(e.to_string())
            }
        };

        decision.executed = true;
        decision.executed_at = Some(now);
        self.archive(decision.clone());
        ExecutionReport { decision, outcome }
    }

    /// Write the target allocation through the callback, the registry,
    /// and the policy. Returns the previous allocation.
    async fn apply(&mut self, decision: &ScalingDecision) -> ScalingResult<f64> {
        let from = self
            .policies
            .get(&decision.component)
            .map(|p| p.current_allocation.get(decision.resource))
            .ok_or_else(|| ScalingError::UnknownComponent(decision.component.clone()))?;

        if let Some(ref scale_fn) = self.scale_fn {
            scale_fn(&decision.component, decision.resource, decision.target_allocation)
                .await
                .map_err(|e| ScalingError::Callback(e.to_string()))?;
        }

        self.registry
            .set_allocation(&decision.component, decision.resource, decision.target_allocation)
            .await?;
        if let Some(policy) = self.policies.get_mut(&decision.component) {
            policy
                .current_allocation
                .set(decision.resource, decision.target_allocation);
        }
        Ok(from)
    }

    fn archive(&mut self, decision: ScalingDecision) {
        self.history.push_back(decision);
        while self.history.len() > self.settings.history {
            self.history.pop_front();
        }
    }

    /// Record the effectiveness of an archived decision.
    pub fn backfill_effectiveness(&mut self, decision_id: &str, score: f64) {
        if let Some(d) = self.history.iter_mut().rev().find(|d| d.id == decision_id) {
            d.effectiveness = Some(score);
        }
    }

    /// Executed decisions, oldest first.
    pub fn history(&self) -> Vec<ScalingDecision> {
        self.history.iter().cloned().collect()
    }

    /// Executed decisions for one component, oldest first.
    pub fn component_history(&self, component: &str) -> Vec<&ScalingDecision> {
        self.history
            .iter()
            .filter(|d| d.component == component)
            .collect()
    }

    /// Load persisted allocations into policies and the registry.
    ///
    /// Components without a policy are ignored. Values are clamped into
    /// the policy bounds, which may have changed since the save.
    pub async fn restore_allocations(&mut self, allocations: &HashMap<ComponentId, ResourceVector>) {
        for (component, saved) in allocations {
            let Some(policy) = self.policies.get_mut(component) else {
                debug!(%component, "ignoring persisted allocation for unknown component");
                continue;
            };
            let mut allocation = ResourceVector::default();
            for (resource, value) in saved.iter() {
                allocation.set(resource, policy.clamp(resource, value));
            }
            policy.current_allocation = allocation;
            if let Err(e) = self.registry.set_allocations(component, allocation).await {
                warn!(%component, error = %e, "failed to restore allocation");
            }
        }
    }

    /// Seed history, cooldowns, and hourly counters from persisted decisions.
    pub fn restore_history(&mut self, decisions: &[ScalingDecision]) {
        let mut executed: Vec<&ScalingDecision> = decisions
            .iter()
            .filter(|d| d.executed && self.policies.contains_key(&d.component))
            .collect();
        executed.sort_by_key(|d| d.executed_at.unwrap_or(d.created_at));

        for decision in executed {
            let at = decision.executed_at.unwrap_or(decision.created_at);
            if decision.success {
                if let Some(direction) = decision.direction() {
                    self.hourly
                        .entry((decision.component.clone(), direction))
                        .or_default()
                        .push_back(at);
                }
                self.last_applied.insert(
                    (decision.component.clone(), decision.trigger),
                    (at, decision.cooldown_secs),
                );
            }
            self.archive(decision.clone());
        }
    }
}
