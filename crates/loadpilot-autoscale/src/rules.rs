//! Scaling rule engine.
//!
//! Holds the threshold rules of every component and evaluates them
//! against the latest readings. A rule fires at most once per tick and
//! never while cooling down. The cooldown starts only once a decision
//! from the rule is applied, so a proposal that is discarded or dropped
//! on a cap is proposed again next tick. Rules that fail validation at
//! load time are disabled and the rest keep running.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use loadpilot_state::{
    ComponentCapacity, ComponentId, ComponentMetrics, ComponentScalingPolicy, ResourceType,
    ResourceVector, ScaleDirection, ScalingAction, ScalingRule, ScalingStrategy, TriggerType,
};

use crate::error::ScalingError;

/// Readings kept per `(component, trigger)` for trend extrapolation.
const TREND_SAMPLES: usize = 5;

/// Latest observable values of one component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentReading {
    /// Utilization in percent per resource.
    pub utilization: ResourceVector,
    pub load_percent: f64,
    pub latency_ms: f64,
    pub throughput: f64,
    pub error_rate: f64,
}

impl ComponentReading {
    pub fn new(capacity: &ComponentCapacity, metrics: Option<&ComponentMetrics>) -> Self {
        Self {
            utilization: capacity.current_utilization,
            load_percent: capacity.load_percent(),
            latency_ms: metrics.map_or(0.0, |m| m.avg_latency_ms),
            throughput: metrics.map_or(0.0, |m| m.throughput),
            error_rate: metrics.map_or(0.0, ComponentMetrics::error_rate),
        }
    }

    pub fn value(&self, trigger: TriggerType) -> f64 {
        match trigger {
            TriggerType::Cpu => self.utilization.get(ResourceType::Cpu),
            TriggerType::Memory => self.utilization.get(ResourceType::Memory),
            TriggerType::Network => self.utilization.get(ResourceType::Network),
            TriggerType::Storage => self.utilization.get(ResourceType::Storage),
            TriggerType::Latency => self.latency_ms,
            TriggerType::Throughput => self.throughput,
            TriggerType::ErrorRate => self.error_rate,
            TriggerType::TaskLoad => self.load_percent,
        }
    }
}

/// A rule that crossed one of its thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTrigger {
    pub rule_id: String,
    pub component: ComponentId,
    pub trigger: TriggerType,
    pub resource: ResourceType,
    pub action: ScalingAction,
    pub direction: ScaleDirection,
    /// Raw reading.
    pub observed: f64,
    /// Value compared against the threshold (trend-adjusted for
    /// predictive strategies).
    pub value: f64,
    pub threshold: f64,
    /// Multiplicative allocation step.
    pub step: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub cooldown_secs: u64,
    /// Unix timestamp (seconds) of the evaluation.
    pub at: u64,
}

#[derive(Default)]
pub struct RuleEngine {
    rules: BTreeMap<ComponentId, Vec<ScalingRule>>,
    strategies: HashMap<ComponentId, ScalingStrategy>,
    samples: HashMap<(ComponentId, TriggerType), VecDeque<f64>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a component's rules, disabling the misconfigured ones.
    ///
    /// A second rule on an already-covered trigger is misconfigured too:
    /// one rule per `(component, trigger)`.
    pub fn load_policy(&mut self, policy: &ComponentScalingPolicy) -> Vec<ScalingError> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(policy.rules.len());

        for rule in &policy.rules {
            let mut rule = rule.clone();
            let problem = if !rule.enabled {
                None
            } else if let Some(reason) = rule.misconfiguration() {
                Some(reason)
            } else if !seen.insert(rule.trigger) {
                Some(format!("another rule already covers trigger {}", rule.trigger))
            } else {
                None
            };

            if let Some(reason) = problem {
                warn!(component = %policy.component, rule = %rule.id, %reason, "scaling rule disabled");
                rule.enabled = false;
                errors.push(ScalingError::RuleMisconfigured {
                    rule: rule.id.clone(),
                    reason,
                });
            }
            rules.push(rule);
        }

        self.strategies
            .insert(policy.component.clone(), policy.strategy);
        self.rules.insert(policy.component.clone(), rules);
        errors
    }

    pub fn rules(&self, component: &str) -> &[ScalingRule] {
        self.rules.get(component).map_or(&[], Vec::as_slice)
    }

    pub fn components(&self) -> Vec<ComponentId> {
        self.rules.keys().cloned().collect()
    }

    /// Evaluate one component's enabled rules against a reading.
    pub fn evaluate(
        &mut self,
        component: &str,
        reading: &ComponentReading,
        now: u64,
    ) -> Vec<RuleTrigger> {
        let strategy = self
            .strategies
            .get(component)
            .copied()
            .unwrap_or_default();
        let Some(rules) = self.rules.get(component) else {
            return Vec::new();
        };

        let mut fired = Vec::new();
        for rule in rules.iter().filter(|r| r.enabled) {
            let observed = reading.value(rule.trigger);
            let samples = self
                .samples
                .entry((component.to_string(), rule.trigger))
                .or_default();
            samples.push_back(observed);
            while samples.len() > TREND_SAMPLES {
                samples.pop_front();
            }
            let value = if strategy.uses_trend() {
                extrapolate(samples)
            } else {
                observed
            };

            if rule.in_cooldown(now) {
                debug!(component, rule = %rule.id, "rule cooling down");
                continue;
            }

            let (action, threshold) = if value > rule.scale_up_threshold {
                (rule.scale_up_action, rule.scale_up_threshold)
            } else if value < rule.scale_down_threshold {
                (rule.scale_down_action, rule.scale_down_threshold)
            } else {
                continue;
            };
            let Some(direction) = action.direction() else {
                continue;
            };
            let step = match direction {
                ScaleDirection::Up => rule.scale_up_step,
                ScaleDirection::Down => rule.scale_down_step,
            };

            debug!(component, rule = %rule.id, value, threshold, ?direction, "rule fired");
            fired.push(RuleTrigger {
                rule_id: rule.id.clone(),
                component: component.to_string(),
                trigger: rule.trigger,
                resource: rule.resource,
                action,
                direction,
                observed,
                value,
                threshold,
                step,
                min_value: rule.min_value,
                max_value: rule.max_value,
                cooldown_secs: rule.cooldown_secs,
                at: now,
            });
        }
        fired
    }

    /// Start the cooldown of the rule behind an applied decision.
    pub fn mark_applied(&mut self, component: &str, trigger: TriggerType, now: u64) {
        let rule = self
            .rules
            .get_mut(component)
            .and_then(|rules| rules.iter_mut().find(|r| r.enabled && r.trigger == trigger));
        if let Some(rule) = rule {
            rule.last_triggered = Some(now);
        }
    }
}

/// Latest sample plus the mean per-sample change across the window.
fn extrapolate(samples: &VecDeque<f64>) -> f64 {
    let (Some(first), Some(last)) = (samples.front(), samples.back()) else {
        return 0.0;
    };
    if samples.len() < 2 {
        return *last;
    }
    let slope = (last - first) / (samples.len() - 1) as f64;
    (last + slope).max(0.0)
}
