//! Scaling decision engine.
//!
//! Turns a fired rule into a concrete allocation change and scores how
//! far the change can be trusted. Confidence is the mean of whichever of
//! four signals have inputs:
//!
//! - **deviation** — how far the reading overshot its threshold
//! - **effectiveness** — outcomes of this component's recent decisions
//! - **stability** — mean spacing between its past decisions
//! - **headroom** — room left below the allocation ceiling
//!
//! A signal without inputs is left out of the mean rather than counted
//! as zero, so a component with no history is scored on deviation and
//! headroom alone.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use loadpilot_state::{
    ComponentId, ComponentScalingPolicy, ResourceVector, ScaleDirection, ScalingDecision,
    ScalingStrategy,
};

use crate::rules::RuleTrigger;

/// Effectiveness back-filled for an applied decision.
pub const EFFECTIVENESS_SUCCESS: f64 = 80.0;
/// Effectiveness back-filled for a decision whose application failed.
pub const EFFECTIVENESS_FAILURE: f64 = 20.0;

/// Entries kept per component for effectiveness and decision spacing.
const HISTORY_LIMIT: usize = 100;

static DECISION_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct DecisionSettings {
    pub min_confidence: f64,
    pub effectiveness_window: usize,
    pub stability_reference_secs: f64,
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self {
            min_confidence: 70.0,
            effectiveness_window: 10,
            stability_reference_secs: 300.0,
        }
    }
}

/// The individual confidence inputs of a proposal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceSignals {
    pub deviation: Option<f64>,
    pub effectiveness: Option<f64>,
    pub stability: Option<f64>,
    pub headroom: Option<f64>,
}

impl ConfidenceSignals {
    /// Mean of the available signals, in `[0, 100]`. Zero when none are.
    pub fn score(&self) -> f64 {
        let present: Vec<f64> = [
            self.deviation,
            self.effectiveness,
            self.stability,
            self.headroom,
        ]
        .into_iter()
        .flatten()
        .map(|s| s.clamp(0.0, 100.0))
        .collect();
        if present.is_empty() {
            return 0.0;
        }
        (present.iter().sum::<f64>() / present.len() as f64).clamp(0.0, 100.0)
    }
}

struct Limits {
    strategy: ScalingStrategy,
    min: ResourceVector,
    max: ResourceVector,
}

pub struct DecisionEngine {
    settings: DecisionSettings,
    limits: HashMap<ComponentId, Limits>,
    effectiveness: HashMap<ComponentId, VecDeque<f64>>,
    /// Execution times (seconds) of past decisions.
    decision_times: HashMap<ComponentId, VecDeque<u64>>,
}

impl DecisionEngine {
    pub fn new(settings: DecisionSettings) -> Self {
        Self {
            settings,
            limits: HashMap::new(),
            effectiveness: HashMap::new(),
            decision_times: HashMap::new(),
        }
    }

    pub fn register_policy(&mut self, policy: &ComponentScalingPolicy) {
        self.limits.insert(
            policy.component.clone(),
            Limits {
                strategy: policy.strategy,
                min: policy.min_allocation,
                max: policy.max_allocation,
            },
        );
    }

    /// Confidence a decision for `component` needs under its strategy.
    pub fn required_confidence(&self, component: &str) -> f64 {
        let offset = self
            .limits
            .get(component)
            .map_or(0.0, |l| l.strategy.confidence_offset());
        (self.settings.min_confidence + offset).clamp(0.0, 100.0)
    }

    /// Build the decision a trigger calls for, whatever its confidence.
    ///
    /// `None` if the component has no policy or the allocation is
    /// already at the bound the trigger pushes towards.
    pub fn propose(&self, trigger: &RuleTrigger, current_allocation: f64) -> Option<ScalingDecision> {
        let limits = self.limits.get(&trigger.component)?;
        let resource = trigger.resource;
        let lower = trigger.min_value.max(limits.min.get(resource));
        let upper = trigger.max_value.min(limits.max.get(resource));
        if lower > upper {
            return None;
        }

        let target = (current_allocation * trigger.step).clamp(lower, upper);
        if (target - current_allocation).abs() < 1e-9 {
            debug!(component = %trigger.component, %resource, current_allocation, "allocation already at bound");
            return None;
        }
        let change_percent = if current_allocation > 0.0 {
            (target - current_allocation) / current_allocation * 100.0
        } else {
            100.0
        };

        let signals = self.signals(trigger, current_allocation, upper);
        let confidence = signals.score();
        let direction = match trigger.direction {
            ScaleDirection::Up => "above",
            ScaleDirection::Down => "below",
        };
        let seq = DECISION_SEQ.fetch_add(1, Ordering::Relaxed);

        Some(ScalingDecision {
            id: format!("{}-{}-{seq}", trigger.component, trigger.trigger),
            component: trigger.component.clone(),
            trigger: trigger.trigger,
            action: trigger.action,
            resource,
            rule_id: trigger.rule_id.clone(),
            metric_value: trigger.value,
            threshold: trigger.threshold,
            current_allocation,
            target_allocation: target,
            change_percent,
            reason: format!(
                "{} {:.1} {direction} threshold {:.1}",
                trigger.trigger, trigger.value, trigger.threshold
            ),
            confidence,
            cooldown_secs: trigger.cooldown_secs,
            executed: false,
            success: false,
            effectiveness: None,
            created_at: trigger.at,
            executed_at: None,
        })
    }

    /// Propose, then discard proposals below the required confidence.
    pub fn decide(&self, trigger: &RuleTrigger, current_allocation: f64) -> Option<ScalingDecision> {
        let decision = self.propose(trigger, current_allocation)?;
        let required = self.required_confidence(&decision.component);
        if decision.confidence < required {
            debug!(
                component = %decision.component,
                trigger = %decision.trigger,
                confidence = decision.confidence,
                required,
                "low-confidence decision discarded"
            );
            return None;
        }
        Some(decision)
    }

    pub fn signals(
        &self,
        trigger: &RuleTrigger,
        current_allocation: f64,
        max_allocation: f64,
    ) -> ConfidenceSignals {
        let deviation = (trigger.threshold.abs() > f64::EPSILON).then(|| {
            ((trigger.value - trigger.threshold).abs() / trigger.threshold.abs() * 200.0).min(100.0)
        });

        let effectiveness = self.mean_effectiveness(&trigger.component);

        let stability = self.decision_times.get(&trigger.component).and_then(|times| {
            if times.len() < 2 {
                return None;
            }
            let (first, last) = (times.front()?, times.back()?);
            let mean_gap = last.saturating_sub(*first) as f64 / (times.len() - 1) as f64;
            Some((mean_gap / self.settings.stability_reference_secs * 100.0).min(100.0))
        });

        let headroom = (max_allocation > 0.0)
            .then(|| (max_allocation - current_allocation) / max_allocation * 100.0);

        ConfidenceSignals {
            deviation,
            effectiveness,
            stability,
            headroom,
        }
    }

    /// Mean of the most recent effectiveness scores.
    pub fn mean_effectiveness(&self, component: &str) -> Option<f64> {
        let scores = self.effectiveness.get(component)?;
        let window = self.settings.effectiveness_window.max(1);
        let recent: Vec<f64> = scores.iter().rev().take(window).copied().collect();
        if recent.is_empty() {
            return None;
        }
        Some(recent.iter().sum::<f64>() / recent.len() as f64)
    }

    /// Back-fill the effectiveness of an executed decision.
    pub fn record_outcome(&mut self, decision: &ScalingDecision) -> Option<f64> {
        if !decision.executed {
            return None;
        }
        let score = if decision.success {
            EFFECTIVENESS_SUCCESS
        } else {
            EFFECTIVENESS_FAILURE
        };
        push_bounded(
            self.effectiveness
                .entry(decision.component.clone())
                .or_default(),
            score,
        );
        push_bounded(
            self.decision_times
                .entry(decision.component.clone())
                .or_default(),
            decision.executed_at.unwrap_or(decision.created_at),
        );
        Some(score)
    }

    pub fn effectiveness_history(&self) -> HashMap<ComponentId, Vec<f64>> {
        self.effectiveness
            .iter()
            .map(|(id, scores)| (id.clone(), scores.iter().copied().collect()))
            .collect()
    }

    /// Seed history from persisted state. Components without a policy
    /// are ignored.
    pub fn restore(
        &mut self,
        effectiveness: &HashMap<ComponentId, Vec<f64>>,
        decisions: &[ScalingDecision],
    ) {
        for (component, scores) in effectiveness {
            if !self.limits.contains_key(component) {
                continue;
            }
            let entry = self.effectiveness.entry(component.clone()).or_default();
            entry.clear();
            for score in scores {
                push_bounded(entry, *score);
            }
        }

        let mut executed: Vec<&ScalingDecision> = decisions
            .iter()
            .filter(|d| d.executed && self.limits.contains_key(&d.component))
            .collect();
        executed.sort_by_key(|d| d.executed_at.unwrap_or(d.created_at));
        for decision in executed {
            push_bounded(
                self.decision_times
                    .entry(decision.component.clone())
                    .or_default(),
                decision.executed_at.unwrap_or(decision.created_at),
            );
        }
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, value: T) {
    buf.push_back(value);
    while buf.len() > HISTORY_LIMIT {
        buf.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadpilot_state::{ResourceType, ScalingAction, TriggerType};

    fn policy(strategy: ScalingStrategy) -> ComponentScalingPolicy {
        ComponentScalingPolicy {
            component: "pricing".to_string(),
            strategy,
            min_allocation: ResourceVector::uniform(0.5),
            max_allocation: ResourceVector::uniform(4.0),
            scale_up_factor: 1.3,
            scale_down_factor: 0.8,
            max_scale_up_per_hour: 6,
            max_scale_down_per_hour: 3,
            current_allocation: ResourceVector::uniform(2.0),
            rules: Vec::new(),
        }
    }

    fn engine(strategy: ScalingStrategy) -> DecisionEngine {
        let mut engine = DecisionEngine::new(DecisionSettings::default());
        engine.register_policy(&policy(strategy));
        engine
    }

    fn cpu_trigger(value: f64, threshold: f64, step: f64) -> RuleTrigger {
        RuleTrigger {
            rule_id: "pricing:cpu".to_string(),
            component: "pricing".to_string(),
            trigger: TriggerType::Cpu,
            resource: ResourceType::Cpu,
            action: if step > 1.0 {
                ScalingAction::ScaleUp
            } else {
                ScalingAction::ScaleDown
            },
            direction: if step > 1.0 {
                ScaleDirection::Up
            } else {
                ScaleDirection::Down
            },
            observed: value,
            value,
            threshold,
            step,
            min_value: 0.5,
            max_value: 4.0,
            cooldown_secs: 300,
            at: 1_000,
        }
    }

    fn executed(engine: &mut DecisionEngine, at: u64, success: bool) {
        let mut d = engine.propose(&cpu_trigger(95.0, 80.0, 1.3), 1.0).unwrap();
        d.executed = true;
        d.success = success;
        d.executed_at = Some(at);
        engine.record_outcome(&d);
    }

    #[test]
    fn proposes_stepped_target_with_change_percent() {
        let engine = engine(ScalingStrategy::Reactive);
        let d = engine.propose(&cpu_trigger(85.0, 80.0, 1.3), 2.0).unwrap();

        assert!((d.target_allocation - 2.6).abs() < 1e-9);
        assert!((d.change_percent - 30.0).abs() < 1e-6);
        assert_eq!(d.current_allocation, 2.0);
        assert_eq!(d.action, ScalingAction::ScaleUp);
        assert!(d.reason.contains("above threshold"));
    }

    #[test]
    fn target_is_clamped_to_bounds() {
        let engine = engine(ScalingStrategy::Reactive);
        let d = engine.propose(&cpu_trigger(99.0, 80.0, 1.5), 3.5).unwrap();
        assert_eq!(d.target_allocation, 4.0);

        let d = engine.propose(&cpu_trigger(5.0, 30.0, 0.5), 0.6).unwrap();
        assert_eq!(d.target_allocation, 0.5);
    }

    #[test]
    fn no_proposal_at_bound() {
        let engine = engine(ScalingStrategy::Reactive);
        assert!(engine.propose(&cpu_trigger(99.0, 80.0, 1.3), 4.0).is_none());
        assert!(engine.propose(&cpu_trigger(1.0, 30.0, 0.8), 0.5).is_none());
    }

    #[test]
    fn unknown_component_gets_no_proposal() {
        let engine = DecisionEngine::new(DecisionSettings::default());
        assert!(engine.propose(&cpu_trigger(99.0, 80.0, 1.3), 1.0).is_none());
    }

    #[test]
    fn cold_component_scores_deviation_and_headroom_only() {
        let engine = engine(ScalingStrategy::Reactive);
        let signals = engine.signals(&cpu_trigger(85.0, 80.0, 1.3), 2.0, 4.0);
        assert_eq!(signals.deviation, Some(12.5));
        assert_eq!(signals.headroom, Some(50.0));
        assert!(signals.effectiveness.is_none());
        assert!(signals.stability.is_none());
        assert_eq!(signals.score(), 31.25);
    }

    #[test]
    fn deviation_saturates_at_100() {
        let engine = engine(ScalingStrategy::Reactive);
        let signals = engine.signals(&cpu_trigger(100.0, 50.0, 1.3), 2.0, 4.0);
        assert_eq!(signals.deviation, Some(100.0));
    }

    #[test]
    fn history_feeds_effectiveness_and_stability() {
        let mut engine = engine(ScalingStrategy::Reactive);
        executed(&mut engine, 1_000, true);
        executed(&mut engine, 1_300, false);

        let signals = engine.signals(&cpu_trigger(85.0, 80.0, 1.3), 2.0, 4.0);
        assert_eq!(signals.effectiveness, Some(50.0));
        assert_eq!(signals.stability, Some(100.0));

        executed(&mut engine, 1_330, true);
        let signals = engine.signals(&cpu_trigger(85.0, 80.0, 1.3), 2.0, 4.0);
        // Mean spacing 165 s of a 300 s reference.
        assert!((signals.stability.unwrap() - 55.0).abs() < 1e-9);
    }

    #[test]
    fn confidence_stays_in_range() {
        let engine = engine(ScalingStrategy::Reactive);
        for (value, threshold, current) in [(1e9, 1.0, 0.5), (0.0, 80.0, 4.0), (80.0, 80.0, 1.0)] {
            if let Some(d) = engine.propose(&cpu_trigger(value, threshold, 1.3), current) {
                assert!((0.0..=100.0).contains(&d.confidence));
            }
        }
        assert_eq!(ConfidenceSignals::default().score(), 0.0);
    }

    #[test]
    fn decide_discards_below_required_confidence() {
        let engine = engine(ScalingStrategy::Reactive);
        // Deviation 100, headroom 87.5: confidence 93.75.
        assert!(engine.decide(&cpu_trigger(160.0, 80.0, 1.3), 0.5).is_some());
        // Deviation 12.5, headroom 50: confidence 31.25.
        assert!(engine.decide(&cpu_trigger(85.0, 80.0, 1.3), 2.0).is_none());
    }

    #[test]
    fn strategy_shifts_required_confidence() {
        assert_eq!(engine(ScalingStrategy::Conservative).required_confidence("pricing"), 80.0);
        assert_eq!(engine(ScalingStrategy::Aggressive).required_confidence("pricing"), 60.0);
        assert_eq!(engine(ScalingStrategy::Predictive).required_confidence("pricing"), 70.0);

        // Confidence 75 passes the default bar but not the conservative one.
        let trigger = cpu_trigger(120.0, 80.0, 1.3);
        assert!(engine(ScalingStrategy::Reactive).decide(&trigger, 2.0).is_some());
        assert!(engine(ScalingStrategy::Conservative).decide(&trigger, 2.0).is_none());
    }

    #[test]
    fn effectiveness_window_uses_most_recent() {
        let mut engine = engine(ScalingStrategy::Reactive);
        for i in 0..10 {
            executed(&mut engine, i * 10, false);
        }
        for i in 10..20 {
            executed(&mut engine, i * 10, true);
        }
        assert_eq!(engine.mean_effectiveness("pricing"), Some(80.0));
    }

    #[test]
    fn unexecuted_decisions_leave_no_history() {
        let mut engine = engine(ScalingStrategy::Reactive);
        let d = engine.propose(&cpu_trigger(95.0, 80.0, 1.3), 1.0).unwrap();
        assert!(engine.record_outcome(&d).is_none());
        assert!(engine.mean_effectiveness("pricing").is_none());
    }

    #[test]
    fn restore_seeds_history_for_known_components() {
        let mut engine = engine(ScalingStrategy::Reactive);
        let mut history = HashMap::new();
        history.insert("pricing".to_string(), vec![80.0, 20.0]);
        history.insert("ghost".to_string(), vec![80.0]);
        engine.restore(&history, &[]);

        assert_eq!(engine.mean_effectiveness("pricing"), Some(50.0));
        assert!(!engine.effectiveness_history().contains_key("ghost"));
    }
}
