//! Scaling controller — the three scaling loops and their shared engines.
//!
//! ```text
//! monitor loop ──RuleTrigger──▶ decision loop ──enqueue──▶ executor loop
//!   sample source                 confidence scoring          batch + caps
//!   evaluate rules                drop below threshold        apply, back-fill
//! ```
//!
//! Each engine sits behind its own mutex and is only locked for the
//! duration of a single step; no lock is held across a scale callback's
//! network call other than the executor's own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use loadpilot_core::ScalingSettings;
use loadpilot_health::AlertManager;
use loadpilot_metrics::{MetricsSource, MetricsStore};
use loadpilot_state::{
    CapacityRegistry, ComponentId, ComponentScalingPolicy, ResourceType, ResourceVector,
    ScaleDirection, ScalingDecision, ScalingRule, ScalingStrategy, epoch_secs,
};

use crate::decision::{DecisionEngine, DecisionSettings};
use crate::error::ScalingError;
use crate::executor::{
    CapViolation, ExecutionOutcome, ExecutionReport, ExecutorSettings, ScaleCallback,
    ScalingExecutor,
};
use crate::rules::{ComponentReading, RuleEngine, RuleTrigger};

/// Buffer between the monitor and decision loops.
const TRIGGER_CHANNEL: usize = 256;

/// Decisions included in a scaling report.
const REPORT_DECISIONS: usize = 20;

impl From<&ScalingSettings> for DecisionSettings {
    fn from(s: &ScalingSettings) -> Self {
        Self {
            min_confidence: s.min_confidence,
            effectiveness_window: s.effectiveness_window,
            stability_reference_secs: s.stability_reference_secs,
        }
    }
}

/// Running totals of the scaling pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingStats {
    pub triggers: u64,
    pub discarded: u64,
    pub queued: u64,
    pub applied: u64,
    pub rejected: u64,
    pub failed: u64,
}

/// Per-component row of the scaling report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentScalingReport {
    pub component: ComponentId,
    pub strategy: ScalingStrategy,
    pub allocation: ResourceVector,
    pub min_allocation: ResourceVector,
    pub max_allocation: ResourceVector,
    pub required_confidence: f64,
    pub pending_decisions: usize,
    pub decisions_executed: usize,
    pub scale_ups_last_hour: u32,
    pub scale_downs_last_hour: u32,
    pub mean_effectiveness: Option<f64>,
    pub effectiveness_history: Vec<f64>,
    pub last_decision: Option<ScalingDecision>,
    pub rules: Vec<ScalingRule>,
}

/// Response of the scaling metrics query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingReport {
    pub components: Vec<ComponentScalingReport>,
    pub total_allocation: ResourceVector,
    pub global_max: ResourceVector,
    pub stats: ScalingStats,
    pub recent_decisions: Vec<ScalingDecision>,
}

pub struct ScalingController {
    registry: CapacityRegistry,
    metrics: MetricsStore,
    source: Arc<dyn MetricsSource>,
    settings: ScalingSettings,
    rules: Mutex<RuleEngine>,
    decisions: Mutex<DecisionEngine>,
    executor: Mutex<ScalingExecutor>,
    stats: Mutex<ScalingStats>,
    alerts: Option<AlertManager>,
}

impl ScalingController {
    pub fn new(
        registry: CapacityRegistry,
        metrics: MetricsStore,
        source: Arc<dyn MetricsSource>,
        settings: ScalingSettings,
    ) -> Self {
        let executor = ScalingExecutor::new(registry.clone(), ExecutorSettings::from(&settings));
        let decisions = DecisionEngine::new(DecisionSettings::from(&settings));
        Self {
            registry,
            metrics,
            source,
            settings,
            rules: Mutex::new(RuleEngine::new()),
            decisions: Mutex::new(decisions),
            executor: Mutex::new(executor),
            stats: Mutex::new(ScalingStats::default()),
            alerts: None,
        }
    }

    /// Raise `ScalingCapReached` alerts on cap rejections.
    pub fn with_alerts(mut self, alerts: AlertManager) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Set the callback used to perform scaling.
    pub fn with_scale_fn(mut self, f: ScaleCallback) -> Self {
        self.executor.get_mut().set_scale_fn(f);
        self
    }

    /// Install a component's policy in all three engines. Returns the
    /// rules that were disabled as misconfigured.
    pub async fn register_policy(&self, policy: ComponentScalingPolicy) -> Vec<ScalingError> {
        let errors = self.rules.lock().await.load_policy(&policy);
        self.decisions.lock().await.register_policy(&policy);
        self.executor.lock().await.register_policy(policy);
        errors
    }

    pub fn settings(&self) -> &ScalingSettings {
        &self.settings
    }

    /// Sample utilization and evaluate every component's rules once.
    pub async fn monitor_tick(&self, now: u64) -> Vec<RuleTrigger> {
        let mut fired = Vec::new();
        for mut capacity in self.registry.snapshot().await {
            let id = capacity.component.clone();
            if let Some(reading) = self.source.sample(&capacity) {
                if let Err(e) = self.registry.set_utilization(&id, reading).await {
                    warn!(component = %id, error = %e, "failed to record utilization");
                    continue;
                }
                capacity.current_utilization = reading;
            }
            let metrics = self.metrics.get(&id).await;
            let reading = ComponentReading::new(&capacity, metrics.as_ref());
            fired.extend(self.rules.lock().await.evaluate(&id, &reading, now));
        }
        if !fired.is_empty() {
            self.stats.lock().await.triggers += fired.len() as u64;
        }
        fired
    }

    /// Score a trigger and queue the resulting decision if it clears the
    /// confidence bar.
    pub async fn handle_trigger(&self, trigger: RuleTrigger) -> Option<ScalingDecision> {
        let current = match self.registry.get(&trigger.component).await {
            Some(cap) => cap.allocation.get(trigger.resource),
            None => {
                debug!(component = %trigger.component, "trigger for unregistered component");
                return None;
            }
        };

        let decision = self.decisions.lock().await.decide(&trigger, current);
        let Some(decision) = decision else {
            self.stats.lock().await.discarded += 1;
            return None;
        };

        if let Err(e) = self.executor.lock().await.enqueue(decision.clone()) {
            warn!(component = %decision.component, error = %e, "decision not queued");
            return None;
        }
        self.stats.lock().await.queued += 1;
        Some(decision)
    }

    /// Run one executor cycle and feed the outcomes back.
    pub async fn execute_tick(&self, now: u64) -> Vec<ExecutionReport> {
        let reports = self.executor.lock().await.run_cycle(now).await;

        for report in &reports {
            match &report.outcome {
                ExecutionOutcome::Applied { .. } | ExecutionOutcome::Failed(_) => {
                    let score = self.decisions.lock().await.record_outcome(&report.decision);
                    if let Some(score) = score {
                        self.executor
                            .lock()
                            .await
                            .backfill_effectiveness(&report.decision.id, score);
                    }
                    if matches!(report.outcome, ExecutionOutcome::Applied { .. }) {
                        let decision = &report.decision;
                        self.rules
                            .lock()
                            .await
                            .mark_applied(&decision.component, decision.trigger, now);
                        if let Some(alerts) = &self.alerts {
                            alerts.scaling_cap_cleared(&decision.component, now).await;
                        }
                        self.stats.lock().await.applied += 1;
                    } else {
                        self.stats.lock().await.failed += 1;
                    }
                }
                ExecutionOutcome::Rejected(violation) => {
                    self.stats.lock().await.rejected += 1;
                    if let (Some(alerts), CapViolation::Hourly { .. } | CapViolation::Global { .. }) =
                        (&self.alerts, violation)
                    {
                        alerts
                            .scaling_cap_reached(
                                &report.decision.component,
                                format!("{} decision dropped: {violation}", report.decision.resource),
                                now,
                            )
                            .await;
                    }
                }
            }
        }
        reports
    }

    /// Run the monitor, decision, and executor loops until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let (tx, rx) = mpsc::channel(TRIGGER_CHANNEL);

        let monitor = tokio::spawn(self.clone().monitor_loop(tx, shutdown.clone()));
        let decision = tokio::spawn(self.clone().decision_loop(rx));
        let executor = tokio::spawn(self.executor_loop(shutdown));

        for (name, handle) in [("monitor", monitor), ("decision", decision), ("executor", executor)] {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "scaling task panicked");
            }
        }
    }

    async fn monitor_loop(
        self: Arc<Self>,
        tx: mpsc::Sender<RuleTrigger>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let interval = Duration::from_secs(self.settings.monitor_interval_secs.max(1));
        info!(interval_secs = interval.as_secs(), "scaling monitor started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    for trigger in self.monitor_tick(epoch_secs()).await {
                        if tx.send(trigger).await.is_err() {
                            return;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("scaling monitor shutting down");
                    break;
                }
            }
        }
    }

    /// Ends once the monitor loop drops its sender.
    async fn decision_loop(self: Arc<Self>, mut rx: mpsc::Receiver<RuleTrigger>) {
        info!("decision engine started");
        while let Some(trigger) = rx.recv().await {
            self.handle_trigger(trigger).await;
        }
        info!("decision engine shutting down");
    }

    async fn executor_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.settings.executor_interval_secs.max(1));
        info!(interval_secs = interval.as_secs(), "scaling executor started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.execute_tick(epoch_secs()).await;
                }
                _ = shutdown.changed() => {
                    info!("scaling executor shutting down");
                    break;
                }
            }
        }
    }

    pub async fn stats(&self) -> ScalingStats {
        *self.stats.lock().await
    }

    pub async fn pending(&self) -> Vec<ScalingDecision> {
        self.executor.lock().await.pending().to_vec()
    }

    // ── Persistence ───────────────────────────────────────────────

    pub async fn allocations(&self) -> HashMap<ComponentId, ResourceVector> {
        self.executor.lock().await.allocations()
    }

    /// The most recent executed decisions, oldest first.
    pub async fn recent_decisions(&self, limit: usize) -> Vec<ScalingDecision> {
        let history = self.executor.lock().await.history();
        let skip = history.len().saturating_sub(limit);
        history.into_iter().skip(skip).collect()
    }

    pub async fn effectiveness_history(&self) -> HashMap<ComponentId, Vec<f64>> {
        self.decisions.lock().await.effectiveness_history()
    }

    /// Seed allocations and history from persisted state. Components
    /// without a policy are ignored.
    pub async fn restore(
        &self,
        allocations: &HashMap<ComponentId, ResourceVector>,
        decisions: &[ScalingDecision],
        effectiveness: &HashMap<ComponentId, Vec<f64>>,
    ) {
        {
            let mut executor = self.executor.lock().await;
            executor.restore_allocations(allocations).await;
            executor.restore_history(decisions);
        }
        self.decisions.lock().await.restore(effectiveness, decisions);
    }

    /// Snapshot of allocations, decisions, and effectiveness per component.
    pub async fn report(&self, now: u64) -> ScalingReport {
        let rules = self.rules.lock().await;
        let decisions = self.decisions.lock().await;
        let mut executor = self.executor.lock().await;
        let effectiveness = decisions.effectiveness_history();

        let mut components = Vec::new();
        for id in rules.components() {
            let Some(policy) = executor.policy(&id).cloned() else {
                continue;
            };
            let history = executor.component_history(&id);
            let decisions_executed = history.len();
            let last_decision = history.last().map(|d| (*d).clone());
            let pending_decisions = executor
                .pending()
                .iter()
                .filter(|d| d.component == id)
                .count();

            components.push(ComponentScalingReport {
                strategy: policy.strategy,
                allocation: policy.current_allocation,
                min_allocation: policy.min_allocation,
                max_allocation: policy.max_allocation,
                required_confidence: decisions.required_confidence(&id),
                pending_decisions,
                decisions_executed,
                scale_ups_last_hour: executor.hourly_count(&id, ScaleDirection::Up, now),
                scale_downs_last_hour: executor.hourly_count(&id, ScaleDirection::Down, now),
                mean_effectiveness: decisions.mean_effectiveness(&id),
                effectiveness_history: effectiveness.get(&id).cloned().unwrap_or_default(),
                last_decision,
                rules: rules.rules(&id).to_vec(),
                component: id,
            });
        }

        let mut total_allocation = ResourceVector::default();
        for resource in ResourceType::ALL {
            total_allocation.set(resource, executor.total_allocation(resource));
        }
        let history = executor.history();
        let skip = history.len().saturating_sub(REPORT_DECISIONS);

        ScalingReport {
            components,
            total_allocation,
            global_max: self.settings.global_max,
            stats: *self.stats.lock().await,
            recent_decisions: history.into_iter().skip(skip).collect(),
        }
    }
}
