//! Controller — builds every store and loop from configuration, restores
//! persisted state, and runs the loops until shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use loadpilot_autoscale::{ScalingController, ScalingReport};
use loadpilot_balancer::{AlgorithmOptimizer, LoadBalancer};
use loadpilot_core::LoadPilotConfig;
use loadpilot_health::{AlertManager, HealthCallback, HealthFuture, HealthMonitor, ProbeFn};
use loadpilot_metrics::{
    ComponentReport, MetricsReport, MetricsSource, MetricsStore, SystemReport, TaskLoadSource,
    load_distribution_score,
};
use loadpilot_queue::{
    ProcessorSettings, RequestProcessor, RequestQueue, SubmitOutcome, WorkFn, simulated_work,
};
use loadpilot_state::{
    Alert, Algorithm, CapacityRegistry, ComponentCapacity, ComponentScalingPolicy,
    ControllerSnapshot, HealthStatus, StateStore, StatusThresholds, WorkloadRequest, epoch_secs,
};

use crate::error::{ControllerError, ControllerResult};

/// Executed decisions kept in a snapshot.
const SNAPSHOT_DECISIONS: usize = 100;

/// Active and resolved alerts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertsReport {
    pub active: Vec<Alert>,
    pub history: Vec<Alert>,
}

/// Assembles a [`Controller`] with optional injected capabilities.
pub struct ControllerBuilder {
    config: LoadPilotConfig,
    source: Option<Arc<dyn MetricsSource>>,
    work: Option<WorkFn>,
    probe: Option<ProbeFn>,
    store: Option<StateStore>,
}

impl ControllerBuilder {
    /// Utilization readings for the scaling monitor. Defaults to
    /// [`TaskLoadSource`].
    pub fn source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// The unit of work run for each dispatched request. Defaults to
    /// [`simulated_work`].
    pub fn work(mut self, work: WorkFn) -> Self {
        self.work = Some(work);
        self
    }

    pub fn probe(mut self, probe: ProbeFn) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Use an already-open state store instead of `persistence.path`.
    pub fn store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate the configuration, build every component, and restore
    /// persisted state. Only configuration errors are fatal.
    pub async fn build(self) -> ControllerResult<Controller> {
        let config = self.config;
        config.validate()?;
        let ctl = &config.controller;

        let registry = CapacityRegistry::new(StatusThresholds {
            busy: ctl.busy_threshold,
            overload: ctl.overload_threshold,
        });
        let metrics = MetricsStore::new(
            ctl.latency_alpha,
            Duration::from_secs(ctl.throughput_window_secs.max(1)),
        );
        for component in &config.components {
            registry
                .register(ComponentCapacity::from_config(component))
                .await;
            metrics.register(&component.id).await;
        }

        let balancer = Arc::new(
            LoadBalancer::new(registry.clone(), metrics.clone(), ctl.algorithm)
                .with_performance_window(ctl.optimizer_window),
        );
        let optimizer = Arc::new(AlgorithmOptimizer::new(
            Arc::clone(&balancer),
            ctl.optimizer_min_samples,
        ));

        let processor = Arc::new(RequestProcessor::new(
            RequestQueue::new(ctl.queue_capacity),
            Arc::clone(&balancer),
            metrics.clone(),
            self.work.unwrap_or_else(simulated_work),
            ProcessorSettings {
                max_retries: ctl.max_retries,
                retry_backoff: Duration::from_millis(ctl.retry_backoff_ms),
                dequeue_timeout: Duration::from_millis(ctl.dequeue_timeout_ms.max(1)),
                max_in_flight: ctl.max_in_flight,
                load_shed_threshold: ctl.load_shed_threshold,
                completion_history: ctl.completion_history,
            },
        ));

        let alerts = AlertManager::new(config.alerts.clone());

        let mut health = HealthMonitor::new(registry.clone(), metrics.clone(), config.health.clone())
            .with_callback(health_alerts(alerts.clone()));
        if let Some(probe) = self.probe {
            health = health.with_probe(probe);
        }

        let source = self
            .source
            .unwrap_or_else(|| Arc::new(TaskLoadSource::default()) as Arc<dyn MetricsSource>);
        let scaler = ScalingController::new(
            registry.clone(),
            metrics.clone(),
            source,
            config.scaling.clone(),
        )
        .with_alerts(alerts.clone());
        for component in &config.components {
            for e in scaler
                .register_policy(ComponentScalingPolicy::from_config(component))
                .await
            {
                warn!(component = %component.id, error = %e, "scaling rule disabled");
            }
        }

        let store = match self.store {
            Some(store) => Some(store),
            None => open_store(&config),
        };

        let (shutdown_tx, _) = watch::channel(false);
        let controller = Controller {
            registry,
            metrics,
            balancer,
            optimizer,
            processor,
            health: Arc::new(health),
            scaler: Arc::new(scaler),
            alerts,
            store,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            config,
        };

        if let Some(ref store) = controller.store {
            match store.has_snapshot().and_then(|found| {
                if found {
                    store.load_snapshot().map(Some)
                } else {
                    Ok(None)
                }
            }) {
                Ok(Some(snapshot)) => controller.restore(snapshot).await,
                Ok(None) => debug!("no persisted state, starting from configuration"),
                Err(e) => warn!(error = %e, "failed to load persisted state, starting from configuration"),
            }
        }

        info!(
            components = controller.config.components.len(),
            algorithm = %controller.balancer.active_algorithm().await,
            persistence = controller.store.is_some(),
            "controller initialized"
        );
        Ok(controller)
    }
}

/// Raises `ComponentFailed` when a component goes unhealthy and resolves
/// it when the component recovers.
fn health_alerts(alerts: AlertManager) -> HealthCallback {
    Arc::new(move |component: String, status: HealthStatus| -> HealthFuture {
        let alerts = alerts.clone();
        Box::pin(async move {
            let now = epoch_secs();
            if status == HealthStatus::Unhealthy {
                alerts.component_failed(&component, now).await;
            } else if alerts.component_recovered(&component, now).await {
                info!(%component, "component back in rotation");
            }
        })
    })
}

fn open_store(config: &LoadPilotConfig) -> Option<StateStore> {
    let path = config.persistence.path.as_ref()?;
    match StateStore::open(path) {
        Ok(store) => Some(store),
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to open state store, persistence disabled");
            None
        }
    }
}

pub struct Controller {
    config: LoadPilotConfig,
    registry: CapacityRegistry,
    metrics: MetricsStore,
    balancer: Arc<LoadBalancer>,
    optimizer: Arc<AlgorithmOptimizer>,
    processor: Arc<RequestProcessor>,
    health: Arc<HealthMonitor>,
    scaler: Arc<ScalingController>,
    alerts: AlertManager,
    store: Option<StateStore>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Controller {
    pub fn builder(config: LoadPilotConfig) -> ControllerBuilder {
        ControllerBuilder {
            config,
            source: None,
            work: None,
            probe: None,
            store: None,
        }
    }

    /// Build with default capabilities.
    pub async fn init(config: LoadPilotConfig) -> ControllerResult<Self> {
        Self::builder(config).build().await
    }

    pub fn config(&self) -> &LoadPilotConfig {
        &self.config
    }

    pub fn registry(&self) -> &CapacityRegistry {
        &self.registry
    }

    pub fn metrics_store(&self) -> &MetricsStore {
        &self.metrics
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn processor(&self) -> &Arc<RequestProcessor> {
        &self.processor
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn scaler(&self) -> &Arc<ScalingController> {
        &self.scaler
    }

    pub fn alert_manager(&self) -> &AlertManager {
        &self.alerts
    }

    /// Spawn every control loop.
    pub async fn start(self: &Arc<Self>) -> ControllerResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ControllerError::AlreadyStarted);
        }
        let mut tasks = self.tasks.lock().await;

        let processor = Arc::clone(&self.processor);
        tasks.push(tokio::spawn(processor.run(self.shutdown_tx.subscribe())));

        let optimizer = Arc::clone(&self.optimizer);
        let interval = Duration::from_secs(self.config.controller.optimizer_interval_secs.max(1));
        let rx = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            optimizer.run(interval, rx).await;
        }));

        let health = Arc::clone(&self.health);
        let rx = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            health.run(rx).await;
        }));

        let scaler = Arc::clone(&self.scaler);
        tasks.push(tokio::spawn(scaler.run(self.shutdown_tx.subscribe())));

        let this = Arc::clone(self);
        let rx = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            this.alert_loop(rx).await;
        }));

        if self.store.is_some() {
            let this = Arc::clone(self);
            let rx = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                this.persistence_loop(rx).await;
            }));
        }

        info!(tasks = tasks.len(), "controller started");
        Ok(())
    }

    /// Stop every loop, wait for in-flight work, and persist final state.
    pub async fn shutdown(&self) {
        info!("controller shutting down");
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "control loop task failed");
            }
        }

        if let Err(e) = self.persist().await {
            error!(error = %e, "failed to persist final state");
        }
        info!("controller stopped");
    }

    // ── Operations ────────────────────────────────────────────────

    pub async fn submit(&self, request: WorkloadRequest) -> SubmitOutcome {
        self.processor.submit(request).await
    }

    /// Per-component and system-wide dashboard metrics.
    pub async fn get_metrics(&self) -> MetricsReport {
        let capacities = self.registry.snapshot().await;
        let metrics = self.metrics.snapshot().await;

        let components: Vec<ComponentReport> = capacities
            .iter()
            .map(|c| ComponentReport::new(c, metrics.get(&c.component)))
            .collect();
        let loads: Vec<f64> = capacities
            .iter()
            .filter(|c| c.status.accepts_work())
            .map(|c| c.load_percent())
            .collect();

        let system = SystemReport {
            active_algorithm: self.balancer.active_algorithm().await,
            load_distribution_score: load_distribution_score(&loads),
            system_load_ratio: self.registry.system_load_ratio().await,
            queue_depth: self.processor.queue().len().await,
            queue_capacity: self.processor.queue().capacity(),
            healthy_components: self.registry.healthy_count().await,
            total_components: capacities.len(),
            processor: self.processor.counters().await,
            algorithm_performance: self.balancer.performance().await,
            recent_switches: self.balancer.recent_switches().await,
        };
        MetricsReport { components, system }
    }

    pub async fn get_scaling_metrics(&self) -> ScalingReport {
        self.scaler.report(epoch_secs()).await
    }

    pub async fn alerts(&self) -> AlertsReport {
        AlertsReport {
            active: self.alerts.active().await,
            history: self.alerts.history().await,
        }
    }

    /// Manually override the active algorithm. Returns `false` if it was
    /// already active.
    pub async fn set_algorithm(&self, algorithm: Algorithm) -> bool {
        let score = self
            .balancer
            .performance_map()
            .await
            .get(&algorithm)
            .map(|p| p.score())
            .unwrap_or(0.0);
        self.balancer.set_algorithm(algorithm, score).await
    }

    /// Evaluate threshold alerts for every component and the queue.
    pub async fn check_alerts(&self, now: u64) {
        for capacity in self.registry.snapshot().await {
            let metrics = self.metrics.get(&capacity.component).await;
            self.alerts
                .evaluate_component(&capacity, metrics.as_ref(), now)
                .await;
        }
        let queue = self.processor.queue();
        self.alerts
            .check_queue(queue.len().await, queue.capacity(), now)
            .await;
    }

    async fn alert_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.health.interval_secs.max(1));
        info!(interval_secs = interval.as_secs(), "alert evaluator started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.check_alerts(epoch_secs()).await;
                }
                _ = shutdown.changed() => {
                    info!("alert evaluator shutting down");
                    break;
                }
            }
        }
    }

    // ── Persistence ───────────────────────────────────────────────

    /// Capture every persisted section of controller state.
    pub async fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            saved_at: epoch_secs(),
            active_algorithm: Some(self.balancer.active_algorithm().await),
            current_allocations: self.scaler.allocations().await,
            algorithm_performance: self.balancer.performance_map().await,
            component_weights: self
                .registry
                .snapshot()
                .await
                .into_iter()
                .map(|c| (c.component, c.weight))
                .collect(),
            recent_decisions: self.scaler.recent_decisions(SNAPSHOT_DECISIONS).await,
            effectiveness_history: self.scaler.effectiveness_history().await,
            completions: self.processor.completions().await,
        }
    }

    /// Apply a persisted snapshot. Sections for components that are no
    /// longer configured are ignored; missing sections keep the
    /// configured baseline.
    pub async fn restore(&self, snapshot: ControllerSnapshot) {
        if let Some(algorithm) = snapshot.active_algorithm {
            self.balancer.restore_algorithm(algorithm).await;
        }
        self.balancer
            .restore_performance(snapshot.algorithm_performance)
            .await;

        for (component, weight) in &snapshot.component_weights {
            if let Err(e) = self.registry.set_weight(component, *weight).await {
                debug!(%component, error = %e, "ignoring persisted weight");
            }
        }

        self.scaler
            .restore(
                &snapshot.current_allocations,
                &snapshot.recent_decisions,
                &snapshot.effectiveness_history,
            )
            .await;
        self.processor.restore_completions(snapshot.completions).await;

        info!(
            saved_at = snapshot.saved_at,
            allocations = snapshot.current_allocations.len(),
            decisions = snapshot.recent_decisions.len(),
            "controller state restored"
        );
    }

    /// Save a snapshot. Returns `false` when persistence is disabled.
    pub async fn persist(&self) -> ControllerResult<bool> {
        let Some(ref store) = self.store else {
            return Ok(false);
        };
        let snapshot = self.snapshot().await;
        store.save_snapshot(&snapshot)?;
        debug!(saved_at = snapshot.saved_at, "controller state persisted");
        Ok(true)
    }

    async fn persistence_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.persistence.interval_secs.max(1));
        info!(interval_secs = interval.as_secs(), "state persistence started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.persist().await {
                        warn!(error = %e, "periodic state save failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("state persistence shutting down");
                    break;
                }
            }
        }
    }
}
