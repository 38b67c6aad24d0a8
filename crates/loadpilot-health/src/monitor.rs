//! Health monitor — background task that probes every registered component.
//!
//! Each tick runs the probe against every component in the capacity
//! registry, feeds the result into that component's tracker, and writes
//! status changes back to the registry. An unhealthy component is derived
//! as FAILED there and drops out of load-balancer selection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info};

use loadpilot_core::HealthSettings;
use loadpilot_metrics::MetricsStore;
use loadpilot_state::{CapacityRegistry, ComponentId, HealthStatus};

use crate::checker::{HealthTracker, ProbeFn, metrics_probe};

/// Callback invoked when a component's health status changes.
///
/// The controller uses this to raise and resolve `ComponentFailed` alerts.
pub type HealthCallback = Arc<dyn Fn(String, HealthStatus) -> HealthFuture + Send + Sync>;

pub type HealthFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

pub struct HealthMonitor {
    registry: CapacityRegistry,
    metrics: MetricsStore,
    probe: ProbeFn,
    settings: HealthSettings,
    trackers: Mutex<HashMap<ComponentId, HealthTracker>>,
    on_status_change: Option<HealthCallback>,
}

impl HealthMonitor {
    /// Create a monitor using the default success-rate probe.
    pub fn new(registry: CapacityRegistry, metrics: MetricsStore, settings: HealthSettings) -> Self {
        let probe = metrics_probe(settings.min_requests, settings.min_success_rate);
        Self {
            registry,
            metrics,
            probe,
            settings,
            trackers: Mutex::new(HashMap::new()),
            on_status_change: None,
        }
    }

    /// Replace the probe.
    pub fn with_probe(mut self, probe: ProbeFn) -> Self {
        self.probe = probe;
        self
    }

    /// Set a callback for health status changes.
    pub fn with_callback(mut self, callback: HealthCallback) -> Self {
        self.on_status_change = Some(callback);
        self
    }

    /// Probe every registered component once. Returns the components
    /// whose status changed, with their new status.
    pub async fn check_all(&self) -> Vec<(ComponentId, HealthStatus)> {
        let mut changed = Vec::new();

        for capacity in self.registry.snapshot().await {
            let id = capacity.component.clone();
            let metrics = self.metrics.get(&id).await;
            let result = (self.probe)(capacity, metrics).await;

            let (prev, next) = {
                let mut trackers = self.trackers.lock().await;
                let tracker = trackers
                    .entry(id.clone())
                    .or_insert_with(|| HealthTracker::new(&self.settings));
                let prev = tracker.status();
                (prev, tracker.record(result))
            };
            debug!(component = %id, ?result, status = ?next, "health probe");

            if next == prev {
                continue;
            }
            if let Err(e) = self.registry.set_health(&id, next).await {
                error!(component = %id, error = %e, "failed to update component health");
                continue;
            }
            if let Some(ref cb) = self.on_status_change {
                cb(id.clone(), next).await;
            }
            changed.push((id, next));
        }

        changed
    }

    /// Tracked status for a component, `Unknown` before its first probe.
    pub async fn status(&self, component: &str) -> HealthStatus {
        self.trackers
            .lock()
            .await
            .get(component)
            .map(|t| t.status())
            .unwrap_or_default()
    }

    /// Run the health loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.settings.interval_secs.max(1));
        info!(interval_secs = interval.as_secs(), "health monitor started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.check_all().await;
                }
                _ = shutdown.changed() => {
                    info!("health monitor shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{ProbeFuture, ProbeResult};
    use loadpilot_state::{ComponentCapacity, ComponentMetrics, ComponentStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn setup() -> (CapacityRegistry, MetricsStore) {
        let registry = CapacityRegistry::default();
        registry.register(ComponentCapacity::new("a", 10)).await;
        registry.register(ComponentCapacity::new("b", 10)).await;
        let metrics = MetricsStore::default();
        metrics.register("a").await;
        metrics.register("b").await;
        (registry, metrics)
    }

    fn settings(unhealthy_threshold: u32) -> HealthSettings {
        HealthSettings {
            unhealthy_threshold,
            ..HealthSettings::default()
        }
    }

    /// Fails component "a", passes everything else.
    fn failing_a() -> ProbeFn {
        Arc::new(|cap: ComponentCapacity, _: Option<ComponentMetrics>| -> ProbeFuture {
            let result = if cap.component == "a" {
                ProbeResult::Failed
            } else {
                ProbeResult::Healthy
            };
            Box::pin(async move { result })
        })
    }

    #[tokio::test]
    async fn failing_component_marked_failed_after_threshold() {
        let (registry, metrics) = setup().await;
        let monitor = HealthMonitor::new(registry.clone(), metrics, settings(2)).with_probe(failing_a());

        let first = monitor.check_all().await;
        // Only "b" moved from unknown to healthy.
        assert_eq!(first, vec![("b".to_string(), HealthStatus::Healthy)]);
        assert_eq!(registry.status("a").await, Some(ComponentStatus::Available));

        let second = monitor.check_all().await;
        assert_eq!(second, vec![("a".to_string(), HealthStatus::Unhealthy)]);
        assert_eq!(registry.status("a").await, Some(ComponentStatus::Failed));
        assert_eq!(monitor.status("a").await, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn default_probe_fails_low_success_rate() {
        let (registry, metrics) = setup().await;
        for i in 0..20 {
            metrics.record_completion("a", 10.0, i % 4 == 0).await;
        }
        let monitor = HealthMonitor::new(registry.clone(), metrics, settings(1));

        monitor.check_all().await;
        assert_eq!(registry.status("a").await, Some(ComponentStatus::Failed));
        assert_eq!(registry.status("b").await, Some(ComponentStatus::Available));

        // No new traffic: the component is given another chance.
        monitor.check_all().await;
        assert_eq!(registry.status("a").await, Some(ComponentStatus::Available));
    }

    #[tokio::test]
    async fn callback_fires_on_change_only() {
        let (registry, metrics) = setup().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let callback: HealthCallback = Arc::new(move |_: String, _: HealthStatus| -> HealthFuture {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        });
        let monitor = HealthMonitor::new(registry, metrics, settings(1)).with_callback(callback);

        monitor.check_all().await;
        monitor.check_all().await;
        // Two components each go unknown → healthy exactly once.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let (registry, metrics) = setup().await;
        let monitor = HealthMonitor::new(registry, metrics, settings(3));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            monitor.run(rx).await;
        });
        tokio::time::advance(Duration::from_secs(16)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
