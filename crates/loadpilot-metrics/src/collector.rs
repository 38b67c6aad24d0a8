//! Metrics store — rolling request counters per component.
//!
//! The request processor is the only writer; the load balancer, the
//! scaling rule engine, and the dashboard read. Latency is an
//! exponential moving average; throughput counts completions inside a
//! sliding window.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use loadpilot_state::{ComponentId, ComponentMetrics, epoch_secs};

/// Default smoothing factor for the latency moving average.
pub const DEFAULT_LATENCY_ALPHA: f64 = 0.1;

/// Per-component metrics bucket.
struct ComponentEntry {
    metrics: ComponentMetrics,
    /// Completion instants inside the throughput window.
    completions: VecDeque<Instant>,
}

impl ComponentEntry {
    fn new(component: &str) -> Self {
        Self {
            metrics: ComponentMetrics::new(component),
            completions: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.completions.front() {
            if now.duration_since(*front) > window {
                self.completions.pop_front();
            } else {
                break;
            }
        }
        self.metrics.throughput = self.completions.len() as f64 / window.as_secs_f64();
    }
}

/// Process-wide store of component request metrics.
#[derive(Clone)]
pub struct MetricsStore {
    entries: Arc<RwLock<HashMap<ComponentId, ComponentEntry>>>,
    alpha: f64,
    window: Duration,
}

impl MetricsStore {
    /// Create a store with the given latency smoothing factor and
    /// throughput window.
    pub fn new(alpha: f64, window: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            alpha,
            window: window.max(Duration::from_secs(1)),
        }
    }

    /// Register a component for metrics collection.
    pub async fn register(&self, component: &str) {
        let mut entries = self.entries.write().await;
        entries
            .entry(component.to_string())
            .or_insert_with(|| ComponentEntry::new(component));
        debug!(%component, "registered for metrics collection");
    }

    /// Record a finished request. Components are registered on first use.
    pub async fn record_completion(&self, component: &str, latency_ms: f64, success: bool) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(component.to_string())
            .or_insert_with(|| ComponentEntry::new(component));

        let m = &mut entry.metrics;
        if m.completed() == 0 {
            m.avg_latency_ms = latency_ms;
            m.min_latency_ms = latency_ms;
            m.max_latency_ms = latency_ms;
        } else {
            m.avg_latency_ms = self.alpha * latency_ms + (1.0 - self.alpha) * m.avg_latency_ms;
            m.min_latency_ms = m.min_latency_ms.min(latency_ms);
            m.max_latency_ms = m.max_latency_ms.max(latency_ms);
        }
        m.total_requests += 1;
        if success {
            m.successful_requests += 1;
        } else {
            m.failed_requests += 1;
        }
        m.last_updated = epoch_secs();

        entry.completions.push_back(now);
        entry.prune(now, self.window);
    }

    /// Record a request a component refused.
    pub async fn record_rejection(&self, component: &str) {
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(component.to_string())
            .or_insert_with(|| ComponentEntry::new(component));
        entry.metrics.total_requests += 1;
        entry.metrics.rejected_requests += 1;
        entry.metrics.last_updated = epoch_secs();
    }

    /// Current metrics for a component, throughput refreshed to now.
    pub async fn get(&self, component: &str) -> Option<ComponentMetrics> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.get_mut(component).map(|entry| {
            entry.prune(now, self.window);
            entry.metrics.clone()
        })
    }

    /// Current metrics for every registered component.
    pub async fn snapshot(&self) -> HashMap<ComponentId, ComponentMetrics> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries
            .iter_mut()
            .map(|(id, entry)| {
                entry.prune(now, self.window);
                (id.clone(), entry.metrics.clone())
            })
            .collect()
    }

    /// List all registered component ids.
    pub async fn registered_components(&self) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_ALPHA, Duration::from_secs(60))
    }
}
