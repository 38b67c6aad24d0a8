//! Load balancer — candidate filtering and algorithm dispatch.
//!
//! Reads a consistent snapshot of the capacity registry and metrics store
//! for each selection, filters it down to the components that may take
//! the request, and dispatches to the active algorithm.

use std::collections::{HashMap, VecDeque};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use loadpilot_metrics::MetricsStore;
use loadpilot_state::{
    Algorithm, AlgorithmPerformance, AlgorithmSwitch, CapacityRegistry, ComponentCapacity,
    ComponentId, WorkloadRequest, epoch_secs,
};

use crate::round_robin::WorkloadCursors;
use crate::strategy::{self, Candidate, WeightedTickets};

/// Switch records kept for the dashboard.
const SWITCH_HISTORY: usize = 50;

/// Outcomes kept per algorithm for the optimizer's rolling view.
pub const DEFAULT_PERFORMANCE_WINDOW: usize = 200;

/// The latest outcomes and distribution samples of one algorithm.
#[derive(Default)]
struct RecentOutcomes {
    /// `(success, latency_ms)` per finished request.
    requests: VecDeque<(bool, f64)>,
    distribution: VecDeque<f64>,
}

/// Outcome of a successful selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub component: ComponentId,
    /// The algorithm that was active; outcomes are credited to it.
    pub algorithm: Algorithm,
    /// The concrete strategy that made the choice (differs from
    /// `algorithm` only under the adaptive meta-algorithm).
    pub strategy: Algorithm,
}

/// Routes requests to components.
pub struct LoadBalancer {
    registry: CapacityRegistry,
    metrics: MetricsStore,
    active: RwLock<Algorithm>,
    cursors: WorkloadCursors,
    tickets: Mutex<WeightedTickets>,
    performance: Mutex<HashMap<Algorithm, AlgorithmPerformance>>,
    recent: Mutex<HashMap<Algorithm, RecentOutcomes>>,
    window: usize,
    switches: Mutex<VecDeque<AlgorithmSwitch>>,
}

impl LoadBalancer {
    pub fn new(registry: CapacityRegistry, metrics: MetricsStore, algorithm: Algorithm) -> Self {
        Self {
            registry,
            metrics,
            active: RwLock::new(algorithm),
            cursors: WorkloadCursors::default(),
            tickets: Mutex::new(WeightedTickets::new()),
            performance: Mutex::new(HashMap::new()),
            recent: Mutex::new(HashMap::new()),
            window: DEFAULT_PERFORMANCE_WINDOW,
            switches: Mutex::new(VecDeque::new()),
        }
    }

    /// Number of recent outcomes per algorithm kept for ranking.
    pub fn with_performance_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn registry(&self) -> &CapacityRegistry {
        &self.registry
    }

    pub async fn active_algorithm(&self) -> Algorithm {
        *self.active.read().await
    }

    /// Make `algorithm` active. Returns `false` if it already was.
    pub async fn set_algorithm(&self, algorithm: Algorithm, score: f64) -> bool {
        let from = {
            let mut active = self.active.write().await;
            if *active == algorithm {
                return false;
            }
            std::mem::replace(&mut *active, algorithm)
        };

        info!(%from, to = %algorithm, score, "load-balancing algorithm switched");
        let mut switches = self.switches.lock().await;
        switches.push_back(AlgorithmSwitch {
            from,
            to: algorithm,
            score,
            at: epoch_secs(),
        });
        while switches.len() > SWITCH_HISTORY {
            switches.pop_front();
        }
        true
    }

    /// Select a component with the active algorithm.
    pub async fn select_component(&self, request: &WorkloadRequest) -> Option<Selection> {
        let algorithm = self.active_algorithm().await;
        self.select_with(algorithm, request).await
    }

    /// Select a component with an explicit algorithm.
    pub async fn select_with(
        &self,
        algorithm: Algorithm,
        request: &WorkloadRequest,
    ) -> Option<Selection> {
        let all = self.registry.snapshot().await;
        let system_load_ratio = load_ratio(&all);
        let candidates = self.candidates(all, request).await;
        if candidates.is_empty() {
            debug!(request = %request.id, "no candidate component");
            return None;
        }

        let strategy = match algorithm {
            Algorithm::Adaptive => strategy::adaptive_delegate(request.priority, system_load_ratio),
            other => other,
        };

        let idx = match strategy {
            Algorithm::RoundRobin => self.cursors.next(request.workload_type, candidates.len()),
            Algorithm::WeightedRoundRobin => self.tickets.lock().await.select(&candidates),
            Algorithm::LeastConnections => strategy::least_connections(&candidates),
            Algorithm::LeastResponseTime => strategy::least_response_time(&candidates),
            Algorithm::ResourceBased => strategy::resource_based(&candidates, request),
            Algorithm::PerformanceBased | Algorithm::Adaptive => {
                strategy::performance_based(&candidates)
            }
        }?;

        let component = candidates[idx].id().clone();
        debug!(
            request = %request.id,
            %component,
            %algorithm,
            %strategy,
            "request routed"
        );
        Some(Selection {
            component,
            algorithm,
            strategy,
        })
    }

    /// Components that may take `request`, sorted by id.
    ///
    /// Drops failed, maintenance and unhealthy components and the
    /// request's avoid-list. If any preferred component survives, only
    /// preferred components remain.
    async fn candidates(
        &self,
        all: Vec<ComponentCapacity>,
        request: &WorkloadRequest,
    ) -> Vec<Candidate> {
        let mut eligible: Vec<ComponentCapacity> = all
            .into_iter()
            .filter(|c| c.status.accepts_work() && c.is_healthy())
            .filter(|c| !request.avoid_components.contains(&c.component))
            .collect();

        if eligible
            .iter()
            .any(|c| request.preferred_components.contains(&c.component))
        {
            eligible.retain(|c| request.preferred_components.contains(&c.component));
        }

        let metrics = self.metrics.snapshot().await;
        let mut candidates: Vec<Candidate> = eligible
            .into_iter()
            .map(|c| {
                let m = metrics.get(&c.component).cloned();
                Candidate::new(c, m)
            })
            .collect();
        candidates.sort_by(|a, b| a.id().cmp(b.id()));
        candidates
    }

    /// Credit a finished request to the algorithm that routed it.
    pub async fn record_outcome(&self, algorithm: Algorithm, success: bool, latency_ms: f64) {
        let mut perf = self.performance.lock().await;
        let entry = perf
            .entry(algorithm)
            .or_insert_with(|| AlgorithmPerformance::new(algorithm));
        entry.total_requests += 1;
        if success {
            entry.successful_requests += 1;
        }
        entry.total_latency_ms += latency_ms;
        entry.last_used = epoch_secs();
        drop(perf);

        let mut recent = self.recent.lock().await;
        let requests = &mut recent.entry(algorithm).or_default().requests;
        requests.push_back((success, latency_ms));
        while requests.len() > self.window {
            requests.pop_front();
        }
    }

    /// Credit a load-distribution sample to an algorithm.
    pub async fn record_distribution(&self, algorithm: Algorithm, score: f64) {
        let mut perf = self.performance.lock().await;
        let entry = perf
            .entry(algorithm)
            .or_insert_with(|| AlgorithmPerformance::new(algorithm));
        entry.distribution_score_sum += score;
        entry.distribution_samples += 1;
        drop(perf);

        let mut recent = self.recent.lock().await;
        let samples = &mut recent.entry(algorithm).or_default().distribution;
        samples.push_back(score);
        while samples.len() > self.window {
            samples.pop_front();
        }
    }

    /// Per-algorithm counters over the most recent outcomes only, in
    /// `Algorithm::ALL` order. Algorithms with no recent requests are
    /// left out.
    pub async fn recent_performance(&self) -> Vec<AlgorithmPerformance> {
        let recent = self.recent.lock().await;
        Algorithm::ALL
            .iter()
            .filter_map(|&algorithm| {
                let outcomes = recent.get(&algorithm)?;
                if outcomes.requests.is_empty() {
                    return None;
                }
                let mut perf = AlgorithmPerformance::new(algorithm);
                for &(success, latency_ms) in &outcomes.requests {
                    perf.total_requests += 1;
                    perf.successful_requests += u64::from(success);
                    perf.total_latency_ms += latency_ms;
                }
                perf.distribution_samples = outcomes.distribution.len() as u64;
                perf.distribution_score_sum = outcomes.distribution.iter().sum();
                Some(perf)
            })
            .collect()
    }

    /// Per-algorithm counters in `Algorithm::ALL` order.
    pub async fn performance(&self) -> Vec<AlgorithmPerformance> {
        let perf = self.performance.lock().await;
        Algorithm::ALL
            .iter()
            .filter_map(|a| perf.get(a).cloned())
            .collect()
    }

    pub async fn performance_map(&self) -> HashMap<Algorithm, AlgorithmPerformance> {
        self.performance.lock().await.clone()
    }

    /// Replace the counters with persisted ones.
    pub async fn restore_performance(&self, restored: HashMap<Algorithm, AlgorithmPerformance>) {
        *self.performance.lock().await = restored;
    }

    /// Reinstate a persisted active algorithm without recording a switch.
    pub async fn restore_algorithm(&self, algorithm: Algorithm) {
        *self.active.write().await = algorithm;
    }

    pub async fn recent_switches(&self) -> Vec<AlgorithmSwitch> {
        self.switches.lock().await.iter().cloned().collect()
    }
}

fn load_ratio(all: &[ComponentCapacity]) -> f64 {
    let (tasks, capacity) = all.iter().fold((0u64, 0u64), |(t, m), c| {
        (
            t + u64::from(c.current_tasks),
            m + u64::from(c.max_concurrent_tasks),
        )
    });
    if capacity == 0 {
        0.0
    } else {
        tasks as f64 / capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadpilot_state::{HealthStatus, Priority, ResourceType, WorkloadType};

    async fn balancer(ids: &[&str], algorithm: Algorithm) -> LoadBalancer {
        let registry = CapacityRegistry::default();
        for id in ids {
            registry.register(ComponentCapacity::new(*id, 10)).await;
        }
        LoadBalancer::new(registry, MetricsStore::default(), algorithm)
    }

    fn request(priority: Priority) -> WorkloadRequest {
        WorkloadRequest::new(WorkloadType::OpportunityDetection, priority)
    }

    #[tokio::test]
    async fn no_components_selects_nothing() {
        let lb = balancer(&[], Algorithm::RoundRobin).await;
        assert!(lb.select_component(&request(Priority::Normal)).await.is_none());
    }

    #[tokio::test]
    async fn failed_and_maintenance_components_are_skipped() {
        let lb = balancer(&["a", "b", "c"], Algorithm::RoundRobin).await;
        lb.registry()
            .set_health("a", HealthStatus::Unhealthy)
            .await
            .unwrap();
        lb.registry().set_maintenance("b", true).await.unwrap();

        for _ in 0..6 {
            let sel = lb.select_component(&request(Priority::Normal)).await.unwrap();
            assert_eq!(sel.component, "c");
        }
    }

    #[tokio::test]
    async fn avoid_list_is_honoured() {
        let lb = balancer(&["a", "b"], Algorithm::LeastConnections).await;
        let req = request(Priority::Normal).avoid("a");
        for _ in 0..4 {
            assert_eq!(lb.select_component(&req).await.unwrap().component, "b");
        }

        let req = request(Priority::Normal).avoid("a").avoid("b");
        assert!(lb.select_component(&req).await.is_none());
    }

    #[tokio::test]
    async fn preferred_list_narrows_when_a_preferred_survives() {
        let lb = balancer(&["a", "b", "c"], Algorithm::LeastConnections).await;
        lb.registry().update_load("a", 5).await.unwrap();

        let req = request(Priority::Normal).prefer("a");
        assert_eq!(lb.select_component(&req).await.unwrap().component, "a");

        lb.registry()
            .set_health("a", HealthStatus::Unhealthy)
            .await
            .unwrap();
        // Preferred component gone: fall back to the full candidate set.
        assert_eq!(lb.select_component(&req).await.unwrap().component, "b");
    }

    #[tokio::test]
    async fn round_robin_rotates_through_candidates() {
        let lb = balancer(&["a", "b", "c"], Algorithm::RoundRobin).await;
        let mut picks = Vec::new();
        for _ in 0..6 {
            picks.push(lb.select_component(&request(Priority::Low)).await.unwrap().component);
        }
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn adaptive_routes_high_priority_by_headroom_under_load() {
        let lb = balancer(&["a", "b"], Algorithm::Adaptive).await;
        lb.registry().update_load("a", 8).await.unwrap();
        lb.registry().update_load("b", 8).await.unwrap();
        let mut util = loadpilot_state::ResourceVector::default();
        util.set(ResourceType::Cpu, 95.0);
        lb.registry().set_utilization("a", util).await.unwrap();

        let sel = lb.select_component(&request(Priority::High)).await.unwrap();
        assert_eq!(sel.algorithm, Algorithm::Adaptive);
        assert_eq!(sel.strategy, Algorithm::ResourceBased);
        assert_eq!(sel.component, "b");

        let sel = lb.select_component(&request(Priority::Normal)).await.unwrap();
        assert_eq!(sel.strategy, Algorithm::LeastConnections);
    }

    #[tokio::test]
    async fn outcomes_accumulate_per_algorithm() {
        let lb = balancer(&["a"], Algorithm::LeastConnections).await;
        lb.record_outcome(Algorithm::LeastConnections, true, 100.0).await;
        lb.record_outcome(Algorithm::LeastConnections, false, 300.0).await;
        lb.record_distribution(Algorithm::LeastConnections, 80.0).await;

        let perf = lb.performance().await;
        assert_eq!(perf.len(), 1);
        assert_eq!(perf[0].total_requests, 2);
        assert_eq!(perf[0].success_rate(), 50.0);
        assert_eq!(perf[0].avg_latency_ms(), 200.0);
        assert_eq!(perf[0].load_distribution_score(), 80.0);
    }

    #[tokio::test]
    async fn switching_records_history() {
        let lb = balancer(&["a"], Algorithm::Adaptive).await;
        assert!(!lb.set_algorithm(Algorithm::Adaptive, 0.0).await);
        assert!(lb.set_algorithm(Algorithm::RoundRobin, 91.0).await);
        assert_eq!(lb.active_algorithm().await, Algorithm::RoundRobin);

        let switches = lb.recent_switches().await;
        assert_eq!(switches.len(), 1);
        assert_eq!(switches[0].from, Algorithm::Adaptive);
        assert_eq!(switches[0].to, Algorithm::RoundRobin);
    }
}
