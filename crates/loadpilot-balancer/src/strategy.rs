//! Selection strategies.
//!
//! Every strategy is a pure function over a candidate snapshot sorted by
//! component id, so the same snapshot always yields the same choice and
//! ties resolve to the lowest id.

use std::collections::HashMap;

use loadpilot_state::{
    Algorithm, ComponentCapacity, ComponentId, ComponentMetrics, Priority, ResourceType,
    WorkloadRequest,
};

/// Adaptive routing prefers headroom over raw performance above this
/// system-wide load ratio.
pub const ADAPTIVE_LOAD_RATIO: f64 = 0.7;

/// A component that survived filtering, with its latest metrics.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub capacity: ComponentCapacity,
    pub metrics: Option<ComponentMetrics>,
}

impl Candidate {
    pub fn new(capacity: ComponentCapacity, metrics: Option<ComponentMetrics>) -> Self {
        Self { capacity, metrics }
    }

    pub fn id(&self) -> &ComponentId {
        &self.capacity.component
    }

    /// Success rate in percent; 100 for a component with no completions.
    pub fn success_rate(&self) -> f64 {
        self.metrics
            .as_ref()
            .map_or(100.0, ComponentMetrics::success_rate)
    }

    pub fn avg_latency_ms(&self) -> f64 {
        self.metrics.as_ref().map_or(0.0, |m| m.avg_latency_ms)
    }

    pub fn throughput(&self) -> f64 {
        self.metrics.as_ref().map_or(0.0, |m| m.throughput)
    }
}

/// Index of the lowest `key`; the first candidate wins ties.
fn argmin<F>(candidates: &[Candidate], key: F) -> Option<usize>
where
    F: Fn(&Candidate) -> f64,
{
    let mut best: Option<(usize, f64)> = None;
    for (idx, c) in candidates.iter().enumerate() {
        let value = key(c);
        if best.is_none_or(|(_, b)| value < b) {
            best = Some((idx, value));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Index of the highest `score`; the first candidate wins ties.
fn argmax<F>(candidates: &[Candidate], score: F) -> Option<usize>
where
    F: Fn(&Candidate) -> f64,
{
    argmin(candidates, |c| -score(c))
}

pub fn least_connections(candidates: &[Candidate]) -> Option<usize> {
    argmin(candidates, |c| f64::from(c.capacity.current_tasks))
}

pub fn least_response_time(candidates: &[Candidate]) -> Option<usize> {
    argmin(candidates, Candidate::avg_latency_ms)
}

/// Sum of per-resource headroom left after the request's requirement.
pub fn resource_score(candidate: &Candidate, request: &WorkloadRequest) -> f64 {
    ResourceType::ALL
        .iter()
        .map(|&r| (candidate.capacity.headroom(r) - request.requirement(r)).max(0.0))
        .sum()
}

pub fn resource_based(candidates: &[Candidate], request: &WorkloadRequest) -> Option<usize> {
    argmax(candidates, |c| resource_score(c, request))
}

/// Weighted blend of success rate, latency, throughput and spare task
/// capacity, scaled by the component weight.
pub fn performance_score(candidate: &Candidate) -> f64 {
    let raw = 0.3 * candidate.success_rate()
        + 0.3 * (1000.0 - candidate.avg_latency_ms()) / 10.0
        + 0.2 * candidate.throughput()
        + 0.2 * (100.0 - candidate.capacity.load_percent());
    raw * candidate.capacity.weight
}

pub fn performance_based(candidates: &[Candidate]) -> Option<usize> {
    argmax(candidates, performance_score)
}

/// The concrete strategy the adaptive meta-algorithm delegates to.
pub fn adaptive_delegate(priority: Priority, system_load_ratio: f64) -> Algorithm {
    match priority {
        Priority::Critical => Algorithm::PerformanceBased,
        Priority::High if system_load_ratio > ADAPTIVE_LOAD_RATIO => Algorithm::ResourceBased,
        Priority::High => Algorithm::PerformanceBased,
        Priority::Normal | Priority::Low | Priority::Minimal => Algorithm::LeastConnections,
    }
}

/// Ticket state for weighted round robin.
///
/// Each candidate is allotted `floor(weight * 10)` tickets. Selection
/// takes the candidate with the most remaining tickets and spends one.
/// As soon as any candidate with a non-zero allotment runs out, every
/// candidate is refilled: its allotment is added to what it has left, so
/// the tickets a candidate did not get to spend are not lost and shares
/// converge on the weights.
#[derive(Debug, Default)]
pub struct WeightedTickets {
    remaining: HashMap<ComponentId, u32>,
}

impl WeightedTickets {
    pub fn new() -> Self {
        Self::default()
    }

    fn allotments(candidates: &[Candidate]) -> Vec<u32> {
        let allot: Vec<u32> = candidates
            .iter()
            .map(|c| (c.capacity.weight * 10.0).floor().max(0.0) as u32)
            .collect();
        // All-zero weights degrade to plain rotation.
        if allot.iter().all(|&a| a == 0) {
            vec![10; candidates.len()]
        } else {
            allot
        }
    }

    fn refill(&mut self, candidates: &[Candidate], allot: &[u32]) {
        for (c, &a) in candidates.iter().zip(allot) {
            *self.remaining.entry(c.id().clone()).or_insert(0) += a;
        }
    }

    pub fn select(&mut self, candidates: &[Candidate]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let allot = Self::allotments(candidates);

        let mut exhausted = false;
        for (c, &a) in candidates.iter().zip(&allot) {
            if *self.remaining.entry(c.id().clone()).or_insert(a) == 0 && a > 0 {
                exhausted = true;
            }
        }
        if exhausted {
            self.refill(candidates, &allot);
        }

        let mut best: Option<(usize, u32)> = None;
        for (idx, c) in candidates.iter().enumerate() {
            let left = self.remaining.get(c.id()).copied().unwrap_or(0);
            if left > 0 && best.is_none_or(|(_, b)| left > b) {
                best = Some((idx, left));
            }
        }

        let (idx, _) = best?;
        if let Some(left) = self.remaining.get_mut(candidates[idx].id()) {
            *left -= 1;
        }
        Some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadpilot_state::WorkloadType;

    fn candidate(id: &str, tasks: u32) -> Candidate {
        let mut cap = ComponentCapacity::new(id, 10);
        cap.current_tasks = tasks;
        Candidate::new(cap, None)
    }

    fn with_latency(mut c: Candidate, latency: f64) -> Candidate {
        let mut m = ComponentMetrics::new(c.id().clone());
        m.total_requests = 10;
        m.successful_requests = 10;
        m.avg_latency_ms = latency;
        c.metrics = Some(m);
        c
    }

    fn with_weight(mut c: Candidate, weight: f64) -> Candidate {
        c.capacity.weight = weight;
        c
    }

    fn request() -> WorkloadRequest {
        WorkloadRequest::new(WorkloadType::PriceUpdate, Priority::Normal)
    }

    #[test]
    fn least_connections_picks_fewest_tasks() {
        let cands = vec![candidate("a", 3), candidate("b", 1), candidate("c", 2)];
        assert_eq!(least_connections(&cands), Some(1));
    }

    #[test]
    fn ties_resolve_to_first_candidate() {
        let cands = vec![candidate("a", 2), candidate("b", 2)];
        assert_eq!(least_connections(&cands), Some(0));
        assert_eq!(performance_based(&cands), Some(0));
        assert_eq!(resource_based(&cands, &request()), Some(0));
    }

    #[test]
    fn empty_candidates_select_nothing() {
        assert_eq!(least_connections(&[]), None);
        assert_eq!(least_response_time(&[]), None);
        assert_eq!(performance_based(&[]), None);
        assert_eq!(WeightedTickets::new().select(&[]), None);
    }

    #[test]
    fn least_response_time_picks_fastest() {
        let cands = vec![
            with_latency(candidate("a", 0), 120.0),
            with_latency(candidate("b", 0), 40.0),
            with_latency(candidate("c", 0), 80.0),
        ];
        assert_eq!(least_response_time(&cands), Some(1));
    }

    #[test]
    fn resource_based_prefers_headroom() {
        let mut busy = candidate("a", 0);
        busy.capacity.current_utilization.cpu = 90.0;
        busy.capacity.current_utilization.memory = 80.0;
        let idle = candidate("b", 0);

        let req = request().with_requirement(ResourceType::Cpu, 20.0);
        assert_eq!(resource_score(&idle, &req), 380.0);
        assert_eq!(resource_based(&[busy, idle], &req), Some(1));
    }

    #[test]
    fn resource_score_never_counts_negative_headroom() {
        let mut c = candidate("a", 0);
        c.capacity.current_utilization.cpu = 95.0;
        let req = request().with_requirement(ResourceType::Cpu, 50.0);
        // cpu contributes 0, the other three 100 each.
        assert_eq!(resource_score(&c, &req), 300.0);
    }

    #[test]
    fn performance_score_formula() {
        let mut c = with_latency(candidate("a", 5), 100.0);
        if let Some(m) = c.metrics.as_mut() {
            m.throughput = 10.0;
        }
        // 0.3*100 + 0.3*90 + 0.2*10 + 0.2*50
        assert!((performance_score(&c) - 69.0).abs() < 1e-9);

        let doubled = with_weight(c, 2.0);
        assert!((performance_score(&doubled) - 138.0).abs() < 1e-9);
    }

    #[test]
    fn performance_based_prefers_healthy_fast_component() {
        let mut slow = with_latency(candidate("a", 0), 900.0);
        if let Some(m) = slow.metrics.as_mut() {
            m.failed_requests = 5;
            m.successful_requests = 5;
        }
        let fast = with_latency(candidate("b", 0), 50.0);
        assert_eq!(performance_based(&[slow, fast]), Some(1));
    }

    #[test]
    fn adaptive_branches_on_priority_and_load() {
        assert_eq!(adaptive_delegate(Priority::Critical, 0.9), Algorithm::PerformanceBased);
        assert_eq!(adaptive_delegate(Priority::High, 0.8), Algorithm::ResourceBased);
        assert_eq!(adaptive_delegate(Priority::High, 0.7), Algorithm::PerformanceBased);
        assert_eq!(adaptive_delegate(Priority::Normal, 0.9), Algorithm::LeastConnections);
        assert_eq!(adaptive_delegate(Priority::Minimal, 0.1), Algorithm::LeastConnections);
    }

    #[test]
    fn weighted_round_robin_converges_to_weight_share() {
        let cands = vec![
            with_weight(candidate("a", 0), 1.0),
            with_weight(candidate("b", 0), 2.0),
            with_weight(candidate("c", 0), 3.0),
        ];
        let mut tickets = WeightedTickets::new();
        let mut counts = [0usize; 3];
        let n = 6000;
        for _ in 0..n {
            let idx = tickets.select(&cands).unwrap();
            counts[idx] += 1;
        }

        for (count, weight) in counts.iter().zip([1.0, 2.0, 3.0]) {
            let share = *count as f64 / n as f64;
            let expected = weight / 6.0;
            assert!(
                (share - expected).abs() < 0.03,
                "share {share} expected {expected}"
            );
        }
    }

    #[test]
    fn weighted_round_robin_refills_when_any_runs_out() {
        let cands = vec![
            with_weight(candidate("a", 0), 0.1),
            with_weight(candidate("b", 0), 0.3),
        ];
        let mut tickets = WeightedTickets::new();
        // b spends down to a's single ticket and a takes the tie. With a
        // out, the next pick refills both; b's unspent ticket carries over.
        let picks: Vec<usize> = (0..8).filter_map(|_| tickets.select(&cands)).collect();
        assert_eq!(picks, vec![1, 1, 0, 1, 1, 1, 0, 1]);
    }

    #[test]
    fn weighted_round_robin_skips_zero_weight() {
        let cands = vec![
            with_weight(candidate("a", 0), 0.0),
            with_weight(candidate("b", 0), 1.0),
        ];
        let mut tickets = WeightedTickets::new();
        for _ in 0..25 {
            assert_eq!(tickets.select(&cands), Some(1));
        }
    }

    #[test]
    fn weighted_round_robin_all_zero_rotates() {
        let cands = vec![
            with_weight(candidate("a", 0), 0.0),
            with_weight(candidate("b", 0), 0.0),
        ];
        let mut tickets = WeightedTickets::new();
        let picks: Vec<usize> = (0..4).filter_map(|_| tickets.select(&cands)).collect();
        assert_eq!(picks, vec![0, 1, 0, 1]);
    }
}
