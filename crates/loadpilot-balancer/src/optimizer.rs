//! Algorithm optimizer — switches the active algorithm on evidence.
//!
//! Each tick samples how evenly load is spread across components and
//! credits the sample to the active algorithm, then compares the
//! composite score of every algorithm over its most recent outcomes,
//! among those with enough of them. The best one becomes active.
//! All-time counters are kept for reporting only, so a long good run
//! does not hide a current collapse.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use loadpilot_metrics::load_distribution_score;
use loadpilot_state::{Algorithm, AlgorithmSwitch};

use crate::balancer::LoadBalancer;

pub struct AlgorithmOptimizer {
    balancer: Arc<LoadBalancer>,
    /// Algorithms need strictly more completed requests than this to be
    /// compared.
    min_samples: u64,
}

impl AlgorithmOptimizer {
    pub fn new(balancer: Arc<LoadBalancer>, min_samples: u64) -> Self {
        Self {
            balancer,
            min_samples,
        }
    }

    /// Score the current load spread and credit it to the active algorithm.
    pub async fn sample_distribution(&self) -> f64 {
        let loads: Vec<f64> = self
            .balancer
            .registry()
            .snapshot()
            .await
            .iter()
            .filter(|c| c.status.accepts_work())
            .map(|c| c.load_percent())
            .collect();
        let score = load_distribution_score(&loads);
        let active = self.balancer.active_algorithm().await;
        self.balancer.record_distribution(active, score).await;
        score
    }

    /// Switch to the best-scoring algorithm if it is not already active.
    pub async fn evaluate(&self) -> Option<AlgorithmSwitch> {
        let active = self.balancer.active_algorithm().await;
        let mut best: Option<(Algorithm, f64)> = None;
        for perf in self.balancer.recent_performance().await {
            if perf.total_requests <= self.min_samples {
                continue;
            }
            let score = perf.score();
            debug!(algorithm = %perf.algorithm, score, samples = perf.total_requests, "algorithm scored");
            // The active algorithm keeps its place on a tie.
            let better = match best {
                None => true,
                Some((b, s)) => score > s || (score == s && perf.algorithm == active && b != active),
            };
            if better {
                best = Some((perf.algorithm, score));
            }
        }

        let (winner, score) = best?;
        if !self.balancer.set_algorithm(winner, score).await {
            return None;
        }
        self.balancer.recent_switches().await.pop()
    }

    /// Run the optimizer loop until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "algorithm optimizer started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.sample_distribution().await;
                    self.evaluate().await;
                }
                _ = shutdown.changed() => {
                    info!("algorithm optimizer shutting down");
                    break;
                }
            }
        }
    }
}
