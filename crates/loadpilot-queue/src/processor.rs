//! Request processor — the dispatch loop.
//!
//! One long-lived task dequeues requests and routes each through the
//! load balancer. Work runs in its own task, bounded by an in-flight
//! semaphore, so a slow component never stalls routing. Retries are
//! re-submitted through the queue after the backoff delay; the loop
//! itself never sleeps on a retry.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use loadpilot_balancer::{LoadBalancer, Selection};
use loadpilot_metrics::{MetricsStore, ProcessorCounters};
use loadpilot_state::{
    CapacityRegistry, ComponentId, CompletionRecord, Priority, RejectReason, RequestOutcome,
    WorkloadRequest, epoch_millis,
};

/// Future returned by a [`WorkFn`].
pub type WorkFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Executes one unit of work on a component.
///
/// Called with the chosen component id and the request. An `Err` counts
/// as a failed request.
pub type WorkFn = Arc<dyn Fn(ComponentId, WorkloadRequest) -> WorkFuture + Send + Sync>;

/// Work function that sleeps for the request's estimated duration.
pub fn simulated_work() -> WorkFn {
    Arc::new(|_component: ComponentId, request: WorkloadRequest| -> WorkFuture {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(request.estimated_duration_ms)).await;
            Ok(())
        })
    })
}

/// Result of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum SubmitOutcome {
    Accepted,
    Rejected(RejectReason),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Upper bound on any request's own `max_retries`.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub dequeue_timeout: Duration,
    pub max_in_flight: usize,
    /// System load ratio above which low-priority work is shed.
    pub load_shed_threshold: f64,
    pub completion_history: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            dequeue_timeout: Duration::from_secs(1),
            max_in_flight: 256,
            load_shed_threshold: 0.95,
            completion_history: 100,
        }
    }
}

pub struct RequestProcessor {
    queue: crate::RequestQueue,
    balancer: Arc<LoadBalancer>,
    registry: CapacityRegistry,
    metrics: MetricsStore,
    work: WorkFn,
    settings: ProcessorSettings,
    in_flight: Arc<Semaphore>,
    counters: Mutex<ProcessorCounters>,
    completions: Mutex<VecDeque<CompletionRecord>>,
    closed: AtomicBool,
}

impl RequestProcessor {
    pub fn new(
        queue: crate::RequestQueue,
        balancer: Arc<LoadBalancer>,
        metrics: MetricsStore,
        work: WorkFn,
        settings: ProcessorSettings,
    ) -> Self {
        let registry = balancer.registry().clone();
        let permits = settings.max_in_flight.max(1);
        Self {
            queue,
            balancer,
            registry,
            metrics,
            work,
            in_flight: Arc::new(Semaphore::new(permits)),
            settings,
            counters: Mutex::new(ProcessorCounters::default()),
            completions: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &crate::RequestQueue {
        &self.queue
    }

    /// Accept a request into the queue.
    pub async fn submit(&self, request: WorkloadRequest) -> SubmitOutcome {
        self.counters.lock().await.submitted += 1;

        if self.closed.load(Ordering::Acquire) {
            self.reject(request, RejectReason::ShuttingDown).await;
            return SubmitOutcome::Rejected(RejectReason::ShuttingDown);
        }

        match self.queue.submit(request).await {
            Ok(()) => {
                self.counters.lock().await.accepted += 1;
                SubmitOutcome::Accepted
            }
            Err(request) => {
                warn!(request = %request.id, priority = ?request.priority, "queue full, request rejected");
                self.reject(request, RejectReason::QueueFull).await;
                SubmitOutcome::Rejected(RejectReason::QueueFull)
            }
        }
    }

    /// Shed queued work below normal priority if the system is saturated.
    /// Returns how many requests were dropped.
    pub async fn shed_if_saturated(&self) -> usize {
        let ratio = self.registry.system_load_ratio().await;
        if ratio <= self.settings.load_shed_threshold {
            return 0;
        }

        let dropped = self.queue.shed_below(Priority::Normal).await;
        for request in &dropped {
            warn!(
                request = %request.id,
                priority = ?request.priority,
                load_ratio = ratio,
                "request shed under saturation"
            );
        }
        let count = dropped.len();
        if count > 0 {
            self.counters.lock().await.shed += count as u64;
            for request in dropped {
                self.archive(record(&request, RequestOutcome::Shed)).await;
            }
        }
        count
    }

    /// Route one dequeued request. Consumes the in-flight permit.
    pub async fn process(self: &Arc<Self>, request: WorkloadRequest, permit: OwnedSemaphorePermit) {
        if request.is_expired(epoch_millis()) {
            debug!(request = %request.id, "deadline passed before dispatch");
            self.reject(request, RejectReason::DeadlineExceeded).await;
            return;
        }

        let Some(selection) = self.balancer.select_component(&request).await else {
            self.retry_or_reject(request).await;
            return;
        };

        if let Err(e) = self.registry.update_load(&selection.component, 1).await {
            warn!(component = %selection.component, error = %e, "dispatch to unregistered component");
            self.metrics.record_rejection(&selection.component).await;
            self.retry_or_reject(request).await;
            return;
        }
        self.counters.lock().await.dispatched += 1;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.execute(request, selection).await;
            drop(permit);
        });
    }

    async fn execute(&self, request: WorkloadRequest, selection: Selection) {
        let started = Instant::now();
        let result = (self.work)(selection.component.clone(), request.clone()).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let success = result.is_ok();

        self.metrics
            .record_completion(&selection.component, latency_ms, success)
            .await;
        if let Err(e) = self.registry.update_load(&selection.component, -1).await {
            warn!(component = %selection.component, error = %e, "failed to release task slot");
        }
        self.balancer
            .record_outcome(selection.algorithm, success, latency_ms)
            .await;

        let mut rec = record(
            &request,
            if success {
                RequestOutcome::Succeeded
            } else {
                RequestOutcome::Failed
            },
        );
        rec.component = Some(selection.component.clone());
        rec.algorithm = Some(selection.algorithm);
        rec.latency_ms = latency_ms;

        match result {
            Ok(()) => {
                self.counters.lock().await.succeeded += 1;
                debug!(request = %request.id, component = %selection.component, latency_ms, "request completed");
            }
            Err(e) => {
                self.counters.lock().await.failed += 1;
                warn!(request = %request.id, component = %selection.component, error = %e, "request failed");
                rec.error = Some(e.to_string());
            }
        }
        self.archive(rec).await;
    }

    async fn retry_or_reject(self: &Arc<Self>, mut request: WorkloadRequest) {
        let limit = request.max_retries.min(self.settings.max_retries);
        if request.retry_count >= limit {
            warn!(request = %request.id, retries = request.retry_count, "no healthy component, request rejected");
            self.reject(request, RejectReason::NoHealthyComponent).await;
            return;
        }

        self.counters.lock().await.retried += 1;
        request.retry_count += 1;
        debug!(request = %request.id, attempt = request.retry_count, "no candidate, retrying after backoff");

        let this = Arc::clone(self);
        let backoff = self.settings.retry_backoff;
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            if this.closed.load(Ordering::Acquire) {
                this.reject(request, RejectReason::ShuttingDown).await;
            } else if let Err(request) = this.queue.submit(request).await {
                this.reject(request, RejectReason::QueueFull).await;
            }
        });
    }

    async fn reject(&self, request: WorkloadRequest, reason: RejectReason) {
        self.counters.lock().await.rejected += 1;
        self.archive(record(&request, RequestOutcome::Rejected(reason)))
            .await;
    }

    async fn archive(&self, record: CompletionRecord) {
        let mut completions = self.completions.lock().await;
        completions.push_back(record);
        while completions.len() > self.settings.completion_history {
            completions.pop_front();
        }
    }

    /// Most recent completion records, oldest first.
    pub async fn completions(&self) -> Vec<CompletionRecord> {
        self.completions.lock().await.iter().cloned().collect()
    }

    /// Seed the completion history from persisted state.
    pub async fn restore_completions(&self, records: Vec<CompletionRecord>) {
        let mut completions = self.completions.lock().await;
        completions.clear();
        let skip = records.len().saturating_sub(self.settings.completion_history);
        completions.extend(records.into_iter().skip(skip));
    }

    pub async fn counters(&self) -> ProcessorCounters {
        let mut counters = *self.counters.lock().await;
        let max = self.settings.max_in_flight.max(1);
        counters.in_flight = max.saturating_sub(self.in_flight.available_permits()) as u64;
        counters
    }

    /// Run the dispatch loop until shutdown, then wait for in-flight
    /// work and reject whatever is still queued.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue_capacity = self.queue.capacity(),
            max_in_flight = self.settings.max_in_flight,
            "request processor started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.shed_if_saturated().await;

            let permit = tokio::select! {
                permit = Arc::clone(&self.in_flight).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            let request = tokio::select! {
                request = self.queue.dequeue(self.settings.dequeue_timeout) => request,
                _ = shutdown.changed() => break,
            };

            if let Some(request) = request {
                self.process(request, permit).await;
            }
        }

        self.closed.store(true, Ordering::Release);
        let max = u32::try_from(self.settings.max_in_flight.max(1)).unwrap_or(u32::MAX);
        let _ = self.in_flight.acquire_many(max).await;

        let leftover = self.queue.drain().await;
        if !leftover.is_empty() {
            info!(count = leftover.len(), "rejecting queued requests at shutdown");
        }
        for request in leftover {
            self.reject(request, RejectReason::ShuttingDown).await;
        }
        info!("request processor stopped");
    }
}

fn record(request: &WorkloadRequest, outcome: RequestOutcome) -> CompletionRecord {
    CompletionRecord {
        request_id: request.id.clone(),
        workload_type: request.workload_type,
        priority: request.priority,
        component: None,
        algorithm: None,
        outcome,
        latency_ms: 0.0,
        retry_count: request.retry_count,
        error: None,
        completed_at: epoch_millis(),
    }
}
