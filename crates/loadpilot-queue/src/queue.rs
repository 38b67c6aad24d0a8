//! Bounded request queue.
//!
//! FIFO with a hard capacity. `submit` never blocks; `dequeue` suspends
//! until an item arrives or the timeout elapses so the caller can check
//! for shutdown between waits.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use loadpilot_state::{Priority, WorkloadRequest};

struct Inner {
    items: Mutex<VecDeque<WorkloadRequest>>,
    capacity: usize,
    notify: Notify,
}

#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<Inner>,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
                capacity,
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue a request. Hands it back if the queue is full.
    pub async fn submit(&self, request: WorkloadRequest) -> Result<(), WorkloadRequest> {
        {
            let mut items = self.inner.items.lock().await;
            if items.len() >= self.inner.capacity {
                return Err(request);
            }
            items.push_back(request);
        }
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Wait up to `timeout` for the next request.
    pub async fn dequeue(&self, timeout: Duration) -> Option<WorkloadRequest> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.notify.notified();
            if let Some(request) = self.inner.items.lock().await.pop_front() {
                return Some(request);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.inner.items.lock().await.pop_front();
            }
        }
    }

    /// Drop every queued request below `floor` and reorder the rest by
    /// priority, highest first (FIFO within a priority). Returns the
    /// dropped requests.
    pub async fn shed_below(&self, floor: Priority) -> Vec<WorkloadRequest> {
        let mut items = self.inner.items.lock().await;
        let (mut kept, dropped): (Vec<_>, Vec<_>) =
            items.drain(..).partition(|r| r.priority >= floor);
        kept.sort_by(|a, b| b.priority.cmp(&a.priority));
        items.extend(kept);
        dropped
    }

    /// Remove and return everything queued.
    pub async fn drain(&self) -> Vec<WorkloadRequest> {
        self.inner.items.lock().await.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadpilot_state::WorkloadType;

    fn req(id: &str, priority: Priority) -> WorkloadRequest {
        WorkloadRequest::new(WorkloadType::PriceUpdate, priority).with_id(id)
    }

    #[tokio::test]
    async fn rejects_when_full() {
        let queue = RequestQueue::new(2);
        assert!(queue.submit(req("1", Priority::Normal)).await.is_ok());
        assert!(queue.submit(req("2", Priority::Normal)).await.is_ok());

        let rejected = queue.submit(req("3", Priority::Critical)).await.unwrap_err();
        assert_eq!(rejected.id, "3");
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn dequeues_in_fifo_order() {
        let queue = RequestQueue::new(10);
        queue.submit(req("1", Priority::Low)).await.unwrap();
        queue.submit(req("2", Priority::Critical)).await.unwrap();

        let timeout = Duration::from_millis(10);
        assert_eq!(queue.dequeue(timeout).await.unwrap().id, "1");
        assert_eq!(queue.dequeue(timeout).await.unwrap().id, "2");
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_times_out_when_empty() {
        let queue = RequestQueue::new(10);
        let start = Instant::now();
        assert!(queue.dequeue(Duration::from_secs(1)).await.is_none());
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_wakes_on_submit() {
        let queue = RequestQueue::new(10);
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            producer.submit(req("late", Priority::Normal)).await.unwrap();
        });

        let got = queue.dequeue(Duration::from_secs(5)).await.unwrap();
        assert_eq!(got.id, "late");
    }

    #[tokio::test]
    async fn shedding_keeps_high_priority_first() {
        let queue = RequestQueue::new(10);
        queue.submit(req("low", Priority::Low)).await.unwrap();
        queue.submit(req("normal", Priority::Normal)).await.unwrap();
        queue.submit(req("minimal", Priority::Minimal)).await.unwrap();
        queue.submit(req("critical", Priority::Critical)).await.unwrap();

        let dropped = queue.shed_below(Priority::Normal).await;
        let dropped: Vec<_> = dropped.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(dropped, vec!["low", "minimal"]);

        let remaining: Vec<_> = queue.drain().await.into_iter().map(|r| r.id).collect();
        assert_eq!(remaining, vec!["critical", "normal"]);
    }
}
