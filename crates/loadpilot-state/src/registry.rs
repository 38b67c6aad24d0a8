//! Capacity registry — process-wide capacity and status of every component.
//!
//! One `RwLock` guards the whole map. Every mutation re-derives the
//! component's status, so readers never observe a stale status for the
//! load they see.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::types::*;
use loadpilot_core::types::*;

/// Thread-safe registry of component capacity, shared across tasks.
#[derive(Clone)]
pub struct CapacityRegistry {
    components: Arc<RwLock<HashMap<ComponentId, ComponentCapacity>>>,
    thresholds: StatusThresholds,
}

impl CapacityRegistry {
    pub fn new(thresholds: StatusThresholds) -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> StatusThresholds {
        self.thresholds
    }

    /// Insert or replace a component's capacity record.
    pub async fn register(&self, mut capacity: ComponentCapacity) {
        capacity.status = capacity.derive_status(&self.thresholds);
        let id = capacity.component.clone();
        self.components.write().await.insert(id.clone(), capacity);
        debug!(component = %id, "component registered");
    }

    pub async fn get(&self, component: &str) -> Option<ComponentCapacity> {
        self.components.read().await.get(component).cloned()
    }

    /// All components, ordered by id.
    pub async fn snapshot(&self) -> Vec<ComponentCapacity> {
        let components = self.components.read().await;
        let mut all: Vec<ComponentCapacity> = components.values().cloned().collect();
        all.sort_by(|a, b| a.component.cmp(&b.component));
        all
    }

    pub async fn component_ids(&self) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self.components.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn status(&self, component: &str) -> Option<ComponentStatus> {
        self.components
            .read()
            .await
            .get(component)
            .map(|c| c.status)
    }

    /// Adjust a component's running task count by `delta` (saturating at
    /// zero) and return its new status.
    pub async fn update_load(&self, component: &str, delta: i64) -> StateResult<ComponentStatus> {
        self.mutate(component, |c| {
            let next = i64::from(c.current_tasks).saturating_add(delta).max(0);
            c.current_tasks = u32::try_from(next).unwrap_or(u32::MAX);
        })
        .await
    }

    /// Set the allocation of one resource.
    pub async fn set_allocation(
        &self,
        component: &str,
        resource: ResourceType,
        value: f64,
    ) -> StateResult<()> {
        self.mutate(component, |c| c.allocation.set(resource, value))
            .await?;
        debug!(%component, %resource, value, "allocation updated");
        Ok(())
    }

    /// Replace the whole allocation vector (used when restoring state).
    pub async fn set_allocations(
        &self,
        component: &str,
        allocation: ResourceVector,
    ) -> StateResult<()> {
        self.mutate(component, |c| c.allocation = allocation).await?;
        Ok(())
    }

    /// Record a fresh utilization measurement.
    pub async fn set_utilization(
        &self,
        component: &str,
        utilization: ResourceVector,
    ) -> StateResult<()> {
        self.mutate(component, |c| c.current_utilization = utilization)
            .await?;
        Ok(())
    }

    /// Record a health verdict. Unhealthy forces `Failed`.
    pub async fn set_health(
        &self,
        component: &str,
        health: HealthStatus,
    ) -> StateResult<ComponentStatus> {
        let status = self.mutate(component, |c| c.health = health).await?;
        info!(%component, ?health, %status, "component health changed");
        Ok(status)
    }

    pub async fn set_maintenance(&self, component: &str, maintenance: bool) -> StateResult<()> {
        self.mutate(component, |c| c.maintenance = maintenance)
            .await?;
        info!(%component, maintenance, "maintenance mode changed");
        Ok(())
    }

    pub async fn set_weight(&self, component: &str, weight: f64) -> StateResult<()> {
        self.mutate(component, |c| c.weight = weight.max(0.0))
            .await?;
        Ok(())
    }

    /// Aggregate load ratio: total running tasks over total task capacity.
    pub async fn system_load_ratio(&self) -> f64 {
        let components = self.components.read().await;
        let (tasks, capacity) = components.values().fold((0u64, 0u64), |(t, m), c| {
            (
                t + u64::from(c.current_tasks),
                m + u64::from(c.max_concurrent_tasks),
            )
        });
        if capacity == 0 {
            return 0.0;
        }
        tasks as f64 / capacity as f64
    }

    /// Components that are healthy and accept work.
    pub async fn healthy_count(&self) -> usize {
        self.components
            .read()
            .await
            .values()
            .filter(|c| c.is_healthy() && c.status.accepts_work())
            .count()
    }

    /// Sum of one resource's allocation across all components.
    pub async fn total_allocation(&self, resource: ResourceType) -> f64 {
        self.components
            .read()
            .await
            .values()
            .map(|c| c.allocation.get(resource))
            .sum()
    }

    async fn mutate<F>(&self, component: &str, f: F) -> StateResult<ComponentStatus>
    where
        F: FnOnce(&mut ComponentCapacity),
    {
        let mut components = self.components.write().await;
        let capacity = components
            .get_mut(component)
            .ok_or_else(|| StateError::UnknownComponent(component.to_string()))?;
        f(capacity);
        capacity.status = capacity.derive_status(&self.thresholds);
        capacity.updated_at = epoch_secs();
        Ok(capacity.status)
    }
}

impl Default for CapacityRegistry {
    fn default() -> Self {
        Self::new(StatusThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry_with(ids: &[&str], max_tasks: u32) -> CapacityRegistry {
        let registry = CapacityRegistry::default();
        for id in ids {
            registry.register(ComponentCapacity::new(*id, max_tasks)).await;
        }
        registry
    }

    #[tokio::test]
    async fn update_load_derives_status() {
        let registry = registry_with(&["a"], 10).await;

        assert_eq!(registry.update_load("a", 7).await.unwrap(), ComponentStatus::Busy);
        assert_eq!(registry.update_load("a", 2).await.unwrap(), ComponentStatus::Overloaded);
        assert_eq!(registry.update_load("a", -9).await.unwrap(), ComponentStatus::Available);
        assert_eq!(registry.get("a").await.unwrap().current_tasks, 0);
    }

    #[tokio::test]
    async fn update_load_saturates_at_zero() {
        let registry = registry_with(&["a"], 10).await;
        registry.update_load("a", -5).await.unwrap();
        assert_eq!(registry.get("a").await.unwrap().current_tasks, 0);
    }

    #[tokio::test]
    async fn unknown_component_is_an_error() {
        let registry = CapacityRegistry::default();
        assert!(matches!(
            registry.update_load("ghost", 1).await,
            Err(StateError::UnknownComponent(id)) if id == "ghost"
        ));
    }

    #[tokio::test]
    async fn health_failure_forces_failed() {
        let registry = registry_with(&["a"], 10).await;
        let status = registry.set_health("a", HealthStatus::Unhealthy).await.unwrap();
        assert_eq!(status, ComponentStatus::Failed);
        assert_eq!(registry.healthy_count().await, 0);

        let status = registry.set_health("a", HealthStatus::Healthy).await.unwrap();
        assert_eq!(status, ComponentStatus::Available);
        assert_eq!(registry.healthy_count().await, 1);
    }

    #[tokio::test]
    async fn system_load_ratio_aggregates_all_components() {
        let registry = registry_with(&["a", "b"], 10).await;
        registry.update_load("a", 10).await.unwrap();
        registry.update_load("b", 5).await.unwrap();
        assert!((registry.system_load_ratio().await - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn total_allocation_sums_components() {
        let registry = registry_with(&["a", "b"], 10).await;
        registry.set_allocation("a", ResourceType::Cpu, 2.5).await.unwrap();
        registry.set_allocation("b", ResourceType::Cpu, 1.5).await.unwrap();
        assert_eq!(registry.total_allocation(ResourceType::Cpu).await, 4.0);
        assert_eq!(registry.total_allocation(ResourceType::Memory).await, 0.0);
    }

    #[tokio::test]
    async fn snapshot_is_sorted_by_id() {
        let registry = registry_with(&["c", "a", "b"], 1).await;
        let ids: Vec<_> = registry
            .snapshot()
            .await
            .into_iter()
            .map(|c| c.component)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
