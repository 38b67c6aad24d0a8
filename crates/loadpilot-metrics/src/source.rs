//! Utilization sources.
//!
//! The scaling monitor asks a [`MetricsSource`] for each component's
//! utilization on every tick. Production wiring derives utilization from
//! the load the processor is actually placing on the component; tests
//! inject fixed readings.

use std::collections::HashMap;
use std::sync::RwLock;

use loadpilot_state::{ComponentCapacity, ComponentId, ResourceType, ResourceVector};

/// Supplies utilization readings (percent per resource).
pub trait MetricsSource: Send + Sync {
    /// Latest reading for a component, or `None` when unavailable.
    fn sample(&self, capacity: &ComponentCapacity) -> Option<ResourceVector>;
}

/// Derives utilization from task load and allocation.
///
/// Each running task consumes `footprint` of a resource per unit of
/// allocation, so utilization rises with load and falls when the
/// executor grants more allocation.
#[derive(Debug, Clone)]
pub struct TaskLoadSource {
    footprint: ResourceVector,
}

impl TaskLoadSource {
    pub fn new(footprint: ResourceVector) -> Self {
        Self { footprint }
    }
}

impl Default for TaskLoadSource {
    fn default() -> Self {
        Self::new(ResourceVector {
            cpu: 1.0,
            memory: 0.8,
            network: 0.5,
            storage: 0.2,
        })
    }
}

impl MetricsSource for TaskLoadSource {
    fn sample(&self, capacity: &ComponentCapacity) -> Option<ResourceVector> {
        let load = capacity.load_percent();
        let mut reading = ResourceVector::default();
        for resource in ResourceType::ALL {
            let allocation = capacity.allocation.get(resource).max(0.1);
            let value = load * self.footprint.get(resource) / allocation;
            reading.set(resource, value.clamp(0.0, 100.0));
        }
        Some(reading)
    }
}

/// Fixed readings keyed by component, settable at runtime.
#[derive(Debug, Default)]
pub struct FixtureSource {
    readings: RwLock<HashMap<ComponentId, ResourceVector>>,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, component: &str, reading: ResourceVector) {
        self.readings
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(component.to_string(), reading);
    }

    pub fn set_resource(&self, component: &str, resource: ResourceType, value: f64) {
        let mut readings = self.readings.write().unwrap_or_else(|e| e.into_inner());
        readings
            .entry(component.to_string())
            .or_default()
            .set(resource, value);
    }

    pub fn clear(&self, component: &str) {
        self.readings
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(component);
    }
}

impl MetricsSource for FixtureSource {
    fn sample(&self, capacity: &ComponentCapacity) -> Option<ResourceVector> {
        self.readings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&capacity.component)
            .copied()
    }
}
