//! Alert manager — threshold alerts with cooldown de-duplication.
//!
//! Alerts are keyed by `(component, alert type)`. While an unresolved
//! alert for a key is inside its cooldown window, repeat raises for that
//! key are folded into it (counted in `suppressed`) instead of producing
//! a new notification; a higher severity escalates it in place. Alerts
//! resolve when their condition clears and move into a bounded history.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use loadpilot_core::AlertSettings;
use loadpilot_state::{
    Alert, AlertSeverity, AlertType, ComponentCapacity, ComponentId, ComponentMetrics,
    ResourceType,
};

/// Component name used for controller-wide alerts such as queue backlog.
pub const SYSTEM_COMPONENT: &str = "system";

type AlertKey = (ComponentId, AlertType);

/// What happened to a raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaiseOutcome {
    /// A new notification was emitted.
    Raised,
    /// An active alert was escalated to a higher severity.
    Escalated,
    /// Folded into an active alert inside its cooldown window.
    Suppressed,
}

/// Severity for `value` strictly above the warning/critical thresholds,
/// `None` at or below both.
pub fn severity_for(value: f64, warning: f64, critical: f64) -> Option<AlertSeverity> {
    if value > critical {
        Some(AlertSeverity::Critical)
    } else if value > warning {
        Some(AlertSeverity::Warning)
    } else {
        None
    }
}

#[derive(Default)]
struct AlertBook {
    active: HashMap<AlertKey, Alert>,
    history: VecDeque<Alert>,
}

/// Shared alert state. Cloning is cheap.
#[derive(Clone)]
pub struct AlertManager {
    book: Arc<Mutex<AlertBook>>,
    settings: AlertSettings,
}

impl AlertManager {
    pub fn new(settings: AlertSettings) -> Self {
        Self {
            book: Arc::new(Mutex::new(AlertBook::default())),
            settings,
        }
    }

    pub fn settings(&self) -> &AlertSettings {
        &self.settings
    }

    /// Raise an alert for `(component, alert_type)` at `now` (seconds).
    pub async fn raise(
        &self,
        component: &str,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
        cooldown_secs: u64,
        now: u64,
    ) -> RaiseOutcome {
        let mut book = self.book.lock().await;
        let key = (component.to_string(), alert_type);

        let outcome = match book.active.get_mut(&key) {
            Some(existing) if now.saturating_sub(existing.created_at) < cooldown_secs => {
                if severity > existing.severity {
                    existing.severity = severity;
                    existing.message = message;
                    RaiseOutcome::Escalated
                } else {
                    existing.suppressed += 1;
                    debug!(%component, %alert_type, suppressed = existing.suppressed, "alert suppressed");
                    return RaiseOutcome::Suppressed;
                }
            }
            Some(existing) => {
                // Still active after its cooldown: notify again.
                existing.severity = severity;
                existing.message = message;
                existing.created_at = now;
                existing.suppressed = 0;
                RaiseOutcome::Raised
            }
            None => {
                book.active.insert(
                    key.clone(),
                    Alert {
                        component: component.to_string(),
                        alert_type,
                        severity,
                        message,
                        created_at: now,
                        resolved: false,
                        resolved_at: None,
                        suppressed: 0,
                    },
                );
                RaiseOutcome::Raised
            }
        };

        if let Some(alert) = book.active.get(&key) {
            emit(alert);
        }
        outcome
    }

    /// Resolve the active alert for a key. Returns whether one existed.
    pub async fn resolve(&self, component: &str, alert_type: AlertType, now: u64) -> bool {
        let mut book = self.book.lock().await;
        let Some(mut alert) = book.active.remove(&(component.to_string(), alert_type)) else {
            return false;
        };
        alert.resolved = true;
        alert.resolved_at = Some(now);
        info!(%component, %alert_type, "alert resolved");

        book.history.push_back(alert);
        while book.history.len() > self.settings.history {
            book.history.pop_front();
        }
        true
    }

    /// Raise when `severity` is set, resolve otherwise.
    async fn apply(
        &self,
        component: &str,
        alert_type: AlertType,
        severity: Option<AlertSeverity>,
        message: impl FnOnce() -> String,
        cooldown_secs: u64,
        now: u64,
    ) {
        match severity {
            Some(severity) => {
                self.raise(component, alert_type, severity, message(), cooldown_secs, now)
                    .await;
            }
            None => {
                self.resolve(component, alert_type, now).await;
            }
        }
    }

    /// Evaluate load, per-resource utilization, and latency alerts for
    /// one component.
    pub async fn evaluate_component(
        &self,
        capacity: &ComponentCapacity,
        metrics: Option<&ComponentMetrics>,
        now: u64,
    ) {
        let id = capacity.component.as_str();
        let s = &self.settings;
        let cooldown = s.load_cooldown_secs;

        let load = capacity.load_percent();
        self.apply(
            id,
            AlertType::HighLoad,
            severity_for(load, s.warning_threshold, s.critical_threshold),
            || format!("load {load:.1}% ({}/{} tasks)", capacity.current_tasks, capacity.max_concurrent_tasks),
            cooldown,
            now,
        )
        .await;

        for resource in ResourceType::ALL {
            let value = capacity.current_utilization.get(resource);
            self.apply(
                id,
                AlertType::ResourceUtilization(resource),
                severity_for(value, s.warning_threshold, s.critical_threshold),
                || format!("{resource} utilization {value:.1}%"),
                cooldown,
                now,
            )
            .await;
        }

        // Latency only means something once requests have completed.
        let latency = metrics
            .filter(|m| m.completed() > 0)
            .map(|m| m.avg_latency_ms)
            .unwrap_or(0.0);
        self.apply(
            id,
            AlertType::HighLatency,
            severity_for(latency, s.latency_warning_ms, s.latency_critical_ms),
            || format!("average latency {latency:.0}ms"),
            cooldown,
            now,
        )
        .await;
    }

    /// Queue backlog alert: warning above the backlog ratio, critical when full.
    pub async fn check_queue(&self, depth: usize, capacity: usize, now: u64) {
        let ratio = if capacity == 0 {
            1.0
        } else {
            depth as f64 / capacity as f64
        };
        let severity = if ratio >= 1.0 {
            Some(AlertSeverity::Critical)
        } else {
            severity_for(ratio, self.settings.queue_backlog_ratio, 1.0)
        };
        self.apply(
            SYSTEM_COMPONENT,
            AlertType::QueueBacklog,
            severity,
            || format!("request queue at {depth}/{capacity}"),
            self.settings.scaling_cooldown_secs,
            now,
        )
        .await;
    }

    /// A health probe marked the component failed.
    pub async fn component_failed(&self, component: &str, now: u64) {
        self.raise(
            component,
            AlertType::ComponentFailed,
            AlertSeverity::Critical,
            "health probes failing; component removed from rotation".to_string(),
            self.settings.load_cooldown_secs,
            now,
        )
        .await;
    }

    pub async fn component_recovered(&self, component: &str, now: u64) -> bool {
        self.resolve(component, AlertType::ComponentFailed, now).await
    }

    /// The scaling executor rejected a decision on an hourly or global cap.
    pub async fn scaling_cap_reached(&self, component: &str, message: String, now: u64) {
        self.raise(
            component,
            AlertType::ScalingCapReached,
            AlertSeverity::Warning,
            message,
            self.settings.scaling_cooldown_secs,
            now,
        )
        .await;
    }

    /// A decision for the component was applied, so its caps have room again.
    pub async fn scaling_cap_cleared(&self, component: &str, now: u64) -> bool {
        self.resolve(component, AlertType::ScalingCapReached, now).await
    }

    /// Unresolved alerts, most severe first, then by component.
    pub async fn active(&self) -> Vec<Alert> {
        let book = self.book.lock().await;
        let mut alerts: Vec<Alert> = book.active.values().cloned().collect();
        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.component.cmp(&b.component))
                .then_with(|| a.alert_type.to_string().cmp(&b.alert_type.to_string()))
        });
        alerts
    }

    /// Resolved alerts, oldest first.
    pub async fn history(&self) -> Vec<Alert> {
        self.book.lock().await.history.iter().cloned().collect()
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(AlertSettings::default())
    }
}

fn emit(alert: &Alert) {
    match alert.severity {
        AlertSeverity::Warning => warn!(
            component = %alert.component,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            "{}", alert.message
        ),
        AlertSeverity::Critical => error!(
            component = %alert.component,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            "{}", alert.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capacity(tasks: u32) -> ComponentCapacity {
        let mut cap = ComponentCapacity::new("exec", 10);
        cap.current_tasks = tasks;
        cap
    }

    async fn raise_load(alerts: &AlertManager, now: u64) -> RaiseOutcome {
        alerts
            .raise("exec", AlertType::HighLoad, AlertSeverity::Warning, "busy".into(), 300, now)
            .await
    }

    #[test]
    fn severity_bands() {
        assert_eq!(severity_for(69.9, 70.0, 90.0), None);
        assert_eq!(severity_for(70.0, 70.0, 90.0), None);
        assert_eq!(severity_for(70.1, 70.0, 90.0), Some(AlertSeverity::Warning));
        assert_eq!(severity_for(90.0, 70.0, 90.0), Some(AlertSeverity::Warning));
        assert_eq!(severity_for(95.0, 70.0, 90.0), Some(AlertSeverity::Critical));
    }

    #[tokio::test]
    async fn repeat_inside_cooldown_is_suppressed() {
        let alerts = AlertManager::default();
        assert_eq!(raise_load(&alerts, 1_000).await, RaiseOutcome::Raised);
        assert_eq!(raise_load(&alerts, 1_100).await, RaiseOutcome::Suppressed);
        assert_eq!(raise_load(&alerts, 1_299).await, RaiseOutcome::Suppressed);

        let active = alerts.active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].suppressed, 2);

        // Cooldown elapsed and still unresolved: notify again.
        assert_eq!(raise_load(&alerts, 1_300).await, RaiseOutcome::Raised);
        assert_eq!(alerts.active().await[0].created_at, 1_300);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let alerts = AlertManager::default();
        alerts
            .raise("a", AlertType::HighLoad, AlertSeverity::Warning, "x".into(), 300, 0)
            .await;
        let other = alerts
            .raise("b", AlertType::HighLoad, AlertSeverity::Warning, "x".into(), 300, 0)
            .await;
        let other_type = alerts
            .raise("a", AlertType::HighLatency, AlertSeverity::Warning, "x".into(), 300, 0)
            .await;
        assert_eq!(other, RaiseOutcome::Raised);
        assert_eq!(other_type, RaiseOutcome::Raised);
        assert_eq!(alerts.active().await.len(), 3);
    }

    #[tokio::test]
    async fn higher_severity_escalates_in_cooldown() {
        let alerts = AlertManager::default();
        alerts
            .raise("a", AlertType::HighLoad, AlertSeverity::Warning, "75%".into(), 300, 0)
            .await;
        let outcome = alerts
            .raise("a", AlertType::HighLoad, AlertSeverity::Critical, "95%".into(), 300, 10)
            .await;
        assert_eq!(outcome, RaiseOutcome::Escalated);

        let active = alerts.active().await;
        assert_eq!(active[0].severity, AlertSeverity::Critical);
        assert_eq!(active[0].message, "95%");
        // The cooldown window still runs from the first raise.
        assert_eq!(active[0].created_at, 0);
    }

    #[tokio::test]
    async fn component_evaluation_raises_and_resolves() {
        let alerts = AlertManager::default();
        let mut cap = capacity(10);
        cap.current_utilization.cpu = 75.0;

        alerts.evaluate_component(&cap, None, 100).await;
        let active = alerts.active().await;
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].alert_type, AlertType::HighLoad);
        assert_eq!(active[0].severity, AlertSeverity::Critical);
        assert_eq!(
            active[1].alert_type,
            AlertType::ResourceUtilization(ResourceType::Cpu)
        );
        assert_eq!(active[1].severity, AlertSeverity::Warning);

        // Load clears, cpu does not.
        cap.current_tasks = 2;
        alerts.evaluate_component(&cap, None, 200).await;
        let active = alerts.active().await;
        assert_eq!(active.len(), 1);

        let history = alerts.history().await;
        assert_eq!(history.len(), 1);
        assert!(history[0].resolved);
        assert_eq!(history[0].resolved_at, Some(200));
    }

    #[tokio::test]
    async fn latency_alert_needs_completions() {
        let alerts = AlertManager::default();
        let mut metrics = ComponentMetrics::new("exec");
        metrics.avg_latency_ms = 1_500.0;

        alerts.evaluate_component(&capacity(0), Some(&metrics), 0).await;
        assert!(alerts.active().await.is_empty());

        metrics.successful_requests = 5;
        alerts.evaluate_component(&capacity(0), Some(&metrics), 0).await;
        let active = alerts.active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].alert_type, AlertType::HighLatency);
        assert_eq!(active[0].severity, AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn queue_backlog_thresholds() {
        let alerts = AlertManager::default();
        alerts.check_queue(80, 100, 0).await;
        assert!(alerts.active().await.is_empty());

        alerts.check_queue(81, 100, 0).await;
        assert_eq!(alerts.active().await[0].severity, AlertSeverity::Warning);
        assert_eq!(alerts.active().await[0].component, SYSTEM_COMPONENT);

        alerts.check_queue(100, 100, 1).await;
        assert_eq!(alerts.active().await[0].severity, AlertSeverity::Critical);

        alerts.check_queue(10, 100, 2).await;
        assert!(alerts.active().await.is_empty());
    }

    #[tokio::test]
    async fn scaling_cap_alert_clears_into_history() {
        let alerts = AlertManager::default();
        alerts.scaling_cap_reached("exec", "cpu decision dropped".into(), 100).await;
        assert_eq!(alerts.active().await.len(), 1);

        assert!(alerts.scaling_cap_cleared("exec", 160).await);
        assert!(alerts.active().await.is_empty());
        let history = alerts.history().await;
        assert_eq!(history[0].alert_type, AlertType::ScalingCapReached);
        assert_eq!(history[0].resolved_at, Some(160));
        assert!(!alerts.scaling_cap_cleared("exec", 200).await);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let alerts = AlertManager::new(AlertSettings {
            history: 2,
            ..AlertSettings::default()
        });
        for i in 0..4u64 {
            alerts.component_failed("a", i * 1_000).await;
            alerts.component_recovered("a", i * 1_000 + 1).await;
        }
        let history = alerts.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].created_at, 2_000);
        assert!(!alerts.component_recovered("a", 9_999).await);
    }
}
