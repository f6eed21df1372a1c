use std::collections::HashMap;
use std::sync::Arc;

use nucleus_domain::{ComponentName, ComponentState};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::channels::CloudChannel;
use crate::deployment::DeploymentPhase;

/// One entry in the append-only deployment audit trail (§12 supplement to
/// §4.8): every FSM transition a deployment makes is worth recalling for
/// introspection even once the deployment itself has finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub deployment_id: String,
    pub timestamp_ms: i64,
    pub phase: DeploymentPhase,
    pub detail: String,
}

#[derive(Default)]
pub struct AuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl AuditLog {
    pub fn new() -> Self {
        AuditLog::default()
    }

    pub async fn append(&self, event: AuditEvent) {
        self.events.lock().await.push(event);
    }

    /// Returns up to `limit` most recent events, optionally filtered to one
    /// deployment id.
    pub async fn query(&self, deployment_id: Option<&str>, limit: usize) -> Vec<AuditEvent> {
        let events = self.events.lock().await;
        events
            .iter()
            .rev()
            .filter(|e| match deployment_id {
                Some(id) => e.deployment_id == id,
                None => true,
            })
            .take(limit)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallHealth {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub name: ComponentName,
    pub state: ComponentState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub deployment_id: String,
    pub phase: DeploymentPhase,
}

/// The device-wide status document emitted on every transition and on a
/// periodic tick (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDocument {
    pub device: String,
    pub timestamp_ms: i64,
    pub deployment_statuses: Vec<DeploymentStatus>,
    pub component_statuses: Vec<ComponentStatus>,
    pub overall_health: OverallHealth,
}

/// Tracks the last reported state per component/deployment and emits a
/// fresh `StatusDocument` whenever either changes, or on the periodic tick.
pub struct StatusReporter {
    device: String,
    cloud: Arc<dyn CloudChannel>,
    last_component_states: Mutex<HashMap<ComponentName, ComponentState>>,
    last_deployment_phases: Mutex<HashMap<String, DeploymentPhase>>,
    broken_budget_exhausted: Mutex<std::collections::HashSet<ComponentName>>,
}

impl StatusReporter {
    pub fn new(device: impl Into<String>, cloud: Arc<dyn CloudChannel>) -> Self {
        StatusReporter {
            device: device.into(),
            cloud,
            last_component_states: Mutex::new(HashMap::new()),
            last_deployment_phases: Mutex::new(HashMap::new()),
            broken_budget_exhausted: Mutex::new(std::collections::HashSet::new()),
        }
    }

    /// Records a component's restart budget as exhausted so overall health
    /// reflects it even while the component itself is merely ERRORED rather
    /// than BROKEN (§4.8: "ERRORED with exhausted restart budget").
    pub async fn mark_restart_budget_exhausted(&self, name: ComponentName) {
        self.broken_budget_exhausted.lock().await.insert(name);
    }

    pub async fn note_component_state(&self, name: ComponentName, state: ComponentState, timestamp_ms: i64) {
        let changed = {
            let mut last = self.last_component_states.lock().await;
            let changed = last.get(&name) != Some(&state);
            last.insert(name, state);
            changed
        };
        if changed {
            self.emit(timestamp_ms).await;
        }
    }

    pub async fn note_deployment_phase(&self, deployment_id: String, phase: DeploymentPhase, timestamp_ms: i64) {
        let changed = {
            let mut last = self.last_deployment_phases.lock().await;
            let changed = last.get(&deployment_id) != Some(&phase);
            last.insert(deployment_id, phase);
            changed
        };
        if changed {
            self.emit(timestamp_ms).await;
        }
    }

    pub async fn emit(&self, timestamp_ms: i64) {
        let component_statuses: Vec<ComponentStatus> = self
            .last_component_states
            .lock()
            .await
            .iter()
            .map(|(name, state)| ComponentStatus {
                name: name.clone(),
                state: *state,
            })
            .collect();
        let deployment_statuses: Vec<DeploymentStatus> = self
            .last_deployment_phases
            .lock()
            .await
            .iter()
            .map(|(id, phase)| DeploymentStatus {
                deployment_id: id.clone(),
                phase: *phase,
            })
            .collect();
        let exhausted = self.broken_budget_exhausted.lock().await;
        let overall_health = if component_statuses
            .iter()
            .any(|c| c.state == ComponentState::Broken || exhausted.contains(&c.name))
        {
            OverallHealth::Unhealthy
        } else {
            OverallHealth::Healthy
        };

        let document = StatusDocument {
            device: self.device.clone(),
            timestamp_ms,
            deployment_statuses,
            component_statuses,
            overall_health,
        };
        info!(device = %document.device, health = ?document.overall_health, "emitting status document");
        if let Ok(value) = serde_json::to_value(&document) {
            let _ = self.cloud.report_status(value).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::LoggingCloudChannel;

    #[tokio::test]
    async fn overall_health_turns_unhealthy_once_a_component_is_broken() {
        let reporter = StatusReporter::new("device-1", Arc::new(LoggingCloudChannel));
        let name = ComponentName::new("CustomerApp").unwrap();
        reporter.note_component_state(name.clone(), ComponentState::Running, 1).await;
        reporter.note_component_state(name, ComponentState::Broken, 2).await;

        let last = reporter.last_component_states.lock().await;
        assert_eq!(last.values().next(), Some(&ComponentState::Broken));
    }

    #[tokio::test]
    async fn audit_log_filters_by_deployment_id() {
        let log = AuditLog::new();
        log.append(AuditEvent {
            deployment_id: "d1".to_string(),
            timestamp_ms: 1,
            phase: DeploymentPhase::Queued,
            detail: "queued".to_string(),
        })
        .await;
        log.append(AuditEvent {
            deployment_id: "d2".to_string(),
            timestamp_ms: 2,
            phase: DeploymentPhase::Queued,
            detail: "queued".to_string(),
        })
        .await;

        let filtered = log.query(Some("d1"), 10).await;
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].deployment_id, "d1");
    }
}
