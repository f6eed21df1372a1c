use std::collections::{HashMap, HashSet};
use std::time::Duration;

use nucleus_domain::{ComponentEvent, ComponentIdentifier, ComponentName, ComponentState, DependencyKind, Recipe};
use tokio::sync::Mutex;
use tracing::warn;

use crate::component::ComponentSupervisor;
use crate::error::AgentError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanActionKind {
    Stop,
    Start,
}

#[derive(Debug, Clone)]
pub struct PlanAction {
    pub name: ComponentName,
    pub kind: PlanActionKind,
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub actions: Vec<PlanAction>,
}

struct Managed {
    identifier: ComponentIdentifier,
    supervisor: ComponentSupervisor,
    hard_dependencies: Vec<ComponentName>,
}

/// Owns the set of active components and drives their ComponentSupervisors
/// through phased START/STOP plans (§4.5). Dependent notification on a HARD
/// dependency leaving RUNNING is handled here via `propagate_dependency_transitions`,
/// not inside ComponentSupervisor, since only the orchestrator sees the full graph.
pub struct Orchestrator {
    components: Mutex<HashMap<ComponentName, Managed>>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Orchestrator {
            components: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a component with the orchestrator if not already present.
    /// Callers resolve the full desired set and register every member
    /// (continuing and new) before calling `plan`, so dependency edges are
    /// complete regardless of registration order.
    pub async fn register(&self, identifier: ComponentIdentifier, recipe: &Recipe, supervisor: ComponentSupervisor) {
        let hard_dependencies = recipe
            .dependencies
            .iter()
            .filter(|(_, spec)| spec.kind == DependencyKind::Hard)
            .map(|(name, _)| name.clone())
            .collect();
        let name = identifier.name.clone();
        let mut components = self.components.lock().await;
        components.entry(name).or_insert(Managed {
            identifier,
            supervisor,
            hard_dependencies,
        });
    }

    pub async fn deregister(&self, name: &ComponentName) {
        self.components.lock().await.remove(name);
    }

    pub async fn active_names(&self) -> HashSet<ComponentName> {
        self.components.lock().await.keys().cloned().collect()
    }

    pub async fn supervisor(&self, name: &ComponentName) -> Option<ComponentSupervisor> {
        self.components.lock().await.get(name).map(|m| m.supervisor.clone())
    }

    pub async fn identifier_of(&self, name: &ComponentName) -> Option<ComponentIdentifier> {
        self.components.lock().await.get(name).map(|m| m.identifier.clone())
    }

    /// Computes a phased plan: registered components absent from `desired`
    /// stop in reverse-dependency order; registered components present in
    /// `desired` but not yet active start in dependency order (§4.5).
    pub async fn plan(&self, desired: &HashMap<ComponentName, ComponentIdentifier>) -> Result<Plan, AgentError> {
        let components = self.components.lock().await;
        let current: HashSet<ComponentName> = components.keys().cloned().collect();
        let desired_names: HashSet<ComponentName> = desired.keys().cloned().collect();

        let to_stop: HashSet<ComponentName> = current.difference(&desired_names).cloned().collect();
        let to_start: HashSet<ComponentName> = desired_names
            .intersection(&current)
            .filter(|name| components[*name].supervisor.current_state() != ComponentState::Running)
            .cloned()
            .collect();

        let mut edges = Vec::new();
        for (name, managed) in components.iter() {
            for dep in &managed.hard_dependencies {
                edges.push((name.clone(), dep.clone()));
            }
        }
        let order = nucleus_graph::topological_order(&edges).map_err(|_| AgentError::PlanCycle)?;

        let mut actions = Vec::new();
        for name in order.iter().rev() {
            if to_stop.contains(name) {
                actions.push(PlanAction {
                    name: name.clone(),
                    kind: PlanActionKind::Stop,
                });
            }
        }
        for name in current.iter() {
            if to_stop.contains(name) && !order.contains(name) {
                actions.push(PlanAction {
                    name: name.clone(),
                    kind: PlanActionKind::Stop,
                });
            }
        }
        for name in order.iter() {
            if to_start.contains(name) {
                actions.push(PlanAction {
                    name: name.clone(),
                    kind: PlanActionKind::Start,
                });
            }
        }
        for name in current.iter() {
            if to_start.contains(name) && !order.contains(name) {
                actions.push(PlanAction {
                    name: name.clone(),
                    kind: PlanActionKind::Start,
                });
            }
        }

        Ok(Plan { actions })
    }

    /// Applies a plan action-by-action, continuing past a failed component
    /// rather than aborting the whole plan (mirrors the teacher's
    /// diff-then-apply reconciliation loop).
    pub async fn apply(&self, plan: &Plan, timeout: Duration) -> Vec<(ComponentName, Result<(), AgentError>)> {
        let mut results = Vec::with_capacity(plan.actions.len());
        for action in &plan.actions {
            let supervisor = self.supervisor(&action.name).await;
            let Some(supervisor) = supervisor else {
                results.push((
                    action.name.clone(),
                    Err(AgentError::Ipc(format!("{} not registered", action.name))),
                ));
                continue;
            };
            let outcome = match action.kind {
                PlanActionKind::Stop => self.drive_stop(&supervisor, timeout).await,
                PlanActionKind::Start => self.drive_start(&supervisor, timeout).await,
            };
            if let Err(e) = &outcome {
                warn!(component = %action.name, error = %e, "plan action failed, continuing with remaining actions");
            }
            results.push((action.name.clone(), outcome));
        }
        results
    }

    async fn drive_start(&self, supervisor: &ComponentSupervisor, timeout: Duration) -> Result<(), AgentError> {
        if supervisor.current_state() == ComponentState::New {
            supervisor.submit(ComponentEvent::Install).await?;
            Self::wait_for(supervisor, ComponentState::Installed, timeout).await?;
        }
        supervisor.submit(ComponentEvent::Start).await?;
        Self::wait_for(supervisor, ComponentState::Running, timeout).await
    }

    async fn drive_stop(&self, supervisor: &ComponentSupervisor, timeout: Duration) -> Result<(), AgentError> {
        if !matches!(supervisor.current_state(), ComponentState::Running) {
            return Ok(());
        }
        supervisor.submit(ComponentEvent::Stop).await?;
        Self::wait_for(supervisor, ComponentState::Installed, timeout).await
    }

    async fn wait_for(
        supervisor: &ComponentSupervisor,
        target: ComponentState,
        timeout: Duration,
    ) -> Result<(), AgentError> {
        let mut rx = supervisor.watch_state();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let state = *rx.borrow();
            if state == target {
                return Ok(());
            }
            if matches!(state, ComponentState::Errored | ComponentState::Broken) {
                return Err(AgentError::StartupTimeout(supervisor.identifier().to_string()));
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(AgentError::StartupTimeout(supervisor.identifier().to_string()));
            }
            if tokio::time::timeout(remaining, rx.changed()).await.is_err() {
                return Err(AgentError::StartupTimeout(supervisor.identifier().to_string()));
            }
        }
    }

    /// Submits `DependencyStopping`/`DependenciesRestored` to every component
    /// whose HARD dependencies have left or rejoined RUNNING. Intended to be
    /// called on a periodic tick by the owning agent loop (§4.4).
    pub async fn propagate_dependency_transitions(&self) {
        let components = self.components.lock().await;
        let states: HashMap<ComponentName, ComponentState> = components
            .iter()
            .map(|(name, m)| (name.clone(), m.supervisor.current_state()))
            .collect();

        for managed in components.values() {
            let all_deps_running = managed
                .hard_dependencies
                .iter()
                .all(|dep| states.get(dep).copied() == Some(ComponentState::Running));
            let any_dep_down = managed
                .hard_dependencies
                .iter()
                .any(|dep| matches!(states.get(dep).copied(), Some(s) if s != ComponentState::Running));

            match managed.supervisor.current_state() {
                ComponentState::Running if any_dep_down => {
                    let _ = managed.supervisor.submit(ComponentEvent::DependencyStopping).await;
                }
                ComponentState::Installed if !managed.hard_dependencies.is_empty() && all_deps_running => {
                    let _ = managed.supervisor.submit(ComponentEvent::DependenciesRestored).await;
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nucleus_domain::{Clock, SystemClock};
    use std::sync::Arc;

    fn recipe(name: &str, deps: &[(&str, DependencyKind)]) -> Recipe {
        let mut dependencies = HashMap::new();
        for (dep, kind) in deps {
            dependencies.insert(
                ComponentName::new(*dep).unwrap(),
                nucleus_domain::DependencySpec {
                    range: nucleus_domain::VersionRange::parse("*").unwrap(),
                    kind: *kind,
                },
            );
        }
        Recipe {
            identifier: ComponentIdentifier::new(ComponentName::new(name).unwrap(), semver::Version::new(1, 0, 0)),
            publisher: "test".to_string(),
            dependencies,
            lifecycle: HashMap::new(),
            artifacts: vec![],
            parameters: HashMap::new(),
        }
    }

    fn supervisor_for(recipe: &Recipe) -> ComponentSupervisor {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        crate::component::ComponentSupervisor::spawn(
            recipe.identifier.clone(),
            recipe.clone(),
            crate::lifecycle_runner::LifecycleRunner::Noop,
            clock,
            crate::component::RestartBudget::default(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn plan_orders_starts_before_dependents() {
        let orchestrator = Orchestrator::new();
        let mosquitto = recipe("Mosquitto", &[]);
        let app = recipe("CustomerApp", &[("Mosquitto", DependencyKind::Hard)]);

        orchestrator
            .register(mosquitto.identifier.clone(), &mosquitto, supervisor_for(&mosquitto))
            .await;
        orchestrator
            .register(app.identifier.clone(), &app, supervisor_for(&app))
            .await;

        let mut desired = HashMap::new();
        desired.insert(mosquitto.identifier.name.clone(), mosquitto.identifier.clone());
        desired.insert(app.identifier.name.clone(), app.identifier.clone());

        let plan = orchestrator.plan(&desired).await.unwrap();
        let positions: Vec<&ComponentName> = plan.actions.iter().map(|a| &a.name).collect();
        let mosquitto_pos = positions.iter().position(|n| **n == mosquitto.identifier.name).unwrap();
        let app_pos = positions.iter().position(|n| **n == app.identifier.name).unwrap();
        assert!(mosquitto_pos < app_pos);
    }

    #[tokio::test]
    async fn plan_stops_components_missing_from_desired() {
        let orchestrator = Orchestrator::new();
        let standalone = recipe("Standalone", &[]);
        orchestrator
            .register(standalone.identifier.clone(), &standalone, supervisor_for(&standalone))
            .await;

        let plan = orchestrator.plan(&HashMap::new()).await.unwrap();
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].kind, PlanActionKind::Stop);
    }
}
