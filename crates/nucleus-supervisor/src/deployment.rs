use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use nucleus_domain::{
    Clock, ComponentIdentifier, ComponentName, ComponentState, ConfigValue, Deployment, FailureHandling,
    GroupMembership,
};
use nucleus_graph::RecipeSource;
use nucleus_platform::PlatformAdapter;
use nucleus_store::{ArtifactStore, NoopProgressSink, ProgressSink, StoreLayout};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{info, warn};

use crate::bootstrap::{clear_continuation_record, write_continuation_record, ContinuationRecord};
use crate::channels::{ValidationChannel, ValidationOutcome};
use crate::component::{ComponentSupervisor, RestartBudget};
use crate::error::AgentError;
use crate::lifecycle_runner::LifecycleRunner;
use crate::orchestrator::Orchestrator;
use crate::safe_update::{Decision, SafeUpdateScheduler};
use crate::status::{AuditEvent, AuditLog, StatusReporter};

/// A deployment's place in its finite-state machine (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentPhase {
    Queued,
    Prefetching,
    Resolving,
    Validating,
    WaitingSafe,
    Applying,
    Validated,
    Committed,
    RollingBack,
    RolledBack,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentOutcome {
    Succeeded,
    FailedRollbackComplete,
    FailedRollbackNotRequested,
    Failed,
    Cancelled,
    /// The resolved set includes a component whose recipe declares a
    /// bootstrap phase; a continuation record was written and the caller
    /// (`nucleus-agent`) must restart the device and resume at APPLYING.
    BootstrapPending,
}

struct Pending {
    deployment: Deployment,
    reply: oneshot::Sender<Result<DeploymentOutcome, AgentError>>,
    seq: u64,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.deployment.timestamp == other.deployment.timestamp && self.seq == other.seq
    }
}
impl Eq for Pending {}
impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Pending {
    /// Reversed so `BinaryHeap::pop` returns the earliest timestamp first
    /// (§4.7: "processes deployments in strict timestamp order").
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .deployment
            .timestamp
            .cmp(&self.deployment.timestamp)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct PendingResume {
    record: ContinuationRecord,
    reply: oneshot::Sender<Result<DeploymentOutcome, AgentError>>,
}

enum Command {
    Submit(Pending),
    Resume(PendingResume),
}

/// Drives each deployment document through the FSM in §4.7, one at a time,
/// in strict deployment-timestamp order. Mailbox-serial per §5; a burst of
/// concurrently-submitted deployments is reordered by timestamp before any
/// of them starts running.
#[derive(Clone)]
pub struct DeploymentController {
    cmd_tx: mpsc::UnboundedSender<Command>,
    cancelled: Arc<Mutex<HashSet<String>>>,
    next_seq: Arc<std::sync::atomic::AtomicU64>,
}

pub struct DeploymentControllerDeps {
    pub orchestrator: Arc<Orchestrator>,
    pub recipe_source: Arc<dyn RecipeSource + Send + Sync>,
    pub artifact_store: Arc<ArtifactStore>,
    pub config_store: nucleus_config::ConfigStore,
    pub safe_update: SafeUpdateScheduler,
    pub validation_channel: Arc<dyn ValidationChannel>,
    pub status_reporter: Arc<StatusReporter>,
    pub audit_log: Arc<AuditLog>,
    pub platform: Arc<dyn PlatformAdapter>,
    pub layout: StoreLayout,
    pub clock: Arc<dyn Clock>,
    pub stabilization_window: Duration,
    pub restart_budget_max_failures: u32,
    pub restart_budget_window: Duration,
    pub restart_stabilization: Duration,
    pub component_startup_timeout: Duration,
    pub component_shutdown_timeout: Duration,
}

struct Actor {
    deps: DeploymentControllerDeps,
    membership: GroupMembership,
    cancelled: Arc<Mutex<HashSet<String>>>,
}

impl DeploymentController {
    pub fn spawn(deps: DeploymentControllerDeps) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cancelled = Arc::new(Mutex::new(HashSet::new()));
        let actor = Actor {
            deps,
            membership: GroupMembership::new(),
            cancelled: cancelled.clone(),
        };
        tokio::spawn(Self::run(actor, cmd_rx));
        DeploymentController {
            cmd_tx,
            cancelled,
            next_seq: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    async fn run(mut actor: Actor, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        let mut heap: BinaryHeap<Pending> = BinaryHeap::new();
        loop {
            if heap.is_empty() {
                match cmd_rx.recv().await {
                    Some(Command::Submit(pending)) => heap.push(pending),
                    Some(Command::Resume(resume)) => {
                        let outcome = actor.resume_deployment(resume.record).await;
                        let _ = resume.reply.send(outcome);
                        continue;
                    }
                    None => return,
                }
            }
            while let Ok(cmd) = cmd_rx.try_recv() {
                match cmd {
                    Command::Submit(pending) => heap.push(pending),
                    Command::Resume(resume) => {
                        let outcome = actor.resume_deployment(resume.record).await;
                        let _ = resume.reply.send(outcome);
                    }
                }
            }
            if let Some(next) = heap.pop() {
                let outcome = actor.run_deployment(next.deployment).await;
                let _ = next.reply.send(outcome);
            }
        }
    }

    pub async fn submit(&self, deployment: Deployment) -> Result<DeploymentOutcome, AgentError> {
        let (reply, rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.cmd_tx
            .send(Command::Submit(Pending { deployment, reply, seq }))
            .map_err(|_| AgentError::Ipc("deployment controller is gone".to_string()))?;
        rx.await.map_err(|_| AgentError::Ipc("deployment controller dropped reply".to_string()))?
    }

    /// Resumes a deployment found in a continuation record left by an
    /// interrupted bootstrap restart (§4.7, §12). Runs ahead of any queued
    /// `submit`s, since it represents work already in flight before the
    /// restart rather than a freshly arrived deployment.
    pub async fn resume(&self, record: ContinuationRecord) -> Result<DeploymentOutcome, AgentError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Resume(PendingResume { record, reply }))
            .map_err(|_| AgentError::Ipc("deployment controller is gone".to_string()))?;
        rx.await.map_err(|_| AgentError::Ipc("deployment controller dropped reply".to_string()))?
    }

    pub async fn cancel(&self, deployment_id: &str) {
        self.cancelled.lock().await.insert(deployment_id.to_string());
    }
}

impl Actor {
    async fn is_cancelled(&self, id: &str) -> bool {
        self.cancelled.lock().await.contains(id)
    }

    async fn audit(&self, id: &str, phase: DeploymentPhase, detail: impl Into<String>) {
        let now = self.deps.clock.now_ms();
        self.deps
            .audit_log
            .append(AuditEvent {
                deployment_id: id.to_string(),
                timestamp_ms: now,
                phase,
                detail: detail.into(),
            })
            .await;
        self.deps.status_reporter.note_deployment_phase(id.to_string(), phase, now).await;
    }

    async fn run_deployment(&mut self, deployment: Deployment) -> Result<DeploymentOutcome, AgentError> {
        let id = deployment.id.clone();
        self.audit(&id, DeploymentPhase::Queued, "queued").await;

        if self.is_cancelled(&id).await {
            self.audit(&id, DeploymentPhase::Cancelled, "cancelled before prefetch").await;
            return Ok(DeploymentOutcome::Cancelled);
        }

        self.audit(&id, DeploymentPhase::Resolving, "resolving dependency graph").await;
        let preview = self
            .membership
            .with_group_preview(&deployment.group_name, deployment.root_constraints());
        let resolved = match nucleus_graph::resolve(&preview, self.deps.recipe_source.as_ref()) {
            Ok(r) => r,
            Err(e) => {
                self.audit(&id, DeploymentPhase::Failed, format!("resolve failed: {e}")).await;
                return Ok(DeploymentOutcome::Failed);
            }
        };

        if self.is_cancelled(&id).await {
            self.audit(&id, DeploymentPhase::Cancelled, "cancelled after resolve").await;
            return Ok(DeploymentOutcome::Cancelled);
        }

        self.audit(&id, DeploymentPhase::Prefetching, "fetching recipes and artifacts for resolved set").await;
        let mut recipes = HashMap::new();
        for (name, version) in &resolved {
            let identifier = ComponentIdentifier::new(name.clone(), version.clone());
            if let Err(e) = self.deps.artifact_store.fetch(&identifier).await {
                self.audit(&id, DeploymentPhase::Failed, format!("artifact fetch failed for {identifier}: {e}")).await;
                return Ok(DeploymentOutcome::Failed);
            }
            let Some(recipe) = self.deps.recipe_source.recipe(&identifier) else {
                self.audit(&id, DeploymentPhase::Failed, format!("recipe unavailable after fetch: {identifier}")).await;
                return Ok(DeploymentOutcome::Failed);
            };
            if let Err(e) = self
                .deps
                .artifact_store
                .prepare(&identifier, &recipe.artifacts, &NoopProgressSink as &dyn ProgressSink)
                .await
            {
                self.audit(&id, DeploymentPhase::Failed, format!("artifact prepare failed for {identifier}: {e}")).await;
                return Ok(DeploymentOutcome::Failed);
            }
            recipes.insert(name.clone(), recipe);
        }

        if recipes.values().any(|r| r.has_bootstrap()) {
            let document_bytes = serde_json::to_vec(&deployment).unwrap_or_default();
            let record = ContinuationRecord {
                deployment_id: id.clone(),
                phase: DeploymentPhase::Applying,
                document_sha256: ContinuationRecord::document_digest(&document_bytes),
                resolved_versions: resolved.clone(),
                deployment: deployment.clone(),
            };
            write_continuation_record(&self.deps.layout, &record).await?;
            self.audit(&id, DeploymentPhase::Applying, "bootstrap component resolved, restart required").await;
            if let Err(e) = self.deps.platform.request_restart("bootstrap component resolved").await {
                warn!(deployment_id = %id, error = %e, "failed to trigger device restart for bootstrap deployment");
            }
            return Ok(DeploymentOutcome::BootstrapPending);
        }

        self.audit(&id, DeploymentPhase::Validating, "validating proposed configuration with running components").await;
        let validation_timeout = Duration::from_secs(deployment.policies.configuration_validation_timeout_sec);
        for package in &deployment.packages {
            if let Some(version) = resolved.get(&package.name) {
                let identifier = ComponentIdentifier::new(package.name.clone(), version.clone());
                match self
                    .deps
                    .validation_channel
                    .validate(&identifier, &package.configuration, validation_timeout)
                    .await
                {
                    Ok(ValidationOutcome::Ok) => {}
                    Ok(ValidationOutcome::Reject(reason)) => {
                        self.audit(&id, DeploymentPhase::Failed, format!("validation rejected for {identifier}: {reason}")).await;
                        return Ok(DeploymentOutcome::Failed);
                    }
                    Err(e) => {
                        self.audit(&id, DeploymentPhase::Failed, format!("validation error for {identifier}: {e}")).await;
                        return Ok(DeploymentOutcome::Failed);
                    }
                }
            }
        }

        self.audit(&id, DeploymentPhase::WaitingSafe, "requesting safe-update vote").await;
        let affected: Vec<ComponentName> = resolved.keys().cloned().collect();
        let decision = self
            .deps
            .safe_update
            .request_update(id.clone(), affected, deployment.policies.component_update_policy)
            .await?;
        match decision {
            Decision::Aborted { reason } => {
                self.audit(&id, DeploymentPhase::Failed, format!("safe update aborted: {reason}")).await;
                return Ok(DeploymentOutcome::Failed);
            }
            Decision::Deferred { until_ms } => {
                self.audit(&id, DeploymentPhase::WaitingSafe, format!("deferred until {until_ms}")).await;
                let now = self.deps.clock.now_ms();
                if until_ms > now {
                    tokio::time::sleep(Duration::from_millis((until_ms - now).max(0) as u64)).await;
                }
            }
            Decision::Proceed => {}
        }

        self.apply_and_commit(&id, &deployment, &resolved, &recipes).await
    }

    /// Resumes a deployment whose recipes were already resolved and
    /// prefetched before a bootstrap-requested restart interrupted it
    /// (§4.7). Re-enters the pipeline directly at APPLYING: recipes and
    /// artifacts are re-read from the on-disk cache populated during the
    /// original prefetch phase rather than re-running DependencyResolver.
    async fn resume_deployment(&mut self, record: ContinuationRecord) -> Result<DeploymentOutcome, AgentError> {
        let id = record.deployment_id.clone();
        let deployment = record.deployment;
        self.audit(&id, DeploymentPhase::Applying, "resuming interrupted bootstrap deployment after restart").await;

        let mut recipes = HashMap::new();
        for (name, version) in &record.resolved_versions {
            let identifier = ComponentIdentifier::new(name.clone(), version.clone());
            if let Err(e) = self.deps.artifact_store.fetch(&identifier).await {
                self.audit(&id, DeploymentPhase::Failed, format!("artifact fetch failed for {identifier}: {e}")).await;
                return Ok(DeploymentOutcome::Failed);
            }
            let Some(recipe) = self.deps.recipe_source.recipe(&identifier) else {
                self.audit(&id, DeploymentPhase::Failed, format!("recipe unavailable after restart: {identifier}")).await;
                return Ok(DeploymentOutcome::Failed);
            };
            if let Err(e) = self
                .deps
                .artifact_store
                .prepare(&identifier, &recipe.artifacts, &NoopProgressSink as &dyn ProgressSink)
                .await
            {
                self.audit(&id, DeploymentPhase::Failed, format!("artifact prepare failed for {identifier}: {e}")).await;
                return Ok(DeploymentOutcome::Failed);
            }
            recipes.insert(name.clone(), recipe);
        }

        let outcome = self.apply_and_commit(&id, &deployment, &record.resolved_versions, &recipes).await;
        clear_continuation_record(&self.deps.layout).await;
        outcome
    }

    async fn apply_and_commit(
        &mut self,
        id: &str,
        deployment: &Deployment,
        resolved: &HashMap<ComponentName, semver::Version>,
        recipes: &HashMap<ComponentName, nucleus_domain::Recipe>,
    ) -> Result<DeploymentOutcome, AgentError> {
        self.audit(id, DeploymentPhase::Applying, "applying resolved plan").await;
        let snapshot = self.deps.config_store.snapshot().await?;

        // `ConfigStore::merge` replaces a container's children wholesale at
        // every level the document touches, so the document handed to it
        // must restate every currently-active component, not just this
        // deployment's packages, or other groups' component config gets
        // deleted outright (§8 Scenario 5). Start from the full current
        // tree and only overlay the keys each deployed package actually
        // declares, so a component untouched by this deployment survives
        // verbatim and a component this deployment does touch keeps any
        // runtime-only sibling key its recipe's configuration never
        // mentions.
        let mut document_entries = match snapshot.to_config_value() {
            ConfigValue::Container(entries) => entries,
            _ => Vec::new(),
        };
        for package in &deployment.packages {
            let key = package.name.to_string();
            let existing = document_entries
                .iter()
                .position(|(k, _)| *k == key)
                .map(|idx| document_entries.remove(idx).1);
            document_entries.push((key, overlay_declared_keys(existing, package.configuration.clone())));
        }
        self.deps
            .config_store
            .merge(ConfigValue::Container(document_entries), deployment.timestamp)
            .await?;

        let mut desired = HashMap::new();
        for (name, version) in resolved {
            let identifier = ComponentIdentifier::new(name.clone(), version.clone());
            if let Some(recipe) = recipes.get(name) {
                let supervisor = self.spawn_supervisor(&identifier, recipe);
                self.deps.orchestrator.register(identifier.clone(), recipe, supervisor).await;
            }
            desired.insert(name.clone(), identifier);
        }

        let plan = self.deps.orchestrator.plan(&desired).await?;
        let timeout = Duration::from_secs(deployment.policies.component_update_timeout_sec);
        let results = self.deps.orchestrator.apply(&plan, timeout).await;
        let failures: Vec<_> = results.iter().filter(|(_, r)| r.is_err()).collect();

        if !failures.is_empty() {
            return self.handle_apply_failure(id, deployment, snapshot, failures.len()).await;
        }

        tokio::time::sleep(self.deps.stabilization_window).await;
        let broken = self.any_component_broken(resolved).await;
        if broken {
            return self.handle_apply_failure(id, deployment, snapshot, 1).await;
        }

        self.membership.set_group(deployment.group_name.clone(), deployment.root_constraints());
        self.audit(id, DeploymentPhase::Validated, "post-apply stabilization window elapsed cleanly").await;
        self.audit(id, DeploymentPhase::Committed, "deployment committed").await;
        Ok(DeploymentOutcome::Succeeded)
    }

    async fn any_component_broken(&self, resolved: &HashMap<ComponentName, semver::Version>) -> bool {
        for name in resolved.keys() {
            if let Some(supervisor) = self.deps.orchestrator.supervisor(name).await {
                if supervisor.current_state() == ComponentState::Broken {
                    return true;
                }
            }
        }
        false
    }

    async fn handle_apply_failure(
        &mut self,
        id: &str,
        deployment: &Deployment,
        snapshot: nucleus_config::Snapshot,
        failure_count: usize,
    ) -> Result<DeploymentOutcome, AgentError> {
        warn!(deployment_id = %id, failures = failure_count, "deployment apply failed");
        match deployment.policies.failure_handling {
            FailureHandling::DoNothing => {
                self.audit(id, DeploymentPhase::Failed, "apply failed, no rollback requested").await;
                Ok(DeploymentOutcome::Failed)
            }
            FailureHandling::Rollback => {
                self.audit(id, DeploymentPhase::RollingBack, "restoring prior configuration snapshot").await;
                let restored = self.deps.config_store.restore(snapshot).await;
                let mut previous_desired = HashMap::new();
                for name in self.membership.union_constraints().into_keys() {
                    if let Some(identifier) = self.deps.orchestrator.identifier_of(&name).await {
                        previous_desired.insert(name, identifier);
                    }
                }
                let reverse_plan = self.deps.orchestrator.plan(&previous_desired).await;
                match (restored, reverse_plan) {
                    (Ok(()), Ok(plan)) => {
                        let timeout = Duration::from_secs(deployment.policies.component_update_timeout_sec);
                        self.deps.orchestrator.apply(&plan, timeout).await;
                        self.audit(id, DeploymentPhase::RolledBack, "rollback complete").await;
                        Ok(DeploymentOutcome::FailedRollbackComplete)
                    }
                    _ => {
                        self.audit(id, DeploymentPhase::Failed, "rollback could not be completed").await;
                        Ok(DeploymentOutcome::FailedRollbackNotRequested)
                    }
                }
            }
        }
    }

    fn spawn_supervisor(&self, identifier: &ComponentIdentifier, recipe: &nucleus_domain::Recipe) -> ComponentSupervisor {
        let work_dir = self.deps.layout.artifact_dir(identifier);
        let runner = LifecycleRunner::ExternalProcess {
            platform: self.deps.platform.clone(),
            work_dir,
            env: HashMap::new(),
        };
        ComponentSupervisor::spawn(
            identifier.clone(),
            recipe.clone(),
            runner,
            self.deps.clock.clone(),
            RestartBudget::new(
                self.deps.restart_budget_max_failures,
                self.deps.restart_budget_window,
                self.deps.restart_stabilization,
            ),
            self.deps.component_startup_timeout,
            self.deps.component_shutdown_timeout,
        )
    }
}

/// Overlays `declared`'s top-level keys onto `existing`'s, keeping any
/// existing key `declared` doesn't mention (e.g. a runtime-only leaf a
/// component wrote under its own subtree) and letting `declared` fully
/// replace whichever keys it does mention. Mirrors `ConfigStore::merge`'s
/// own per-container replace rule one level up, so the two compose
/// correctly (§8 Scenario 5).
fn overlay_declared_keys(existing: Option<ConfigValue>, declared: ConfigValue) -> ConfigValue {
    let ConfigValue::Container(declared_entries) = declared else {
        return declared;
    };
    let mut entries = match existing {
        Some(ConfigValue::Container(existing_entries)) => existing_entries,
        _ => Vec::new(),
    };
    let declared_keys: HashSet<&str> = declared_entries.iter().map(|(k, _)| k.as_str()).collect();
    entries.retain(|(k, _)| !declared_keys.contains(k.as_str()));
    entries.extend(declared_entries);
    ConfigValue::Container(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_orders_by_timestamp_ascending() {
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        let mut heap = BinaryHeap::new();
        heap.push(Pending {
            deployment: bare_deployment("b", 20),
            reply: tx2,
            seq: 1,
        });
        heap.push(Pending {
            deployment: bare_deployment("a", 10),
            reply: tx1,
            seq: 0,
        });
        assert_eq!(heap.pop().unwrap().deployment.id, "a");
    }

    #[test]
    fn overlay_declared_keys_preserves_undeclared_siblings() {
        let existing = ConfigValue::Container(vec![
            ("lifecycle".to_string(), ConfigValue::Container(vec![
                ("startup".to_string(), ConfigValue::String("start.sh".to_string())),
                ("run".to_string(), ConfigValue::String("run.sh".to_string())),
            ])),
            ("runtime_state".to_string(), ConfigValue::Int(42)),
        ]);
        let declared = ConfigValue::Container(vec![(
            "lifecycle".to_string(),
            ConfigValue::Container(vec![("run".to_string(), ConfigValue::String("run.sh".to_string()))]),
        )]);

        let merged = overlay_declared_keys(Some(existing), declared);
        let ConfigValue::Container(entries) = merged else { panic!("expected container") };
        let runtime_state = entries.iter().find(|(k, _)| k == "runtime_state").map(|(_, v)| v.clone());
        assert_eq!(runtime_state, Some(ConfigValue::Int(42)));
        let lifecycle = entries.iter().find(|(k, _)| k == "lifecycle").map(|(_, v)| v.clone());
        assert_eq!(
            lifecycle,
            Some(ConfigValue::Container(vec![("run".to_string(), ConfigValue::String("run.sh".to_string()))]))
        );
    }

    #[test]
    fn overlay_declared_keys_with_no_existing_subtree_uses_declared_as_is() {
        let declared = ConfigValue::Container(vec![("port".to_string(), ConfigValue::Int(8080))]);
        let merged = overlay_declared_keys(None, declared.clone());
        assert_eq!(merged, declared);
    }

    fn bare_deployment(id: &str, timestamp: i64) -> Deployment {
        Deployment {
            id: id.to_string(),
            timestamp,
            group_name: "default".to_string(),
            packages: vec![],
            policies: nucleus_domain::Policies::default(),
        }
    }
}
