use std::sync::Arc;
use std::time::Duration;

use nucleus_domain::{Clock, ComponentEvent, ComponentIdentifier, ComponentState, LifecyclePhase, Recipe};
use nucleus_platform::ProcessHandle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, warn};

use crate::error::AgentError;
use crate::lifecycle_runner::LifecycleRunner;

/// Sliding-window restart-budget accounting (§4.4). Three ERRORED entries
/// within `window` trips `BROKEN`; reaching RUNNING and staying there for at
/// least `stabilization` clears the window.
pub struct RestartBudget {
    max_failures: u32,
    window: Duration,
    stabilization: Duration,
    failures_ms: Vec<i64>,
}

impl RestartBudget {
    pub fn new(max_failures: u32, window: Duration, stabilization: Duration) -> Self {
        RestartBudget {
            max_failures,
            window,
            stabilization,
            failures_ms: Vec::new(),
        }
    }

    /// Records a new ERRORED entry at `now_ms`, returns true if the budget
    /// is now exhausted (caller should move the component to BROKEN).
    fn record_failure(&mut self, now_ms: i64) -> bool {
        let window_ms = self.window.as_millis() as i64;
        self.failures_ms.retain(|&t| now_ms - t <= window_ms);
        self.failures_ms.push(now_ms);
        self.failures_ms.len() as u32 >= self.max_failures
    }

    fn reset(&mut self) {
        self.failures_ms.clear();
    }
}

impl Default for RestartBudget {
    fn default() -> Self {
        RestartBudget::new(3, Duration::from_secs(600), Duration::from_secs(120))
    }
}

enum Command {
    Submit {
        event: ComponentEvent,
        reply: oneshot::Sender<Result<(), AgentError>>,
    },
}

/// How often the actor loop checks whether a stable `RUNNING` component's
/// restart budget can be cleared (§4.4).
const BUDGET_TICK: Duration = Duration::from_secs(1);

/// Handle to a running per-component mailbox actor (§4.4, §5). Cloning is
/// cheap; every clone shares the same underlying actor task.
#[derive(Clone)]
pub struct ComponentSupervisor {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ComponentState>,
    identifier: ComponentIdentifier,
}

struct Actor {
    identifier: ComponentIdentifier,
    recipe: Recipe,
    runner: LifecycleRunner,
    clock: Arc<dyn Clock>,
    state_tx: watch::Sender<ComponentState>,
    budget: RestartBudget,
    run_handle: Option<ProcessHandle>,
    startup_timeout: Duration,
    shutdown_timeout: Duration,
    stable_since_ms: Option<i64>,
    self_tx: mpsc::UnboundedSender<Command>,
}

impl ComponentSupervisor {
    pub fn spawn(
        identifier: ComponentIdentifier,
        recipe: Recipe,
        runner: LifecycleRunner,
        clock: Arc<dyn Clock>,
        budget: RestartBudget,
        startup_timeout: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ComponentState::New);

        let actor = Actor {
            identifier: identifier.clone(),
            recipe,
            runner,
            clock,
            state_tx,
            budget,
            run_handle: None,
            startup_timeout,
            shutdown_timeout,
            stable_since_ms: None,
            self_tx: cmd_tx.clone(),
        };
        tokio::spawn(Self::run(actor, cmd_rx));

        ComponentSupervisor {
            cmd_tx,
            state_rx,
            identifier,
        }
    }

    async fn run(mut actor: Actor, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        let mut ticker = tokio::time::interval(BUDGET_TICK);
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Submit { event, reply }) => {
                            let result = actor.handle_event(event).await;
                            let _ = reply.send(result);
                        }
                        None => return,
                    }
                }
                _ = ticker.tick() => {
                    actor.maybe_clear_budget();
                }
            }
        }
    }

    pub fn identifier(&self) -> &ComponentIdentifier {
        &self.identifier
    }

    /// Lock-free snapshot of the last committed state (§4.4: "State queries
    /// are lock-free snapshots of the last committed state").
    pub fn current_state(&self) -> ComponentState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ComponentState> {
        self.state_rx.clone()
    }

    pub async fn submit(&self, event: ComponentEvent) -> Result<(), AgentError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Submit { event, reply })
            .map_err(|_| AgentError::Ipc(format!("supervisor for {} is gone", self.identifier)))?;
        rx.await
            .map_err(|_| AgentError::Ipc(format!("supervisor for {} dropped reply", self.identifier)))?
    }
}

impl Actor {
    fn set_state(&mut self, state: ComponentState) {
        let _ = self.state_tx.send(state);
    }

    fn current(&self) -> ComponentState {
        *self.state_tx.borrow()
    }

    async fn handle_event(&mut self, event: ComponentEvent) -> Result<(), AgentError> {
        use ComponentEvent::*;
        match (self.current(), event) {
            (ComponentState::New, Install) => self.do_install().await,
            (ComponentState::Installed, Start) | (ComponentState::Installed, DependenciesRestored) => {
                self.do_start().await
            }
            (ComponentState::Starting, StartupOk) => self.do_run_or_finish().await,
            (ComponentState::Starting, StartupFailed) => {
                self.set_state(ComponentState::Errored);
                self.maybe_trip_budget();
                Ok(())
            }
            (ComponentState::Running, RunExited { code: 0 }) => {
                self.set_state(ComponentState::Finished);
                Ok(())
            }
            (ComponentState::Running, RunExited { .. }) => {
                self.set_state(ComponentState::Errored);
                self.maybe_trip_budget();
                Ok(())
            }
            (ComponentState::Running, Stop) | (ComponentState::Running, DependencyStopping) => {
                self.do_stop().await
            }
            (ComponentState::Stopping, StopDone) => {
                self.set_state(ComponentState::Installed);
                Ok(())
            }
            (ComponentState::Errored, RestartPermitted) => self.do_recover_then_start().await,
            (ComponentState::Errored, RestartBudgetExhausted) => {
                self.set_state(ComponentState::Broken);
                Ok(())
            }
            (from, event) => {
                warn!(component = %self.identifier, ?from, ?event, "ignored event with no transition");
                Ok(())
            }
        }
    }

    fn maybe_trip_budget(&mut self) {
        let now = self.clock.now_ms();
        self.stable_since_ms = None;
        if self.budget.record_failure(now) {
            let tx = self.self_tx.clone();
            let _ = tx.send(Command::Submit {
                event: ComponentEvent::RestartBudgetExhausted,
                reply: oneshot::channel().0,
            });
        }
    }

    async fn do_install(&mut self) -> Result<(), AgentError> {
        let command = self.recipe.lifecycle_command(LifecyclePhase::Install).map(str::to_string);
        match command {
            None => {
                self.set_state(ComponentState::Installed);
                Ok(())
            }
            Some(cmd) => {
                let status = self
                    .runner
                    .run_phase(LifecyclePhase::Install, Some(&cmd), self.startup_timeout)
                    .await?;
                if status.success() {
                    self.set_state(ComponentState::Installed);
                } else {
                    self.set_state(ComponentState::Errored);
                    self.maybe_trip_budget();
                }
                Ok(())
            }
        }
    }

    async fn do_start(&mut self) -> Result<(), AgentError> {
        self.set_state(ComponentState::Starting);
        let command = self.recipe.lifecycle_command(LifecyclePhase::Startup).map(str::to_string);
        let status = self
            .runner
            .run_phase(LifecyclePhase::Startup, command.as_deref(), self.startup_timeout)
            .await;
        match status {
            Ok(s) if s.success() => {
                let tx = self.self_tx.clone();
                let _ = tx.send(Command::Submit {
                    event: ComponentEvent::StartupOk,
                    reply: oneshot::channel().0,
                });
            }
            _ => {
                let tx = self.self_tx.clone();
                let _ = tx.send(Command::Submit {
                    event: ComponentEvent::StartupFailed,
                    reply: oneshot::channel().0,
                });
            }
        }
        Ok(())
    }

    async fn do_run_or_finish(&mut self) -> Result<(), AgentError> {
        if self.recipe.is_run_to_completion() {
            self.set_state(ComponentState::Finished);
            return Ok(());
        }
        let command = self
            .recipe
            .lifecycle_command(LifecyclePhase::Run)
            .expect("is_run_to_completion() false implies a run command is present")
            .to_string();
        let handle = self.runner.spawn_run(&command).await?;
        self.run_handle = handle;
        self.set_state(ComponentState::Running);
        self.stable_since_ms = Some(self.clock.now_ms());

        if let (Some(handle), Some(platform)) = (handle, self.runner.platform().cloned()) {
            let tx = self.self_tx.clone();
            tokio::spawn(async move {
                let code = platform.wait(handle).await.map(|s| s.code).unwrap_or(-1);
                let _ = tx.send(Command::Submit {
                    event: ComponentEvent::RunExited { code },
                    reply: oneshot::channel().0,
                });
            });
        }
        Ok(())
    }

    async fn do_stop(&mut self) -> Result<(), AgentError> {
        self.set_state(ComponentState::Stopping);
        if let Some(handle) = self.run_handle.take() {
            if let Some(platform) = self.runner.platform() {
                let _ = platform.signal(handle, nucleus_platform::Signal::Term).await;
                let result = tokio::time::timeout(self.shutdown_timeout, platform.wait(handle)).await;
                if result.is_err() {
                    let _ = platform.signal(handle, nucleus_platform::Signal::Kill).await;
                    let _ = platform.wait(handle).await;
                }
            }
        }
        let command = self.recipe.lifecycle_command(LifecyclePhase::Shutdown).map(str::to_string);
        let _ = self
            .runner
            .run_phase(LifecyclePhase::Shutdown, command.as_deref(), self.shutdown_timeout)
            .await;

        let tx = self.self_tx.clone();
        let _ = tx.send(Command::Submit {
            event: ComponentEvent::StopDone,
            reply: oneshot::channel().0,
        });
        Ok(())
    }

    async fn do_recover_then_start(&mut self) -> Result<(), AgentError> {
        let command = self.recipe.lifecycle_command(LifecyclePhase::Recover).map(str::to_string);
        if let Some(cmd) = command {
            if let Err(e) = self.runner.run_phase(LifecyclePhase::Recover, Some(&cmd), self.startup_timeout).await {
                error!(component = %self.identifier, error = %e, "recover phase failed");
            }
        }
        self.do_start().await
    }

    /// Clears a stabilized restart budget once `RUNNING` has held for at
    /// least `stabilization` (§4.4). Polled by the actor's own tick loop
    /// rather than pushed by an event, since nothing else observes dwell
    /// time in `RUNNING`.
    fn maybe_clear_budget(&mut self) {
        if self.current() != ComponentState::Running {
            return;
        }
        if let Some(since) = self.stable_since_ms {
            let elapsed = Duration::from_millis((self.clock.now_ms() - since).max(0) as u64);
            if elapsed >= self.stabilization {
                self.budget.reset();
            }
        }
    }
}
