use serde::{Deserialize, Serialize};

/// The lifecycle state of one component, per §4.4.
///
/// `NEW → INSTALLED → STARTING → RUNNING → STOPPING → FINISHED` is the
/// run-to-completion path; `ERRORED`/`BROKEN` are off-path states reached
/// only through restart-budget accounting, never guessed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    New,
    Installed,
    Starting,
    Running,
    Stopping,
    Finished,
    Errored,
    Broken,
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComponentState::New => "NEW",
            ComponentState::Installed => "INSTALLED",
            ComponentState::Starting => "STARTING",
            ComponentState::Running => "RUNNING",
            ComponentState::Stopping => "STOPPING",
            ComponentState::Finished => "FINISHED",
            ComponentState::Errored => "ERRORED",
            ComponentState::Broken => "BROKEN",
        };
        write!(f, "{}", s)
    }
}

impl ComponentState {
    /// Whether this state reflects a healthy, unremarkable component for
    /// the purposes of StatusReporter's overall-health rollup (§4.8).
    pub fn is_healthy(&self) -> bool {
        !matches!(self, ComponentState::Broken)
    }
}

/// Events submitted to a ComponentSupervisor's mailbox (§4.4). Every state
/// transition is the effect of exactly one of these; there is no implicit
/// transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentEvent {
    Install,
    Start,
    StartupOk,
    StartupFailed,
    RunExited { code: i32 },
    Stop,
    StopDone,
    RestartPermitted,
    RestartBudgetExhausted,
    /// A HARD dependency announced it is going below RUNNING.
    DependencyStopping,
    /// All HARD dependencies are back in RUNNING.
    DependenciesRestored,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_screaming_snake_case() {
        assert_eq!(ComponentState::Starting.to_string(), "STARTING");
    }

    #[test]
    fn only_broken_is_unhealthy() {
        assert!(!ComponentState::Broken.is_healthy());
        assert!(ComponentState::Errored.is_healthy());
        assert!(ComponentState::Running.is_healthy());
    }
}
