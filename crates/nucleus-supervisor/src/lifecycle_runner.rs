use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nucleus_domain::recipe::LifecyclePhase;
use nucleus_platform::{ExitStatus, LaunchCommand, PlatformAdapter, ResourceLimits, Signal};

use crate::error::AgentError;

/// How a component's lifecycle phases are actually executed. `ExternalProcess`
/// is the production strategy (§6 PlatformAdapter contract); `Noop` backs
/// components with no command for a phase; `BuiltinTask` lets the agent
/// itself stand in for the nucleus component without spawning a process.
pub enum LifecycleRunner {
    ExternalProcess {
        platform: Arc<dyn PlatformAdapter>,
        work_dir: PathBuf,
        env: HashMap<String, String>,
    },
    BuiltinTask,
    Noop,
}

impl LifecycleRunner {
    /// Runs a lifecycle phase to completion and returns its exit status.
    /// For `run`, the caller is expected to supervise the returned handle
    /// separately rather than awaiting exit here; this method is for
    /// run-to-completion phases (install/startup/shutdown/recover/bootstrap).
    pub async fn run_phase(
        &self,
        phase: LifecyclePhase,
        command: Option<&str>,
        timeout: Duration,
    ) -> Result<ExitStatus, AgentError> {
        let Some(command) = command else {
            return Ok(ExitStatus { code: 0 });
        };
        match self {
            LifecycleRunner::Noop | LifecycleRunner::BuiltinTask => Ok(ExitStatus { code: 0 }),
            LifecycleRunner::ExternalProcess { platform, work_dir, env } => {
                let launch = LaunchCommand::parse(command);
                let handle = platform
                    .spawn(&launch, env, work_dir, ResourceLimits::default())
                    .await?;
                let result = tokio::time::timeout(timeout, platform.wait(handle)).await;
                match result {
                    Ok(status) => Ok(status?),
                    Err(_) => {
                        let _ = platform.signal(handle, Signal::Kill).await;
                        Err(AgentError::StartupTimeout(format!("{phase}")))
                    }
                }
            }
        }
    }

    /// Starts a long-running `run` phase without waiting for exit, returning
    /// a handle the caller can `wait`/`signal` independently.
    pub async fn spawn_run(
        &self,
        command: &str,
    ) -> Result<Option<nucleus_platform::ProcessHandle>, AgentError> {
        match self {
            LifecycleRunner::Noop | LifecycleRunner::BuiltinTask => Ok(None),
            LifecycleRunner::ExternalProcess { platform, work_dir, env } => {
                let launch = LaunchCommand::parse(command);
                let handle = platform
                    .spawn(&launch, env, work_dir, ResourceLimits::default())
                    .await?;
                Ok(Some(handle))
            }
        }
    }

    pub fn platform(&self) -> Option<&Arc<dyn PlatformAdapter>> {
        match self {
            LifecycleRunner::ExternalProcess { platform, .. } => Some(platform),
            _ => None,
        }
    }
}
