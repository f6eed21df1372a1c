use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::error::PlatformError;

/// Opaque reference to a spawned OS process. Carries the PID so it is cheap
/// to copy and to use as a key in PlatformAdapter's internal process table,
/// but callers must never construct one directly — only `spawn` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle(pub(crate) u32);

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
    Hup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i32,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// cgroup-style limits applied after spawn. `None` leaves that dimension
/// unconstrained (§6: `applyResourceLimits(pid, {cpus?, memoryKB?})`).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceLimits {
    pub cpus: Option<f64>,
    pub memory_kb: Option<u64>,
}

/// A command to launch, resolved from a recipe's lifecycle phase template.
#[derive(Debug, Clone)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchCommand {
    /// Splits a recipe lifecycle command string on whitespace. Recipes don't
    /// support quoting today; a command with embedded spaces in an argument
    /// should be wrapped in a shell script instead.
    pub fn parse(command: &str) -> Self {
        let mut parts = command.split_whitespace();
        let program = parts.next().unwrap_or_default().to_string();
        let args = parts.map(|s| s.to_string()).collect();
        LaunchCommand { program, args }
    }
}

/// Platform-specific process launch, signaling, and resource control (§6,
/// §9: "model as explicit dependency-injected collaborators ... an
/// interface with per-OS implementations selected at startup").
#[async_trait]
pub trait PlatformAdapter: Send + Sync + 'static {
    async fn spawn(
        &self,
        command: &LaunchCommand,
        env: &HashMap<String, String>,
        work_dir: &Path,
        limits: ResourceLimits,
    ) -> Result<ProcessHandle, PlatformError>;

    async fn signal(&self, handle: ProcessHandle, signal: Signal) -> Result<(), PlatformError>;

    async fn wait(&self, handle: ProcessHandle) -> Result<ExitStatus, PlatformError>;

    fn set_permissions(&self, path: &Path, mode: u32) -> Result<(), PlatformError>;

    fn resolve_user(&self, name: &str) -> Result<u32, PlatformError>;

    async fn apply_resource_limits(
        &self,
        handle: ProcessHandle,
        limits: ResourceLimits,
    ) -> Result<(), PlatformError>;

    /// Triggers a device restart so a pending bootstrap-requiring deployment
    /// can resume at APPLYING on next startup (§4.7 "Bootstrap components").
    /// Returns once the restart has been requested, not once it has taken
    /// effect — the caller should not assume the process survives long
    /// after this returns `Ok`.
    async fn request_restart(&self, reason: &str) -> Result<(), PlatformError>;
}
