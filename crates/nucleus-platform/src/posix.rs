use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal as NixSignal};
use nix::unistd::{Pid, User};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::adapter::{ExitStatus, LaunchCommand, PlatformAdapter, ProcessHandle, ResourceLimits, Signal};
use crate::error::PlatformError;

/// cgroup v2 root nucleus writes per-process limits under. Absent on systems
/// without cgroup v2 or without the required delegation; in that case
/// `apply_resource_limits` logs and no-ops rather than failing spawn.
const CGROUP_ROOT: &str = "/sys/fs/cgroup/nucleus";

/// `PlatformAdapter` backed by real OS process control (§6, §9). Spawned
/// children are kept in an internal table keyed by pid so `signal`/`wait`
/// can be called against the `ProcessHandle` returned by `spawn`, mirroring
/// the "process-id tables are owned by PlatformAdapter with its own
/// internal synchronization" resource note (§5).
pub struct PosixAdapter {
    children: Mutex<HashMap<u32, Child>>,
}

impl PosixAdapter {
    pub fn new() -> Self {
        PosixAdapter {
            children: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for PosixAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformAdapter for PosixAdapter {
    async fn spawn(
        &self,
        command: &LaunchCommand,
        env: &HashMap<String, String>,
        work_dir: &Path,
        limits: ResourceLimits,
    ) -> Result<ProcessHandle, PlatformError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(work_dir)
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = cmd.spawn().map_err(|e| {
            PlatformError::SpawnFailed(format!("{} {:?}: {e}", command.program, command.args))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| PlatformError::SpawnFailed("process exited before pid was observed".to_string()))?;

        debug!(pid, program = %command.program, "spawned process");
        self.children.lock().await.insert(pid, child);
        let handle = ProcessHandle(pid);

        if limits.cpus.is_some() || limits.memory_kb.is_some() {
            self.apply_resource_limits(handle, limits).await?;
        }
        Ok(handle)
    }

    async fn signal(&self, handle: ProcessHandle, signal: Signal) -> Result<(), PlatformError> {
        {
            let children = self.children.lock().await;
            if !children.contains_key(&handle.pid()) {
                return Err(PlatformError::UnknownHandle(handle.pid()));
            }
        }
        let nix_signal = match signal {
            Signal::Term => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
            Signal::Hup => NixSignal::SIGHUP,
        };
        kill(Pid::from_raw(handle.pid() as i32), nix_signal)
            .map_err(|e| PlatformError::SignalFailed(format!("{} -> {handle}: {e}", signal_name(signal))))
    }

    async fn wait(&self, handle: ProcessHandle) -> Result<ExitStatus, PlatformError> {
        let mut child = {
            let mut children = self.children.lock().await;
            children
                .remove(&handle.pid())
                .ok_or(PlatformError::UnknownHandle(handle.pid()))?
        };
        let status = child
            .wait()
            .await
            .map_err(|e| PlatformError::WaitFailed(format!("{handle}: {e}")))?;
        Ok(ExitStatus {
            code: status.code().unwrap_or(-1),
        })
    }

    fn set_permissions(&self, path: &Path, mode: u32) -> Result<(), PlatformError> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            PlatformError::PermissionFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })
    }

    fn resolve_user(&self, name: &str) -> Result<u32, PlatformError> {
        User::from_name(name)
            .map_err(|e| PlatformError::UnknownUser(format!("{name}: {e}")))?
            .map(|u| u.uid.as_raw())
            .ok_or_else(|| PlatformError::UnknownUser(name.to_string()))
    }

    async fn apply_resource_limits(
        &self,
        handle: ProcessHandle,
        limits: ResourceLimits,
    ) -> Result<(), PlatformError> {
        let dir = Path::new(CGROUP_ROOT).join(handle.pid().to_string());
        if tokio::fs::create_dir_all(&dir).await.is_err() {
            warn!(pid = handle.pid(), "cgroup delegation unavailable; resource limits not enforced");
            return Ok(());
        }
        if let Some(memory_kb) = limits.memory_kb {
            let _ = tokio::fs::write(dir.join("memory.max"), (memory_kb * 1024).to_string()).await;
        }
        if let Some(cpus) = limits.cpus {
            let quota = (cpus * 100_000.0) as u64;
            let _ = tokio::fs::write(dir.join("cpu.max"), format!("{quota} 100000")).await;
        }
        let _ = tokio::fs::write(dir.join("cgroup.procs"), handle.pid().to_string()).await;
        Ok(())
    }

    async fn request_restart(&self, reason: &str) -> Result<(), PlatformError> {
        info!(reason, "triggering device restart for bootstrap deployment");
        Command::new("/sbin/reboot")
            .spawn()
            .map_err(|e| PlatformError::SpawnFailed(format!("/sbin/reboot: {e}")))?;
        Ok(())
    }
}

fn signal_name(signal: Signal) -> &'static str {
    match signal {
        Signal::Term => "SIGTERM",
        Signal::Kill => "SIGKILL",
        Signal::Hup => "SIGHUP",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> LaunchCommand {
        LaunchCommand {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[tokio::test]
    async fn spawn_wait_round_trip_reports_exit_code() {
        let adapter = PosixAdapter::new();
        let handle = adapter
            .spawn(&shell("exit 7"), &HashMap::new(), Path::new("/tmp"), ResourceLimits::default())
            .await
            .unwrap();
        let status = adapter.wait(handle).await.unwrap();
        assert_eq!(status.code, 7);
    }

    #[tokio::test]
    async fn wait_on_unknown_handle_fails() {
        let adapter = PosixAdapter::new();
        let err = adapter.wait(ProcessHandle(999_999)).await.unwrap_err();
        assert!(matches!(err, PlatformError::UnknownHandle(999_999)));
    }

    #[tokio::test]
    async fn signal_reaches_long_running_child() {
        let adapter = PosixAdapter::new();
        let handle = adapter
            .spawn(
                &LaunchCommand::parse("/bin/sleep 30"),
                &HashMap::new(),
                Path::new("/tmp"),
                ResourceLimits::default(),
            )
            .await
            .unwrap();
        adapter.signal(handle, Signal::Kill).await.unwrap();
        let status = adapter.wait(handle).await.unwrap();
        assert!(!status.success());
    }
}
