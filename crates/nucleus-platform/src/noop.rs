use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::adapter::{ExitStatus, LaunchCommand, PlatformAdapter, ProcessHandle, ResourceLimits, Signal};
use crate::error::PlatformError;

/// Test/bootstrap `PlatformAdapter` that never touches the OS. Every spawned
/// handle "succeeds" immediately with exit code 0 unless a caller preloads a
/// different outcome via `set_outcome`.
pub struct NoopAdapter {
    next_pid: AtomicU32,
    outcomes: Mutex<HashMap<u32, i32>>,
    restart_requests: Mutex<Vec<String>>,
}

impl NoopAdapter {
    pub fn new() -> Self {
        NoopAdapter {
            next_pid: AtomicU32::new(1),
            outcomes: Mutex::new(HashMap::new()),
            restart_requests: Mutex::new(Vec::new()),
        }
    }

    /// Preloads the exit code `wait` reports for the next spawned handle.
    pub fn set_next_outcome(&self, handle: ProcessHandle, code: i32) {
        self.outcomes.lock().unwrap().insert(handle.pid(), code);
    }

    /// Every reason passed to `request_restart` so far, in call order.
    pub fn restart_requests(&self) -> Vec<String> {
        self.restart_requests.lock().unwrap().clone()
    }
}

impl Default for NoopAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformAdapter for NoopAdapter {
    async fn spawn(
        &self,
        _command: &LaunchCommand,
        _env: &HashMap<String, String>,
        _work_dir: &Path,
        _limits: ResourceLimits,
    ) -> Result<ProcessHandle, PlatformError> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        Ok(ProcessHandle(pid))
    }

    async fn signal(&self, _handle: ProcessHandle, _signal: Signal) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn wait(&self, handle: ProcessHandle) -> Result<ExitStatus, PlatformError> {
        let code = self
            .outcomes
            .lock()
            .unwrap()
            .get(&handle.pid())
            .copied()
            .unwrap_or(0);
        Ok(ExitStatus { code })
    }

    fn set_permissions(&self, _path: &Path, _mode: u32) -> Result<(), PlatformError> {
        Ok(())
    }

    fn resolve_user(&self, _name: &str) -> Result<u32, PlatformError> {
        Ok(0)
    }

    async fn apply_resource_limits(
        &self,
        _handle: ProcessHandle,
        _limits: ResourceLimits,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn request_restart(&self, reason: &str) -> Result<(), PlatformError> {
        self.restart_requests.lock().unwrap().push(reason.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn preloaded_outcome_is_reported_on_wait() {
        let adapter = NoopAdapter::new();
        let handle = adapter
            .spawn(
                &LaunchCommand::parse("run.sh"),
                &HashMap::new(),
                Path::new("."),
                ResourceLimits::default(),
            )
            .await
            .unwrap();
        adapter.set_next_outcome(handle, 1);
        let status = adapter.wait(handle).await.unwrap();
        assert_eq!(status.code, 1);
    }

    #[tokio::test]
    async fn request_restart_is_recorded() {
        let adapter = NoopAdapter::new();
        adapter.request_restart("bootstrap component resolved").await.unwrap();
        assert_eq!(adapter.restart_requests(), vec!["bootstrap component resolved".to_string()]);
    }
}
