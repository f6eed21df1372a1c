use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("failed to wait on process: {0}")]
    WaitFailed(String),

    #[error("failed to signal process: {0}")]
    SignalFailed(String),

    #[error("no such process handle: {0}")]
    UnknownHandle(u32),

    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("failed to set permissions on {path}: {reason}")]
    PermissionFailed { path: String, reason: String },

    #[error("failed to apply resource limits: {0}")]
    ResourceLimitFailed(String),
}

impl PlatformError {
    pub fn code(&self) -> String {
        match self {
            PlatformError::SpawnFailed(_) => "STARTUP_TIMEOUT.PLATFORM_SPAWN_ERROR".to_string(),
            PlatformError::WaitFailed(_) => "STARTUP_TIMEOUT.PLATFORM_SPAWN_ERROR.WAIT_FAILED".to_string(),
            PlatformError::SignalFailed(_) => "STARTUP_TIMEOUT.PLATFORM_SPAWN_ERROR.SIGNAL_FAILED".to_string(),
            PlatformError::UnknownHandle(_) => "STARTUP_TIMEOUT.PLATFORM_SPAWN_ERROR.UNKNOWN_HANDLE".to_string(),
            PlatformError::UnknownUser(_) => "STARTUP_TIMEOUT.PLATFORM_SPAWN_ERROR.UNKNOWN_USER".to_string(),
            PlatformError::PermissionFailed { .. } => "STARTUP_TIMEOUT.PLATFORM_SPAWN_ERROR.PERMISSION".to_string(),
            PlatformError::ResourceLimitFailed(_) => {
                "STARTUP_TIMEOUT.PLATFORM_SPAWN_ERROR.RESOURCE_LIMIT".to_string()
            }
        }
    }
}
