use thiserror::Error;

/// Composes every lower-crate error into the one type that flows through
/// Orchestrator, DeploymentController, and StatusReporter. Each variant's
/// `code()` delegates to its source so the cloud-facing error-code path
/// (§7) stays rooted in whichever crate actually detected the failure.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Domain(#[from] nucleus_domain::DomainError),

    #[error(transparent)]
    Config(#[from] nucleus_config::ConfigError),

    #[error(transparent)]
    Graph(#[from] nucleus_graph::GraphError),

    #[error(transparent)]
    Store(#[from] nucleus_store::StoreError),

    #[error(transparent)]
    Platform(#[from] nucleus_platform::PlatformError),

    #[error("component '{0}' startup timed out")]
    StartupTimeout(String),

    #[error("component '{0}' shutdown timed out")]
    ShutdownTimeout(String),

    #[error("configuration validation rejected: {0}")]
    ValidationRejected(String),

    #[error("configuration validation timed out for '{0}'")]
    ValidationTimeout(String),

    #[error("safe update aborted: {0}")]
    SafeUpdateAborted(String),

    #[error("ipc error: {0}")]
    Ipc(String),

    #[error("deployment plan has a dependency cycle")]
    PlanCycle,

    #[error("deployment document invalid: {0}")]
    DeploymentDocumentInvalid(String),

    #[error("component version conflict: {0}")]
    ComponentVersionConflict(String),
}

impl AgentError {
    pub fn code(&self) -> String {
        match self {
            AgentError::Domain(e) => e.code().to_string(),
            AgentError::Config(e) => e.code().to_string(),
            AgentError::Graph(e) => e.code(),
            AgentError::Store(e) => e.code(),
            AgentError::Platform(e) => e.code(),
            AgentError::StartupTimeout(_) => "STARTUP_TIMEOUT".to_string(),
            AgentError::ShutdownTimeout(_) => "SHUTDOWN_TIMEOUT".to_string(),
            AgentError::ValidationRejected(_) => "VALIDATION_REJECTED".to_string(),
            AgentError::ValidationTimeout(_) => "VALIDATION_TIMEOUT".to_string(),
            AgentError::SafeUpdateAborted(_) => "SAFE_UPDATE_ABORTED".to_string(),
            AgentError::Ipc(_) => "IPC_ERROR".to_string(),
            AgentError::PlanCycle => "PLAN_CYCLE".to_string(),
            AgentError::DeploymentDocumentInvalid(_) => "DEPLOYMENT_DOCUMENT_INVALID".to_string(),
            AgentError::ComponentVersionConflict(_) => "COMPONENT_VERSION_CONFLICT".to_string(),
        }
    }
}
