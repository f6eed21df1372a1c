use std::time::Duration;

use async_trait::async_trait;
use nucleus_domain::{ComponentIdentifier, ComponentName, ConfigValue};
use tracing::info;

use crate::error::AgentError;

/// Outcome of asking a running component to accept a proposed configuration
/// change before it is applied (§4.7 Validate phase).
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Ok,
    Reject(String),
}

/// The IPC round-trip named as an external collaborator in §1. One
/// production-shaped implementation talks to the component over its real
/// transport; tests use an in-memory stand-in.
#[async_trait]
pub trait ValidationChannel: Send + Sync {
    async fn validate(
        &self,
        component: &ComponentIdentifier,
        config: &ConfigValue,
        timeout: Duration,
    ) -> Result<ValidationOutcome, AgentError>;
}

/// Used for components that declare no validation hook, and as the default
/// before a real IPC transport is wired in.
pub struct AlwaysOkValidationChannel;

#[async_trait]
impl ValidationChannel for AlwaysOkValidationChannel {
    async fn validate(
        &self,
        _component: &ComponentIdentifier,
        _config: &ConfigValue,
        _timeout: Duration,
    ) -> Result<ValidationOutcome, AgentError> {
        Ok(ValidationOutcome::Ok)
    }
}

/// A component's answer to a SafeUpdateScheduler vote request (§4.6).
#[derive(Debug, Clone, PartialEq)]
pub enum VoteResponse {
    Ready,
    Defer { ms: u64, reason: String },
}

/// Solicits an update vote from a running component within a bounded window.
/// No response before the window closes is the caller's responsibility to
/// treat as `Ready` (§4.6) — this trait only reports what was actually said.
#[async_trait]
pub trait UpdateVoteChannel: Send + Sync {
    async fn request_vote(&self, component: &ComponentName, window: Duration) -> Option<VoteResponse>;
}

pub struct AlwaysReadyVoteChannel;

#[async_trait]
impl UpdateVoteChannel for AlwaysReadyVoteChannel {
    async fn request_vote(&self, _component: &ComponentName, _window: Duration) -> Option<VoteResponse> {
        Some(VoteResponse::Ready)
    }
}

/// The cloud control-plane link named as an external collaborator in §1:
/// status documents (§4.8) and structured errors (§7) flow out through it.
#[async_trait]
pub trait CloudChannel: Send + Sync {
    async fn report_status(&self, document: serde_json::Value) -> Result<(), AgentError>;
    async fn report_error(&self, code: String, message: String) -> Result<(), AgentError>;
}

/// Logs instead of transmitting; the default until a real transport is
/// configured at startup (mirrors the stub-driver pattern for local runs).
pub struct LoggingCloudChannel;

#[async_trait]
impl CloudChannel for LoggingCloudChannel {
    async fn report_status(&self, document: serde_json::Value) -> Result<(), AgentError> {
        info!(status = %document, "status document (no cloud channel configured)");
        Ok(())
    }

    async fn report_error(&self, code: String, message: String) -> Result<(), AgentError> {
        info!(code = %code, message = %message, "error report (no cloud channel configured)");
        Ok(())
    }
}
