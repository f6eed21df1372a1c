pub mod bootstrap;
pub mod channels;
pub mod component;
pub mod deployment;
pub mod error;
pub mod lifecycle_runner;
pub mod orchestrator;
pub mod safe_update;
pub mod status;

pub use bootstrap::{clear_continuation_record, read_continuation_record, write_continuation_record, ContinuationRecord};
pub use channels::{
    AlwaysOkValidationChannel, AlwaysReadyVoteChannel, CloudChannel, LoggingCloudChannel, UpdateVoteChannel,
    ValidationChannel, ValidationOutcome, VoteResponse,
};
pub use component::{ComponentSupervisor, RestartBudget};
pub use deployment::{DeploymentController, DeploymentControllerDeps, DeploymentOutcome, DeploymentPhase};
pub use error::AgentError;
pub use lifecycle_runner::LifecycleRunner;
pub use orchestrator::{Orchestrator, Plan, PlanAction, PlanActionKind};
pub use safe_update::{Decision, SafeUpdateScheduler};
pub use status::{AuditEvent, AuditLog, ComponentStatus, DeploymentStatus, OverallHealth, StatusDocument, StatusReporter};
