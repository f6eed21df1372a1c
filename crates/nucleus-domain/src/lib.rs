pub mod clock;
pub mod component_state;
pub mod config_value;
pub mod deployment;
pub mod error;
pub mod identifiers;
pub mod recipe;

pub use clock::{Clock, SystemClock, TestClock};
pub use component_state::{ComponentEvent, ComponentState};
pub use config_value::ConfigValue;
pub use deployment::{
    ComponentUpdatePolicy, Deployment, FailureHandling, GroupMembership, PackageSpec, Policies,
};
pub use error::DomainError;
pub use identifiers::{ComponentIdentifier, ComponentName, VersionRange};
pub use recipe::{
    ArtifactSpec, DependencyKind, DependencySpec, LifecyclePhase, ParameterSpec, Recipe,
};
