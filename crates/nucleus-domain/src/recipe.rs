use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config_value::ConfigValue;
use crate::identifiers::{ComponentIdentifier, ComponentName, VersionRange};

/// Whether a dependency forces its dependents to restart when it restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DependencyKind {
    Hard,
    Soft,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub range: VersionRange,
    pub kind: DependencyKind,
}

/// A named point in a component's lifecycle. `Bootstrap` requires a device
/// restart to complete (§9) and is handled specially by DeploymentController.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Install,
    Startup,
    Run,
    Shutdown,
    Recover,
    Bootstrap,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecyclePhase::Install => "install",
            LifecyclePhase::Startup => "startup",
            LifecyclePhase::Run => "run",
            LifecyclePhase::Shutdown => "shutdown",
            LifecyclePhase::Recover => "recover",
            LifecyclePhase::Bootstrap => "bootstrap",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub uri: String,
    pub digest: String,
    pub unarchive: Option<UnarchiveKind>,
    /// Octal file permission applied after fetch, e.g. `0o755`.
    pub permissions: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UnarchiveKind {
    Zip,
    Tar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub default: ConfigValue,
    pub value_type: ParameterType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Boolean,
    Number,
    String,
    List,
}

/// A fully resolved, immutable component recipe — the output of RecipeParser
/// (§4.2) after platform-variant selection. Keyed by `ComponentIdentifier`
/// once loaded; the identifier itself is carried alongside rather than
/// embedded, since two differently-versioned recipes may otherwise be equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub identifier: ComponentIdentifier,
    pub publisher: String,
    pub dependencies: HashMap<ComponentName, DependencySpec>,
    pub lifecycle: HashMap<LifecyclePhase, String>,
    pub artifacts: Vec<ArtifactSpec>,
    pub parameters: HashMap<String, ParameterSpec>,
}

impl Recipe {
    pub fn lifecycle_command(&self, phase: LifecyclePhase) -> Option<&str> {
        self.lifecycle.get(&phase).map(|s| s.as_str())
    }

    pub fn has_bootstrap(&self) -> bool {
        self.lifecycle.contains_key(&LifecyclePhase::Bootstrap)
    }

    pub fn is_run_to_completion(&self) -> bool {
        !self.lifecycle.contains_key(&LifecyclePhase::Run)
    }

    /// Dependencies whose restart forces this component to restart too.
    pub fn hard_dependencies(&self) -> impl Iterator<Item = &ComponentName> {
        self.dependencies
            .iter()
            .filter(|(_, spec)| spec.kind == DependencyKind::Hard)
            .map(|(name, _)| name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::ComponentName;

    fn sample_recipe() -> Recipe {
        let mut lifecycle = HashMap::new();
        lifecycle.insert(LifecyclePhase::Run, "run.sh".to_string());
        let mut dependencies = HashMap::new();
        dependencies.insert(
            ComponentName::new("Mosquitto").unwrap(),
            DependencySpec {
                range: VersionRange::parse(">=2.0.0").unwrap(),
                kind: DependencyKind::Hard,
            },
        );
        Recipe {
            identifier: ComponentIdentifier::new(
                ComponentName::new("SomeService").unwrap(),
                semver::Version::parse("1.0.0").unwrap(),
            ),
            publisher: "Acme".to_string(),
            dependencies,
            lifecycle,
            artifacts: vec![],
            parameters: HashMap::new(),
        }
    }

    #[test]
    fn run_to_completion_detection() {
        let recipe = sample_recipe();
        assert!(!recipe.is_run_to_completion());

        let mut no_run = sample_recipe();
        no_run.lifecycle.clear();
        assert!(no_run.is_run_to_completion());
    }

    #[test]
    fn hard_dependencies_filters_soft() {
        let mut recipe = sample_recipe();
        recipe.dependencies.insert(
            ComponentName::new("Optional").unwrap(),
            DependencySpec {
                range: VersionRange::parse("*").unwrap(),
                kind: DependencyKind::Soft,
            },
        );
        let hard: Vec<_> = recipe.hard_dependencies().map(|n| n.as_str()).collect();
        assert_eq!(hard, vec!["Mosquitto"]);
    }

    #[test]
    fn recipe_round_trips_through_json() {
        let recipe = sample_recipe();
        let json = serde_json::to_string(&recipe).unwrap();
        let back: Recipe = serde_json::from_str(&json).unwrap();
        assert_eq!(recipe, back);
    }
}
