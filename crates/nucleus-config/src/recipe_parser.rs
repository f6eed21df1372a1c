use std::collections::HashMap;

use serde::Deserialize;

use nucleus_domain::{
    ArtifactSpec, ComponentIdentifier, ComponentName, ConfigValue, DependencyKind, DependencySpec,
    LifecyclePhase, ParameterSpec, Recipe, UnarchiveKind, VersionRange,
};

use crate::error::ConfigError;

/// Platform tag ranking table (§4.2, §9). Unknown tags fall back to the
/// middle rank rather than being rejected, so a recipe author introducing a
/// new OS tag degrades gracefully instead of failing to parse.
fn platform_rank(tag: &str) -> u32 {
    match tag {
        "all" => 0,
        "linux" | "windows" | "darwin" | "macos" | "android" => 1,
        "ubuntu" | "windows_server" => 2,
        _ => 1,
    }
}

#[derive(Debug, Deserialize)]
struct RawRecipe {
    #[serde(rename = "RecipeFormatVersion")]
    #[allow(dead_code)]
    recipe_format_version: String,
    #[serde(rename = "ComponentName")]
    component_name: String,
    #[serde(rename = "ComponentVersion")]
    component_version: String,
    #[serde(rename = "ComponentPublisher", default)]
    component_publisher: String,
    #[serde(rename = "ComponentDependencies", default)]
    component_dependencies: HashMap<String, RawDependency>,
    #[serde(rename = "Manifests")]
    manifests: Vec<RawManifest>,
    #[serde(rename = "ComponentConfiguration", default)]
    component_configuration: Option<RawComponentConfiguration>,
}

#[derive(Debug, Deserialize)]
struct RawDependency {
    #[serde(rename = "VersionRequirement")]
    version_requirement: String,
    #[serde(rename = "DependencyType", default)]
    dependency_type: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawPlatform {
    #[serde(rename = "os", default)]
    os: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(rename = "Platform", default)]
    platform: Option<RawPlatform>,
    #[serde(rename = "Lifecycle", default)]
    lifecycle: HashMap<String, String>,
    #[serde(rename = "Artifacts", default)]
    artifacts: Vec<RawArtifact>,
    /// Unknown manifest-level keys land here and are preserved but ignored,
    /// per §4.2 ("unknown keys are preserved but ignored").
    #[serde(flatten)]
    #[allow(dead_code)]
    extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawArtifact {
    #[serde(rename = "Uri")]
    uri: String,
    #[serde(rename = "Digest")]
    digest: String,
    #[serde(rename = "Unarchive", default)]
    unarchive: Option<String>,
    #[serde(rename = "Permission", default)]
    permission: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawComponentConfiguration {
    #[serde(rename = "DefaultConfiguration", default)]
    default_configuration: serde_json::Value,
}

fn parse_lifecycle_phase(name: &str) -> Result<LifecyclePhase, ConfigError> {
    match name {
        "install" => Ok(LifecyclePhase::Install),
        "startup" => Ok(LifecyclePhase::Startup),
        "run" => Ok(LifecyclePhase::Run),
        "shutdown" => Ok(LifecyclePhase::Shutdown),
        "recover" => Ok(LifecyclePhase::Recover),
        "bootstrap" => Ok(LifecyclePhase::Bootstrap),
        other => Err(ConfigError::InvalidRecipe(format!(
            "unknown lifecycle phase '{other}'"
        ))),
    }
}

fn parse_permission(s: &str) -> Option<u32> {
    u32::from_str_radix(s.trim_start_matches("0o").trim_start_matches('0'), 8).ok()
}

/// Picks the manifest whose platform tag matches `current_platform` with
/// the highest rank; among equal ranks the first one listed in `Manifests`
/// wins (Open Question decision in SPEC_FULL.md §13.3).
fn select_manifest<'a>(
    manifests: &'a [RawManifest],
    current_platform: &[&str],
) -> Result<&'a RawManifest, ConfigError> {
    let mut best: Option<(u32, &RawManifest)> = None;
    for manifest in manifests {
        let tag = manifest
            .platform
            .as_ref()
            .and_then(|p| p.os.as_deref())
            .unwrap_or("all");
        if tag != "all" && !current_platform.contains(&tag) {
            continue;
        }
        let rank = platform_rank(tag);
        match best {
            Some((best_rank, _)) if rank <= best_rank => {}
            _ => best = Some((rank, manifest)),
        }
    }
    best.map(|(_, m)| m)
        .ok_or_else(|| ConfigError::InvalidRecipe("no manifest matches the current platform".to_string()))
}

/// Parses a recipe document (YAML or JSON, auto-detected) and resolves its
/// platform-selection blocks into a single `Recipe` (§4.2).
pub fn parse_recipe(bytes: &[u8], current_platform: &[&str]) -> Result<Recipe, ConfigError> {
    let raw: RawRecipe = if looks_like_json(bytes) {
        serde_json::from_slice(bytes).map_err(|e| ConfigError::RecipeParse(e.to_string()))?
    } else {
        serde_yaml::from_slice(bytes).map_err(|e| ConfigError::RecipeParse(e.to_string()))?
    };

    let name = ComponentName::new(raw.component_name.clone())?;
    let version = semver::Version::parse(&raw.component_version).map_err(|e| {
        ConfigError::InvalidRecipe(format!("invalid ComponentVersion '{}': {e}", raw.component_version))
    })?;
    let identifier = ComponentIdentifier::new(name, version);

    let mut dependencies = HashMap::new();
    for (dep_name, dep) in raw.component_dependencies {
        let range = VersionRange::parse(dep.version_requirement.clone())?;
        let kind = match dep.dependency_type.as_deref() {
            None | Some("HARD") => DependencyKind::Hard,
            Some("SOFT") => DependencyKind::Soft,
            Some(other) => {
                return Err(ConfigError::InvalidRecipe(format!(
                    "unknown DependencyType '{other}' for dependency '{dep_name}'"
                )))
            }
        };
        dependencies.insert(ComponentName::new(dep_name)?, DependencySpec { range, kind });
    }

    let manifest = select_manifest(&raw.manifests, current_platform)?;

    let mut lifecycle = HashMap::new();
    for (phase_name, command) in &manifest.lifecycle {
        let phase = parse_lifecycle_phase(phase_name)?;
        lifecycle.insert(phase, command.clone());
    }
    detect_phase_cycle(&lifecycle)?;

    let artifacts = manifest
        .artifacts
        .iter()
        .map(|a| {
            Ok(ArtifactSpec {
                uri: a.uri.clone(),
                digest: a.digest.clone(),
                unarchive: match a.unarchive.as_deref() {
                    None => None,
                    Some("ZIP") => Some(UnarchiveKind::Zip),
                    Some("TAR") => Some(UnarchiveKind::Tar),
                    Some(other) => {
                        return Err(ConfigError::InvalidRecipe(format!(
                            "unknown Unarchive kind '{other}'"
                        )))
                    }
                },
                permissions: a.permission.as_deref().and_then(parse_permission),
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    let parameters: HashMap<String, ParameterSpec> = raw
        .component_configuration
        .as_ref()
        .map(|c| default_configuration_to_parameters(&c.default_configuration))
        .unwrap_or_default();

    Ok(Recipe {
        identifier,
        publisher: raw.component_publisher,
        dependencies,
        lifecycle,
        artifacts,
        parameters,
    })
}

/// Recipes have no explicit typed-parameter block in the wire format
/// (§6); parameter defaults and an inferred type are derived from
/// `DefaultConfiguration` directly.
fn default_configuration_to_parameters(value: &serde_json::Value) -> HashMap<String, ParameterSpec> {
    use nucleus_domain::recipe::ParameterType;
    let mut out = HashMap::new();
    if let serde_json::Value::Object(map) = value {
        for (key, v) in map {
            let default = ConfigValue::from(v);
            let value_type = match &default {
                ConfigValue::Bool(_) => ParameterType::Boolean,
                ConfigValue::Int(_) | ConfigValue::Float(_) => ParameterType::Number,
                ConfigValue::List(_) => ParameterType::List,
                _ => ParameterType::String,
            };
            out.insert(key.clone(), ParameterSpec { default, value_type });
        }
    }
    out
}

/// Recipes declare lifecycle phases as a flat name->command map, not an
/// explicit graph, but a command template may reference another phase's
/// output via `{phase_name}` interpolation; a cycle there is the "cycle
/// within a single recipe's phase graph" §4.2 names as an INVALID_RECIPE
/// cause.
fn detect_phase_cycle(lifecycle: &HashMap<LifecyclePhase, String>) -> Result<(), ConfigError> {
    fn phase_token(phase: LifecyclePhase) -> String {
        format!("{{{phase}}}")
    }
    for (&phase, _) in lifecycle {
        let mut visited = vec![phase];
        let mut current = phase;
        loop {
            let command = match lifecycle.get(&current) {
                Some(c) => c,
                None => break,
            };
            let next = lifecycle
                .keys()
                .find(|&&p| p != current && command.contains(&phase_token(p)));
            match next {
                Some(&next_phase) => {
                    if visited.contains(&next_phase) {
                        return Err(ConfigError::InvalidRecipe(format!(
                            "cycle in lifecycle phase graph starting at '{phase}'"
                        )));
                    }
                    visited.push(next_phase);
                    current = next_phase;
                }
                None => break,
            }
        }
    }
    Ok(())
}

fn looks_like_json(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{')
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPE_YAML: &str = r#"
RecipeFormatVersion: "2020-01-25"
ComponentName: SomeService
ComponentVersion: "1.0.0"
ComponentPublisher: Acme
ComponentDependencies:
  Mosquitto:
    VersionRequirement: ">=2.0.0"
    DependencyType: HARD
Manifests:
  - Platform:
      os: all
    Lifecycle:
      run: "run.sh"
    Artifacts:
      - Uri: "s3://bucket/run.sh"
        Digest: "abc123"
  - Platform:
      os: linux
    Lifecycle:
      install: "install-linux.sh"
      run: "run-linux.sh"
ComponentConfiguration:
  DefaultConfiguration:
    port: 8080
    verbose: true
"#;

    #[test]
    fn parses_recipe_and_picks_most_specific_manifest() {
        let recipe = parse_recipe(RECIPE_YAML.as_bytes(), &["all", "linux", "ubuntu"]).unwrap();
        assert_eq!(recipe.identifier.name.as_str(), "SomeService");
        assert_eq!(recipe.lifecycle_command(LifecyclePhase::Run), Some("run-linux.sh"));
        assert_eq!(
            recipe.lifecycle_command(LifecyclePhase::Install),
            Some("install-linux.sh")
        );
    }

    #[test]
    fn falls_back_to_all_when_no_specific_manifest_matches() {
        let recipe = parse_recipe(RECIPE_YAML.as_bytes(), &["all", "windows"]).unwrap();
        assert_eq!(recipe.lifecycle_command(LifecyclePhase::Run), Some("run.sh"));
    }

    #[test]
    fn dependency_range_and_kind_are_parsed() {
        let recipe = parse_recipe(RECIPE_YAML.as_bytes(), &["all"]).unwrap();
        let dep = recipe
            .dependencies
            .get(&ComponentName::new("Mosquitto").unwrap())
            .unwrap();
        assert_eq!(dep.kind, DependencyKind::Hard);
        assert!(dep.range.matches(&semver::Version::parse("2.1.0").unwrap()));
    }

    #[test]
    fn unknown_lifecycle_phase_is_rejected() {
        let bad = RECIPE_YAML.replace("run: \"run.sh\"", "bogus: \"run.sh\"");
        let err = parse_recipe(bad.as_bytes(), &["all"]).unwrap_err();
        assert_eq!(err.code(), "DEPLOYMENT_FAILURE.RECIPE_PARSE_ERROR.INVALID_RECIPE");
    }

    #[test]
    fn parse_then_reserialize_then_reparse_round_trips() {
        let recipe = parse_recipe(RECIPE_YAML.as_bytes(), &["all", "linux"]).unwrap();
        let json = serde_json::to_string(&recipe).unwrap();
        let back: Recipe = serde_json::from_str(&json).unwrap();
        assert_eq!(recipe, back);
    }

    #[test]
    fn default_configuration_becomes_typed_parameters() {
        let recipe = parse_recipe(RECIPE_YAML.as_bytes(), &["all"]).unwrap();
        assert_eq!(recipe.parameters.get("port").unwrap().default, ConfigValue::Int(8080));
        assert_eq!(
            recipe.parameters.get("verbose").unwrap().default,
            ConfigValue::Bool(true)
        );
    }
}
