use std::collections::{HashMap, HashSet};

use nucleus_domain::{ComponentIdentifier, ComponentName, Recipe, VersionRange};

use crate::error::GraphError;

/// Where a version constraint on a component name came from — either a
/// deployment group's root package entry, or a dependency declared by
/// another resolved component's recipe. Kept so a `CONFLICT` can name both
/// constraint origins (§8 scenario 2).
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintEntry {
    pub source: String,
    pub range: VersionRange,
}

/// Supplies candidate versions and recipes to the resolver. `nucleus-store`
/// provides the production implementation backed by the on-disk recipe
/// cache; tests provide an in-memory one.
pub trait RecipeSource {
    fn available_versions(&self, name: &ComponentName) -> Vec<semver::Version>;
    fn recipe(&self, identifier: &ComponentIdentifier) -> Option<Recipe>;
}

struct Resolution {
    chosen: HashMap<ComponentName, semver::Version>,
    constraints: HashMap<ComponentName, Vec<ConstraintEntry>>,
    nucleus_names_chosen: HashSet<ComponentName>,
}

/// Resolves a consistent `name -> version` mapping satisfying every active
/// group's constraints (§4.3).
///
/// `root_constraints` is the union across all active groups, as produced by
/// `GroupMembership::union_constraints` (or its `with_group_preview`
/// variant for a candidate deployment not yet committed).
pub fn resolve(
    root_constraints: &HashMap<ComponentName, Vec<VersionRange>>,
    source: &dyn RecipeSource,
) -> Result<HashMap<ComponentName, semver::Version>, GraphError> {
    let mut resolution = Resolution {
        chosen: HashMap::new(),
        constraints: HashMap::new(),
        nucleus_names_chosen: HashSet::new(),
    };

    for (name, ranges) in root_constraints {
        for range in ranges {
            resolution
                .constraints
                .entry(name.clone())
                .or_default()
                .push(ConstraintEntry {
                    source: format!("root:{name}"),
                    range: range.clone(),
                });
        }
    }

    let mut names: Vec<ComponentName> = root_constraints.keys().cloned().collect();
    names.sort();
    for name in names {
        resolve_name(&name, &mut resolution, source)?;
    }

    Ok(resolution.chosen)
}

fn candidate_versions(name: &ComponentName, source: &dyn RecipeSource) -> Vec<semver::Version> {
    // Descending order; publication-time tie-breaking is moot since
    // `available_versions` returns at most one entry per distinct version.
    let mut versions = source.available_versions(name);
    versions.sort_by(|a, b| b.cmp(a));
    versions
}

fn resolve_name(
    name: &ComponentName,
    resolution: &mut Resolution,
    source: &dyn RecipeSource,
) -> Result<(), GraphError> {
    if let Some(existing) = resolution.chosen.get(name).cloned() {
        let active = resolution.constraints.get(name).cloned().unwrap_or_default();
        return if active.iter().all(|c| c.range.matches(&existing)) {
            Ok(())
        } else {
            Err(GraphError::Conflict {
                name: name.clone(),
                constraints: active,
            })
        };
    }

    let active = resolution.constraints.get(name).cloned().unwrap_or_default();

    for candidate in candidate_versions(name, source) {
        if !active.iter().all(|c| c.range.matches(&candidate)) {
            continue;
        }
        let identifier = ComponentIdentifier::new(name.clone(), candidate.clone());
        let recipe = match source.recipe(&identifier) {
            Some(r) => r,
            None => continue,
        };

        let is_new_nucleus = name.is_nucleus() && !resolution.nucleus_names_chosen.contains(name);
        if is_new_nucleus && !resolution.nucleus_names_chosen.is_empty() {
            let mut names: Vec<_> = resolution.nucleus_names_chosen.iter().cloned().collect();
            names.push(name.clone());
            return Err(GraphError::MultipleNucleusResolved { names });
        }

        resolution.chosen.insert(name.clone(), candidate.clone());
        if is_new_nucleus {
            resolution.nucleus_names_chosen.insert(name.clone());
        }

        let my_label = identifier.to_string();
        let mut introduced: Vec<ComponentName> = Vec::new();
        for (dep_name, dep_spec) in &recipe.dependencies {
            resolution
                .constraints
                .entry(dep_name.clone())
                .or_default()
                .push(ConstraintEntry {
                    source: my_label.clone(),
                    range: dep_spec.range.clone(),
                });
            introduced.push(dep_name.clone());
        }

        let mut failure = None;
        for dep_name in &introduced {
            if let Err(e) = resolve_name(dep_name, resolution, source) {
                failure = Some(e);
                break;
            }
        }

        match failure {
            None => return Ok(()),
            Some(GraphError::Conflict {
                name: conflict_name,
                constraints,
            }) => {
                for dep_name in &introduced {
                    if let Some(entries) = resolution.constraints.get_mut(dep_name) {
                        entries.retain(|c| c.source != my_label);
                    }
                }
                resolution.chosen.remove(name);
                if is_new_nucleus {
                    resolution.nucleus_names_chosen.remove(name);
                }

                let contributed_by_this_choice = constraints.iter().any(|c| c.source == my_label);
                if contributed_by_this_choice {
                    // Conflict-driven backjump: this candidate's own
                    // dependency introduced the failing constraint, so
                    // trying the next candidate for `name` can resolve it
                    // without unwinding further.
                    continue;
                }
                return Err(GraphError::Conflict {
                    name: conflict_name,
                    constraints,
                });
            }
            Some(other) => return Err(other),
        }
    }

    Err(GraphError::Conflict {
        name: name.clone(),
        constraints: active,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap as Map;

    struct FakeSource {
        recipes: RefCell<Map<String, Recipe>>,
    }

    impl FakeSource {
        fn new() -> Self {
            FakeSource {
                recipes: RefCell::new(Map::new()),
            }
        }

        fn add(&self, recipe: Recipe) {
            self.recipes
                .borrow_mut()
                .insert(recipe.identifier.to_string(), recipe);
        }
    }

    impl RecipeSource for FakeSource {
        fn available_versions(&self, name: &ComponentName) -> Vec<semver::Version> {
            self.recipes
                .borrow()
                .values()
                .filter(|r| &r.identifier.name == name)
                .map(|r| r.identifier.version.clone())
                .collect()
        }

        fn recipe(&self, identifier: &ComponentIdentifier) -> Option<Recipe> {
            self.recipes.borrow().get(&identifier.to_string()).cloned()
        }
    }

    fn bare_recipe(name: &str, version: &str) -> Recipe {
        Recipe {
            identifier: ComponentIdentifier::new(
                ComponentName::new(name).unwrap(),
                semver::Version::parse(version).unwrap(),
            ),
            publisher: "test".to_string(),
            dependencies: Map::new(),
            lifecycle: Map::new(),
            artifacts: vec![],
            parameters: Map::new(),
        }
    }

    fn with_dependency(mut recipe: Recipe, dep: &str, range: &str) -> Recipe {
        recipe.dependencies.insert(
            ComponentName::new(dep).unwrap(),
            nucleus_domain::DependencySpec {
                range: VersionRange::parse(range).unwrap(),
                kind: nucleus_domain::DependencyKind::Hard,
            },
        );
        recipe
    }

    fn root(name: &str, range: &str) -> Map<ComponentName, Vec<VersionRange>> {
        let mut m = Map::new();
        m.insert(
            ComponentName::new(name).unwrap(),
            vec![VersionRange::parse(range).unwrap()],
        );
        m
    }

    #[test]
    fn resolves_simple_chain() {
        let source = FakeSource::new();
        source.add(with_dependency(
            bare_recipe("CustomerApp", "1.0.0"),
            "Mosquitto",
            ">=2.0.0",
        ));
        source.add(bare_recipe("Mosquitto", "2.1.0"));

        let resolved = resolve(&root("CustomerApp", "1.0.0"), &source).unwrap();
        assert_eq!(
            resolved.get(&ComponentName::new("Mosquitto").unwrap()),
            Some(&semver::Version::parse("2.1.0").unwrap())
        );
    }

    #[test]
    fn conflicting_transitive_constraints_report_both_origins() {
        let source = FakeSource::new();
        source.add(with_dependency(
            bare_recipe("SomeOldService", "0.9.0"),
            "Mosquitto",
            "<=1.5.0",
        ));
        source.add(with_dependency(
            bare_recipe("SomeService", "1.0.0"),
            "Mosquitto",
            ">=2.0.0",
        ));
        source.add(bare_recipe("Mosquitto", "1.5.0"));
        source.add(bare_recipe("Mosquitto", "2.1.0"));

        let mut roots = root("SomeOldService", "0.9.0");
        roots.insert(
            ComponentName::new("SomeService").unwrap(),
            vec![VersionRange::parse("1.0.0").unwrap()],
        );

        let err = resolve(&roots, &source).unwrap_err();
        match err {
            GraphError::Conflict { name, constraints } => {
                assert_eq!(name.as_str(), "Mosquitto");
                assert_eq!(constraints.len(), 2);
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn picks_highest_satisfying_version() {
        let source = FakeSource::new();
        source.add(bare_recipe("Standalone", "1.0.0"));
        source.add(bare_recipe("Standalone", "1.2.0"));
        source.add(bare_recipe("Standalone", "1.1.0"));

        let resolved = resolve(&root("Standalone", "^1.0.0"), &source).unwrap();
        assert_eq!(
            resolved.get(&ComponentName::new("Standalone").unwrap()),
            Some(&semver::Version::parse("1.2.0").unwrap())
        );
    }

    #[test]
    fn resolution_is_deterministic_across_runs() {
        let source = FakeSource::new();
        source.add(with_dependency(
            bare_recipe("CustomerApp", "1.0.0"),
            "Mosquitto",
            ">=2.0.0",
        ));
        source.add(bare_recipe("Mosquitto", "2.1.0"));
        source.add(bare_recipe("Mosquitto", "2.0.0"));

        let first = resolve(&root("CustomerApp", "1.0.0"), &source).unwrap();
        let second = resolve(&root("CustomerApp", "1.0.0"), &source).unwrap();
        assert_eq!(first, second);
    }
}
