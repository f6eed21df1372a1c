use std::fs;

use nucleus_config::parse_recipe;
use nucleus_domain::{ComponentIdentifier, ComponentName, Recipe};
use nucleus_graph::RecipeSource;

use crate::paths::StoreLayout;

/// Backs the dependency resolver with the on-disk recipe cache. Scans
/// `StoreLayout::recipes_dir()` rather than keeping an index in memory, since
/// recipes are only ever appended by `ArtifactStore::fetch` and the cache is
/// small enough that a directory listing per lookup is cheap.
pub struct CachedRecipeSource {
    layout: StoreLayout,
    platform: Vec<String>,
}

impl CachedRecipeSource {
    pub fn new(layout: StoreLayout, platform: Vec<String>) -> Self {
        CachedRecipeSource { layout, platform }
    }

    fn platform_refs(&self) -> Vec<&str> {
        self.platform.iter().map(|s| s.as_str()).collect()
    }

    fn entries(&self) -> Vec<(ComponentName, semver::Version, std::path::PathBuf)> {
        let dir = self.layout.recipes_dir();
        let Ok(read_dir) = fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for entry in read_dir.flatten() {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some((name_part, version_part)) = stem.rsplit_once('-') else {
                continue;
            };
            let (Ok(name), Ok(version)) = (
                ComponentName::new(name_part),
                semver::Version::parse(version_part),
            ) else {
                continue;
            };
            out.push((name, version, path));
        }
        out
    }
}

impl RecipeSource for CachedRecipeSource {
    fn available_versions(&self, name: &ComponentName) -> Vec<semver::Version> {
        self.entries()
            .into_iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, v, _)| v)
            .collect()
    }

    fn recipe(&self, identifier: &ComponentIdentifier) -> Option<Recipe> {
        let path = self.layout.recipe_path(identifier);
        let bytes = fs::read(path).ok()?;
        parse_recipe(&bytes, &self.platform_refs()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_cached_recipes_back_for_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        fs::create_dir_all(layout.recipes_dir()).unwrap();

        let recipe_yaml = r#"
RecipeFormatVersion: "2020-01-25"
ComponentName: SomeService
ComponentVersion: "1.0.0"
ComponentPublisher: Acme
Manifests:
  - Platform:
      os: all
    Lifecycle:
      run: "run.sh"
"#;
        let identifier = ComponentIdentifier::new(
            ComponentName::new("SomeService").unwrap(),
            semver::Version::parse("1.0.0").unwrap(),
        );
        fs::write(layout.recipe_path(&identifier), recipe_yaml).unwrap();

        let source = CachedRecipeSource::new(layout, vec!["all".to_string()]);
        let versions = source.available_versions(&ComponentName::new("SomeService").unwrap());
        assert_eq!(versions, vec![semver::Version::parse("1.0.0").unwrap()]);
        assert!(source.recipe(&identifier).is_some());
    }
}
