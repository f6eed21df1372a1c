use std::path::{Path, PathBuf};

use nucleus_domain::ComponentIdentifier;
use tokio::io::AsyncWriteExt;

use crate::error::StoreError;

/// The on-disk persistent state layout described in §6, rooted at an
/// operator-chosen directory (`AgentSettings::root_dir` in `nucleus-agent`).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StoreLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn recipes_dir(&self) -> PathBuf {
        self.root.join("packages").join("recipes")
    }

    pub fn recipe_path(&self, identifier: &ComponentIdentifier) -> PathBuf {
        self.recipes_dir()
            .join(format!("{}-{}.yaml", identifier.name, identifier.version))
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("packages").join("artifacts")
    }

    pub fn artifact_dir(&self, identifier: &ComponentIdentifier) -> PathBuf {
        self.artifacts_dir()
            .join(identifier.name.as_str())
            .join(identifier.version.to_string())
    }

    pub fn deployments_dir(&self) -> PathBuf {
        self.root.join("deployments")
    }

    pub fn continuation_record_path(&self) -> PathBuf {
        self.deployments_dir().join("ongoing.json")
    }

    /// Removes any `*.part` files under the artifacts tree. Called once at
    /// startup: "partial downloads are deleted on process startup" (§4.2).
    pub async fn cleanup_partial_downloads(&self) -> Result<(), StoreError> {
        let dir = self.artifacts_dir();
        if !dir.exists() {
            return Ok(());
        }
        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(e) => e,
                Err(_) => continue,
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().and_then(|e| e.to_str()) == Some("part") {
                    tracing::info!(?path, "removing partial download left from a prior run");
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
        }
        Ok(())
    }
}

/// Writes `contents` to `path` atomically: write to `path.tmp`, fsync, then
/// rename over the destination (§6: "All writes use write-to-temp-then-
/// rename for atomicity").
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("")
    ));
    {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
    }
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_atomic_leaves_no_tmp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("file.json");
        write_atomic(&path, b"{}").await.unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn layout_derives_expected_paths() {
        let layout = StoreLayout::new("/var/nucleus");
        let id = ComponentIdentifier::new(
            nucleus_domain::ComponentName::new("SomeService").unwrap(),
            semver::Version::parse("1.0.0").unwrap(),
        );
        assert_eq!(
            layout.recipe_path(&id),
            PathBuf::from("/var/nucleus/packages/recipes/SomeService-1.0.0.yaml")
        );
        assert_eq!(
            layout.artifact_dir(&id),
            PathBuf::from("/var/nucleus/packages/artifacts/SomeService/1.0.0")
        );
    }
}
