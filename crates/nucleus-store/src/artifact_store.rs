use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nucleus_domain::{ArtifactSpec, ComponentIdentifier};
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::StoreError;
use crate::paths::{write_atomic, StoreLayout};

/// Receives download progress callbacks during `ArtifactStore::prepare`.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, uri: &str, downloaded: u64, total: Option<u64>);
}

#[derive(Debug, Default)]
pub struct NoopProgressSink;
impl ProgressSink for NoopProgressSink {
    fn on_progress(&self, _uri: &str, _downloaded: u64, _total: Option<u64>) {}
}

/// Fetches the raw bytes of a recipe document for an identifier. Cloud
/// transport is an external collaborator (§1); this trait is the seam.
#[async_trait]
pub trait RecipeFetcher: Send + Sync {
    async fn fetch_recipe_bytes(&self, identifier: &ComponentIdentifier) -> Result<Vec<u8>, StoreError>;
}

/// Retry budget for retryable artifact-fetch errors (§4.2).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Content-addressed recipe + artifact cache with integrity verification
/// (§4.2). Entries are immutable after a successful write; at most one
/// concurrent preparation runs per identifier.
pub struct ArtifactStore {
    layout: StoreLayout,
    recipe_fetcher: Arc<dyn RecipeFetcher>,
    http: reqwest::Client,
    retry_policy: RetryPolicy,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtifactStore {
    pub fn new(layout: StoreLayout, recipe_fetcher: Arc<dyn RecipeFetcher>) -> Self {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .expect("reqwest client configuration is static and known valid");
        ArtifactStore {
            layout,
            recipe_fetcher,
            http,
            retry_policy: RetryPolicy::default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Fetches and caches the recipe document for `identifier`, returning
    /// its on-disk path. A cached recipe is never re-fetched (immutable
    /// after write).
    pub async fn fetch(&self, identifier: &ComponentIdentifier) -> Result<PathBuf, StoreError> {
        let key = format!("recipe:{identifier}");
        let guard = self.lock_for(&key).await;
        let _permit = guard.lock().await;

        let path = self.layout.recipe_path(identifier);
        if path.exists() {
            return Ok(path);
        }
        let bytes = self.recipe_fetcher.fetch_recipe_bytes(identifier).await?;
        write_atomic(&path, &bytes).await?;
        Ok(path)
    }

    /// Downloads, verifies, and caches every artifact in `artifacts`,
    /// returning their resolved on-disk paths in the same order. At most
    /// one preparation runs per identifier concurrently.
    pub async fn prepare(
        &self,
        identifier: &ComponentIdentifier,
        artifacts: &[ArtifactSpec],
        progress: &dyn ProgressSink,
    ) -> Result<Vec<PathBuf>, StoreError> {
        let key = format!("artifacts:{identifier}");
        let guard = self.lock_for(&key).await;
        let _permit = guard.lock().await;

        let dir = self.layout.artifact_dir(identifier);
        tokio::fs::create_dir_all(&dir).await?;

        let mut resolved = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let file_name = artifact_file_name(&artifact.uri);
            let dest = dir.join(&file_name);

            if dest.exists() && self.verify(&dest, &artifact.digest).await.is_ok() {
                resolved.push(dest);
                continue;
            }

            let part_path = dest.with_extension(format!(
                "{}.part",
                dest.extension().and_then(|e| e.to_str()).unwrap_or("bin")
            ));
            self.download_with_retry(&artifact.uri, &part_path, progress).await?;
            self.verify(&part_path, &artifact.digest).await.map_err(|_| {
                StoreError::DigestMismatch {
                    path: part_path.display().to_string(),
                    expected: artifact.digest.clone(),
                    actual: "mismatch".to_string(),
                }
            })?;
            tokio::fs::rename(&part_path, &dest).await?;

            if let Some(mode) = artifact.permissions {
                set_permissions(&dest, mode)?;
            }
            resolved.push(dest);
        }
        Ok(resolved)
    }

    /// Verifies a file's SHA-256 digest against the recipe-declared value.
    /// `digest` may carry a `sha256:` prefix; bare hex is also accepted.
    pub async fn verify(&self, path: &std::path::Path, digest: &str) -> Result<(), StoreError> {
        let bytes = tokio::fs::read(path).await?;
        let actual = format!("{:x}", Sha256::digest(&bytes));
        let expected = digest.strip_prefix("sha256:").unwrap_or(digest);
        if actual.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(StoreError::DigestMismatch {
                path: path.display().to_string(),
                expected: expected.to_string(),
                actual,
            })
        }
    }

    /// Removes a cached recipe and its artifacts.
    pub async fn evict(&self, identifier: &ComponentIdentifier) -> Result<(), StoreError> {
        let recipe_path = self.layout.recipe_path(identifier);
        let _ = tokio::fs::remove_file(&recipe_path).await;
        let artifact_dir = self.layout.artifact_dir(identifier);
        let _ = tokio::fs::remove_dir_all(&artifact_dir).await;
        Ok(())
    }

    async fn download_with_retry(
        &self,
        uri: &str,
        dest: &std::path::Path,
        progress: &dyn ProgressSink,
    ) -> Result<(), StoreError> {
        let mut attempt = 0;
        loop {
            match self.try_download_once(uri, dest, progress).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.retry_policy.max_attempts => {
                    attempt += 1;
                    let delay = self.backoff_delay(attempt);
                    warn!(uri, attempt, ?delay, "retrying artifact download");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(dest).await;
                    return Err(e);
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.retry_policy.base_delay.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(self.retry_policy.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4 + 1);
        capped + Duration::from_millis(jitter_ms)
    }

    async fn try_download_once(
        &self,
        uri: &str,
        dest: &std::path::Path,
        progress: &dyn ProgressSink,
    ) -> Result<(), StoreError> {
        if let Some(local_path) = uri.strip_prefix("file://") {
            tokio::fs::copy(local_path, dest).await?;
            progress.on_progress(uri, tokio::fs::metadata(dest).await?.len(), None);
            return Ok(());
        }

        let response = self.http.get(uri).send().await.map_err(|e| StoreError::ArtifactFetchFailed {
            source: uri.to_string(),
            retryable: e.is_timeout() || e.is_connect(),
        })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 || status.as_u16() == 404 {
            return Err(StoreError::ArtifactFetchFailed {
                source: uri.to_string(),
                retryable: false,
            });
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(StoreError::ArtifactFetchFailed {
                source: uri.to_string(),
                retryable: true,
            });
        }
        if !status.is_success() {
            return Err(StoreError::ArtifactFetchFailed {
                source: uri.to_string(),
                retryable: false,
            });
        }

        let total = response.content_length();
        let bytes = response.bytes().await.map_err(|_| StoreError::ArtifactFetchFailed {
            source: uri.to_string(),
            retryable: true,
        })?;
        progress.on_progress(uri, bytes.len() as u64, total);
        write_atomic(dest, &bytes).await?;
        Ok(())
    }
}

fn artifact_file_name(uri: &str) -> String {
    uri.rsplit('/').next().unwrap_or("artifact").to_string()
}

#[cfg(unix)]
fn set_permissions(path: &std::path::Path, mode: u32) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_permissions(_path: &std::path::Path, _mode: u32) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StaticFetcher(Vec<u8>);

    #[async_trait]
    impl RecipeFetcher for StaticFetcher {
        async fn fetch_recipe_bytes(&self, _identifier: &ComponentIdentifier) -> Result<Vec<u8>, StoreError> {
            Ok(self.0.clone())
        }
    }

    fn identifier() -> ComponentIdentifier {
        ComponentIdentifier::new(
            nucleus_domain::ComponentName::new("SomeService").unwrap(),
            semver::Version::parse("1.0.0").unwrap(),
        )
    }

    #[tokio::test]
    async fn fetch_caches_recipe_and_does_not_refetch() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        let store = ArtifactStore::new(layout, Arc::new(StaticFetcher(b"recipe body".to_vec())));
        let id = identifier();
        let path = store.fetch(&id).await.unwrap();
        assert!(path.exists());
        // Second fetch must hit the cache, not the fetcher again (no
        // assertion possible on "not called" without a spy, but the path
        // returned must be identical and the file must still match).
        let path2 = store.fetch(&id).await.unwrap();
        assert_eq!(path, path2);
    }

    #[tokio::test]
    async fn verify_detects_digest_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        let store = ArtifactStore::new(layout, Arc::new(StaticFetcher(vec![])));
        let file = dir.path().join("artifact.bin");
        tokio::fs::write(&file, b"hello").await.unwrap();
        let digest = format!("{:x}", Sha256::digest(b"hello"));
        store.verify(&file, &digest).await.unwrap();
        assert!(store.verify(&file, "deadbeef").await.is_err());
    }

    #[tokio::test]
    async fn prepare_downloads_local_file_artifact() {
        let src_dir = tempfile::tempdir().unwrap();
        let src_path = src_dir.path().join("run.sh");
        tokio::fs::write(&src_path, b"#!/bin/sh\necho hi\n").await.unwrap();
        let digest = format!("{:x}", Sha256::digest(b"#!/bin/sh\necho hi\n"));

        let store_dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(store_dir.path());
        let store = ArtifactStore::new(layout, Arc::new(StaticFetcher(vec![])));

        let spec = ArtifactSpec {
            uri: format!("file://{}", src_path.display()),
            digest,
            unarchive: None,
            permissions: Some(0o755),
        };
        let resolved = store
            .prepare(&identifier(), &[spec], &NoopProgressSink)
            .await
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].exists());
    }
}
