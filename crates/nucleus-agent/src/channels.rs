use async_trait::async_trait;
use nucleus_domain::ComponentIdentifier;
use nucleus_store::{RecipeFetcher, StoreError};
use nucleus_supervisor::{AgentError, CloudChannel};
use tracing::warn;

/// Pulls an uncached recipe document over HTTP from the configured base URL.
/// The production-shaped counterpart to `CachedRecipeSource`'s on-disk read
/// path (§1's cloud transport collaborator, §4.2).
pub struct HttpRecipeFetcher {
    base_url: String,
    http: reqwest::Client,
}

impl HttpRecipeFetcher {
    pub fn new(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .expect("reqwest client configuration is static and known valid");
        HttpRecipeFetcher { base_url, http }
    }
}

#[async_trait]
impl RecipeFetcher for HttpRecipeFetcher {
    async fn fetch_recipe_bytes(&self, identifier: &ComponentIdentifier) -> Result<Vec<u8>, StoreError> {
        let url = format!("{}/recipes/{}/{}.yaml", self.base_url, identifier.name, identifier.version);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::ArtifactFetchFailed {
                source: e.to_string(),
                retryable: true,
            })?;
        if !response.status().is_success() {
            return Err(StoreError::RecipeNotFound(identifier.to_string()));
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| StoreError::ArtifactFetchFailed {
                source: e.to_string(),
                retryable: true,
            })
    }
}

/// Reports status documents and structured errors (§4.8, §7) to the cloud
/// control plane over HTTP. Falls back to `LoggingCloudChannel` when no
/// `cloud_base_url` is configured (see `main::build_cloud_channel`).
pub struct HttpCloudChannel {
    base_url: String,
    http: reqwest::Client,
}

impl HttpCloudChannel {
    pub fn new(base_url: String) -> Self {
        HttpCloudChannel {
            base_url,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CloudChannel for HttpCloudChannel {
    async fn report_status(&self, document: serde_json::Value) -> Result<(), AgentError> {
        let url = format!("{}/status", self.base_url);
        if let Err(e) = self.http.post(&url).json(&document).send().await {
            warn!(error = %e, "failed to report status document to cloud");
        }
        Ok(())
    }

    async fn report_error(&self, code: String, message: String) -> Result<(), AgentError> {
        let url = format!("{}/errors", self.base_url);
        let body = serde_json::json!({ "code": code, "message": message });
        if let Err(e) = self.http.post(&url).json(&body).send().await {
            warn!(error = %e, "failed to report error to cloud");
        }
        Ok(())
    }
}
