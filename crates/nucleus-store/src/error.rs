use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact fetch failed for {source}")]
    ArtifactFetchFailed { source: String, retryable: bool },

    #[error("digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("recipe not found for {0}")]
    RecipeNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("recipe parse error: {0}")]
    RecipeParse(#[from] nucleus_config::ConfigError),
}

impl StoreError {
    pub fn code(&self) -> String {
        match self {
            StoreError::ArtifactFetchFailed { .. } => {
                "DEPLOYMENT_FAILURE.ARTIFACT_FETCH_FAILED".to_string()
            }
            StoreError::DigestMismatch { .. } => {
                "DEPLOYMENT_FAILURE.ARTIFACT_DIGEST_MISMATCH".to_string()
            }
            StoreError::RecipeNotFound(_) => {
                "DEPLOYMENT_FAILURE.RECIPE_PARSE_ERROR.NOT_FOUND".to_string()
            }
            StoreError::Io(_) => "DEPLOYMENT_FAILURE.ARTIFACT_FETCH_FAILED.IO".to_string(),
            StoreError::RecipeParse(e) => e.code().to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::ArtifactFetchFailed { retryable: true, .. })
    }
}
