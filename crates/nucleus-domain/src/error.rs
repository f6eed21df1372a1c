use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid component name: {0}")]
    InvalidComponentName(String),

    #[error("invalid version range '{0}': {1}")]
    InvalidVersionRange(String, String),

    #[error("invalid semver '{0}': {1}")]
    InvalidVersion(String, String),
}

impl DomainError {
    /// Structured error-code path used for cloud reporting (§7).
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::InvalidComponentName(_) => "DEPLOYMENT_FAILURE.RECIPE_PARSE_ERROR.INVALID_COMPONENT_NAME",
            DomainError::InvalidVersionRange(..) => "DEPLOYMENT_FAILURE.RECIPE_PARSE_ERROR.INVALID_VERSION_RANGE",
            DomainError::InvalidVersion(..) => "DEPLOYMENT_FAILURE.RECIPE_PARSE_ERROR.INVALID_VERSION",
        }
    }
}
