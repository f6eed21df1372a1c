use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no node at path '{0}'")]
    NotFound(String),

    #[error("path '{0}' traverses through a leaf")]
    NotAContainer(String),

    #[error("path '{0}' already exists")]
    AlreadyExists(String),

    #[error("cannot remove the root node")]
    CannotRemoveRoot,

    #[error("store actor is no longer running")]
    StoreShutDown,

    #[error("recipe YAML/JSON parse error: {0}")]
    RecipeParse(String),

    #[error("invalid recipe: {0}")]
    InvalidRecipe(String),

    #[error(transparent)]
    Domain(#[from] nucleus_domain::DomainError),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::NotFound(_) => "CONFIG_WRITE_REJECTED.NOT_FOUND",
            ConfigError::NotAContainer(_) => "CONFIG_WRITE_REJECTED.NOT_A_CONTAINER",
            ConfigError::AlreadyExists(_) => "CONFIG_WRITE_REJECTED.ALREADY_EXISTS",
            ConfigError::CannotRemoveRoot => "CONFIG_WRITE_REJECTED.CANNOT_REMOVE_ROOT",
            ConfigError::StoreShutDown => "CONFIG_WRITE_REJECTED.STORE_SHUT_DOWN",
            ConfigError::RecipeParse(_) => "DEPLOYMENT_FAILURE.RECIPE_PARSE_ERROR.MALFORMED",
            ConfigError::InvalidRecipe(_) => "DEPLOYMENT_FAILURE.RECIPE_PARSE_ERROR.INVALID_RECIPE",
            ConfigError::Domain(_) => "DEPLOYMENT_FAILURE.RECIPE_PARSE_ERROR.INVALID_RECIPE",
        }
    }
}
