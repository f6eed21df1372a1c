use nucleus_domain::ComponentName;
use thiserror::Error;

use crate::resolver::ConstraintEntry;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("no version of '{name}' satisfies every active constraint: {constraints:?}")]
    Conflict {
        name: ComponentName,
        constraints: Vec<ConstraintEntry>,
    },

    #[error("multiple distinct nucleus components resolved: {names:?}")]
    MultipleNucleusResolved { names: Vec<ComponentName> },

    #[error("no recipe found for {0}")]
    RecipeNotFound(String),

    #[error("dependency graph contains a cycle")]
    Cycle,
}

impl GraphError {
    pub fn code(&self) -> &'static str {
        match self {
            GraphError::Conflict { .. } => "DEPLOYMENT_FAILURE.COMPONENT_VERSION_CONFLICT",
            GraphError::MultipleNucleusResolved { .. } => {
                "DEPLOYMENT_FAILURE.COMPONENT_VERSION_CONFLICT.MULTIPLE_NUCLEUS_RESOLVED"
            }
            GraphError::RecipeNotFound(_) => "DEPLOYMENT_FAILURE.RECIPE_PARSE_ERROR.NOT_FOUND",
            GraphError::Cycle => "DEPLOYMENT_FAILURE.PLAN_CYCLE",
        }
    }
}
