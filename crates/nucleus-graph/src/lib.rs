pub mod dag;
pub mod error;
pub mod resolver;

pub use dag::topological_order;
pub use error::GraphError;
pub use resolver::{resolve, ConstraintEntry, RecipeSource};
