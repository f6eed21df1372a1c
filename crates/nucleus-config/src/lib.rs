pub mod error;
pub mod recipe_parser;
pub mod store;
pub mod tree;

pub use error::ConfigError;
pub use recipe_parser::parse_recipe;
pub use store::{ConfigStore, Snapshot, SubscriptionId};
pub use tree::{ConfigNotification, NotificationKind, Path};
