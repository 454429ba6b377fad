use serde::{Deserialize, Serialize};

pub mod actor;
pub mod dispatcher;
pub mod index;
pub mod pruner;
pub mod watcher;

/// Iteration order for gas-price sorted listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}
