//! Off-chain todo model and store collaborators.

/// Store trait and its HTTP and in-memory implementations
pub mod store;
/// Todo, sync target and patch types
pub mod types;

pub use store::{HttpTodoStore, InMemoryTodoStore, StoreError, TodoStore};
pub use types::*;
