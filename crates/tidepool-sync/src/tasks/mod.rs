mod engine;
mod store;

pub use engine::{LoadStatus, TaskEngine, TaskError, TaskOp, TaskSnapshot};
pub use store::{InMemoryTaskStore, JsonFileTaskStore, TaskStore};
