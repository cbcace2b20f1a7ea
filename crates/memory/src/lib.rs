pub mod store;
pub mod types;

pub use store::{FileMemoryStore, MemoryStore};
pub use types::{Memory, MemoryError};
