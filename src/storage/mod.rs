pub mod memory;

pub use memory::{MemoryConnection, MemoryDatabase, MemoryStore, Record};
