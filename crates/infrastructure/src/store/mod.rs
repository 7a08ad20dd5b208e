pub mod keys;
pub mod kv;
pub mod memory;
pub mod sqlite;

pub use kv::{KvBatch, KvStore, get_json, put_json};
pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;
