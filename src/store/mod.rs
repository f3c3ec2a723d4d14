//! Local persistence: the in-memory dataset cache and the native key/value store.

mod cache;
mod native;

pub use cache::LocalCache;
pub use native::{KeyValueStore, SqliteStore};
