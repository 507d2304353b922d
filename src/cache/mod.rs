//! Named response stores for offline support.
//!
//! This module provides the storage side of the interceptor:
//! - Any number of named stores ("generations") in one backend
//! - Request keys built from the GET URL
//! - Background writes that never block or fail a response
//! - Cross-store lookup for offline fallbacks, newest store first

mod layer;
mod storage;
mod traits;

pub use layer::{Cache, CacheLayer};
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{CachedResponse, RequestKey, Served};
#[cfg(test)]
pub use traits::ResponseSource;
