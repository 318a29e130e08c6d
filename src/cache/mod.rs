//! Versioned response cache.
//!
//! Responses are grouped into named generations. Only the current generation
//! is ever read or written by the router; every other generation is dropped
//! when a new worker version activates.

mod layer;
mod storage;
mod traits;

pub use layer::{CacheHandle, Caches};
pub use storage::SqliteCacheStore;
pub use traits::{CacheResult, CacheSource, CacheStore, CachedResponse, StoreFuture};
