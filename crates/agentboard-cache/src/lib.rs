pub mod backend;
pub mod key;
pub mod memory;
pub mod redis_backend;
pub mod service;

pub use backend::{BackendStats, CacheBackend, CacheEntry};
pub use key::{namespace_of, CacheKey};
pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;
pub use service::{CacheObserver, CacheOutcome, CacheStats, DocumentCache};
