pub mod backend;
pub mod cache;
pub mod memory;
pub mod pattern;
pub mod remote;
pub mod stats;
pub mod traits;

pub use backend::BackendAdapter;
pub use cache::{CacheLookup, CacheSettings, CachedNews, LookupOutcome, NewsCache};
pub use memory::MemoryBackend;
pub use remote::RedisBackend;
pub use stats::{CacheCounters, CacheStats};
pub use traits::{
    BackendHealth, BackendInfo, BackendKeyMetadata, BackendKind, CacheBackend, HealthStatus,
    KeyScan,
};
