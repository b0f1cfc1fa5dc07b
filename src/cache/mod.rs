//! Two cache tiers keyed by the same content signature: a bounded in-memory
//! LRU and a directory of re-encoded JPEGs.

mod disk;
pub mod error;
mod key;
mod memory;

pub use disk::{DiskCache, DiskCacheStats, DISK_JPEG_QUALITY};
pub use error::{CacheError, CacheErrorCode, CacheResult};
pub use key::CacheKey;
pub use memory::{MemoryCache, MemoryCacheStats, DEFAULT_MEM_CAPACITY};
