//! Provides a size constrained LRU Cache.
//!
//! An LRU cache drops the least recently used entry if it about to grow beyond the given memory
//! limit. The memory of an entry is accounted as the length of its key plus the size of its value
//! as reported by the [ByteSize](ByteSize) trait.
//!
//! The [LRUCache](LRUCache) itself is a plain single threaded data structure. The
//! [cache](cache) module wraps it into a [SharedCache](cache::SharedCache) which is safe to be
//! used by many tasks at once and which is what each [Group](crate::group::Group) uses as its
//! main cache.
pub mod cache;
mod lru_cache;

pub use lru_cache::ByteSize;
pub use lru_cache::EvictionCallback;
pub use lru_cache::LRUCache;
