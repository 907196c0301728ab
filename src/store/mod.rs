//! Decoded frame cache shared by pipeline stages.

/// Sharded LRU frame cache.
pub mod frame_store;

pub use frame_store::{CacheCapacity, FrameStore, StoreStats, spawn_fill_ahead};
