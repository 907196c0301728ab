use crate::foundation::core::{FrameIndex, FrameRange};
use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::media::frame::Frame;
use crate::media::reader::SourceReader;
use crate::session::cancel::CancelToken;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

const SHARDS: usize = 16;

/// Upper bound on what a [`FrameStore`] retains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCapacity {
    /// Maximum number of frames.
    Slots(usize),
    /// Maximum total frame bytes (pixels plus native payload).
    Bytes(usize),
}

impl Default for CacheCapacity {
    fn default() -> Self {
        Self::Slots(64)
    }
}

/// Hit/miss counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries removed to make room.
    pub evictions: u64,
    /// Frames currently held.
    pub len: usize,
    /// Bytes currently held.
    pub bytes: usize,
}

struct Entry {
    frame: Arc<Frame>,
    last_access: u64,
    bytes: usize,
}

/// Concurrent LRU cache of decoded frames keyed by frame index.
///
/// Lookups for different indices lock different shards. Frames are handed out as `Arc<Frame>`, so
/// evicting an entry never invalidates a reference a consumer still holds; an evicted frame is
/// simply decoded again on the next miss.
pub struct FrameStore {
    shards: Vec<Mutex<HashMap<u64, Entry>>>,
    capacity: CacheCapacity,
    tick: AtomicU64,
    len: AtomicUsize,
    bytes: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    evict_lock: Mutex<()>,
}

impl FrameStore {
    /// Create an empty store.
    pub fn new(capacity: CacheCapacity) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            capacity,
            tick: AtomicU64::new(0),
            len: AtomicUsize::new(0),
            bytes: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            evict_lock: Mutex::new(()),
        }
    }

    fn shard(&self, index: u64) -> &Mutex<HashMap<u64, Entry>> {
        &self.shards[(index % SHARDS as u64) as usize]
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Cached frame at `index`, refreshing its recency.
    pub fn get(&self, index: FrameIndex) -> Option<Arc<Frame>> {
        let tick = self.next_tick();
        let mut shard = self.shard(index.0).lock();
        match shard.get_mut(&index.0) {
            Some(entry) => {
                entry.last_access = tick;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.frame.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace the frame at `index`, evicting least-recently-used entries as needed.
    pub fn put(&self, index: FrameIndex, frame: impl Into<Arc<Frame>>) -> Arc<Frame> {
        let frame = frame.into();
        let bytes = frame.byte_size();
        let tick = self.next_tick();
        let previous = self.shard(index.0).lock().insert(
            index.0,
            Entry {
                frame: frame.clone(),
                last_access: tick,
                bytes,
            },
        );
        match previous {
            Some(old) => {
                self.bytes.fetch_sub(old.bytes, Ordering::Relaxed);
            }
            None => {
                self.len.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.evict_to_capacity();
        frame
    }

    fn over_capacity(&self) -> bool {
        match self.capacity {
            CacheCapacity::Slots(n) => self.len.load(Ordering::Relaxed) > n,
            CacheCapacity::Bytes(n) => self.bytes.load(Ordering::Relaxed) > n,
        }
    }

    /// Return `true` when one more entry of `bytes` would force an eviction.
    pub fn is_full_for(&self, bytes: usize) -> bool {
        match self.capacity {
            CacheCapacity::Slots(n) => self.len.load(Ordering::Relaxed) >= n,
            CacheCapacity::Bytes(n) => self.bytes.load(Ordering::Relaxed) + bytes > n,
        }
    }

    fn evict_to_capacity(&self) {
        let _guard = self.evict_lock.lock();
        // The newest entry always stays, even when it alone exceeds the budget.
        while self.over_capacity() && self.len.load(Ordering::Relaxed) > 1 {
            let victim = self
                .shards
                .iter()
                .enumerate()
                .filter_map(|(s, shard)| {
                    shard
                        .lock()
                        .iter()
                        .min_by_key(|(_, e)| e.last_access)
                        .map(|(k, e)| (e.last_access, s, *k))
                })
                .min();
            let Some((_, s, key)) = victim else { break };
            if let Some(old) = self.shards[s].lock().remove(&key) {
                self.len.fetch_sub(1, Ordering::Relaxed);
                self.bytes.fetch_sub(old.bytes, Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Cached frame at `index`, decoding it through `reader` on a miss.
    pub fn get_or_decode(
        &self,
        index: FrameIndex,
        reader: &mut SourceReader,
    ) -> MaskfxResult<Arc<Frame>> {
        if let Some(frame) = self.get(index) {
            return Ok(frame);
        }
        let frame = reader.read_frame(index)?.ok_or_else(|| {
            MaskfxError::decode(format!(
                "frame {} is past the end of the source ({} frames)",
                index.0,
                reader.frame_count()
            ))
        })?;
        Ok(self.put(index, frame))
    }

    /// Return `true` when `index` is cached, without touching recency or counters.
    pub fn contains(&self, index: FrameIndex) -> bool {
        self.shard(index.0).lock().contains_key(&index.0)
    }

    /// Counters and occupancy.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            len: self.len.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }

    /// Drop every cached frame.
    pub fn clear(&self) {
        let _guard = self.evict_lock.lock();
        for shard in &self.shards {
            let mut shard = shard.lock();
            for (_, e) in shard.drain() {
                self.len.fetch_sub(1, Ordering::Relaxed);
                self.bytes.fetch_sub(e.bytes, Ordering::Relaxed);
            }
        }
    }
}

/// Decode `range` on a background thread, inserting frames ahead of consumers.
///
/// Filling stops at the end of the range, on cancellation, or once the store is full so
/// prefetched frames do not evict each other. The reader is handed back when the thread ends.
pub fn spawn_fill_ahead(
    store: Arc<FrameStore>,
    mut reader: SourceReader,
    range: FrameRange,
    cancel: CancelToken,
) -> std::thread::JoinHandle<MaskfxResult<SourceReader>> {
    std::thread::spawn(move || {
        let mut filled = 0u64;
        for index in range.iter() {
            if cancel.is_cancelled() {
                break;
            }
            if store.contains(index) {
                continue;
            }
            let Some(frame) = reader.read_frame(index)? else {
                break;
            };
            if store.is_full_for(frame.byte_size()) {
                break;
            }
            store.put(index, frame);
            filled += 1;
        }
        tracing::debug!(filled, start = range.start.0, end = range.end.0, "fill-ahead done");
        Ok(reader)
    })
}

#[cfg(test)]
#[path = "../../tests/unit/store/frame_store.rs"]
mod tests;
