use super::*;
use crate::media::reader::ReaderOptions;
use crate::testutil::{gradient_frame, temp_dir, write_y4m, y444_payload};

#[test]
fn slot_capacity_evicts_least_recently_used() {
    let store = FrameStore::new(CacheCapacity::Slots(2));
    store.put(FrameIndex(0), gradient_frame(0, 4, 4));
    store.put(FrameIndex(1), gradient_frame(1, 4, 4));
    // Touch 0 so 1 becomes the eviction candidate.
    assert!(store.get(FrameIndex(0)).is_some());
    store.put(FrameIndex(2), gradient_frame(2, 4, 4));

    assert!(store.contains(FrameIndex(0)));
    assert!(!store.contains(FrameIndex(1)));
    assert!(store.contains(FrameIndex(2)));
    let stats = store.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.len, 2);
}

#[test]
fn byte_capacity_counts_frame_bytes() {
    let one = gradient_frame(0, 4, 4).byte_size();
    let store = FrameStore::new(CacheCapacity::Bytes(one * 2));
    for i in 0..4 {
        store.put(FrameIndex(i), gradient_frame(i, 4, 4));
    }
    let stats = store.stats();
    assert_eq!(stats.len, 2);
    assert_eq!(stats.bytes, one * 2);
    assert!(store.contains(FrameIndex(3)));
}

#[test]
fn oversized_frame_is_still_kept() {
    let store = FrameStore::new(CacheCapacity::Bytes(1));
    store.put(FrameIndex(7), gradient_frame(7, 4, 4));
    assert!(store.get(FrameIndex(7)).is_some());
}

#[test]
fn held_references_survive_eviction() {
    let store = FrameStore::new(CacheCapacity::Slots(1));
    store.put(FrameIndex(0), gradient_frame(0, 4, 4));
    let held = store.get(FrameIndex(0)).unwrap();
    store.put(FrameIndex(1), gradient_frame(1, 4, 4));
    assert!(!store.contains(FrameIndex(0)));
    assert_eq!(*held, gradient_frame(0, 4, 4));
}

#[test]
fn replacing_an_entry_keeps_counts_consistent() {
    let store = FrameStore::new(CacheCapacity::Slots(4));
    store.put(FrameIndex(3), gradient_frame(3, 4, 4));
    store.put(FrameIndex(3), gradient_frame(3, 8, 8));
    let stats = store.stats();
    assert_eq!(stats.len, 1);
    assert_eq!(stats.bytes, gradient_frame(3, 8, 8).byte_size());
    store.clear();
    assert_eq!(store.stats().len, 0);
    assert_eq!(store.stats().bytes, 0);
}

#[test]
fn hit_and_miss_counters() {
    let store = FrameStore::new(CacheCapacity::default());
    assert!(store.get(FrameIndex(0)).is_none());
    store.put(FrameIndex(0), gradient_frame(0, 2, 2));
    assert!(store.get(FrameIndex(0)).is_some());
    let stats = store.stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[test]
fn concurrent_puts_and_gets() {
    let store = Arc::new(FrameStore::new(CacheCapacity::Slots(32)));
    std::thread::scope(|s| {
        for t in 0..4u64 {
            let store = store.clone();
            s.spawn(move || {
                for i in 0..50u64 {
                    let idx = FrameIndex(t * 100 + i);
                    store.put(idx, gradient_frame(idx.0, 2, 2));
                    let _ = store.get(idx);
                }
            });
        }
    });
    let stats = store.stats();
    assert_eq!(stats.len, 32);
    assert_eq!(stats.evictions, 200 - 32);
}

fn y4m_reader(name: &str, frames: u32) -> SourceReader {
    let path = temp_dir(name).join("s.y4m");
    let payloads: Vec<Vec<u8>> = (0..frames).map(|i| y444_payload(4, 4, i)).collect();
    write_y4m(&path, "YUV4MPEG2 W4 H4 F25:1 Ip C444", &payloads);
    SourceReader::open(&path, &ReaderOptions::default()).unwrap()
}

#[test]
fn miss_decodes_and_evicted_frame_redecodes_identically() {
    let mut reader = y4m_reader("store_decode", 4);
    let store = FrameStore::new(CacheCapacity::Slots(1));
    let first = store.get_or_decode(FrameIndex(2), &mut reader).unwrap();
    store.get_or_decode(FrameIndex(0), &mut reader).unwrap();
    assert!(!store.contains(FrameIndex(2)));
    let again = store.get_or_decode(FrameIndex(2), &mut reader).unwrap();
    assert_eq!(*first, *again);

    let err = store.get_or_decode(FrameIndex(9), &mut reader).unwrap_err();
    assert!(err.to_string().contains("frame 9"));
}

#[test]
fn fill_ahead_prefetches_range() {
    let reader = y4m_reader("store_fill", 6);
    let store = Arc::new(FrameStore::new(CacheCapacity::Slots(8)));
    let handle = spawn_fill_ahead(
        store.clone(),
        reader,
        FrameRange::from_bounds(1, 5).unwrap(),
        CancelToken::new(),
    );
    let reader = handle.join().unwrap().unwrap();
    assert_eq!(reader.frame_count(), 6);
    assert!(!store.contains(FrameIndex(0)));
    for i in 1..5 {
        assert!(store.contains(FrameIndex(i)));
    }
    assert!(!store.contains(FrameIndex(5)));
}

#[test]
fn cancelled_fill_ahead_inserts_nothing() {
    let reader = y4m_reader("store_cancel", 3);
    let store = Arc::new(FrameStore::new(CacheCapacity::Slots(8)));
    let cancel = CancelToken::new();
    cancel.cancel();
    spawn_fill_ahead(
        store.clone(),
        reader,
        FrameRange::from_bounds(0, 3).unwrap(),
        cancel,
    )
    .join()
    .unwrap()
    .unwrap();
    assert_eq!(store.stats().len, 0);
}
