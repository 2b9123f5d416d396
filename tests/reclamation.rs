use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use paintfe_tiles::geometry::TileCoord;
use paintfe_tiles::tiles::{Qsbr, ReaderContext, Tile, TileStore};

/// Counts live instances so tests can see when retired tiles are dropped.
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn retired_objects_wait_for_every_reader() {
    let qsbr = Arc::new(Qsbr::new());
    let readers: Vec<_> = (0..3).map(|_| ReaderContext::new(qsbr.clone())).collect();
    let dropped = Arc::new(AtomicUsize::new(0));
    let guard = DropCounter(dropped.clone());
    qsbr.enqueue(move || drop(guard));

    // Two full intervals with one reader lagging each time.
    for r in &readers[..2] {
        r.quiescent();
    }
    assert_eq!(dropped.load(Ordering::SeqCst), 0);
    readers[2].quiescent();
    for r in &readers {
        r.quiescent();
    }
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
}

#[test_log::test]
fn concurrent_readers_and_writers_stay_consistent() {
    const READERS: usize = 6;
    const WRITERS: i32 = 3;
    const ITERATIONS: usize = 3_000;
    const COLS_PER_WRITER: i32 = 4;

    let store = Arc::new(TileStore::with_shards(&[0, 0, 0, 0], 4).unwrap());
    let stop = Arc::new(AtomicBool::new(false));
    let torn = Arc::new(AtomicUsize::new(0));
    let reads = Arc::new(AtomicUsize::new(0));

    let readers: Vec<_> = (0..READERS)
        .map(|i| {
            let store = store.clone();
            let stop = stop.clone();
            let torn = torn.clone();
            let reads = reads.clone();
            thread::spawn(move || {
                let ctx = store.register_reader();
                let mut n = i as i32;
                while !stop.load(Ordering::Acquire) {
                    n = (n + 7) % (WRITERS * COLS_PER_WRITER);
                    let tile = store.tile_at(TileCoord::new(n, 0));
                    if i % 2 == 0 {
                        thread::sleep(Duration::from_micros(50));
                    }
                    let first = tile.data()[0];
                    if tile.data().iter().any(|&b| b != first) {
                        torn.fetch_add(1, Ordering::Relaxed);
                    }
                    reads.fetch_add(1, Ordering::Relaxed);
                    drop(tile);
                    ctx.quiescent();
                }
            })
        })
        .collect();

    let writers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let store = store.clone();
            thread::spawn(move || {
                for n in 0..ITERATIONS {
                    let coord = TileCoord::new(w * COLS_PER_WRITER + (n as i32 % COLS_PER_WRITER), 0);
                    match n % 3 {
                        0 => store.set_tile(coord, Tile::filled(coord, &[n as u8; 4]).unwrap()).unwrap(),
                        1 => {
                            let cell = store.ensure_writable_tile_at(coord).unwrap();
                            let mut tile = cell.lock();
                            tile.writable_view().unwrap().fill(n as u8);
                        }
                        _ => {
                            store.remove_tile(coord);
                        }
                    }
                }
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    stop.store(true, Ordering::Release);
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(torn.load(Ordering::Relaxed), 0);
    assert!(reads.load(Ordering::Relaxed) > 0);
    // All readers are gone, so nothing can still be waiting.
    assert_eq!(store.pending_reclamations(), 0);
}

#[test]
fn store_drop_releases_retired_tiles() {
    let store = TileStore::new(&[0]).unwrap();
    let reader = store.register_reader();
    for col in 0..10 {
        let c = TileCoord::new(col, 0);
        store.ensure_writable_tile_at(c).unwrap();
        store.remove_tile(c);
    }
    assert_eq!(store.pending_reclamations(), 10);
    reader.quiescent();
    assert_eq!(store.pending_reclamations(), 10);
    reader.quiescent();
    assert_eq!(store.pending_reclamations(), 0);
    drop(reader);
    drop(store);
}
