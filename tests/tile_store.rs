use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use paintfe_tiles::geometry::{Rect, TILE_SIZE, TileCoord};
use paintfe_tiles::tiles::{MemorySwapper, Tile, TileData, TileStore, TileSwapper};
use paintfe_tiles::{ChannelLayout, PaintDevice, TileError};

#[test]
fn negative_coordinates_are_ordinary_tiles() {
    let dev = PaintDevice::new(ChannelLayout::rgba8(), &[0; 4]).unwrap();
    dev.set_pixel(-1, -1, &[1, 2, 3, 4]).unwrap();
    dev.set_pixel(-TILE_SIZE, -TILE_SIZE, &[5, 6, 7, 8]).unwrap();
    assert_eq!(dev.tile_count(), 1);
    assert!(dev.store().contains(TileCoord::new(-1, -1)));
    assert_eq!(dev.pixel(-1, -1), [1u8, 2, 3, 4]);
    assert_eq!(dev.pixel(-64, -64), [5u8, 6, 7, 8]);
    assert_eq!(dev.extent(), Rect::new(-64, -64, 64, 64));
}

#[test]
fn reading_never_allocates() {
    let dev = PaintDevice::new(ChannelLayout::rgba16(), &[0; 8]).unwrap();
    let mut buf = vec![0u8; 300 * 300 * 8];
    dev.read_bytes(Rect::new(-150, -150, 300, 300), &mut buf).unwrap();
    for p in dev.rect_iter(Rect::new(0, 0, 130, 2)) {
        assert_eq!(p.pixel, [0u8; 8]);
    }
    assert_eq!(dev.tile_count(), 0);
}

#[test]
fn writing_a_shared_tile_copies_it() {
    let store = TileStore::new(&[0]).unwrap();
    let c = TileCoord::new(2, -3);
    let data = Arc::new(TileData::filled(&[7]).unwrap());
    store.set_tile(c, Tile::new(c, data.clone())).unwrap();

    let snapshot = store.tile_at(c);
    assert!(snapshot.is_shared());

    store.ensure_writable_tile_at(c).unwrap().lock().pixel_mut(0, 0)[0] = 1;
    assert_eq!(snapshot.pixel(0, 0), &[7]);
    assert_eq!(data.bytes()[0], 7);
    assert_eq!(store.tile_at(c).pixel(0, 0), &[1]);
}

#[test]
fn tile_reads_outside_the_tile_fail() {
    let tile = Tile::filled(TileCoord::new(0, 0), &[1, 2]).unwrap();
    assert!(matches!(tile.read(64, 0), Err(TileError::OutOfBounds { .. })));
    assert!(matches!(tile.read(0, -1), Err(TileError::OutOfBounds { .. })));
    assert_eq!(tile.read(63, 63).unwrap(), &[1, 2]);
}

#[test]
fn for_each_tile_visits_every_allocated_tile() {
    let store = TileStore::new(&[0]).unwrap();
    let coords = [TileCoord::new(0, 0), TileCoord::new(-3, 9), TileCoord::new(100, -100)];
    for c in coords {
        store.ensure_writable_tile_at(c).unwrap();
    }
    let mut seen = Vec::new();
    store.for_each_tile(|t| seen.push(t.coord()));
    seen.sort();
    let mut expected = coords.to_vec();
    expected.sort();
    assert_eq!(seen, expected);
}

#[test]
fn swapped_out_tiles_are_saved_with_the_device() {
    let swapper = Arc::new(MemorySwapper::new());
    let dev = PaintDevice::new(ChannelLayout::alpha8(), &[0])
        .unwrap()
        .with_swapper(swapper.clone());
    dev.set_pixel(10, 10, &[99]).unwrap();
    assert!(dev.store().evict(TileCoord::new(0, 0)).unwrap());
    assert_eq!(dev.tile_count(), 0);
    assert!(swapper.contains(TileCoord::new(0, 0)));

    let copy = dev.duplicate().unwrap();
    assert_eq!(copy.pixel(10, 10), [99u8]);
    assert_eq!(swapper.stored_coords().len(), 0);
}

#[test]
fn set_default_pixel_leaves_allocated_tiles_alone() {
    let dev = PaintDevice::new(ChannelLayout::graya8(), &[0, 0]).unwrap();
    dev.set_pixel(1, 1, &[3, 3]).unwrap();
    dev.set_default_pixel(&[9, 255]).unwrap();
    assert_eq!(dev.pixel(1, 1), [3u8, 3]);
    assert_eq!(dev.pixel(2, 2), [0u8, 0]);
    assert_eq!(dev.pixel(500, 500), [9u8, 255]);
    assert!(dev.set_default_pixel(&[1]).is_err());
}

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn unrelated_readers_do_not_wait_on_pixel_work() {
    // One shard, so every coordinate shares the same map lock.
    let store = Arc::new(TileStore::with_shards(&[0], 1).unwrap());
    let (busy, other, fresh) = (TileCoord::new(0, 0), TileCoord::new(1, 0), TileCoord::new(2, 0));
    store.ensure_writable_tile_at(busy).unwrap();
    store.ensure_writable_tile_at(other).unwrap().lock().pixel_mut(0, 0)[0] = 5;

    let cell = store.cell(busy).unwrap();
    let painting = cell.lock();

    let blocked = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.tile_at(busy).pixel(0, 0)[0])
    };
    thread::sleep(Duration::from_millis(100));

    let (tx, rx) = mpsc::channel();
    let inserter = {
        let store = Arc::clone(&store);
        let tx = tx.clone();
        thread::spawn(move || {
            store.ensure_writable_tile_at(fresh).unwrap();
            tx.send("insert").unwrap();
        })
    };
    thread::sleep(Duration::from_millis(100));
    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            assert_eq!(store.tile_at(other).pixel(0, 0), &[5]);
            tx.send("read").unwrap();
        })
    };

    let mut finished = vec![
        rx.recv_timeout(WAIT).expect("blocked behind a busy tile"),
        rx.recv_timeout(WAIT).expect("blocked behind a busy tile"),
    ];
    finished.sort();
    assert_eq!(finished, ["insert", "read"]);

    drop(painting);
    assert_eq!(blocked.join().unwrap(), 0);
    inserter.join().unwrap();
    reader.join().unwrap();
    assert_eq!(store.tile_count(), 3);
}

/// Swapper whose fetches of stored tiles wait until the test opens the gate.
struct GatedSwapper {
    inner: MemorySwapper,
    gate: Mutex<()>,
}

impl TileSwapper for GatedSwapper {
    fn fetch(&self, coord: TileCoord) -> Option<Vec<u8>> {
        if !self.inner.contains(coord) {
            return None;
        }
        let _open = self.gate.lock().unwrap();
        self.inner.fetch(coord)
    }

    fn store(&self, coord: TileCoord, bytes: &[u8]) -> paintfe_tiles::Result<()> {
        self.inner.store(coord, bytes)
    }

    fn discard(&self, coord: TileCoord) {
        self.inner.discard(coord)
    }

    fn stored_coords(&self) -> Vec<TileCoord> {
        self.inner.stored_coords()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

fn gated_store() -> (Arc<TileStore>, Arc<GatedSwapper>) {
    let swapper = Arc::new(GatedSwapper { inner: MemorySwapper::new(), gate: Mutex::new(()) });
    let store = TileStore::with_shards(&[0], 1).unwrap().with_swapper(swapper.clone());
    (Arc::new(store), swapper)
}

#[test]
fn slow_page_in_blocks_only_its_own_coordinate() {
    let (store, swapper) = gated_store();
    let (swapped, other, fresh) = (TileCoord::new(0, 0), TileCoord::new(1, 0), TileCoord::new(2, 0));
    store.ensure_writable_tile_at(swapped).unwrap().lock().pixel_mut(3, 3)[0] = 42;
    store.ensure_writable_tile_at(other).unwrap().lock().pixel_mut(0, 0)[0] = 7;
    assert!(store.evict(swapped).unwrap());

    let closed = swapper.gate.lock().unwrap();
    let pagers: Vec<_> = (0..2)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.tile_at(swapped).pixel(3, 3)[0])
        })
        .collect();
    thread::sleep(Duration::from_millis(100));

    let (tx, rx) = mpsc::channel();
    {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            let value = store.tile_at(other).pixel(0, 0)[0];
            store.ensure_writable_tile_at(fresh).unwrap();
            tx.send(value).unwrap();
        });
    }
    assert_eq!(rx.recv_timeout(WAIT).expect("blocked behind swapper I/O"), 7);

    drop(closed);
    for pager in pagers {
        assert_eq!(pager.join().unwrap(), 42);
    }
    assert!(store.contains(swapped));
    assert!(swapper.is_empty());
}

#[test]
fn removal_during_page_in_is_not_undone() {
    let (store, swapper) = gated_store();
    let c = TileCoord::new(-2, 5);
    store.ensure_writable_tile_at(c).unwrap().lock().pixel_mut(0, 0)[0] = 1;
    assert!(store.evict(c).unwrap());
    assert!(store.extent().is_empty());

    let closed = swapper.gate.lock().unwrap();
    let pager = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.tile_at(c).pixel(0, 0)[0])
    };
    thread::sleep(Duration::from_millis(100));
    let remover = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.remove_tile(c))
    };
    thread::sleep(Duration::from_millis(100));
    drop(closed);

    assert_eq!(pager.join().unwrap(), 1);
    assert!(remover.join().unwrap());
    assert!(!store.contains(c));
    assert!(swapper.is_empty());
    assert!(store.extent().is_empty());
    assert_eq!(store.tile_at(c).pixel(0, 0), &[0]);
}
