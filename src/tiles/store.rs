// ============================================================================
// TILE STORE – sparse, sharded, concurrently readable map of tiles
// ============================================================================
//
// Layout:
//   shard[i] : RwLock<HashMap<TileCoord, TileCell>>
//   TileCell : Arc<Mutex<Tile>>        (one per allocated coordinate)
//   Tile     : Arc<TileData>           (copy-on-write buffer)
//
// Readers take a shard read lock only long enough to clone the cell's Arc,
// release it, then snapshot the tile (an Arc clone) under the cell mutex.
// Readers never wait on writers of other shards, and within a shard only on
// the O(1) insert/remove of a writer, never on pixel work or swapper I/O.
// Writers allocate outside of every lock. Unlinked and replaced cells are
// handed to the QSBR queue and dropped only after every registered reader
// passed a quiescent state.
//
// Page-ins claim their coordinate in `paging` and fetch with no shard lock
// held; structural writers on a claimed coordinate wait for the claim.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};

use super::extent::ExtentManager;
use super::qsbr::{Qsbr, ReaderContext};
use super::swap::TileSwapper;
use super::tile::{Tile, TileData};
use crate::error::{Result, TileError};
use crate::geometry::{Rect, TileCoord};

/// Default number of shards.
pub const DEFAULT_SHARDS: usize = 64;

/// Owning slot of one allocated tile.
///
/// The store and any writer that obtained the cell through
/// [`TileStore::ensure_writable_tile_at`] share it. Writes go through the
/// mutex; readers only ever see [`Tile`] snapshots.
#[derive(Clone)]
pub struct TileCell(Arc<Mutex<Tile>>);

impl TileCell {
    fn new(tile: Tile) -> Self {
        Self(Arc::new(Mutex::new(tile)))
    }

    /// O(1) copy-on-write snapshot of the current tile contents.
    #[inline]
    pub fn snapshot(&self) -> Tile {
        self.0.lock().clone()
    }

    /// Exclusive access for in-place mutation. Keep the guard short-lived:
    /// readers of the same coordinate wait on it.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, Tile> {
        self.0.lock()
    }

    pub fn coord(&self) -> TileCoord {
        self.0.lock().coord()
    }

    /// True when both handles refer to the same slot.
    pub fn ptr_eq(&self, other: &TileCell) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

type Shard = RwLock<HashMap<TileCoord, TileCell>>;

pub struct TileStore {
    shards: Box<[Shard]>,
    shard_mask: usize,
    pixel_size: usize,
    default_tile: RwLock<Arc<TileData>>,
    qsbr: Arc<Qsbr>,
    extent: ExtentManager,
    swapper: Option<Arc<dyn TileSwapper>>,
    /// Coordinates with a page-in or structural swap update in flight.
    paging: Mutex<HashSet<TileCoord>>,
    paging_done: Condvar,
}

/// Exclusive claim on one coordinate's swap state, released on drop.
struct PagingClaim<'a> {
    store: &'a TileStore,
    coord: TileCoord,
}

impl Drop for PagingClaim<'_> {
    fn drop(&mut self) {
        self.store.paging.lock().remove(&self.coord);
        self.store.paging_done.notify_all();
    }
}

#[inline(always)]
fn shard_hash(coord: TileCoord) -> usize {
    let h = (coord.col as u32 as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (coord.row as u32 as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    (h >> 32) as usize
}

impl TileStore {
    /// Empty store whose absent tiles read as `default_pixel`.
    pub fn new(default_pixel: &[u8]) -> Result<Self> {
        Self::with_shards(default_pixel, DEFAULT_SHARDS)
    }

    /// `shard_count` is rounded up to a power of two.
    pub fn with_shards(default_pixel: &[u8], shard_count: usize) -> Result<Self> {
        if default_pixel.is_empty() {
            return Err(TileError::InvalidChannelLayout("empty default pixel".into()));
        }
        let shard_count = shard_count.max(1).next_power_of_two();
        let shards = (0..shard_count)
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let default_tile = Arc::new(TileData::filled(default_pixel)?);
        log::debug!(
            "tile store: {} shards, pixel size {}",
            shard_count,
            default_pixel.len()
        );
        Ok(Self {
            shards,
            shard_mask: shard_count - 1,
            pixel_size: default_pixel.len(),
            default_tile: RwLock::new(default_tile),
            qsbr: Arc::new(Qsbr::new()),
            extent: ExtentManager::new(),
            swapper: None,
            paging: Mutex::new(HashSet::new()),
            paging_done: Condvar::new(),
        })
    }

    /// Attach a persistence collaborator for [`TileStore::evict`] and lazy
    /// page-in of evicted tiles.
    pub fn with_swapper(mut self, swapper: Arc<dyn TileSwapper>) -> Self {
        self.swapper = Some(swapper);
        self
    }

    #[inline(always)]
    fn shard(&self, coord: TileCoord) -> &Shard {
        &self.shards[shard_hash(coord) & self.shard_mask]
    }

    pub fn pixel_size(&self) -> usize {
        self.pixel_size
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn qsbr(&self) -> &Arc<Qsbr> {
        &self.qsbr
    }

    pub fn swapper(&self) -> Option<&Arc<dyn TileSwapper>> {
        self.swapper.as_ref()
    }

    // ========================================================================
    // DEFAULT TILE
    // ========================================================================

    /// Shared buffer every absent coordinate reads from.
    pub fn default_tile(&self) -> Arc<TileData> {
        self.default_tile.read().clone()
    }

    /// Replace the buffer absent coordinates read from. Allocated tiles keep
    /// their contents.
    pub fn set_default_tile(&self, data: TileData) -> Result<()> {
        if data.pixel_size() != self.pixel_size {
            return Err(TileError::LayoutMismatch {
                expected: self.pixel_size,
                found: data.pixel_size(),
            });
        }
        let old = std::mem::replace(&mut *self.default_tile.write(), Arc::new(data));
        self.qsbr.enqueue(move || drop(old));
        log::debug!("tile store: default tile replaced");
        Ok(())
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Tile at `coord`, or a tile sharing the default buffer if absent.
    ///
    /// Absent coordinates that the swapper holds are paged in first.
    pub fn tile_at(&self, coord: TileCoord) -> Tile {
        if let Some(cell) = self.cell(coord) {
            return cell.snapshot();
        }
        if let Some(cell) = self.page_in(coord) {
            return cell.snapshot();
        }
        Tile::new(coord, self.default_tile())
    }

    /// Allocated cell at `coord`, without paging in.
    pub fn cell(&self, coord: TileCoord) -> Option<TileCell> {
        self.shard(coord).read().get(&coord).cloned()
    }

    /// Whether a tile is allocated in memory at `coord`.
    pub fn contains(&self, coord: TileCoord) -> bool {
        self.shard(coord).read().contains_key(&coord)
    }

    /// Number of tiles allocated in memory.
    pub fn tile_count(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Tile-aligned bounds of the allocated tiles.
    pub fn extent(&self) -> Rect {
        self.extent.extent()
    }

    /// Call `f` with a snapshot of every allocated tile, in no particular
    /// order. No store lock is held while `f` runs, so `f` may use the store.
    pub fn for_each_tile(&self, mut f: impl FnMut(&Tile)) {
        for shard in self.shards.iter() {
            let cells: Vec<TileCell> = shard.read().values().cloned().collect();
            for cell in cells {
                f(&cell.snapshot());
            }
        }
    }

    /// Coordinates of every allocated tile, in no particular order.
    pub fn coords(&self) -> Vec<TileCoord> {
        let mut out = Vec::with_capacity(self.tile_count());
        for shard in self.shards.iter() {
            out.extend(shard.read().keys().copied());
        }
        out
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Cell at `coord` ready for in-place mutation, allocating a tile filled
    /// with the default pixel if absent.
    ///
    /// The tile is made private (copy-on-write) before returning, so an
    /// allocation failure is reported here and leaves the store unchanged.
    pub fn ensure_writable_tile_at(&self, coord: TileCoord) -> Result<TileCell> {
        let cell = match self.cell(coord) {
            Some(cell) => cell,
            None => match self.page_in(coord) {
                Some(cell) => cell,
                None => {
                    let data = self.default_tile().try_clone()?;
                    let (cell, _) = self.insert_if_absent(coord, Tile::new(coord, Arc::new(data)));
                    cell
                }
            },
        };
        cell.lock().writable_view()?;
        Ok(cell)
    }

    /// Insert `tile` unless a tile already exists. Returns the resident cell
    /// and whether the insert happened.
    fn insert_if_absent(&self, coord: TileCoord, tile: Tile) -> (TileCell, bool) {
        let mut map = self.shard(coord).write();
        if let Some(existing) = map.get(&coord) {
            return (existing.clone(), false);
        }
        let cell = TileCell::new(tile);
        map.insert(coord, cell.clone());
        self.extent.notify_tile_added(coord);
        (cell, true)
    }

    /// Put `tile` at `coord`, replacing (and retiring) any existing tile.
    /// The tile keeps sharing its buffer with other handles.
    pub fn set_tile(&self, coord: TileCoord, tile: Tile) -> Result<()> {
        if tile.pixel_size() != self.pixel_size {
            return Err(TileError::LayoutMismatch {
                expected: self.pixel_size,
                found: tile.pixel_size(),
            });
        }
        let cell = TileCell::new(tile.with_coord(coord));
        let _claim = self.swapper.as_ref().map(|_| self.claim(coord));
        let old = {
            let mut map = self.shard(coord).write();
            let old = map.insert(coord, cell);
            if old.is_none() {
                self.extent.notify_tile_added(coord);
            }
            old
        };
        if let Some(old) = old {
            self.retire(old);
        }
        if let Some(swapper) = &self.swapper {
            swapper.discard(coord);
        }
        Ok(())
    }

    /// Unlink the tile at `coord`. Its memory is reclaimed once no reader can
    /// still observe it. Returns whether a tile was removed.
    pub fn remove_tile(&self, coord: TileCoord) -> bool {
        let _claim = self.swapper.as_ref().map(|_| self.claim(coord));
        let old = {
            let mut map = self.shard(coord).write();
            let old = map.remove(&coord);
            if old.is_some() {
                self.extent.notify_tile_removed(coord);
            }
            old
        };
        if let Some(swapper) = &self.swapper {
            swapper.discard(coord);
        }
        match old {
            Some(cell) => {
                self.retire(cell);
                true
            }
            None => false,
        }
    }

    /// Remove every tile.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let drained: Vec<TileCell> = {
                let mut map = shard.write();
                map.drain()
                    .map(|(coord, cell)| {
                        self.extent.notify_tile_removed(coord);
                        cell
                    })
                    .collect()
            };
            for cell in drained {
                self.retire(cell);
            }
        }
        if let Some(swapper) = &self.swapper {
            for coord in swapper.stored_coords() {
                swapper.discard(coord);
            }
        }
    }

    fn retire(&self, cell: TileCell) {
        self.qsbr.enqueue(move || drop(cell));
    }

    // ========================================================================
    // SWAP
    // ========================================================================

    /// Block until no page-in or swap update runs for `coord`, then claim it.
    fn claim(&self, coord: TileCoord) -> PagingClaim<'_> {
        let mut paging = self.paging.lock();
        while paging.contains(&coord) {
            self.paging_done.wait(&mut paging);
        }
        paging.insert(coord);
        PagingClaim { store: self, coord }
    }

    /// Write the tile at `coord` to the swapper and unlink it from memory.
    /// Returns `Ok(false)` when nothing is allocated there, or when the tile
    /// is being written to and stays resident.
    pub fn evict(&self, coord: TileCoord) -> Result<bool> {
        let Some(swapper) = &self.swapper else {
            return Err(TileError::Swap("no swapper attached".into()));
        };
        let _claim = self.claim(coord);
        let Some(cell) = self.cell(coord) else {
            return Ok(false);
        };
        // The held snapshot makes any later write copy the buffer, so a
        // changed buffer below means the stored bytes are stale.
        let snapshot = cell.snapshot();
        if let Err(e) = swapper.store(coord, snapshot.data()) {
            log::warn!("tile store: evicting ({}, {}) failed: {}", coord.col, coord.row, e);
            return Err(e);
        }

        let unlinked = {
            let mut map = self.shard(coord).write();
            let unchanged = map.get(&coord).is_some_and(|c| c.ptr_eq(&cell))
                && cell.0.try_lock().is_some_and(|t| t.shares_data_with(&snapshot));
            if unchanged {
                map.remove(&coord);
                self.extent.notify_tile_removed(coord);
            }
            unchanged
        };
        if !unlinked {
            swapper.discard(coord);
            log::debug!("tile store: ({}, {}) busy, not evicted", coord.col, coord.row);
            return Ok(false);
        }
        self.retire(cell);
        log::debug!("tile store: evicted ({}, {})", coord.col, coord.row);
        Ok(true)
    }

    /// Page the tile at `coord` in from the swapper, if it holds one.
    ///
    /// The fetch runs without any shard lock. Concurrent misses on the same
    /// coordinate wait for the first one and then find its tile.
    fn page_in(&self, coord: TileCoord) -> Option<TileCell> {
        let swapper = self.swapper.as_ref()?;
        if swapper.is_empty() {
            return None;
        }
        let _claim = self.claim(coord);
        if let Some(existing) = self.cell(coord) {
            return Some(existing);
        }
        let bytes = swapper.fetch(coord)?;
        let data = match TileData::from_bytes(bytes, self.pixel_size) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("tile store: discarding swapped tile ({}, {}): {}", coord.col, coord.row, e);
                return None;
            }
        };
        let (cell, _) = self.insert_if_absent(coord, Tile::new(coord, Arc::new(data)));
        Some(cell)
    }

    /// Page in every tile the swapper holds. Returns how many were loaded.
    pub fn page_in_all(&self) -> usize {
        let Some(swapper) = &self.swapper else {
            return 0;
        };
        swapper
            .stored_coords()
            .into_iter()
            .filter(|&c| self.page_in(c).is_some())
            .count()
    }

    // ========================================================================
    // RECLAMATION
    // ========================================================================

    /// Register the calling reader thread. Report quiescent states through
    /// the returned context; dropping it unregisters.
    pub fn register_reader(&self) -> ReaderContext {
        ReaderContext::new(self.qsbr.clone())
    }

    /// Reclaim everything retired so far, regardless of readers.
    pub fn flush_reclamation(&self) {
        self.qsbr.flush();
    }

    pub fn pending_reclamations(&self) -> usize {
        self.qsbr.pending_len()
    }

    // ========================================================================
    // DUPLICATION
    // ========================================================================

    /// New store holding every tile of this one. Buffers are shared and
    /// detach on the first write to either side.
    pub fn duplicate(&self) -> Result<TileStore> {
        self.page_in_all();
        let default = self.default_tile();
        let copy = TileStore {
            shards: (0..self.shards.len())
                .map(|_| RwLock::new(HashMap::new()))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            shard_mask: self.shard_mask,
            pixel_size: self.pixel_size,
            default_tile: RwLock::new(default),
            qsbr: Arc::new(Qsbr::new()),
            extent: ExtentManager::new(),
            swapper: None,
            paging: Mutex::new(HashSet::new()),
            paging_done: Condvar::new(),
        };
        self.for_each_tile(|tile| {
            let mut tile = tile.clone();
            tile.clear_dirty();
            copy.insert_if_absent(tile.coord(), tile);
        });
        Ok(copy)
    }
}

impl Drop for TileStore {
    fn drop(&mut self) {
        self.qsbr.flush();
    }
}

impl std::fmt::Debug for TileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileStore")
            .field("pixel_size", &self.pixel_size)
            .field("shards", &self.shards.len())
            .field("tiles", &self.tile_count())
            .finish()
    }
}
