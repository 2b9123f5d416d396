// ============================================================================
// ITERATORS – line, rectangle and random access over a tile store
// ============================================================================
//
// Read-only iterators implement `Iterator` and hand out copied pixels. They
// cache the tile snapshot of the current position and only go back to the
// store when a tile boundary is crossed, so absent tiles are never allocated.
//
// Writing variants are cursors: `next_pixel()` advances and returns `false`
// when the range is exhausted. The first write into a tile resolves it through
// `ensure_writable_tile_at` (allocating or copying on write once); later
// writes into the same tile reuse the cached cell.

use parking_lot::{MappedMutexGuard, MutexGuard};

use crate::error::{Result, TileError};
use crate::geometry::{Rect, TILE_SIZE, TileCoord, local};
use crate::tiles::{Pixel, Tile, TileCell, TileStore};

/// One pixel produced by a read iterator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelItem {
    pub x: i32,
    pub y: i32,
    pub pixel: Pixel,
}

// ---- shared cursor state ---------------------------------------------------

/// Snapshot of the tile under a read cursor.
struct ReadCache<'a> {
    store: &'a TileStore,
    tile: Option<Tile>,
}

impl<'a> ReadCache<'a> {
    fn new(store: &'a TileStore) -> Self {
        Self { store, tile: None }
    }

    #[inline]
    fn tile(&mut self, coord: TileCoord) -> &Tile {
        if self.tile.as_ref().is_none_or(|t| t.coord() != coord) {
            self.tile = Some(self.store.tile_at(coord));
        }
        let store = self.store;
        self.tile.get_or_insert_with(|| store.tile_at(coord))
    }

    #[inline]
    fn pixel(&mut self, x: i32, y: i32) -> Pixel {
        let (lx, ly) = local(x, y);
        Pixel::from_slice(self.tile(TileCoord::containing(x, y)).pixel(lx, ly))
    }
}

/// Tile under a write cursor: a read snapshot until the first write, the
/// writable cell afterwards.
struct WriteCache<'a> {
    store: &'a TileStore,
    coord: Option<TileCoord>,
    snapshot: Option<Tile>,
    cell: Option<TileCell>,
}

impl<'a> WriteCache<'a> {
    fn new(store: &'a TileStore) -> Self {
        Self { store, coord: None, snapshot: None, cell: None }
    }

    #[inline]
    fn sync(&mut self, coord: TileCoord) {
        if self.coord != Some(coord) {
            self.coord = Some(coord);
            self.snapshot = None;
            self.cell = None;
        }
    }

    fn read(&mut self, x: i32, y: i32) -> Pixel {
        let coord = TileCoord::containing(x, y);
        let (lx, ly) = local(x, y);
        self.sync(coord);
        if let Some(cell) = &self.cell {
            return Pixel::from_slice(cell.lock().pixel(lx, ly));
        }
        let store = self.store;
        let tile = self.snapshot.get_or_insert_with(|| store.tile_at(coord));
        Pixel::from_slice(tile.pixel(lx, ly))
    }

    fn writable(&mut self, coord: TileCoord) -> Result<&TileCell> {
        self.sync(coord);
        let cell = match self.cell.take() {
            Some(cell) => cell,
            None => self.store.ensure_writable_tile_at(coord)?,
        };
        self.snapshot = None;
        Ok(self.cell.insert(cell))
    }

    fn raw_mut(&mut self, x: i32, y: i32) -> Result<MappedMutexGuard<'_, [u8]>> {
        let (lx, ly) = local(x, y);
        let cell = self.writable(TileCoord::containing(x, y))?;
        let mut guard = cell.lock();
        // Another handle may have snapshotted since the last write.
        guard.writable_view()?;
        Ok(MutexGuard::map(guard, |t| t.pixel_mut(lx, ly)))
    }

    fn write(&mut self, x: i32, y: i32, pixel: &[u8]) -> Result<()> {
        if pixel.len() != self.store.pixel_size() {
            return Err(TileError::LayoutMismatch {
                expected: self.store.pixel_size(),
                found: pixel.len(),
            });
        }
        let mut dst = self.raw_mut(x, y)?;
        dst.copy_from_slice(pixel);
        Ok(())
    }
}

// ============================================================================
// HORIZONTAL LINE
// ============================================================================

/// Pixels `x .. x + width` of row `y`, left to right.
pub struct HLineIterator<'a> {
    cache: ReadCache<'a>,
    x_start: i32,
    x_end: i32,
    x: i32,
    y: i32,
}

impl<'a> HLineIterator<'a> {
    pub fn new(store: &'a TileStore, x: i32, y: i32, width: i32) -> Self {
        Self {
            cache: ReadCache::new(store),
            x_start: x,
            x_end: x.saturating_add(width.max(0)),
            x,
            y,
        }
    }

    /// Restart on the next row with the same horizontal span.
    pub fn next_row(&mut self) {
        self.x = self.x_start;
        self.y += 1;
    }
}

impl Iterator for HLineIterator<'_> {
    type Item = PixelItem;

    #[inline]
    fn next(&mut self) -> Option<PixelItem> {
        if self.x >= self.x_end {
            return None;
        }
        let (x, y) = (self.x, self.y);
        self.x += 1;
        Some(PixelItem { x, y, pixel: self.cache.pixel(x, y) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = (self.x_end - self.x).max(0) as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for HLineIterator<'_> {}

/// Writable cursor over `x .. x + width` of row `y`.
pub struct HLineIteratorMut<'a> {
    cache: WriteCache<'a>,
    x_start: i32,
    x_end: i32,
    x: i32,
    y: i32,
    started: bool,
}

impl<'a> HLineIteratorMut<'a> {
    pub fn new(store: &'a TileStore, x: i32, y: i32, width: i32) -> Self {
        Self {
            cache: WriteCache::new(store),
            x_start: x,
            x_end: x.saturating_add(width.max(0)),
            x,
            y,
            started: false,
        }
    }

    /// Advance to the next pixel; the first call moves onto the first pixel.
    pub fn next_pixel(&mut self) -> bool {
        if self.started {
            self.x = self.x.saturating_add(1).min(self.x_end);
        } else {
            self.started = true;
        }
        self.x < self.x_end
    }

    /// Restart on the next row. Call `next_pixel` before accessing.
    pub fn next_row(&mut self) {
        self.x = self.x_start;
        self.y += 1;
        self.started = false;
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn read(&mut self) -> Pixel {
        self.cache.read(self.x, self.y)
    }

    pub fn write(&mut self, pixel: &[u8]) -> Result<()> {
        self.cache.write(self.x, self.y, pixel)
    }

    /// Bytes of the current pixel, made writable.
    pub fn raw_data_mut(&mut self) -> Result<MappedMutexGuard<'_, [u8]>> {
        self.cache.raw_mut(self.x, self.y)
    }
}

// ============================================================================
// VERTICAL LINE
// ============================================================================

/// Pixels `y .. y + height` of column `x`, top to bottom.
pub struct VLineIterator<'a> {
    cache: ReadCache<'a>,
    y_start: i32,
    y_end: i32,
    x: i32,
    y: i32,
}

impl<'a> VLineIterator<'a> {
    pub fn new(store: &'a TileStore, x: i32, y: i32, height: i32) -> Self {
        Self {
            cache: ReadCache::new(store),
            y_start: y,
            y_end: y.saturating_add(height.max(0)),
            x,
            y,
        }
    }

    /// Restart on the next column with the same vertical span.
    pub fn next_column(&mut self) {
        self.y = self.y_start;
        self.x += 1;
    }
}

impl Iterator for VLineIterator<'_> {
    type Item = PixelItem;

    #[inline]
    fn next(&mut self) -> Option<PixelItem> {
        if self.y >= self.y_end {
            return None;
        }
        let (x, y) = (self.x, self.y);
        self.y += 1;
        Some(PixelItem { x, y, pixel: self.cache.pixel(x, y) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = (self.y_end - self.y).max(0) as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for VLineIterator<'_> {}

/// Writable cursor over `y .. y + height` of column `x`.
pub struct VLineIteratorMut<'a> {
    cache: WriteCache<'a>,
    y_start: i32,
    y_end: i32,
    x: i32,
    y: i32,
    started: bool,
}

impl<'a> VLineIteratorMut<'a> {
    pub fn new(store: &'a TileStore, x: i32, y: i32, height: i32) -> Self {
        Self {
            cache: WriteCache::new(store),
            y_start: y,
            y_end: y.saturating_add(height.max(0)),
            x,
            y,
            started: false,
        }
    }

    pub fn next_pixel(&mut self) -> bool {
        if self.started {
            self.y = self.y.saturating_add(1).min(self.y_end);
        } else {
            self.started = true;
        }
        self.y < self.y_end
    }

    pub fn next_column(&mut self) {
        self.y = self.y_start;
        self.x += 1;
        self.started = false;
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn read(&mut self) -> Pixel {
        self.cache.read(self.x, self.y)
    }

    pub fn write(&mut self, pixel: &[u8]) -> Result<()> {
        self.cache.write(self.x, self.y, pixel)
    }

    pub fn raw_data_mut(&mut self) -> Result<MappedMutexGuard<'_, [u8]>> {
        self.cache.raw_mut(self.x, self.y)
    }
}

// ============================================================================
// RECTANGLE
// ============================================================================

/// Pixels of a rectangle in row-major order.
pub struct RectIterator<'a> {
    cache: ReadCache<'a>,
    rect: Rect,
    x: i32,
    y: i32,
}

impl<'a> RectIterator<'a> {
    pub fn new(store: &'a TileStore, rect: Rect) -> Self {
        Self { cache: ReadCache::new(store), rect, x: rect.x, y: rect.y }
    }
}

impl Iterator for RectIterator<'_> {
    type Item = PixelItem;

    #[inline]
    fn next(&mut self) -> Option<PixelItem> {
        if self.rect.is_empty() || self.y >= self.rect.bottom() {
            return None;
        }
        let (x, y) = (self.x, self.y);
        self.x += 1;
        if self.x >= self.rect.right() {
            self.x = self.rect.x;
            self.y += 1;
        }
        Some(PixelItem { x, y, pixel: self.cache.pixel(x, y) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.rect.is_empty() || self.y >= self.rect.bottom() {
            return (0, Some(0));
        }
        let full_rows = (self.rect.bottom() - self.y - 1) as usize;
        let n = full_rows * self.rect.width as usize + (self.rect.right() - self.x) as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for RectIterator<'_> {}

/// Writable cursor over a rectangle in row-major order.
pub struct RectIteratorMut<'a> {
    cache: WriteCache<'a>,
    rect: Rect,
    x: i32,
    y: i32,
    started: bool,
}

impl<'a> RectIteratorMut<'a> {
    pub fn new(store: &'a TileStore, rect: Rect) -> Self {
        Self {
            cache: WriteCache::new(store),
            rect,
            x: rect.x,
            y: rect.y,
            started: false,
        }
    }

    pub fn next_pixel(&mut self) -> bool {
        if self.rect.is_empty() {
            return false;
        }
        if !self.started {
            self.started = true;
        } else if self.y < self.rect.bottom() {
            self.x += 1;
            if self.x >= self.rect.right() {
                self.x = self.rect.x;
                self.y += 1;
            }
        }
        self.y < self.rect.bottom()
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn read(&mut self) -> Pixel {
        self.cache.read(self.x, self.y)
    }

    pub fn write(&mut self, pixel: &[u8]) -> Result<()> {
        self.cache.write(self.x, self.y, pixel)
    }

    pub fn raw_data_mut(&mut self) -> Result<MappedMutexGuard<'_, [u8]>> {
        self.cache.raw_mut(self.x, self.y)
    }
}

// ============================================================================
// RANDOM ACCESS
// ============================================================================

/// Read cursor that can jump anywhere. Consecutive positions inside one tile
/// reuse the cached snapshot.
pub struct RandomAccessor<'a> {
    cache: ReadCache<'a>,
    x: i32,
    y: i32,
}

impl<'a> RandomAccessor<'a> {
    pub fn new(store: &'a TileStore) -> Self {
        Self { cache: ReadCache::new(store), x: 0, y: 0 }
    }

    #[inline]
    pub fn move_to(&mut self, x: i32, y: i32) {
        self.x = x;
        self.y = y;
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    /// Bytes of the pixel under the cursor.
    #[inline]
    pub fn raw_data(&mut self) -> &[u8] {
        let (lx, ly) = local(self.x, self.y);
        self.cache.tile(TileCoord::containing(self.x, self.y)).pixel(lx, ly)
    }

    #[inline]
    pub fn pixel(&mut self) -> Pixel {
        Pixel::from_slice(self.raw_data())
    }

    /// Pixels left in the current tile row, starting at the cursor.
    pub fn num_contiguous_columns(&self) -> i32 {
        TILE_SIZE - local(self.x, self.y).0
    }

    /// Pixels left in the current tile column, starting at the cursor.
    pub fn num_contiguous_rows(&self) -> i32 {
        TILE_SIZE - local(self.x, self.y).1
    }
}

/// Read-write cursor that can jump anywhere.
pub struct RandomAccessorMut<'a> {
    cache: WriteCache<'a>,
    x: i32,
    y: i32,
}

impl<'a> RandomAccessorMut<'a> {
    pub fn new(store: &'a TileStore) -> Self {
        Self { cache: WriteCache::new(store), x: 0, y: 0 }
    }

    #[inline]
    pub fn move_to(&mut self, x: i32, y: i32) {
        self.x = x;
        self.y = y;
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn read(&mut self) -> Pixel {
        self.cache.read(self.x, self.y)
    }

    pub fn write(&mut self, pixel: &[u8]) -> Result<()> {
        self.cache.write(self.x, self.y, pixel)
    }

    pub fn raw_data_mut(&mut self) -> Result<MappedMutexGuard<'_, [u8]>> {
        self.cache.raw_mut(self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hline_crosses_tile_boundary() {
        let store = TileStore::new(&[0]).unwrap();
        store.ensure_writable_tile_at(TileCoord::new(1, 0)).unwrap().lock().pixel_mut(0, 3)[0] = 7;
        let row: Vec<_> = HLineIterator::new(&store, 62, 3, 4).map(|p| p.pixel[0]).collect();
        assert_eq!(row, vec![0, 0, 7, 0]);
    }

    #[test]
    fn empty_ranges_yield_nothing() {
        let store = TileStore::new(&[0]).unwrap();
        assert_eq!(HLineIterator::new(&store, 0, 0, 0).count(), 0);
        assert_eq!(VLineIterator::new(&store, 0, 0, -3).count(), 0);
        assert_eq!(RectIterator::new(&store, Rect::new(5, 5, 0, 10)).count(), 0);
        assert!(!RectIteratorMut::new(&store, Rect::new(5, 5, 10, 0)).next_pixel());
        assert_eq!(store.tile_count(), 0);
    }

    #[test]
    fn mut_cursor_writes_once_per_tile() {
        let store = TileStore::new(&[0, 0]).unwrap();
        let mut it = HLineIteratorMut::new(&store, 60, -1, 8);
        while it.next_pixel() {
            let x = it.x() as u8;
            it.write(&[x, 1]).unwrap();
        }
        assert_eq!(store.tile_count(), 2);
        let row: Vec<_> = HLineIterator::new(&store, 60, -1, 8).map(|p| p.pixel[0]).collect();
        assert_eq!(row, (60u8..68).collect::<Vec<_>>());
    }

    #[test]
    fn random_accessor_reads_what_was_written() {
        let store = TileStore::new(&[0]).unwrap();
        let mut w = RandomAccessorMut::new(&store);
        for (x, y) in [(-1, -1), (63, 64), (200, 5)] {
            w.move_to(x, y);
            w.raw_data_mut().unwrap()[0] = 9;
        }
        let mut r = RandomAccessor::new(&store);
        r.move_to(63, 64);
        assert_eq!(r.raw_data(), &[9]);
        r.move_to(62, 64);
        assert_eq!(r.raw_data(), &[0]);
        assert_eq!(r.num_contiguous_columns(), 2);
        r.move_to(-1, -1);
        assert_eq!(r.pixel(), [9u8]);
    }

    #[test]
    fn vertical_mut_cursor_walks_columns() {
        let store = TileStore::new(&[0]).unwrap();
        let mut it = VLineIteratorMut::new(&store, 0, 62, 3);
        for _ in 0..2 {
            while it.next_pixel() {
                it.write(&[5]).unwrap();
            }
            it.next_column();
        }
        let col: Vec<_> = VLineIterator::new(&store, 1, 61, 5).map(|p| p.pixel[0]).collect();
        assert_eq!(col, vec![0, 5, 5, 5, 0]);
    }
}
