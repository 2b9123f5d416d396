// ============================================================================
// TILE – 64×64 pixel block with copy-on-write sharing
// ============================================================================

use std::sync::Arc;

use crate::error::{Result, TileError};
use crate::geometry::{TILE_PIXELS, TILE_SIZE, TileCoord};

/// Raw pixel buffer of one tile (`TILE_SIZE × TILE_SIZE × pixel_size` bytes,
/// row-major, row stride `TILE_SIZE * pixel_size`).
#[derive(Clone, PartialEq, Eq)]
pub struct TileData {
    bytes: Box<[u8]>,
    pixel_size: usize,
}

impl TileData {
    /// Allocate a buffer with every pixel set to `pixel`.
    pub fn filled(pixel: &[u8]) -> Result<Self> {
        let pixel_size = pixel.len();
        let len = TILE_PIXELS * pixel_size;
        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| TileError::AllocationFailure { bytes: len })?;
        if pixel.iter().all(|&b| b == pixel[0]) {
            buf.resize(len, pixel.first().copied().unwrap_or(0));
        } else {
            for _ in 0..TILE_PIXELS {
                buf.extend_from_slice(pixel);
            }
        }
        Ok(Self { bytes: buf.into_boxed_slice(), pixel_size })
    }

    /// Wrap raw bytes, e.g. bytes paged in from storage.
    pub fn from_bytes(bytes: Vec<u8>, pixel_size: usize) -> Result<Self> {
        let expected = TILE_PIXELS * pixel_size;
        if bytes.len() != expected {
            return Err(TileError::LayoutMismatch { expected, found: bytes.len() });
        }
        Ok(Self { bytes: bytes.into_boxed_slice(), pixel_size })
    }

    /// Deep copy that reports allocation failure instead of aborting.
    pub fn try_clone(&self) -> Result<Self> {
        let len = self.bytes.len();
        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| TileError::AllocationFailure { bytes: len })?;
        buf.extend_from_slice(&self.bytes);
        Ok(Self { bytes: buf.into_boxed_slice(), pixel_size: self.pixel_size })
    }

    #[inline(always)]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline(always)]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    #[inline(always)]
    pub fn pixel_size(&self) -> usize {
        self.pixel_size
    }

    #[inline(always)]
    pub fn row_stride(&self) -> usize {
        TILE_SIZE as usize * self.pixel_size
    }

    /// True when every pixel equals `pixel`.
    pub fn is_filled_with(&self, pixel: &[u8]) -> bool {
        pixel.len() == self.pixel_size && self.bytes.chunks_exact(self.pixel_size).all(|p| p == pixel)
    }
}

impl std::fmt::Debug for TileData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileData")
            .field("pixel_size", &self.pixel_size)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Handle to a tile's pixels at a grid position.
///
/// Cloning a handle is O(1): both handles share one [`TileData`]. Shared data
/// is never mutated; [`Tile::writable_view`] first gives this handle a private
/// copy, so every other handle keeps seeing the data as it was.
#[derive(Clone, Debug)]
pub struct Tile {
    coord: TileCoord,
    data: Arc<TileData>,
    dirty: bool,
}

impl Tile {
    pub fn new(coord: TileCoord, data: Arc<TileData>) -> Self {
        Self { coord, data, dirty: false }
    }

    /// Allocate a tile filled with `pixel`.
    pub fn filled(coord: TileCoord, pixel: &[u8]) -> Result<Self> {
        Ok(Self::new(coord, Arc::new(TileData::filled(pixel)?)))
    }

    #[inline(always)]
    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    /// Same data, different grid position.
    pub fn with_coord(&self, coord: TileCoord) -> Self {
        Self { coord, data: self.data.clone(), dirty: self.dirty }
    }

    #[inline(always)]
    pub fn pixel_size(&self) -> usize {
        self.data.pixel_size
    }

    /// Whole buffer, read-only.
    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        &self.data.bytes
    }

    /// Shared buffer handle, for sharing data between devices.
    pub fn shared_data(&self) -> &Arc<TileData> {
        &self.data
    }

    /// Number of handles (in any store, reader or undo snapshot) sharing this
    /// tile's buffer.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    pub fn is_shared(&self) -> bool {
        self.ref_count() > 1
    }

    /// True when both handles point at the very same buffer.
    pub fn shares_data_with(&self, other: &Tile) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Read-only view of the pixel at an in-tile offset.
    pub fn read(&self, x: i32, y: i32) -> Result<&[u8]> {
        if !(0..TILE_SIZE).contains(&x) || !(0..TILE_SIZE).contains(&y) {
            return Err(TileError::OutOfBounds { x, y, width: TILE_SIZE, height: TILE_SIZE });
        }
        Ok(self.pixel(x, y))
    }

    /// Unchecked-in-release pixel view for hot paths.
    #[inline(always)]
    pub fn pixel(&self, x: i32, y: i32) -> &[u8] {
        debug_assert!((0..TILE_SIZE).contains(&x) && (0..TILE_SIZE).contains(&y));
        let ps = self.data.pixel_size;
        let off = (y as usize * TILE_SIZE as usize + x as usize) * ps;
        &self.data.bytes[off..off + ps]
    }

    /// Mutable view of the whole buffer.
    ///
    /// If any other handle shares the buffer, a private copy is made first and
    /// this handle is rebound to it. Marks the tile dirty.
    pub fn writable_view(&mut self) -> Result<&mut [u8]> {
        if Arc::get_mut(&mut self.data).is_none() {
            let copy = self.data.try_clone()?;
            self.data = Arc::new(copy);
        }
        self.dirty = true;
        // The copy above leaves exactly one strong reference.
        match Arc::get_mut(&mut self.data) {
            Some(data) => Ok(&mut data.bytes[..]),
            None => Err(TileError::AllocationFailure { bytes: 0 }),
        }
    }

    /// Mutable view of one pixel (copy-on-write as in [`Tile::writable_view`]).
    #[inline]
    pub fn writable_pixel(&mut self, x: i32, y: i32) -> Result<&mut [u8]> {
        if !(0..TILE_SIZE).contains(&x) || !(0..TILE_SIZE).contains(&y) {
            return Err(TileError::OutOfBounds { x, y, width: TILE_SIZE, height: TILE_SIZE });
        }
        let ps = self.data.pixel_size;
        let off = (y as usize * TILE_SIZE as usize + x as usize) * ps;
        let view = self.writable_view()?;
        Ok(&mut view[off..off + ps])
    }

    /// Mutable pixel for a tile that [`Tile::writable_view`] already made
    /// private. Falls back to an infallible copy if it is shared again.
    #[inline(always)]
    pub fn pixel_mut(&mut self, x: i32, y: i32) -> &mut [u8] {
        debug_assert!((0..TILE_SIZE).contains(&x) && (0..TILE_SIZE).contains(&y));
        self.dirty = true;
        let data = Arc::make_mut(&mut self.data);
        let ps = data.pixel_size;
        let off = (y as usize * TILE_SIZE as usize + x as usize) * ps;
        &mut data.bytes[off..off + ps]
    }
}
