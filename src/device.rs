// ============================================================================
// PAINT DEVICE – a layer's pixels: channel layout + default pixel + tiles
// ============================================================================

use std::sync::Arc;

use image::RgbaImage;
use rayon::prelude::*;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Result, TileError};
use crate::geometry::{Rect, TILE_SIZE, TileCoord, local};
use crate::iterators::{
    HLineIterator, HLineIteratorMut, RandomAccessor, RandomAccessorMut, RectIterator, RectIteratorMut,
    VLineIterator, VLineIteratorMut,
};
use crate::tiles::{ChannelLayout, Pixel, Tile, TileData, TileStore, TileSwapper};

/// Unbounded sparse pixel surface.
///
/// Every coordinate that was never written reads as the default pixel. All
/// methods take `&self`: the tile store synchronises access, and callers keep
/// to one writer per tile coordinate.
pub struct PaintDevice {
    id: Uuid,
    layout: ChannelLayout,
    store: TileStore,
    parallel: bool,
}

impl PaintDevice {
    // ---- construction -------------------------------------------------------

    pub fn new(layout: ChannelLayout, default_pixel: &[u8]) -> Result<Self> {
        Self::with_config(layout, default_pixel, &EngineConfig::default())
    }

    pub fn with_config(layout: ChannelLayout, default_pixel: &[u8], config: &EngineConfig) -> Result<Self> {
        layout.check_pixel(default_pixel)?;
        let store = TileStore::with_shards(default_pixel, config.shard_count)?;
        let id = Uuid::new_v4();
        log::debug!("device {}: created ({:?})", id, layout);
        Ok(Self {
            id,
            layout,
            store,
            parallel: config.parallel_compositing,
        })
    }

    /// Attach a persistence collaborator for evicted tiles.
    pub fn with_swapper(mut self, swapper: Arc<dyn TileSwapper>) -> Self {
        self.store = self.store.with_swapper(swapper);
        self
    }

    // ---- properties ---------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    #[inline(always)]
    pub fn pixel_size(&self) -> usize {
        self.layout.pixel_size()
    }

    pub fn store(&self) -> &TileStore {
        &self.store
    }

    /// Whether painters on this device composite tiles in parallel by default.
    pub fn parallel(&self) -> bool {
        self.parallel
    }

    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
    }

    pub fn default_pixel(&self) -> Pixel {
        let tile = self.store.default_tile();
        Pixel::from_slice(&tile.bytes()[..self.pixel_size()])
    }

    /// Change what unallocated coordinates read as. Allocated tiles keep
    /// their contents.
    pub fn set_default_pixel(&self, pixel: &[u8]) -> Result<()> {
        self.layout.check_pixel(pixel)?;
        self.store.set_default_tile(TileData::filled(pixel)?)?;
        log::debug!("device {}: default pixel set to {:?}", self.id, pixel);
        Ok(())
    }

    /// Tile-aligned bounds of all allocated tiles (empty when none).
    pub fn extent(&self) -> Rect {
        self.store.extent()
    }

    pub fn tile_count(&self) -> usize {
        self.store.tile_count()
    }

    /// Rectangles of the allocated tiles, sorted by row then column. Unlike
    /// [`PaintDevice::extent`] this leaves out the gaps between tiles.
    pub fn region(&self) -> Vec<Rect> {
        let mut coords = self.store.coords();
        coords.sort_unstable_by_key(|c| (c.row, c.col));
        coords.iter().map(TileCoord::rect).collect()
    }

    /// Pixels from `x` to the right edge of its tile.
    pub fn num_contiguous_columns(&self, x: i32) -> i32 {
        TILE_SIZE - x.rem_euclid(TILE_SIZE)
    }

    /// Pixels from `y` to the bottom edge of its tile.
    pub fn num_contiguous_rows(&self, y: i32) -> i32 {
        TILE_SIZE - y.rem_euclid(TILE_SIZE)
    }

    /// Byte distance between vertically adjacent pixels inside a tile.
    pub fn row_stride(&self) -> usize {
        TILE_SIZE as usize * self.pixel_size()
    }

    // ---- pixel access -------------------------------------------------------

    pub fn pixel(&self, x: i32, y: i32) -> Pixel {
        let (lx, ly) = local(x, y);
        Pixel::from_slice(self.store.tile_at(TileCoord::containing(x, y)).pixel(lx, ly))
    }

    pub fn set_pixel(&self, x: i32, y: i32, pixel: &[u8]) -> Result<()> {
        self.layout.check_pixel(pixel)?;
        let (lx, ly) = local(x, y);
        let cell = self.store.ensure_writable_tile_at(TileCoord::containing(x, y))?;
        cell.lock().pixel_mut(lx, ly).copy_from_slice(pixel);
        Ok(())
    }

    /// Checks that a buffer of `len` bytes holds `rect` at `stride` bytes
    /// per row.
    fn check_buffer(&self, rect: Rect, len: usize, stride: usize) -> Result<()> {
        let row_bytes = rect.width.max(0) as usize * self.pixel_size();
        if stride < row_bytes {
            return Err(TileError::LayoutMismatch { expected: row_bytes, found: stride });
        }
        let expected = if rect.is_empty() { 0 } else { (rect.height as usize - 1) * stride + row_bytes };
        if len < expected || (stride == row_bytes && len != expected) {
            return Err(TileError::LayoutMismatch { expected, found: len });
        }
        Ok(())
    }

    /// Copy `rect` into `out` (row-major, tightly packed). Never allocates tiles.
    pub fn read_bytes(&self, rect: Rect, out: &mut [u8]) -> Result<()> {
        self.read_bytes_strided(rect, out, rect.width.max(0) as usize * self.pixel_size())
    }

    /// Copy `rect` into `out`, rows `out_stride` bytes apart. Bytes between
    /// rows are left alone.
    pub fn read_bytes_strided(&self, rect: Rect, out: &mut [u8], out_stride: usize) -> Result<()> {
        self.check_buffer(rect, out.len(), out_stride)?;
        let ps = self.pixel_size();
        for (coord, span) in rect.tile_spans() {
            let tile = self.store.tile_at(coord);
            copy_from_tile(&tile, coord, span, rect, out, out_stride, ps);
        }
        Ok(())
    }

    /// Write `data` (row-major, tightly packed) into `rect`.
    pub fn write_bytes(&self, rect: Rect, data: &[u8]) -> Result<()> {
        self.write_bytes_strided(rect, data, rect.width.max(0) as usize * self.pixel_size())
    }

    /// Write `data` into `rect`, taking rows `data_stride` bytes apart.
    pub fn write_bytes_strided(&self, rect: Rect, data: &[u8], data_stride: usize) -> Result<()> {
        self.check_buffer(rect, data.len(), data_stride)?;
        let ps = self.pixel_size();
        let tile_stride = self.row_stride();
        for (coord, span) in rect.tile_spans() {
            let cell = self.store.ensure_writable_tile_at(coord)?;
            let mut tile = cell.lock();
            let view = tile.writable_view()?;
            let row_bytes = span.width as usize * ps;
            for y in span.y..span.bottom() {
                let src = (y - rect.y) as usize * data_stride + (span.x - rect.x) as usize * ps;
                let dst = (y - coord.y()) as usize * tile_stride + (span.x - coord.x()) as usize * ps;
                view[dst..dst + row_bytes].copy_from_slice(&data[src..src + row_bytes]);
            }
        }
        Ok(())
    }

    // ---- planar access ------------------------------------------------------

    /// Read `rect` as one tightly packed plane per channel.
    pub fn read_planar_bytes(&self, rect: Rect) -> Result<Vec<Vec<u8>>> {
        let cb = self.layout.depth().bytes();
        let area = rect.area();
        let mut planes = vec![vec![0u8; area * cb]; self.layout.channels()];
        let ps = self.pixel_size();
        let width = rect.width.max(0) as usize;
        for (coord, span) in rect.tile_spans() {
            let tile = self.store.tile_at(coord);
            for y in span.y..span.bottom() {
                let (lx, ly) = local(span.x, y);
                let row = &tile.data()[(ly as usize * TILE_SIZE as usize + lx as usize) * ps..][..span.width as usize * ps];
                let first = (y - rect.y) as usize * width + (span.x - rect.x) as usize;
                for (i, px) in row.chunks_exact(ps).enumerate() {
                    let at = (first + i) * cb;
                    for (ch, plane) in planes.iter_mut().enumerate() {
                        plane[at..at + cb].copy_from_slice(&px[ch * cb..(ch + 1) * cb]);
                    }
                }
            }
        }
        Ok(planes)
    }

    /// Write one plane per channel into `rect`. A `None` plane leaves that
    /// channel untouched; tiles are not touched at all when every plane is
    /// `None`.
    pub fn write_planar_bytes(&self, rect: Rect, planes: &[Option<&[u8]>]) -> Result<()> {
        let channels = self.layout.channels();
        if planes.len() != channels {
            return Err(TileError::LayoutMismatch { expected: channels, found: planes.len() });
        }
        let cb = self.layout.depth().bytes();
        let plane_len = rect.area() * cb;
        for plane in planes.iter().flatten() {
            if plane.len() != plane_len {
                return Err(TileError::LayoutMismatch { expected: plane_len, found: plane.len() });
            }
        }
        if planes.iter().all(Option::is_none) {
            return Ok(());
        }
        let ps = self.pixel_size();
        let width = rect.width.max(0) as usize;
        for (coord, span) in rect.tile_spans() {
            let cell = self.store.ensure_writable_tile_at(coord)?;
            let mut tile = cell.lock();
            let view = tile.writable_view()?;
            for y in span.y..span.bottom() {
                let (lx, ly) = local(span.x, y);
                let row = &mut view[(ly as usize * TILE_SIZE as usize + lx as usize) * ps..][..span.width as usize * ps];
                let first = (y - rect.y) as usize * width + (span.x - rect.x) as usize;
                for (i, px) in row.chunks_exact_mut(ps).enumerate() {
                    let at = (first + i) * cb;
                    for (ch, plane) in planes.iter().enumerate() {
                        if let Some(plane) = plane {
                            px[ch * cb..(ch + 1) * cb].copy_from_slice(&plane[at..at + cb]);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Same as [`PaintDevice::read_bytes`] into a new buffer.
    pub fn read_vec(&self, rect: Rect) -> Result<Vec<u8>> {
        let mut out = vec![0u8; rect.area() * self.pixel_size()];
        self.read_bytes(rect, &mut out)?;
        Ok(out)
    }

    // ---- bulk operations ----------------------------------------------------

    /// Set every pixel of `rect` to `pixel` (the default pixel if `None`).
    ///
    /// Tiles covered completely are dropped (default pixel) or replaced by
    /// tiles sharing one filled buffer; the rest are written pixel by pixel.
    pub fn clear(&self, rect: Rect, pixel: Option<&[u8]>) -> Result<()> {
        let default = self.default_pixel();
        let value = match pixel {
            Some(p) => {
                self.layout.check_pixel(p)?;
                Pixel::from_slice(p)
            }
            None => default,
        };
        let mut shared: Option<Arc<TileData>> = None;
        for (coord, span) in rect.tile_spans() {
            if span == coord.rect() {
                if value == default {
                    self.store.remove_tile(coord);
                } else {
                    let data = match shared.clone() {
                        Some(d) => d,
                        None => {
                            let d = Arc::new(TileData::filled(&value)?);
                            shared = Some(d.clone());
                            d
                        }
                    };
                    self.store.set_tile(coord, Tile::new(coord, data))?;
                }
            } else {
                self.fill_span(coord, span, &value)?;
            }
        }
        Ok(())
    }

    /// Drop every tile.
    pub fn clear_all(&self) {
        self.store.clear();
    }

    fn fill_span(&self, coord: TileCoord, span: Rect, value: &[u8]) -> Result<()> {
        let ps = self.pixel_size();
        let stride = self.row_stride();
        let cell = self.store.ensure_writable_tile_at(coord)?;
        let mut tile = cell.lock();
        let view = tile.writable_view()?;
        for y in span.y..span.bottom() {
            let row = (y - coord.y()) as usize * stride;
            let x0 = row + (span.x - coord.x()) as usize * ps;
            for px in view[x0..x0 + span.width as usize * ps].chunks_exact_mut(ps) {
                px.copy_from_slice(value);
            }
        }
        Ok(())
    }

    fn check_same_layout(&self, src: &PaintDevice) -> Result<()> {
        if src.layout != self.layout {
            return Err(TileError::InvalidChannelLayout(format!(
                "cannot copy {:?} into {:?}",
                src.layout, self.layout
            )));
        }
        Ok(())
    }

    /// Copy `rect` from `src` (same layout). Fully covered tiles are shared
    /// with `src` and detach on the next write to either device.
    pub fn bit_blt(&self, src: &PaintDevice, rect: Rect) -> Result<()> {
        self.check_same_layout(src)?;
        for (coord, span) in rect.tile_spans() {
            if span == coord.rect() {
                self.share_tile_from(src, coord)?;
            } else {
                let tile = src.store.tile_at(coord);
                let cell = self.store.ensure_writable_tile_at(coord)?;
                let mut dst = cell.lock();
                let view = dst.writable_view()?;
                let stride = self.row_stride();
                let ps = self.pixel_size();
                for y in span.y..span.bottom() {
                    let off = (y - coord.y()) as usize * stride + (span.x - coord.x()) as usize * ps;
                    let len = span.width as usize * ps;
                    view[off..off + len].copy_from_slice(&tile.data()[off..off + len]);
                }
            }
        }
        Ok(())
    }

    /// Like [`PaintDevice::bit_blt`] but copies whole tiles only, so pixels
    /// outside `rect` that share a tile with it are copied too.
    pub fn bit_blt_rough(&self, src: &PaintDevice, rect: Rect) -> Result<()> {
        self.check_same_layout(src)?;
        for coord in rect.tiles() {
            self.share_tile_from(src, coord)?;
        }
        Ok(())
    }

    fn share_tile_from(&self, src: &PaintDevice, coord: TileCoord) -> Result<()> {
        let tile = src.store.tile_at(coord);
        let src_default = src.store.default_tile();
        if Arc::ptr_eq(tile.shared_data(), &src_default) && src.default_pixel() == self.default_pixel() {
            self.store.remove_tile(coord);
            Ok(())
        } else {
            self.store.set_tile(coord, tile)
        }
    }

    /// Drop tiles inside `rect` whose every pixel equals the default pixel.
    /// Returns how many were dropped.
    pub fn purge(&self, rect: Rect) -> usize {
        let default = self.default_pixel();
        let mut purged = 0;
        for coord in self.store.coords() {
            if !coord.rect().intersects(&rect) {
                continue;
            }
            if self.store.tile_at(coord).shared_data().is_filled_with(&default) && self.store.remove_tile(coord) {
                purged += 1;
            }
        }
        if purged > 0 {
            log::debug!("device {}: purged {} default tiles", self.id, purged);
        }
        purged
    }

    /// Forget everything outside `rect`: tiles outside are dropped, pixels
    /// outside in the tiles that straddle the border are reset to default.
    pub fn set_extent(&self, rect: Rect) -> Result<()> {
        self.store.page_in_all();
        let default = self.default_pixel();
        for coord in self.store.coords() {
            let tile_rect = coord.rect();
            let inside = tile_rect.intersection(&rect);
            if inside.is_empty() {
                self.store.remove_tile(coord);
            } else if inside != tile_rect {
                // Up to four bands around the kept part.
                let bands = [
                    Rect::from_corners(tile_rect.x, tile_rect.y, tile_rect.right() - 1, inside.y - 1),
                    Rect::from_corners(tile_rect.x, inside.bottom(), tile_rect.right() - 1, tile_rect.bottom() - 1),
                    Rect::from_corners(tile_rect.x, inside.y, inside.x - 1, inside.bottom() - 1),
                    Rect::from_corners(inside.right(), inside.y, tile_rect.right() - 1, inside.bottom() - 1),
                ];
                for band in bands.iter().filter(|b| !b.is_empty()) {
                    self.fill_span(coord, *band, &default)?;
                }
            }
        }
        Ok(())
    }

    /// Independent device with the same pixels. Tile buffers are shared
    /// until either side writes to them.
    pub fn duplicate(&self) -> Result<PaintDevice> {
        Ok(PaintDevice {
            id: Uuid::new_v4(),
            layout: self.layout,
            store: self.store.duplicate()?,
            parallel: self.parallel,
        })
    }

    /// Call `f` with every allocated tile, in no particular order.
    pub fn for_each_tile(&self, f: impl FnMut(&Tile)) {
        self.store.for_each_tile(f);
    }

    // ---- image interop ------------------------------------------------------

    /// Import an RGBA image with its top-left corner at (0, 0). Only tiles
    /// with at least one non-transparent pixel are created.
    pub fn from_rgba_image(src: &RgbaImage) -> Result<Self> {
        let device = Self::new(ChannelLayout::rgba8(), &[0, 0, 0, 0])?;
        let (width, height) = (src.width() as i32, src.height() as i32);
        let raw = src.as_raw();
        let coords: Vec<TileCoord> = Rect::new(0, 0, width, height).tiles().collect();

        let tiles: Vec<Result<Option<Tile>>> = coords
            .into_par_iter()
            .map(|coord| {
                let span = coord.rect().intersection(&Rect::new(0, 0, width, height));
                let chunk_stride = TILE_SIZE as usize * 4;
                let mut data = TileData::filled(&[0, 0, 0, 0])?;
                let bytes = data.bytes_mut();
                let mut has_content = false;
                for y in span.y..span.bottom() {
                    let src_start = (y as usize * width as usize + span.x as usize) * 4;
                    let dst_start = (y - coord.y()) as usize * chunk_stride;
                    let byte_len = span.width as usize * 4;
                    let row = &raw[src_start..src_start + byte_len];
                    bytes[dst_start..dst_start + byte_len].copy_from_slice(row);
                    if !has_content {
                        has_content = row.chunks_exact(4).any(|p| p[3] != 0);
                    }
                }
                Ok(has_content.then(|| Tile::new(coord, Arc::new(data))))
            })
            .collect();

        for tile in tiles {
            if let Some(tile) = tile? {
                device.store.set_tile(tile.coord(), tile)?;
            }
        }
        log::debug!(
            "device {}: imported {}x{} image into {} tiles",
            device.id,
            width,
            height,
            device.tile_count()
        );
        Ok(device)
    }

    /// Flatten `rect` into an image. Only for `rgba8` devices.
    pub fn to_rgba_image(&self, rect: Rect) -> Result<RgbaImage> {
        if self.layout != ChannelLayout::rgba8() {
            return Err(TileError::InvalidChannelLayout(format!(
                "image export needs rgba8, device is {:?}",
                self.layout
            )));
        }
        if rect.is_empty() {
            return Ok(RgbaImage::new(0, 0));
        }
        let row_len = rect.width as usize * 4;
        let mut out = vec![0u8; row_len * rect.height as usize];
        // One band per tile row, so each band touches each tile once.
        let first_band = TILE_SIZE - rect.y.rem_euclid(TILE_SIZE);
        let mut bands: Vec<(Rect, &mut [u8])> = Vec::new();
        let mut rest = out.as_mut_slice();
        let mut y = rect.y;
        let mut band_h = first_band.min(rect.height);
        while y < rect.bottom() {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(band_h as usize * row_len);
            bands.push((Rect::new(rect.x, y, rect.width, band_h), head));
            rest = tail;
            y += band_h;
            band_h = TILE_SIZE.min(rect.bottom() - y);
        }
        bands
            .into_par_iter()
            .try_for_each(|(band, buf)| self.read_bytes(band, buf))?;

        RgbaImage::from_raw(rect.width as u32, rect.height as u32, out)
            .ok_or_else(|| TileError::InvalidFormat("image buffer size mismatch".into()))
    }

    // ---- iterators ----------------------------------------------------------

    pub fn hline_iter(&self, x: i32, y: i32, width: i32) -> HLineIterator<'_> {
        HLineIterator::new(&self.store, x, y, width)
    }

    pub fn vline_iter(&self, x: i32, y: i32, height: i32) -> VLineIterator<'_> {
        VLineIterator::new(&self.store, x, y, height)
    }

    pub fn rect_iter(&self, rect: Rect) -> RectIterator<'_> {
        RectIterator::new(&self.store, rect)
    }

    pub fn hline_iter_mut(&self, x: i32, y: i32, width: i32) -> HLineIteratorMut<'_> {
        HLineIteratorMut::new(&self.store, x, y, width)
    }

    pub fn vline_iter_mut(&self, x: i32, y: i32, height: i32) -> VLineIteratorMut<'_> {
        VLineIteratorMut::new(&self.store, x, y, height)
    }

    pub fn rect_iter_mut(&self, rect: Rect) -> RectIteratorMut<'_> {
        RectIteratorMut::new(&self.store, rect)
    }

    pub fn random_accessor(&self) -> RandomAccessor<'_> {
        RandomAccessor::new(&self.store)
    }

    pub fn random_accessor_mut(&self) -> RandomAccessorMut<'_> {
        RandomAccessorMut::new(&self.store)
    }
}

/// Copy the part `span` of `tile` into the packed buffer for `rect`.
fn copy_from_tile(tile: &Tile, coord: TileCoord, span: Rect, rect: Rect, out: &mut [u8], out_stride: usize, ps: usize) {
    let tile_stride = TILE_SIZE as usize * ps;
    let row_bytes = span.width as usize * ps;
    let data = tile.data();
    for y in span.y..span.bottom() {
        let src = (y - coord.y()) as usize * tile_stride + (span.x - coord.x()) as usize * ps;
        let dst = (y - rect.y) as usize * out_stride + (span.x - rect.x) as usize * ps;
        out[dst..dst + row_bytes].copy_from_slice(&data[src..src + row_bytes]);
    }
}

impl std::fmt::Debug for PaintDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaintDevice")
            .field("id", &self.id)
            .field("layout", &self.layout)
            .field("tiles", &self.tile_count())
            .finish()
    }
}
