// ============================================================================
// PAINTER – composite buffers and devices onto a paint device, tile by tile
// ============================================================================

use std::ops::Range;

use rayon::prelude::*;

use crate::device::PaintDevice;
use crate::error::{Result, TileError};
use crate::geometry::{Rect, TILE_SIZE, TileCoord};
use crate::ops::composite::{CompositeOp, CompositeOpId, CompositeParams, Mask};
use crate::random::RandomSource;

/// Source pixels plus optional coverage mask, both positioned at `rect`.
#[derive(Clone, Copy)]
struct Source<'s> {
    rect: Rect,
    bytes: &'s [u8],
    /// Bytes per source row; 0 repeats the first row.
    stride: usize,
    mask: Option<&'s [u8]>,
    mask_stride: usize,
}

impl Source<'_> {
    /// True when no pixel of `span` can reach the destination: mask coverage
    /// is zero, or the source alpha bytes in `alpha` are all zero.
    fn is_blank(&self, span: Rect, ps: usize, alpha: Option<&Range<usize>>) -> bool {
        let (sx, sy) = ((span.x - self.rect.x) as usize, (span.y - self.rect.y) as usize);
        // A repeated source row without a mask looks the same on every row.
        let rows = if self.stride == 0 && self.mask.is_none() { 1 } else { span.height as usize };
        for r in 0..rows {
            let src_row = if self.stride == 0 { 0 } else { (sy + r) * self.stride + sx * ps };
            let mask_row = (sy + r) * self.mask_stride + sx;
            for c in 0..span.width as usize {
                let covered = self.mask.is_none_or(|m| m[mask_row + c] != 0);
                let px = src_row + c * ps;
                let visible = alpha.is_none_or(|a| self.bytes[px + a.start..px + a.end].iter().any(|&b| b != 0));
                if covered && visible {
                    return false;
                }
            }
        }
        true
    }
}

/// Paints onto one device with a current composite op, opacity and
/// channel flags. Keeps the union of everything it touched.
pub struct Painter<'a> {
    device: &'a PaintDevice,
    op: CompositeOp,
    opacity: f32,
    channel_flags: Option<u32>,
    random: Option<RandomSource>,
    parallel: bool,
    dirty: Option<Rect>,
}

impl<'a> Painter<'a> {
    pub fn new(device: &'a PaintDevice) -> Self {
        Self {
            device,
            op: CompositeOp::from_op_id(CompositeOpId::Over, device.layout()),
            opacity: 1.0,
            channel_flags: None,
            random: None,
            parallel: device.parallel(),
            dirty: None,
        }
    }

    pub fn device(&self) -> &'a PaintDevice {
        self.device
    }

    /// Select the op by identifier. Unknown identifiers leave the current op
    /// in place and return `InvalidCompositeOp`.
    pub fn set_composite_op(&mut self, id: &str) -> Result<()> {
        self.op = CompositeOp::new(id, self.device.layout())?;
        Ok(())
    }

    pub fn composite_op(&self) -> CompositeOpId {
        self.op.id()
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity;
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_channel_flags(&mut self, flags: Option<u32>) {
        self.channel_flags = flags;
    }

    pub fn set_random_source(&mut self, random: RandomSource) {
        self.random = Some(random);
    }

    pub fn random_source(&self) -> Option<&RandomSource> {
        self.random.as_ref()
    }

    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
    }

    /// Union of all areas painted since the last call, `None` if nothing was.
    pub fn take_dirty_rect(&mut self) -> Option<Rect> {
        self.dirty.take()
    }

    // ---- painting -----------------------------------------------------------

    /// Composite a packed `src_w × src_h` buffer with its top-left corner at
    /// (`x`, `y`). `mask` has one coverage byte per source pixel.
    pub fn bit_blt_buffer(
        &mut self,
        x: i32,
        y: i32,
        src: &[u8],
        src_w: i32,
        src_h: i32,
        mask: Option<&[u8]>,
    ) -> Result<()> {
        let rect = Rect::new(x, y, src_w, src_h);
        let ps = self.device.pixel_size();
        let expected = rect.area() * ps;
        if src.len() != expected {
            return Err(TileError::LayoutMismatch { expected, found: src.len() });
        }
        if let Some(m) = mask
            && m.len() != rect.area()
        {
            return Err(TileError::LayoutMismatch { expected: rect.area(), found: m.len() });
        }
        let source = Source {
            rect,
            bytes: src,
            stride: src_w.max(0) as usize * ps,
            mask,
            mask_stride: src_w.max(0) as usize,
        };
        self.paint(source)
    }

    /// Composite `src_rect` of another device with its top-left corner at
    /// (`x`, `y`).
    pub fn bit_blt_device(&mut self, src: &PaintDevice, src_rect: Rect, x: i32, y: i32) -> Result<()> {
        if src.layout() != self.device.layout() {
            return Err(TileError::InvalidChannelLayout(format!(
                "cannot paint {:?} onto {:?}",
                src.layout(),
                self.device.layout()
            )));
        }
        let buf = src.read_vec(src_rect)?;
        self.bit_blt_buffer(x, y, &buf, src_rect.width, src_rect.height, None)
    }

    /// Composite a solid `pixel` over `rect`.
    pub fn fill_rect(&mut self, rect: Rect, pixel: &[u8]) -> Result<()> {
        self.device.layout().check_pixel(pixel)?;
        let row = pixel.repeat(TILE_SIZE as usize);
        let source = Source {
            rect,
            bytes: &row,
            stride: 0,
            mask: None,
            mask_stride: 0,
        };
        self.paint(source)
    }

    fn paint(&mut self, source: Source<'_>) -> Result<()> {
        if source.rect.is_empty() || self.op.is_noop_at(self.opacity) {
            return Ok(());
        }
        let spans: Vec<(TileCoord, Rect)> = source.rect.tile_spans().collect();
        let layout = self.device.layout();
        let channel_bytes = layout.depth().bytes();
        let pass = Pass {
            device: self.device,
            op: self.op,
            opacity: self.opacity,
            channel_flags: self.channel_flags,
            skip_alpha: layout
                .alpha_index()
                .filter(|_| self.op.id().ignores_transparent_source())
                .map(|a| a * channel_bytes..(a + 1) * channel_bytes),
        };

        if self.op.id().needs_random() {
            // One generator shared across tiles, so tiles go in order.
            let mut fallback = RandomSource::new(0);
            let random = self.random.as_mut().unwrap_or(&mut fallback);
            for (coord, span) in spans {
                pass.composite_span(coord, span, &source, Some(&mut *random))?;
            }
        } else if self.parallel && spans.len() > 1 {
            spans
                .par_iter()
                .try_for_each(|&(coord, span)| pass.composite_span(coord, span, &source, None))?;
        } else {
            for (coord, span) in spans {
                pass.composite_span(coord, span, &source, None)?;
            }
        }

        self.dirty = Some(self.dirty.map_or(source.rect, |d| d.union(&source.rect)));
        Ok(())
    }
}

/// Painter state captured for one paint call.
#[derive(Clone)]
struct Pass<'a> {
    device: &'a PaintDevice,
    op: CompositeOp,
    opacity: f32,
    channel_flags: Option<u32>,
    /// Byte range of the alpha channel when transparent source pixels are
    /// no-ops for the op.
    skip_alpha: Option<Range<usize>>,
}

impl Pass<'_> {
    /// Composite the part `span` of `source` into the tile at `coord`.
    fn composite_span(
        &self,
        coord: TileCoord,
        span: Rect,
        source: &Source<'_>,
        random: Option<&mut RandomSource>,
    ) -> Result<()> {
        let ps = self.device.pixel_size();
        // Untouched tiles stay unallocated and keep sharing their buffer.
        if source.is_blank(span, ps, self.skip_alpha.as_ref()) {
            return Ok(());
        }
        let cell = self.device.store().ensure_writable_tile_at(coord)?;
        let mut tile = cell.lock();
        let view = tile.writable_view()?;

        let tile_stride = self.device.row_stride();
        let dst_off = (span.y - coord.y()) as usize * tile_stride + (span.x - coord.x()) as usize * ps;
        let (sx, sy) = ((span.x - source.rect.x) as usize, (span.y - source.rect.y) as usize);
        let src_off = if source.stride == 0 { 0 } else { sy * source.stride + sx * ps };
        let mask_off = sy * source.mask_stride + sx;

        let mut params = CompositeParams {
            opacity: self.opacity,
            mask: source.mask.map(|m| Mask { data: &m[mask_off..], stride: source.mask_stride }),
            channel_flags: self.channel_flags,
            random,
        };
        self.op.composite(
            &mut view[dst_off..],
            tile_stride,
            &source.bytes[src_off..],
            source.stride,
            span.width as usize,
            span.height as usize,
            &mut params,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::ChannelLayout;

    fn device() -> PaintDevice {
        PaintDevice::new(ChannelLayout::rgba8(), &[0, 0, 0, 0]).unwrap()
    }

    #[test]
    fn fill_rect_spans_tiles_and_tracks_dirty() {
        let dev = device();
        let mut p = Painter::new(&dev);
        p.fill_rect(Rect::new(60, 60, 10, 10), &[0, 0, 255, 255]).unwrap();
        assert_eq!(dev.tile_count(), 4);
        assert_eq!(dev.pixel(60, 60), [0u8, 0, 255, 255]);
        assert_eq!(dev.pixel(69, 69), [0u8, 0, 255, 255]);
        assert_eq!(dev.pixel(70, 70), [0u8; 4]);
        assert_eq!(p.take_dirty_rect(), Some(Rect::new(60, 60, 10, 10)));
        assert_eq!(p.take_dirty_rect(), None);
    }

    #[test]
    fn buffer_with_mask_and_opacity() {
        let dev = device();
        let mut p = Painter::new(&dev);
        p.set_opacity(128.0 / 255.0);
        let src = [255, 0, 0, 255].repeat(4);
        p.bit_blt_buffer(-1, -1, &src, 2, 2, Some(&[255, 0, 255, 255])).unwrap();
        assert_eq!(dev.pixel(-1, -1), [255u8, 0, 0, 128]);
        assert_eq!(dev.pixel(0, -1), [0u8; 4]);
        assert_eq!(dev.pixel(0, 0), [255u8, 0, 0, 128]);
        assert!(p.bit_blt_buffer(0, 0, &src, 3, 2, None).is_err());
        assert!(p.bit_blt_buffer(0, 0, &src, 2, 2, Some(&[1])).is_err());
    }

    #[test]
    fn unknown_op_keeps_current() {
        let dev = device();
        let mut p = Painter::new(&dev);
        p.set_composite_op("multiply").unwrap();
        assert!(p.set_composite_op("nope").is_err());
        assert_eq!(p.composite_op(), CompositeOpId::Multiply);
    }

    #[test]
    fn sequential_and_parallel_agree() {
        let a = device();
        let b = device();
        let src: Vec<u8> = (0..200 * 150 * 4).map(|i| (i % 251) as u8).collect();
        for (dev, parallel) in [(&a, false), (&b, true)] {
            let mut p = Painter::new(dev);
            p.set_parallel(parallel);
            p.set_opacity(0.7);
            p.bit_blt_buffer(-30, 17, &src, 200, 150, None).unwrap();
        }
        let r = Rect::new(-30, 17, 200, 150);
        assert_eq!(a.read_vec(r).unwrap(), b.read_vec(r).unwrap());
    }

    #[test]
    fn dissolve_replays_with_same_seed() {
        let a = device();
        let b = device();
        for dev in [&a, &b] {
            let mut p = Painter::new(dev);
            p.set_composite_op("dissolve").unwrap();
            p.set_opacity(0.5);
            p.set_random_source(RandomSource::new(7));
            p.fill_rect(Rect::new(0, 0, 100, 100), &[9, 9, 9, 255]).unwrap();
        }
        let r = Rect::new(0, 0, 100, 100);
        let pixels = a.read_vec(r).unwrap();
        assert_eq!(pixels, b.read_vec(r).unwrap());
        let painted = pixels.chunks_exact(4).filter(|p| p[3] == 255).count();
        assert!(painted > 3_000 && painted < 7_000, "painted {painted}");
    }

    #[test]
    fn invisible_paint_allocates_nothing() {
        let dev = device();
        let mut p = Painter::new(&dev);
        p.set_opacity(0.0);
        p.fill_rect(Rect::new(0, 0, 640, 640), &[255, 0, 0, 255]).unwrap();
        assert_eq!(dev.tile_count(), 0);
        assert_eq!(p.take_dirty_rect(), None);

        p.set_opacity(1.0);
        p.fill_rect(Rect::new(-100, -100, 300, 300), &[255, 0, 0, 0]).unwrap();
        let src = [255, 0, 0, 255].repeat(100 * 100);
        p.bit_blt_buffer(0, 0, &src, 100, 100, Some(&[0; 100 * 100])).unwrap();
        assert_eq!(dev.tile_count(), 0);
    }

    #[test]
    fn sparse_dab_only_touches_covered_tiles() {
        let dev = device();
        let mut p = Painter::new(&dev);
        let mut src = vec![0u8; 200 * 10 * 4];
        src[4 * 150..4 * 151].copy_from_slice(&[1, 2, 3, 255]);
        p.bit_blt_buffer(0, 0, &src, 200, 10, None).unwrap();
        assert_eq!(dev.tile_count(), 1);
        assert!(dev.store().contains(TileCoord::new(2, 0)));
        assert_eq!(dev.pixel(150, 0), [1u8, 2, 3, 255]);
    }

    #[test]
    fn transparent_paint_keeps_shared_tiles_shared() {
        let dev = device();
        dev.set_pixel(5, 5, &[9, 9, 9, 255]).unwrap();
        let copy = dev.duplicate().unwrap();
        let c = TileCoord::new(0, 0);

        let mut p = Painter::new(&copy);
        p.fill_rect(Rect::new(0, 0, 64, 64), &[255, 0, 0, 0]).unwrap();
        p.set_composite_op("multiply").unwrap();
        p.set_opacity(0.001);
        p.fill_rect(Rect::new(0, 0, 64, 64), &[255, 0, 0, 255]).unwrap();
        assert!(copy.store().tile_at(c).shares_data_with(&dev.store().tile_at(c)));
    }

    #[test]
    fn copy_still_writes_transparent_source() {
        let dev = device();
        dev.set_pixel(1, 1, &[9, 9, 9, 255]).unwrap();
        let mut p = Painter::new(&dev);
        p.set_composite_op("copy").unwrap();
        p.fill_rect(Rect::new(0, 0, 4, 4), &[0, 0, 0, 0]).unwrap();
        assert_eq!(dev.pixel(1, 1), [0u8; 4]);
    }

    #[test]
    fn blt_between_devices() {
        let src = device();
        src.set_pixel(1, 1, &[1, 2, 3, 255]).unwrap();
        let dst = device();
        let mut p = Painter::new(&dst);
        p.bit_blt_device(&src, Rect::new(0, 0, 4, 4), 100, 100).unwrap();
        assert_eq!(dst.pixel(101, 101), [1u8, 2, 3, 255]);
        assert_eq!(p.take_dirty_rect(), Some(Rect::new(100, 100, 4, 4)));
    }
}
