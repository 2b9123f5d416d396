// ============================================================================
// COMPOSITE OPERATIONS – per-pixel blending over arbitrary channel layouts
// ============================================================================

use serde::{Deserialize, Serialize};

use super::composite_math::{Channel, U8, U16, div, inv, lerp, mul, mul3, scale_opacity, union};
use crate::error::{Result, TileError};
use crate::random::RandomSource;
use crate::tiles::{ChannelDepth, ChannelLayout};

/// Identifier of a composite operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CompositeOpId {
    #[default]
    Over,
    Copy,
    Erase,
    Behind,
    Multiply,
    Screen,
    Darken,
    Lighten,
    Addition,
    Subtract,
    Difference,
    Overlay,
    Dissolve,
}

impl CompositeOpId {
    pub fn all() -> &'static [CompositeOpId] {
        &[
            CompositeOpId::Over,
            CompositeOpId::Copy,
            CompositeOpId::Erase,
            CompositeOpId::Behind,
            CompositeOpId::Multiply,
            CompositeOpId::Screen,
            CompositeOpId::Darken,
            CompositeOpId::Lighten,
            CompositeOpId::Addition,
            CompositeOpId::Subtract,
            CompositeOpId::Difference,
            CompositeOpId::Overlay,
            CompositeOpId::Dissolve,
        ]
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            CompositeOpId::Over => "Normal",
            CompositeOpId::Copy => "Copy",
            CompositeOpId::Erase => "Erase",
            CompositeOpId::Behind => "Behind",
            CompositeOpId::Multiply => "Multiply",
            CompositeOpId::Screen => "Screen",
            CompositeOpId::Darken => "Darken",
            CompositeOpId::Lighten => "Lighten",
            CompositeOpId::Addition => "Addition",
            CompositeOpId::Subtract => "Subtract",
            CompositeOpId::Difference => "Difference",
            CompositeOpId::Overlay => "Overlay",
            CompositeOpId::Dissolve => "Dissolve",
        }
    }

    /// Stable identifier string, as accepted by [`CompositeOpId::from_id`].
    pub fn id(&self) -> &'static str {
        match self {
            CompositeOpId::Over => "over",
            CompositeOpId::Copy => "copy",
            CompositeOpId::Erase => "erase",
            CompositeOpId::Behind => "behind",
            CompositeOpId::Multiply => "multiply",
            CompositeOpId::Screen => "screen",
            CompositeOpId::Darken => "darken",
            CompositeOpId::Lighten => "lighten",
            CompositeOpId::Addition => "addition",
            CompositeOpId::Subtract => "subtract",
            CompositeOpId::Difference => "difference",
            CompositeOpId::Overlay => "overlay",
            CompositeOpId::Dissolve => "dissolve",
        }
    }

    /// Parse an identifier (case-insensitive, common aliases accepted).
    pub fn from_id(id: &str) -> Result<Self> {
        let op = match id.trim().to_ascii_lowercase().as_str() {
            "over" | "normal" => CompositeOpId::Over,
            "copy" => CompositeOpId::Copy,
            "erase" => CompositeOpId::Erase,
            "behind" => CompositeOpId::Behind,
            "multiply" => CompositeOpId::Multiply,
            "screen" => CompositeOpId::Screen,
            "darken" => CompositeOpId::Darken,
            "lighten" => CompositeOpId::Lighten,
            "addition" | "add" | "plus" => CompositeOpId::Addition,
            "subtract" | "minus" => CompositeOpId::Subtract,
            "difference" | "diff" => CompositeOpId::Difference,
            "overlay" => CompositeOpId::Overlay,
            "dissolve" => CompositeOpId::Dissolve,
            _ => return Err(TileError::InvalidCompositeOp(id.to_string())),
        };
        Ok(op)
    }

    /// Convert to a stable u8 for binary serialization
    pub fn to_u8(&self) -> u8 {
        match self {
            CompositeOpId::Over => 0,
            CompositeOpId::Copy => 1,
            CompositeOpId::Erase => 2,
            CompositeOpId::Behind => 3,
            CompositeOpId::Multiply => 4,
            CompositeOpId::Screen => 5,
            CompositeOpId::Darken => 6,
            CompositeOpId::Lighten => 7,
            CompositeOpId::Addition => 8,
            CompositeOpId::Subtract => 9,
            CompositeOpId::Difference => 10,
            CompositeOpId::Overlay => 11,
            CompositeOpId::Dissolve => 12,
        }
    }

    /// Reconstruct from a u8 (defaults to Over for unknown values)
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => CompositeOpId::Copy,
            2 => CompositeOpId::Erase,
            3 => CompositeOpId::Behind,
            4 => CompositeOpId::Multiply,
            5 => CompositeOpId::Screen,
            6 => CompositeOpId::Darken,
            7 => CompositeOpId::Lighten,
            8 => CompositeOpId::Addition,
            9 => CompositeOpId::Subtract,
            10 => CompositeOpId::Difference,
            11 => CompositeOpId::Overlay,
            12 => CompositeOpId::Dissolve,
            _ => CompositeOpId::Over,
        }
    }

    /// Whether the op draws values from a random source.
    pub fn needs_random(&self) -> bool {
        matches!(self, CompositeOpId::Dissolve)
    }

    /// Whether a source pixel with zero alpha leaves the destination as is.
    /// `copy` is the only op that writes transparent source pixels.
    pub fn ignores_transparent_source(&self) -> bool {
        !matches!(self, CompositeOpId::Copy)
    }
}

impl std::str::FromStr for CompositeOpId {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_id(s)
    }
}

impl std::fmt::Display for CompositeOpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// 8-bit coverage mask, one byte per pixel, `stride` bytes per row.
#[derive(Clone, Copy, Debug)]
pub struct Mask<'a> {
    pub data: &'a [u8],
    pub stride: usize,
}

/// Per-call parameters of [`CompositeOp::composite`].
#[derive(Debug)]
pub struct CompositeParams<'a> {
    /// `0.0..=1.0`; out-of-range values are clamped and NaN counts as 0.
    pub opacity: f32,
    pub mask: Option<Mask<'a>>,
    /// Bit `i` enables channel `i`. `None` enables all channels. Clearing the
    /// alpha bit locks alpha.
    pub channel_flags: Option<u32>,
    /// Consumed by ops that need randomness (dissolve).
    pub random: Option<&'a mut RandomSource>,
}

impl Default for CompositeParams<'_> {
    fn default() -> Self {
        Self { opacity: 1.0, mask: None, channel_flags: None, random: None }
    }
}

impl<'a> CompositeParams<'a> {
    pub fn new(opacity: f32) -> Self {
        Self { opacity, ..Self::default() }
    }

    pub fn with_mask(mut self, data: &'a [u8], stride: usize) -> Self {
        self.mask = Some(Mask { data, stride });
        self
    }

    pub fn with_channel_flags(mut self, flags: u32) -> Self {
        self.channel_flags = Some(flags);
        self
    }

    pub fn with_random(mut self, random: &'a mut RandomSource) -> Self {
        self.random = Some(random);
        self
    }
}

/// A composite operation bound to a channel layout.
///
/// Construction validates the identifier, so the per-pixel path never fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompositeOp {
    id: CompositeOpId,
    layout: ChannelLayout,
}

/// Loop invariants of one composite call, already scaled to the channel range.
#[derive(Clone, Copy)]
struct Ctx {
    channels: usize,
    alpha: Option<usize>,
    flags: u32,
    opacity: u32,
    alpha_locked: bool,
}

impl Ctx {
    #[inline(always)]
    fn color_channels(&self) -> impl Iterator<Item = usize> + use<> {
        let (alpha, flags) = (self.alpha, self.flags);
        (0..self.channels).filter(move |&ch| Some(ch) != alpha && flags & (1 << ch) != 0)
    }
}

/// Rows of `row_bytes` bytes at `stride` that fit into `len` bytes.
fn rows_that_fit(len: usize, stride: usize, row_bytes: usize, height: usize) -> usize {
    if height == 0 || row_bytes == 0 {
        return height;
    }
    if len < row_bytes {
        return 0;
    }
    if stride == 0 {
        return height;
    }
    height.min((len - row_bytes) / stride + 1)
}

#[inline(always)]
#[allow(clippy::too_many_arguments)]
fn for_each_pixel<C: Channel>(
    ps: usize,
    dst: &mut [u8],
    dst_stride: usize,
    src: &[u8],
    src_stride: usize,
    mask: Option<Mask<'_>>,
    width: usize,
    rows: usize,
    mut f: impl FnMut(&mut [u8], &[u8], u32),
) {
    let row_bytes = width * ps;
    for r in 0..rows {
        let d0 = r * dst_stride;
        let s0 = r * src_stride;
        let d_row = &mut dst[d0..d0 + row_bytes];
        let s_row = &src[s0..s0 + row_bytes];
        match mask {
            Some(m) => {
                let m_row = &m.data[r * m.stride..r * m.stride + width];
                for ((d, s), &cov) in d_row.chunks_exact_mut(ps).zip(s_row.chunks_exact(ps)).zip(m_row) {
                    f(d, s, C::from_u8(cov));
                }
            }
            None => {
                for (d, s) in d_row.chunks_exact_mut(ps).zip(s_row.chunks_exact(ps)) {
                    f(d, s, C::MAX);
                }
            }
        }
    }
}

// ---- pixel kernels ---------------------------------------------------------

/// Source-over with blend function `f(src, dst)` applied to colour channels.
/// `f = |s, _| s` is plain "over".
#[inline(always)]
fn over<C: Channel>(
    ctx: &Ctx,
    dst: &mut [u8],
    src: &[u8],
    mask: u32,
    clip_to_dst: bool,
    f: impl Fn(u32, u32) -> u32,
) {
    let mut src_alpha = ctx.alpha.map_or(C::MAX, |a| C::load(src, a));
    let dst_alpha = ctx.alpha.map_or(C::MAX, |a| C::load(dst, a));
    if clip_to_dst {
        src_alpha = src_alpha.min(dst_alpha);
    }
    let sa = mul3::<C>(src_alpha, ctx.opacity, mask);
    if sa == 0 {
        return;
    }

    let blend = if sa == C::MAX {
        if let Some(a) = ctx.alpha
            && !ctx.alpha_locked
        {
            C::store(dst, a, C::MAX);
        }
        C::MAX
    } else if dst_alpha == C::MAX {
        sa
    } else {
        let new_alpha = dst_alpha + mul::<C>(C::MAX - dst_alpha, sa);
        if let Some(a) = ctx.alpha
            && !ctx.alpha_locked
        {
            C::store(dst, a, new_alpha);
        }
        if new_alpha == 0 { sa } else { div::<C>(sa, new_alpha) }
    };

    if blend == C::MAX {
        for ch in ctx.color_channels() {
            let v = f(C::load(src, ch), C::load(dst, ch));
            C::store(dst, ch, v);
        }
    } else {
        for ch in ctx.color_channels() {
            let d = C::load(dst, ch);
            let v = f(C::load(src, ch), d);
            C::store(dst, ch, lerp::<C>(d, v, blend));
        }
    }
}

#[inline(always)]
fn copy<C: Channel>(ctx: &Ctx, dst: &mut [u8], src: &[u8], mask: u32) {
    let t = mul::<C>(ctx.opacity, mask);
    if t == 0 {
        return;
    }
    for ch in 0..ctx.channels {
        if ctx.flags & (1 << ch) == 0 {
            continue;
        }
        let v = if t == C::MAX { C::load(src, ch) } else { lerp::<C>(C::load(dst, ch), C::load(src, ch), t) };
        C::store(dst, ch, v);
    }
}

#[inline(always)]
fn erase<C: Channel>(ctx: &Ctx, dst: &mut [u8], src: &[u8], mask: u32) {
    let Some(a) = ctx.alpha else { return };
    if ctx.alpha_locked {
        return;
    }
    let sa = mul3::<C>(C::load(src, a), ctx.opacity, mask);
    if sa == 0 {
        return;
    }
    let da = C::load(dst, a);
    C::store(dst, a, mul::<C>(da, inv::<C>(sa)));
}

#[inline(always)]
fn behind<C: Channel>(ctx: &Ctx, dst: &mut [u8], src: &[u8], mask: u32) {
    let Some(a) = ctx.alpha else { return };
    let da = C::load(dst, a);
    if da == C::MAX {
        return;
    }
    let sa = mul3::<C>(C::load(src, a), ctx.opacity, mask);
    if sa == 0 {
        return;
    }
    let new_alpha = union::<C>(da, sa);
    if da == 0 {
        for ch in ctx.color_channels() {
            C::store(dst, ch, C::load(src, ch));
        }
    } else {
        for ch in ctx.color_channels() {
            let premul = mul::<C>(C::load(src, ch), sa);
            let blended = lerp::<C>(premul, C::load(dst, ch), da);
            C::store(dst, ch, div::<C>(blended, new_alpha));
        }
    }
    if !ctx.alpha_locked {
        C::store(dst, a, new_alpha);
    }
}

#[inline(always)]
fn dissolve<C: Channel>(ctx: &Ctx, dst: &mut [u8], src: &[u8], mask: u32, rng: &mut RandomSource) {
    let src_alpha = ctx.alpha.map_or(C::MAX, |a| C::load(src, a));
    let sa = mul3::<C>(src_alpha, ctx.opacity, mask);
    if sa == 0 {
        return;
    }
    let draw = rng.generate_range(0, C::MAX as i64 - 1) as u32;
    if draw >= sa {
        return;
    }
    for ch in ctx.color_channels() {
        C::store(dst, ch, C::load(src, ch));
    }
    if let Some(a) = ctx.alpha
        && !ctx.alpha_locked
    {
        C::store(dst, a, C::MAX);
    }
}

// ---- blend functions (source, destination) ---------------------------------

#[inline(always)]
fn screen<C: Channel>(s: u32, d: u32) -> u32 {
    s + d - mul::<C>(s, d)
}

#[inline(always)]
fn overlay<C: Channel>(s: u32, d: u32) -> u32 {
    // Hard light with the roles swapped.
    if d > C::MAX / 2 {
        screen::<C>(2 * d - C::MAX, s)
    } else {
        mul::<C>(2 * d, s)
    }
}

impl CompositeOp {
    /// Look up `id` for `layout`. Fails with `InvalidCompositeOp` for unknown
    /// identifiers.
    pub fn new(id: &str, layout: ChannelLayout) -> Result<Self> {
        Ok(Self::from_op_id(CompositeOpId::from_id(id)?, layout))
    }

    pub fn from_op_id(id: CompositeOpId, layout: ChannelLayout) -> Self {
        Self { id, layout }
    }

    pub fn id(&self) -> CompositeOpId {
        self.id
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    /// True when `opacity` rounds to zero for this layout's depth, so
    /// compositing cannot change any pixel.
    pub fn is_noop_at(&self, opacity: f32) -> bool {
        match self.layout.depth() {
            ChannelDepth::U8 => scale_opacity::<U8>(opacity) == 0,
            ChannelDepth::U16 => scale_opacity::<U16>(opacity) == 0,
        }
    }

    /// Blend `height` rows of `width` pixels of `src` into `dst`.
    ///
    /// Strides are in bytes; a source stride of 0 repeats the first source
    /// row. Rows that do not fit the buffers are skipped (debug builds
    /// assert instead).
    #[allow(clippy::too_many_arguments)]
    pub fn composite(
        &self,
        dst: &mut [u8],
        dst_stride: usize,
        src: &[u8],
        src_stride: usize,
        width: usize,
        height: usize,
        params: &mut CompositeParams<'_>,
    ) {
        let ps = self.layout.pixel_size();
        let row_bytes = width * ps;
        let mut rows = rows_that_fit(dst.len(), dst_stride, row_bytes, height)
            .min(rows_that_fit(src.len(), src_stride, row_bytes, height));
        if let Some(m) = &params.mask {
            rows = rows.min(rows_that_fit(m.data.len(), m.stride, width, height));
        }
        debug_assert_eq!(rows, height, "composite buffers smaller than {}x{}", width, height);
        if rows == 0 || width == 0 {
            return;
        }
        match self.layout.depth() {
            ChannelDepth::U8 => self.run::<U8>(dst, dst_stride, src, src_stride, width, rows, params),
            ChannelDepth::U16 => self.run::<U16>(dst, dst_stride, src, src_stride, width, rows, params),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run<C: Channel>(
        &self,
        dst: &mut [u8],
        dst_stride: usize,
        src: &[u8],
        src_stride: usize,
        width: usize,
        rows: usize,
        params: &mut CompositeParams<'_>,
    ) {
        let flags = params.channel_flags.unwrap_or(u32::MAX);
        let alpha = self.layout.alpha_index();
        let ctx = Ctx {
            channels: self.layout.channels(),
            alpha,
            flags,
            opacity: scale_opacity::<C>(params.opacity),
            alpha_locked: alpha.is_some_and(|a| flags & (1 << a) == 0),
        };
        if ctx.opacity == 0 {
            return;
        }
        let ps = self.layout.pixel_size();
        let mask = params.mask;

        macro_rules! each {
            ($f:expr) => {
                for_each_pixel::<C>(ps, dst, dst_stride, src, src_stride, mask, width, rows, $f)
            };
        }

        match self.id {
            CompositeOpId::Over => each!(|d, s, m| over::<C>(&ctx, d, s, m, false, |s, _| s)),
            CompositeOpId::Copy => each!(|d, s, m| copy::<C>(&ctx, d, s, m)),
            CompositeOpId::Erase => each!(|d, s, m| erase::<C>(&ctx, d, s, m)),
            CompositeOpId::Behind => each!(|d, s, m| behind::<C>(&ctx, d, s, m)),
            CompositeOpId::Multiply => each!(|d, s, m| over::<C>(&ctx, d, s, m, true, mul::<C>)),
            CompositeOpId::Screen => each!(|d, s, m| over::<C>(&ctx, d, s, m, true, screen::<C>)),
            CompositeOpId::Darken => each!(|d, s, m| over::<C>(&ctx, d, s, m, true, |s, d| s.min(d))),
            CompositeOpId::Lighten => each!(|d, s, m| over::<C>(&ctx, d, s, m, true, |s, d| s.max(d))),
            CompositeOpId::Addition => {
                each!(|d, s, m| over::<C>(&ctx, d, s, m, true, |s, d| (s + d).min(C::MAX)))
            }
            CompositeOpId::Subtract => {
                each!(|d, s, m| over::<C>(&ctx, d, s, m, true, |s, d| d.saturating_sub(s)))
            }
            CompositeOpId::Difference => each!(|d, s, m| over::<C>(&ctx, d, s, m, true, |s, d| s.abs_diff(d))),
            CompositeOpId::Overlay => each!(|d, s, m| over::<C>(&ctx, d, s, m, true, overlay::<C>)),
            CompositeOpId::Dissolve => {
                let mut fallback = RandomSource::new(0);
                let rng: &mut RandomSource = match params.random.as_deref_mut() {
                    Some(r) => r,
                    None => &mut fallback,
                };
                each!(|d, s, m| dissolve::<C>(&ctx, d, s, m, rng))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn over8() -> CompositeOp {
        CompositeOp::new("over", ChannelLayout::rgba8()).unwrap()
    }

    fn one(op: &CompositeOp, dst: [u8; 4], src: [u8; 4], opacity: f32) -> [u8; 4] {
        let mut d = dst;
        op.composite(&mut d, 4, &src, 4, 1, 1, &mut CompositeParams::new(opacity));
        d
    }

    #[test]
    fn half_opacity_red_over_transparent() {
        assert_eq!(one(&over8(), [0, 0, 0, 0], [255, 0, 0, 255], 128.0 / 255.0), [255, 0, 0, 128]);
    }

    #[test]
    fn partial_over_opaque_lerps_colours() {
        assert_eq!(one(&over8(), [0, 0, 255, 255], [255, 0, 0, 255], 128.0 / 255.0), [128, 0, 127, 255]);
    }

    #[test]
    fn unknown_ids_are_rejected() {
        assert!(matches!(
            CompositeOp::new("hue-shift", ChannelLayout::rgba8()),
            Err(TileError::InvalidCompositeOp(_))
        ));
        assert_eq!(CompositeOpId::from_id("Normal").unwrap(), CompositeOpId::Over);
        assert_eq!("PLUS".parse::<CompositeOpId>().unwrap(), CompositeOpId::Addition);
        for op in CompositeOpId::all() {
            assert_eq!(CompositeOpId::from_u8(op.to_u8()), *op);
            assert_eq!(CompositeOpId::from_id(op.id()).unwrap(), *op);
        }
    }

    #[test]
    fn locked_alpha_keeps_destination_alpha() {
        let op = over8();
        let mut d = [0u8, 0, 0, 100];
        let mut params = CompositeParams::new(1.0).with_channel_flags(0b0111);
        op.composite(&mut d, 4, &[255, 255, 255, 255], 4, 1, 1, &mut params);
        assert_eq!(d, [255, 255, 255, 100]);
    }

    #[test]
    fn mask_scales_coverage() {
        let op = over8();
        let mut d = [0u8, 0, 0, 0, 0, 0, 0, 0];
        let src = [10u8, 20, 30, 255, 10, 20, 30, 255];
        let mut params = CompositeParams::new(1.0).with_mask(&[0, 255], 2);
        op.composite(&mut d, 8, &src, 8, 2, 1, &mut params);
        assert_eq!(d, [0, 0, 0, 0, 10, 20, 30, 255]);
    }

    #[test]
    fn erase_and_behind() {
        let erase = CompositeOp::new("erase", ChannelLayout::rgba8()).unwrap();
        assert_eq!(one(&erase, [9, 9, 9, 255], [0, 0, 0, 255], 1.0), [9, 9, 9, 0]);
        assert_eq!(one(&erase, [9, 9, 9, 255], [0, 0, 0, 255], 0.0), [9, 9, 9, 255]);

        let behind = CompositeOp::new("behind", ChannelLayout::rgba8()).unwrap();
        assert_eq!(one(&behind, [1, 2, 3, 255], [200, 200, 200, 255], 1.0), [1, 2, 3, 255]);
        assert_eq!(one(&behind, [0, 0, 0, 0], [200, 100, 50, 255], 1.0), [200, 100, 50, 255]);
    }

    #[test]
    fn multiply_leaves_transparent_destination_alone() {
        let op = CompositeOp::new("multiply", ChannelLayout::rgba8()).unwrap();
        assert_eq!(one(&op, [0, 0, 0, 0], [255, 0, 0, 255], 1.0), [0, 0, 0, 0]);
        assert_eq!(one(&op, [128, 255, 255, 255], [255, 128, 0, 255], 1.0), [128, 128, 0, 255]);
    }

    #[test]
    fn copy_replaces_everything_at_full_opacity() {
        let op = CompositeOp::new("copy", ChannelLayout::rgba8()).unwrap();
        assert_eq!(one(&op, [9, 9, 9, 255], [1, 2, 3, 0], 1.0), [1, 2, 3, 0]);
    }

    #[test]
    fn dissolve_is_all_or_nothing_per_pixel() {
        let op = CompositeOp::new("dissolve", ChannelLayout::rgba8()).unwrap();
        let src = [50u8, 60, 70, 128].repeat(64);
        let mut dst = vec![0u8; 256];
        let mut rng = RandomSource::new(7);
        op.composite(&mut dst, 256, &src, 256, 64, 1, &mut CompositeParams::new(1.0).with_random(&mut rng));
        let painted = dst.chunks(4).filter(|p| *p == [50, 60, 70, 255]).count();
        let untouched = dst.chunks(4).filter(|p| *p == [0, 0, 0, 0]).count();
        assert_eq!(painted + untouched, 64);
        assert!(painted > 0 && untouched > 0);
    }
}
