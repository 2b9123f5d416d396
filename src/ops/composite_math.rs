// ============================================================================
// FIXED-POINT CHANNEL MATH
// ============================================================================
//
// Channel values are integers in 0..=MAX where MAX means 1.0. Every division
// rounds to nearest (half the divisor is added first) so repeated compositing
// does not drift darker.

/// Storage type of one channel.
pub trait Channel: Copy + Send + Sync + 'static {
    /// Value representing 1.0.
    const MAX: u32;
    /// Bytes per channel.
    const BYTES: usize;

    /// Channel `index` of the pixel `px`.
    fn load(px: &[u8], index: usize) -> u32;

    /// Store `value` (already within 0..=MAX) as channel `index` of `px`.
    fn store(px: &mut [u8], index: usize, value: u32);

    /// Scale an 8-bit mask coverage value to this channel's range.
    fn from_u8(v: u8) -> u32;
}

#[derive(Clone, Copy, Debug)]
pub struct U8;

#[derive(Clone, Copy, Debug)]
pub struct U16;

impl Channel for U8 {
    const MAX: u32 = u8::MAX as u32;
    const BYTES: usize = 1;

    #[inline(always)]
    fn load(px: &[u8], index: usize) -> u32 {
        px[index] as u32
    }

    #[inline(always)]
    fn store(px: &mut [u8], index: usize, value: u32) {
        px[index] = value as u8;
    }

    #[inline(always)]
    fn from_u8(v: u8) -> u32 {
        v as u32
    }
}

impl Channel for U16 {
    const MAX: u32 = u16::MAX as u32;
    const BYTES: usize = 2;

    #[inline(always)]
    fn load(px: &[u8], index: usize) -> u32 {
        let o = index * 2;
        u16::from_ne_bytes([px[o], px[o + 1]]) as u32
    }

    #[inline(always)]
    fn store(px: &mut [u8], index: usize, value: u32) {
        let o = index * 2;
        px[o..o + 2].copy_from_slice(&(value as u16).to_ne_bytes());
    }

    #[inline(always)]
    fn from_u8(v: u8) -> u32 {
        v as u32 * 257
    }
}

/// a·b
#[inline(always)]
pub fn mul<C: Channel>(a: u32, b: u32) -> u32 {
    let m = C::MAX as u64;
    ((a as u64 * b as u64 + m / 2) / m) as u32
}

/// a·b·c
#[inline(always)]
pub fn mul3<C: Channel>(a: u32, b: u32, c: u32) -> u32 {
    let m2 = C::MAX as u64 * C::MAX as u64;
    ((a as u64 * b as u64 * c as u64 + m2 / 2) / m2) as u32
}

/// a / b, clamped to MAX. Division by zero yields MAX.
#[inline(always)]
pub fn div<C: Channel>(a: u32, b: u32) -> u32 {
    if b == 0 {
        return C::MAX;
    }
    let m = C::MAX as u64;
    (((a as u64 * m + b as u64 / 2) / b as u64).min(m)) as u32
}

/// Move `dst` toward `src` by `t` (t = MAX gives `src`).
#[inline(always)]
pub fn lerp<C: Channel>(dst: u32, src: u32, t: u32) -> u32 {
    let m = C::MAX as u64;
    let t = t as u64;
    ((src as u64 * t + dst as u64 * (m - t) + m / 2) / m) as u32
}

/// 1 − a
#[inline(always)]
pub fn inv<C: Channel>(a: u32) -> u32 {
    C::MAX - a.min(C::MAX)
}

/// Coverage of two shapes painted on top of each other: a + b − a·b.
#[inline(always)]
pub fn union<C: Channel>(a: u32, b: u32) -> u32 {
    (a + b).saturating_sub(mul::<C>(a, b)).min(C::MAX)
}

/// Opacity in `[0, 1]` to channel range. NaN counts as 0; out-of-range values
/// are clamped.
#[inline]
pub fn scale_opacity<C: Channel>(opacity: f32) -> u32 {
    if opacity.is_nan() {
        return 0;
    }
    (opacity.clamp(0.0, 1.0) * C::MAX as f32).round() as u32
}
