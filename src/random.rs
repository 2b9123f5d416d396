// ============================================================================
// STROKE RANDOM SOURCE – reproducible per-stroke random numbers
// ============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of seeds for strokes created without an explicit seed.
pub trait EntropySource: Send + Sync {
    fn next_seed(&self) -> u64;
}

/// Seeds mixed from the wall clock and a per-process counter.
#[derive(Debug, Default)]
pub struct SystemEntropy {
    counter: AtomicU64,
}

impl SystemEntropy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntropySource for SystemEntropy {
    fn next_seed(&self) -> u64 {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        splitmix64(nanos ^ n.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ 0x517C_C1B7_2722_0A95)
    }
}

/// Always hands out the same seed. For tests and replays.
#[derive(Clone, Copy, Debug)]
pub struct FixedEntropy(pub u64);

impl EntropySource for FixedEntropy {
    fn next_seed(&self) -> u64 {
        self.0
    }
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// FNV-1a, used to derive a stream seed from a key.
fn fnv1a(key: &str) -> u64 {
    let mut h: u64 = 0xCBF2_9CE4_8422_2325;
    for b in key.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01B3);
    }
    h
}

/// xorshift64* generator owned by one stroke.
///
/// Three machine words; `clone()` copies the state so both copies continue
/// with the same sequence independently.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RandomSource {
    state: u64,
    seed: u64,
    lod: u32,
}

impl RandomSource {
    /// Smallest value [`RandomSource::generate`] returns.
    pub const NATIVE_MIN: u64 = 1;
    /// Largest value [`RandomSource::generate`] returns.
    pub const NATIVE_MAX: u64 = u64::MAX;

    pub fn new(seed: u64) -> Self {
        let mut state = splitmix64(seed);
        if state == 0 {
            state = 0x2545_F491_4F6C_DD1D;
        }
        Self { state, seed, lod: 0 }
    }

    /// Seed drawn from `entropy`. Strokes that must replay should keep
    /// [`RandomSource::seed`] and use [`RandomSource::new`].
    pub fn from_entropy(entropy: &dyn EntropySource) -> Self {
        Self::new(entropy.next_seed())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn level_of_detail(&self) -> u32 {
        self.lod
    }

    /// Copy of the current state tagged with another level of detail.
    pub fn clone_for_lod(&self, lod: u32) -> Self {
        Self { lod, ..self.clone() }
    }

    /// Next value in `NATIVE_MIN..=NATIVE_MAX`.
    #[inline]
    pub fn generate(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform value in `min..=max` (bounds may be given in either order).
    pub fn generate_range(&mut self, min: i64, max: i64) -> i64 {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        let span = (hi as i128 - lo as i128 + 1) as u128;
        // Raw values are the 2^64 - 1 numbers NATIVE_MIN..=NATIVE_MAX.
        let count = u64::MAX as u128;
        if span >= count {
            // Only the full i64 range gets here; one value is unreachable.
            return lo.wrapping_add((self.generate() - 1) as i64);
        }
        let limit = count - count % span;
        loop {
            let v = (self.generate() - 1) as u128;
            if v < limit {
                return (lo as i128 + (v % span) as i128) as i64;
            }
        }
    }

    /// Uniform value in `[0, 1)`.
    #[inline]
    pub fn generate_normalized(&mut self) -> f64 {
        (self.generate() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Normally distributed value (Box-Muller).
    pub fn generate_gaussian(&mut self, mean: f64, sigma: f64) -> f64 {
        let u1 = 1.0 - self.generate_normalized(); // (0, 1]
        let u2 = self.generate_normalized();
        let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
        mean + sigma * z
    }
}

/// Random source with independent named streams, all derived from one
/// stroke seed. A brush option asking for `"rotation"` gets the same
/// sequence on every replay, no matter which other streams were used.
#[derive(Clone, Debug)]
pub struct PerStrokeRandomSource {
    seed: u64,
    lod: u32,
    streams: HashMap<String, RandomSource>,
}

impl PerStrokeRandomSource {
    pub fn new(seed: u64) -> Self {
        Self { seed, lod: 0, streams: HashMap::new() }
    }

    pub fn from_entropy(entropy: &dyn EntropySource) -> Self {
        Self::new(entropy.next_seed())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn level_of_detail(&self) -> u32 {
        self.lod
    }

    fn stream(&mut self, key: &str) -> &mut RandomSource {
        let seed = self.seed;
        let lod = self.lod;
        self.streams
            .entry(key.to_string())
            .or_insert_with(|| RandomSource::new(seed ^ fnv1a(key)).clone_for_lod(lod))
    }

    pub fn generate_int(&mut self, key: &str) -> u64 {
        self.stream(key).generate()
    }

    pub fn generate_int_range(&mut self, key: &str, min: i64, max: i64) -> i64 {
        self.stream(key).generate_range(min, max)
    }

    pub fn generate_real(&mut self, key: &str) -> f64 {
        self.stream(key).generate_normalized()
    }

    /// Copy of every stream, continuing from the current positions.
    pub fn clone_for_lod(&self, lod: u32) -> Self {
        Self {
            seed: self.seed,
            lod,
            streams: self
                .streams
                .iter()
                .map(|(k, v)| (k.clone(), v.clone_for_lod(lod)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_never_returns_zero() {
        let mut r = RandomSource::new(0);
        for _ in 0..10_000 {
            assert!(r.generate() >= RandomSource::NATIVE_MIN);
        }
    }

    #[test]
    fn range_covers_bounds_inclusively() {
        let mut r = RandomSource::new(99);
        let mut seen = [false; 6];
        for _ in 0..1_000 {
            let v = r.generate_range(-2, 3);
            assert!((-2..=3).contains(&v));
            seen[(v + 2) as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
        assert_eq!(r.generate_range(7, 7), 7);
        let v = r.generate_range(10, -10);
        assert!((-10..=10).contains(&v));
        r.generate_range(i64::MIN, i64::MAX);
    }

    #[test]
    fn normalized_stays_in_unit_interval() {
        let mut r = RandomSource::new(5);
        for _ in 0..10_000 {
            let v = r.generate_normalized();
            assert!((0.0..1.0).contains(&v));
        }
        let mean: f64 = (0..20_000).map(|_| r.generate_gaussian(10.0, 2.0)).sum::<f64>() / 20_000.0;
        assert!((mean - 10.0).abs() < 0.1, "mean {mean}");
    }

    #[test]
    fn fixed_entropy_is_reproducible() {
        let e = FixedEntropy(1234);
        let mut a = RandomSource::from_entropy(&e);
        let mut b = RandomSource::from_entropy(&e);
        assert_eq!(a.seed(), 1234);
        assert_eq!(a.generate(), b.generate());

        let sys = SystemEntropy::new();
        assert_ne!(sys.next_seed(), sys.next_seed());
    }

    #[test]
    fn per_stroke_streams_are_independent() {
        let mut a = PerStrokeRandomSource::new(42);
        let mut b = PerStrokeRandomSource::new(42);
        let a_rot: Vec<_> = (0..4).map(|_| a.generate_int("rotation")).collect();
        b.generate_real("size");
        b.generate_real("size");
        let b_rot: Vec<_> = (0..4).map(|_| b.generate_int("rotation")).collect();
        assert_eq!(a_rot, b_rot);

        let mut lod = a.clone_for_lod(2);
        assert_eq!(lod.level_of_detail(), 2);
        assert_eq!(lod.generate_int("rotation"), a.generate_int("rotation"));
    }
}
