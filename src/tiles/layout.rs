// ============================================================================
// CHANNEL LAYOUT – how the bytes of one pixel are interpreted
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{Result, TileError};

/// Largest number of channels a layout may declare.
pub const MAX_CHANNELS: usize = 8;

/// Largest pixel size in bytes (`MAX_CHANNELS` 16-bit channels).
pub const MAX_PIXEL_SIZE: usize = MAX_CHANNELS * 2;

/// Storage type of every channel in a pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelDepth {
    U8,
    U16,
}

impl ChannelDepth {
    pub fn bytes(&self) -> usize {
        match self {
            ChannelDepth::U8 => 1,
            ChannelDepth::U16 => 2,
        }
    }

    /// Value representing "fully on" (opaque for alpha).
    pub fn max_value(&self) -> u32 {
        match self {
            ChannelDepth::U8 => u8::MAX as u32,
            ChannelDepth::U16 => u16::MAX as u32,
        }
    }
}

/// Channel configuration of a paint device.
///
/// All channels share one depth. 16-bit channels are stored in native byte
/// order. The alpha channel, if any, may sit at any index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelLayout {
    depth: ChannelDepth,
    channels: u8,
    alpha: Option<u8>,
}

impl ChannelLayout {
    /// Build a layout, rejecting channel counts outside `1..=MAX_CHANNELS`
    /// and alpha indices outside the pixel.
    pub fn new(depth: ChannelDepth, channels: usize, alpha: Option<usize>) -> Result<Self> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(TileError::InvalidChannelLayout(format!(
                "{} channels (supported: 1..={})",
                channels, MAX_CHANNELS
            )));
        }
        if let Some(a) = alpha
            && a >= channels
        {
            return Err(TileError::InvalidChannelLayout(format!(
                "alpha index {} outside {} channels",
                a, channels
            )));
        }
        Ok(Self {
            depth,
            channels: channels as u8,
            alpha: alpha.map(|a| a as u8),
        })
    }

    /// 8-bit RGBA with alpha last.
    pub const fn rgba8() -> Self {
        Self { depth: ChannelDepth::U8, channels: 4, alpha: Some(3) }
    }

    /// 16-bit RGBA with alpha last.
    pub const fn rgba16() -> Self {
        Self { depth: ChannelDepth::U16, channels: 4, alpha: Some(3) }
    }

    /// 8-bit gray + alpha.
    pub const fn graya8() -> Self {
        Self { depth: ChannelDepth::U8, channels: 2, alpha: Some(1) }
    }

    /// Single 8-bit alpha channel (selection masks).
    pub const fn alpha8() -> Self {
        Self { depth: ChannelDepth::U8, channels: 1, alpha: Some(0) }
    }

    /// Parse a layout name as used in settings files.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "rgba8" => Ok(Self::rgba8()),
            "rgba16" => Ok(Self::rgba16()),
            "graya8" => Ok(Self::graya8()),
            "alpha8" => Ok(Self::alpha8()),
            other => Err(TileError::InvalidChannelLayout(format!("unknown layout '{}'", other))),
        }
    }

    /// Name accepted by [`ChannelLayout::from_name`], if this is a named layout.
    pub fn name(&self) -> Option<&'static str> {
        if *self == Self::rgba8() {
            Some("rgba8")
        } else if *self == Self::rgba16() {
            Some("rgba16")
        } else if *self == Self::graya8() {
            Some("graya8")
        } else if *self == Self::alpha8() {
            Some("alpha8")
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn depth(&self) -> ChannelDepth {
        self.depth
    }

    #[inline(always)]
    pub fn channels(&self) -> usize {
        self.channels as usize
    }

    #[inline(always)]
    pub fn alpha_index(&self) -> Option<usize> {
        self.alpha.map(|a| a as usize)
    }

    #[inline(always)]
    pub fn pixel_size(&self) -> usize {
        self.channels as usize * self.depth.bytes()
    }

    /// Check that `bytes` has exactly one pixel's worth of data.
    pub fn check_pixel(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.pixel_size() {
            return Err(TileError::LayoutMismatch {
                expected: self.pixel_size(),
                found: bytes.len(),
            });
        }
        Ok(())
    }
}

/// A single pixel copied out of a tile.
///
/// Fixed capacity so that it is `Copy` and never allocates; only the first
/// `len` bytes are meaningful.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pixel {
    bytes: [u8; MAX_PIXEL_SIZE],
    len: u8,
}

impl Pixel {
    /// Copy a pixel from `src`. Extra bytes beyond `MAX_PIXEL_SIZE` are ignored.
    #[inline]
    pub fn from_slice(src: &[u8]) -> Self {
        let len = src.len().min(MAX_PIXEL_SIZE);
        let mut bytes = [0u8; MAX_PIXEL_SIZE];
        bytes[..len].copy_from_slice(&src[..len]);
        Self { bytes, len: len as u8 }
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::ops::Deref for Pixel {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for Pixel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pixel({:?})", self.as_slice())
    }
}

impl PartialEq<[u8]> for Pixel {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_slice() == other
    }
}

impl<const N: usize> PartialEq<[u8; N]> for Pixel {
    fn eq(&self, other: &[u8; N]) -> bool {
        self.as_slice() == other.as_slice()
    }
}
