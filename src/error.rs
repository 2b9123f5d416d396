use thiserror::Error;

/// Errors reported by the tile engine.
///
/// Per-pixel paths clamp instead of failing; the variants here are either
/// configuration errors (reported when a brush or device is set up),
/// allocation failures, or persistence problems.
#[derive(Debug, Error)]
pub enum TileError {
    #[error("offset ({x}, {y}) is outside a {width}x{height} area")]
    OutOfBounds { x: i32, y: i32, width: i32, height: i32 },

    #[error("failed to allocate {bytes} bytes of tile memory")]
    AllocationFailure { bytes: usize },

    #[error("unknown composite operation '{0}'")]
    InvalidCompositeOp(String),

    #[error("invalid channel layout: {0}")]
    InvalidChannelLayout(String),

    #[error("pixel size mismatch: expected {expected} bytes, found {found}")]
    LayoutMismatch { expected: usize, found: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("tile swap failed: {0}")]
    Swap(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<Box<bincode::ErrorKind>> for TileError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        TileError::Serialize(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TileError>;
