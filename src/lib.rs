#![allow(clippy::too_many_arguments)]

//! Sparse tiled pixel storage and compositing for a raster paint engine.
//!
//! A [`PaintDevice`] is an unbounded 2-D pixel surface split into 64×64
//! tiles. Tiles are allocated on first write, shared copy-on-write between
//! devices and snapshots, and reclaimed through quiescent-state based
//! reclamation once no reader can still see them. [`ops::Painter`] composites
//! brush dabs and other devices onto a device with the ops of
//! [`ops::CompositeOpId`].

pub mod config;
pub mod device;
pub mod error;
pub mod geometry;
pub mod io;
pub mod iterators;
pub mod logger;
pub mod ops;
pub mod random;
pub mod tiles;

pub use config::EngineConfig;
pub use device::PaintDevice;
pub use error::{Result, TileError};
pub use geometry::{Rect, TILE_SIZE, TileCoord};
pub use ops::{CompositeOp, CompositeOpId, CompositeParams, Painter};
pub use random::{EntropySource, FixedEntropy, PerStrokeRandomSource, RandomSource, SystemEntropy};
pub use tiles::{ChannelDepth, ChannelLayout, Pixel, TileStore};
