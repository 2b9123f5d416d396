use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::device::PaintDevice;
use crate::error::{Result, TileError};
use crate::geometry::{TILE_PIXELS, TILE_SIZE, TileCoord};
use crate::tiles::{ChannelLayout, Tile, TileData};

// ============================================================================
// PFT TILE FILE FORMAT
// ============================================================================

/// Magic header of the sparse tile format.
const PFT_MAGIC_V1: &str = "PFT1";
const PFT_VERSION: u32 = 1;
/// Maximum number of tiles in one file.
/// Prevents memory exhaustion from crafted files.
const MAX_TILES: usize = 1 << 20;
/// Upper bound on decoded bytes, checked before any length prefix is
/// allocated.
const MAX_FILE_BYTES: u64 = 1 << 32;

/// Same wire layout as `bincode::serialize`, with a size limit.
fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(MAX_FILE_BYTES)
}

/// Serializable device: header plus one record per allocated tile.
#[derive(Serialize, Deserialize)]
struct DeviceFileV1 {
    magic: String,
    version: u32,
    tile_width: u32,
    tile_height: u32,
    pixel_size: u32,
    layout: ChannelLayout,
    default_pixel: Vec<u8>,
    tiles: Vec<TileRecord>,
}

/// A single serialisable tile (`TILE_SIZE² × pixel_size` bytes).
#[derive(Serialize, Deserialize)]
struct TileRecord {
    col: i32,
    row: i32,
    bytes: Vec<u8>,
}

/// Write `device` to `writer`. Tiles held by the swapper are paged in first
/// so the file is complete.
pub fn save_device<W: Write>(device: &PaintDevice, writer: W) -> Result<()> {
    device.store().page_in_all();
    let mut tiles = Vec::with_capacity(device.tile_count());
    device.for_each_tile(|tile| {
        tiles.push(TileRecord {
            col: tile.coord().col,
            row: tile.coord().row,
            bytes: tile.data().to_vec(),
        });
    });
    // Stable output for identical content.
    tiles.sort_unstable_by_key(|t| (t.row, t.col));

    let file = DeviceFileV1 {
        magic: PFT_MAGIC_V1.to_string(),
        version: PFT_VERSION,
        tile_width: TILE_SIZE as u32,
        tile_height: TILE_SIZE as u32,
        pixel_size: device.pixel_size() as u32,
        layout: device.layout(),
        default_pixel: device.default_pixel().to_vec(),
        tiles,
    };
    codec().serialize_into(writer, &file)?;
    log::debug!("device {}: saved {} tiles", device.id(), file.tiles.len());
    Ok(())
}

/// Read a device written by [`save_device`].
pub fn load_device<R: Read>(reader: R) -> Result<PaintDevice> {
    let file: DeviceFileV1 = codec().deserialize_from(reader)?;

    if file.magic != PFT_MAGIC_V1 {
        return Err(TileError::InvalidFormat(format!("Unknown magic '{}'", file.magic)));
    }
    if file.version != PFT_VERSION {
        return Err(TileError::InvalidFormat(format!("Unsupported version {}", file.version)));
    }
    if file.tile_width != TILE_SIZE as u32 || file.tile_height != TILE_SIZE as u32 {
        return Err(TileError::InvalidFormat(format!(
            "Tile size {}x{} does not match {}x{}",
            file.tile_width, file.tile_height, TILE_SIZE, TILE_SIZE
        )));
    }
    let layout = ChannelLayout::new(file.layout.depth(), file.layout.channels(), file.layout.alpha_index())
        .map_err(|e| TileError::InvalidFormat(e.to_string()))?;
    if file.pixel_size as usize != layout.pixel_size() {
        return Err(TileError::InvalidFormat(format!(
            "Pixel size {} does not match layout ({} bytes)",
            file.pixel_size,
            layout.pixel_size()
        )));
    }
    if file.tiles.len() > MAX_TILES {
        return Err(TileError::InvalidFormat(format!(
            "File contains {} tiles, which exceeds the maximum of {}",
            file.tiles.len(),
            MAX_TILES
        )));
    }

    let device = PaintDevice::new(layout, &file.default_pixel).map_err(|e| match e {
        TileError::LayoutMismatch { expected, found } => TileError::InvalidFormat(format!(
            "Default pixel has {} bytes, expected {}",
            found, expected
        )),
        other => other,
    })?;

    let expected_tile_bytes = TILE_PIXELS * layout.pixel_size();
    for record in file.tiles {
        if record.bytes.len() != expected_tile_bytes {
            return Err(TileError::InvalidFormat(format!(
                "Tile ({},{}) has {} bytes, expected {}",
                record.col,
                record.row,
                record.bytes.len(),
                expected_tile_bytes
            )));
        }
        let coord = TileCoord::new(record.col, record.row);
        let data = TileData::from_bytes(record.bytes, layout.pixel_size())?;
        device.store().set_tile(coord, Tile::new(coord, data.into()))?;
    }
    log::debug!("device {}: loaded {} tiles", device.id(), device.tile_count());
    Ok(device)
}

pub fn save_device_file(device: &PaintDevice, path: &Path) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    save_device(device, writer)?;
    log::info!("saved device {} to {}", device.id(), path.display());
    Ok(())
}

pub fn load_device_file(path: &Path) -> Result<PaintDevice> {
    let reader = BufReader::new(File::open(path)?);
    let device = load_device(reader)?;
    log::info!("loaded device {} from {}", device.id(), path.display());
    Ok(device)
}
