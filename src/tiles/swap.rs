// ============================================================================
// SWAP – persistence hooks for tiles paged out of memory
// ============================================================================

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::Result;
use crate::geometry::TileCoord;

/// Backing storage for evicted tiles.
///
/// The store only moves raw tile bytes in and out; any compression or file
/// format belongs to the implementation. `fetch` may block.
pub trait TileSwapper: Send + Sync {
    /// Bytes previously stored for `coord`, if any. A successful fetch hands
    /// ownership back to memory, so the swapper may forget the entry.
    fn fetch(&self, coord: TileCoord) -> Option<Vec<u8>>;

    /// Keep `bytes` for `coord`, replacing anything stored before.
    fn store(&self, coord: TileCoord, bytes: &[u8]) -> Result<()>;

    /// Forget anything stored for `coord`.
    fn discard(&self, _coord: TileCoord) {}

    /// Coordinates of every tile currently held, in no particular order.
    fn stored_coords(&self) -> Vec<TileCoord>;

    /// Number of tiles currently held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Swapper that keeps evicted tiles in a hash map. Useful for tests and as a
/// reference for disk-backed implementations.
#[derive(Default)]
pub struct MemorySwapper {
    tiles: Mutex<HashMap<TileCoord, Vec<u8>>>,
}

impl MemorySwapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        self.tiles.lock().contains_key(&coord)
    }
}

impl TileSwapper for MemorySwapper {
    fn fetch(&self, coord: TileCoord) -> Option<Vec<u8>> {
        self.tiles.lock().remove(&coord)
    }

    fn store(&self, coord: TileCoord, bytes: &[u8]) -> Result<()> {
        self.tiles.lock().insert(coord, bytes.to_vec());
        Ok(())
    }

    fn discard(&self, coord: TileCoord) {
        self.tiles.lock().remove(&coord);
    }

    fn stored_coords(&self) -> Vec<TileCoord> {
        self.tiles.lock().keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.tiles.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_takes_stored_bytes() {
        let s = MemorySwapper::new();
        let c = TileCoord::new(-3, 4);
        s.store(c, &[1, 2, 3]).unwrap();
        assert!(s.contains(c));
        assert_eq!(s.fetch(c), Some(vec![1, 2, 3]));
        assert_eq!(s.fetch(c), None);
        assert!(s.is_empty());
    }
}
