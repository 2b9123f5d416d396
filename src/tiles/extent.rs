// ============================================================================
// EXTENT – bounds of the allocated tiles, maintained incrementally
// ============================================================================

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::geometry::{Rect, TILE_SIZE, TileCoord};

#[derive(Default)]
struct Counters {
    /// Number of allocated tiles in each tile column.
    columns: BTreeMap<i32, usize>,
    /// Number of allocated tiles in each tile row.
    rows: BTreeMap<i32, usize>,
}

fn bump(map: &mut BTreeMap<i32, usize>, key: i32) {
    *map.entry(key).or_insert(0) += 1;
}

fn drop_one(map: &mut BTreeMap<i32, usize>, key: i32) {
    if let Some(n) = map.get_mut(&key) {
        *n -= 1;
        if *n == 0 {
            map.remove(&key);
        }
    }
}

/// Tracks how many tiles exist per tile row and column, so the device extent
/// is the span between the first and last non-empty entries.
#[derive(Default)]
pub struct ExtentManager {
    counters: Mutex<Counters>,
}

impl ExtentManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_tile_added(&self, coord: TileCoord) {
        let mut c = self.counters.lock();
        bump(&mut c.columns, coord.col);
        bump(&mut c.rows, coord.row);
    }

    pub fn notify_tile_removed(&self, coord: TileCoord) {
        let mut c = self.counters.lock();
        drop_one(&mut c.columns, coord.col);
        drop_one(&mut c.rows, coord.row);
    }

    /// Tile-aligned pixel rectangle covering every allocated tile; empty when
    /// there are none.
    pub fn extent(&self) -> Rect {
        let c = self.counters.lock();
        let (Some((&c0, _)), Some((&c1, _))) = (c.columns.first_key_value(), c.columns.last_key_value())
        else {
            return Rect::default();
        };
        let (Some((&r0, _)), Some((&r1, _))) = (c.rows.first_key_value(), c.rows.last_key_value())
        else {
            return Rect::default();
        };
        Rect::new(
            c0 * TILE_SIZE,
            r0 * TILE_SIZE,
            (c1 - c0 + 1) * TILE_SIZE,
            (r1 - r0 + 1) * TILE_SIZE,
        )
    }
}
