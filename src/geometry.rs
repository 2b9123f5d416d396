// ============================================================================
// GEOMETRY – integer rectangles and the tile grid
// ============================================================================

use serde::{Deserialize, Serialize};

/// Edge length of a tile in pixels. Tiles are always square.
pub const TILE_SIZE: i32 = 64;

/// Number of pixels held by one tile.
pub const TILE_PIXELS: usize = (TILE_SIZE * TILE_SIZE) as usize;

/// Position of a tile in the tile grid (column, row). The grid extends
/// infinitely in every direction, so both components may be negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TileCoord {
    pub col: i32,
    pub row: i32,
}

impl TileCoord {
    pub const fn new(col: i32, row: i32) -> Self {
        Self { col, row }
    }

    /// Tile containing the pixel `(x, y)`.
    #[inline(always)]
    pub fn containing(x: i32, y: i32) -> Self {
        Self {
            col: x.div_euclid(TILE_SIZE),
            row: y.div_euclid(TILE_SIZE),
        }
    }

    /// Pixel-space rectangle covered by this tile.
    #[inline]
    pub fn rect(&self) -> Rect {
        Rect::new(self.col * TILE_SIZE, self.row * TILE_SIZE, TILE_SIZE, TILE_SIZE)
    }

    /// Left pixel column of the tile.
    #[inline(always)]
    pub fn x(&self) -> i32 {
        self.col * TILE_SIZE
    }

    /// Top pixel row of the tile.
    #[inline(always)]
    pub fn y(&self) -> i32 {
        self.row * TILE_SIZE
    }
}

/// In-tile offset of a pixel coordinate (always `0..TILE_SIZE`).
#[inline(always)]
pub fn local(x: i32, y: i32) -> (i32, i32) {
    (x.rem_euclid(TILE_SIZE), y.rem_euclid(TILE_SIZE))
}

/// Integer rectangle `[x, x + width) × [y, y + height)`.
///
/// A rectangle with a non-positive width or height is empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle spanning the inclusive pixel range `(x0, y0) ..= (x1, y1)`.
    pub fn from_corners(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// One past the right-most column.
    #[inline]
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// One past the bottom row.
    #[inline]
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn area(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.width as usize * self.height as usize
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.is_empty()
            || (!self.is_empty()
                && other.x >= self.x
                && other.y >= self.y
                && other.right() <= self.right()
                && other.bottom() <= self.bottom())
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.intersection(other).is_empty()
    }

    /// Overlap of two rectangles (empty when they do not touch).
    pub fn intersection(&self, other: &Rect) -> Rect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            Rect::default()
        } else {
            Rect::new(x0, y0, x1 - x0, y1 - y0)
        }
    }

    /// Smallest rectangle containing both. Empty operands are ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        Rect::new(x0, y0, x1 - x0, y1 - y0)
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Every tile touched by this rectangle, row by row.
    pub fn tiles(&self) -> impl Iterator<Item = TileCoord> + use<> {
        let (c0, r0, c1, r1) = if self.is_empty() {
            (0, 0, -1, -1)
        } else {
            let first = TileCoord::containing(self.x, self.y);
            let last = TileCoord::containing(self.right() - 1, self.bottom() - 1);
            (first.col, first.row, last.col, last.row)
        };
        (r0..=r1).flat_map(move |row| (c0..=c1).map(move |col| TileCoord::new(col, row)))
    }

    /// Every touched tile paired with the part of `self` inside it.
    pub fn tile_spans(&self) -> impl Iterator<Item = (TileCoord, Rect)> + use<> {
        let this = *self;
        self.tiles().map(move |c| (c, c.rect().intersection(&this)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_coordinates_map_to_negative_tiles() {
        assert_eq!(TileCoord::containing(-1, -1), TileCoord::new(-1, -1));
        assert_eq!(TileCoord::containing(-64, 0), TileCoord::new(-1, 0));
        assert_eq!(TileCoord::containing(-65, 63), TileCoord::new(-2, 0));
        assert_eq!(local(-1, -64), (63, 0));
    }

    #[test]
    fn rect_tiles_straddling_boundaries() {
        let tiles: Vec<_> = Rect::new(60, 60, 10, 10).tiles().collect();
        assert_eq!(
            tiles,
            vec![
                TileCoord::new(0, 0),
                TileCoord::new(1, 0),
                TileCoord::new(0, 1),
                TileCoord::new(1, 1)
            ]
        );
        assert_eq!(Rect::new(0, 0, 0, 5).tiles().count(), 0);
        assert_eq!(Rect::new(0, 0, 64, 64).tiles().count(), 1);
    }

    #[test]
    fn intersection_and_union() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.intersection(&b), Rect::new(5, 5, 5, 5));
        assert_eq!(a.union(&b), Rect::new(0, 0, 15, 15));
        assert!(a.intersection(&Rect::new(10, 0, 5, 5)).is_empty());
        assert_eq!(Rect::default().union(&a), a);
    }
}
