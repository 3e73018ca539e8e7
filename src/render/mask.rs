//! Quadtree tile masking.
//!
//! A mask is the set of sub-rectangles of a tile that the tile itself must
//! draw. Areas covered by a resident, renderable descendant are subtracted so
//! finer data is drawn there instead; everything else stays with the
//! ancestor. The union of a tile's mask and its renderable descendants'
//! areas always equals the tile's full area with no overlap.

use crate::tile::id::TileId;
use std::collections::BTreeSet;

/// One quad-addressed sub-rectangle of a tile, relative to the tile itself.
/// `z = 0, x = 0, y = 0` is the whole tile; each deeper level halves the
/// rectangle in both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaskRect {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl MaskRect {
    pub const WHOLE_TILE: MaskRect = MaskRect { z: 0, x: 0, y: 0 };

    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Whether `other` lies inside this rectangle (or is this rectangle).
    pub fn contains(&self, other: &MaskRect) -> bool {
        if other.z < self.z {
            return false;
        }
        let dz = other.z - self.z;
        other.x >> dz == self.x && other.y >> dz == self.y
    }

    /// The four quadrant sub-rectangles, NW first.
    pub fn quadrants(&self) -> [MaskRect; 4] {
        let (z, x, y) = (self.z + 1, self.x << 1, self.y << 1);
        [
            MaskRect::new(z, x, y),
            MaskRect::new(z, x + 1, y),
            MaskRect::new(z, x, y + 1),
            MaskRect::new(z, x + 1, y + 1),
        ]
    }
}

/// The set of sub-rectangles a tile draws. A fresh mask covers the whole
/// tile; it is replaced wholesale on recomputation, never edited in place.
pub type TileMask = BTreeSet<MaskRect>;

/// A mask covering the tile's full extent.
pub fn full_mask() -> TileMask {
    let mut mask = TileMask::new();
    mask.insert(MaskRect::WHOLE_TILE);
    mask
}

/// Compute the mask for `tile` given the currently resident tiles and their
/// renderable flags.
///
/// Only strict descendants of `tile` that are renderable take part in the
/// subtraction; a resident descendant that has not finished loading is
/// treated as absent, so the ancestor keeps covering its area and the map
/// shows no hole while the descendant loads.
///
/// The subtraction walks an explicit work stack of rectangles instead of
/// recursing: a rectangle fully covered by a descendant is dropped, a
/// rectangle partially covered is split into its four quadrants, and a
/// rectangle touching no descendant lands in the mask.
pub fn compute_tile_mask(tile: &TileId, resident: &[(TileId, bool)]) -> TileMask {
    let mut covered: Vec<MaskRect> = resident
        .iter()
        .filter(|(id, renderable)| *renderable && id.is_child_of(tile))
        .map(|(id, _)| {
            let dz = id.z - tile.z;
            MaskRect::new(dz, id.x - (tile.x << dz), id.y - (tile.y << dz))
        })
        .collect();
    covered.sort_unstable();
    covered.dedup();

    let mut mask = TileMask::new();
    if covered.is_empty() {
        mask.insert(MaskRect::WHOLE_TILE);
        return mask;
    }

    let mut stack = vec![MaskRect::WHOLE_TILE];
    while let Some(rect) = stack.pop() {
        if covered.iter().any(|c| c.contains(&rect)) {
            // A descendant draws this whole rectangle.
            continue;
        }
        if covered.iter().any(|c| rect.contains(c)) {
            // Partially covered; split and keep subtracting.
            stack.extend(rect.quadrants());
        } else {
            mask.insert(rect);
        }
    }
    mask
}

/// Recompute masks for every renderable tile in a resident set.
///
/// Intended to run when the resident set or any renderable flag changes, not
/// per frame.
pub fn compute_all_masks(resident: &[(TileId, bool)]) -> Vec<(TileId, TileMask)> {
    resident
        .iter()
        .filter(|(_, renderable)| *renderable)
        .map(|(id, _)| (*id, compute_tile_mask(id, resident)))
        .collect()
}
