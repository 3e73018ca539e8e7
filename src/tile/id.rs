use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one tile: grid position `x, y` at canonical zoom `z`, plus the
/// overscaled zoom its content stands in for.
///
/// `overscaled_z >= z` always holds. The two differ when a coarser tile is
/// reused to cover an area that should logically be a finer tile, e.g. past a
/// source's max zoom or while the finer tile is still loading.
///
/// Equality, hashing, and ordering combine all four fields; collapsing to
/// `(x, y, z)` would collide overscaled variants of the same canonical tile.
/// Ordering is lexicographic in `(x, y, z, overscaled_z)` so map iteration is
/// deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileId {
    pub x: u32,
    pub y: u32,
    pub z: u8,
    pub overscaled_z: u8,
}

impl TileId {
    /// A tile whose content matches its canonical zoom.
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self {
            x,
            y,
            z,
            overscaled_z: z,
        }
    }

    /// A tile standing in for content at `overscaled_z`.
    pub fn new_overscaled(x: u32, y: u32, z: u8, overscaled_z: u8) -> Self {
        debug_assert!(overscaled_z >= z, "overscaled zoom below canonical zoom");
        Self {
            x,
            y,
            z,
            overscaled_z,
        }
    }

    /// Whether this tile's content logically represents a deeper zoom than
    /// the data it was fetched at.
    pub fn is_overscaled(&self) -> bool {
        self.overscaled_z > self.z
    }

    /// The same canonical data re-addressed to `target_z`.
    ///
    /// Scaling deeper than the canonical zoom keeps the canonical address and
    /// raises only the overscaled zoom; scaling shallower walks up to the
    /// ancestor at `target_z`.
    pub fn scaled_to(&self, target_z: u8) -> TileId {
        if target_z >= self.z {
            TileId {
                x: self.x,
                y: self.y,
                z: self.z,
                overscaled_z: target_z,
            }
        } else {
            let dz = self.z - target_z;
            TileId {
                x: self.x >> dz,
                y: self.y >> dz,
                z: target_z,
                overscaled_z: target_z,
            }
        }
    }

    /// The parent address one zoom up, or `None` at the root.
    pub fn parent(&self) -> Option<TileId> {
        if self.overscaled_z == 0 {
            None
        } else {
            Some(self.scaled_to(self.overscaled_z - 1))
        }
    }

    /// The child occupying `quadrant` (0 = NW, 1 = NE, 2 = SW, 3 = SE).
    pub fn child(&self, quadrant: u8) -> TileId {
        debug_assert!(quadrant < 4);
        TileId::new(
            (self.x << 1) + (quadrant & 1) as u32,
            (self.y << 1) + (quadrant >> 1) as u32,
            self.z + 1,
        )
    }

    /// All four children, NW first.
    pub fn children(&self) -> [TileId; 4] {
        [self.child(0), self.child(1), self.child(2), self.child(3)]
    }

    /// Whether this tile is a strict descendant of `other` in canonical
    /// address space.
    pub fn is_child_of(&self, other: &TileId) -> bool {
        if self.z <= other.z {
            return false;
        }
        let dz = self.z - other.z;
        self.x >> dz == other.x && self.y >> dz == other.y
    }

    /// Per-level quadrant indices walking from `ancestor` down to this tile.
    ///
    /// Empty when `self` is not a strict descendant of `ancestor`.
    pub fn quadrant_path_from(&self, ancestor: &TileId) -> Vec<u8> {
        if !self.is_child_of(ancestor) {
            return Vec::new();
        }
        let dz = self.z - ancestor.z;
        (1..=dz)
            .map(|level| {
                let shift = dz - level;
                (((self.x >> shift) & 1) | (((self.y >> shift) & 1) << 1)) as u8
            })
            .collect()
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_overscaled() {
            write!(f, "{}/{}/{} (@{})", self.z, self.x, self.y, self.overscaled_z)
        } else {
            write!(f, "{}/{}/{}", self.z, self.x, self.y)
        }
    }
}
