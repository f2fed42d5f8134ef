use std::fmt;

use serde::{Deserialize, Serialize};

/// Deepest addressable level; columns and rows at this level still fit in `u32`.
pub const MAX_LEVEL: u32 = 31;

/// Quad-tree cell identifier.
///
/// Level 0 is the root; a cell at level `L` has `0 <= x, y < 2^L`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileAddress {
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl TileAddress {
    pub const ROOT: TileAddress = TileAddress {
        level: 0,
        x: 0,
        y: 0,
    };

    pub fn new(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }

    /// Number of cells along one axis at this level.
    pub fn cells_per_side(&self) -> u64 {
        1u64 << self.level
    }

    /// Whether `x` and `y` fall inside the grid for this level.
    pub fn is_valid(&self) -> bool {
        self.level <= MAX_LEVEL && u64::from(self.x) < self.cells_per_side() && u64::from(self.y) < self.cells_per_side()
    }

    /// The four children, indexed by quadrant (bit 0 = x_hi, bit 1 = y_hi).
    pub fn children(&self) -> [TileAddress; 4] {
        let level = self.level + 1;
        let (x, y) = (self.x * 2, self.y * 2);
        [
            TileAddress::new(level, x, y),
            TileAddress::new(level, x + 1, y),
            TileAddress::new(level, x, y + 1),
            TileAddress::new(level, x + 1, y + 1),
        ]
    }

    /// Child for a given quadrant index (0..3).
    pub fn child(&self, quadrant: usize) -> TileAddress {
        self.children()[quadrant & 3]
    }

    pub fn parent(&self) -> Option<TileAddress> {
        (self.level > 0).then(|| TileAddress::new(self.level - 1, self.x / 2, self.y / 2))
    }

    /// Same cell with the row counted from the opposite edge.
    pub fn flip_y(&self) -> TileAddress {
        let max_row = (self.cells_per_side() - 1) as u32;
        TileAddress::new(self.level, self.x, max_row - self.y)
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.x, self.y)
    }
}

/// Frame index used when a loader has a single frame.
pub const SINGLE_FRAME: i32 = -1;

/// Key of one outstanding fetch: a tile plus its frame index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameKey {
    pub address: TileAddress,
    pub frame: i32,
}

impl FrameKey {
    pub fn new(address: TileAddress, frame: i32) -> Self {
        Self { address, frame }
    }
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_bounds() {
        assert!(TileAddress::ROOT.is_valid());
        assert!(TileAddress::new(2, 3, 3).is_valid());
        assert!(!TileAddress::new(2, 4, 0).is_valid());
        assert!(!TileAddress::new(0, 0, 1).is_valid());
    }

    #[test]
    fn children_and_parent() {
        let t = TileAddress::new(2, 1, 3);
        let kids = t.children();
        assert_eq!(kids[0], TileAddress::new(3, 2, 6));
        assert_eq!(kids[3], TileAddress::new(3, 3, 7));
        for k in kids {
            assert!(k.is_valid());
            assert_eq!(k.parent(), Some(t));
        }
        assert_eq!(TileAddress::ROOT.parent(), None);
    }

    #[test]
    fn flip_y_is_an_involution() {
        let t = TileAddress::new(3, 5, 1);
        assert_eq!(t.flip_y(), TileAddress::new(3, 5, 6));
        assert_eq!(t.flip_y().flip_y(), t);
        assert_eq!(TileAddress::ROOT.flip_y(), TileAddress::ROOT);
    }

    #[test]
    fn display_formats() {
        assert_eq!(TileAddress::new(2, 1, 3).to_string(), "2/1/3");
        assert_eq!(FrameKey::new(TileAddress::new(2, 1, 3), SINGLE_FRAME).to_string(), "2/1/3#-1");
    }
}
