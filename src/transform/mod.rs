pub mod coordinates;

use std::sync::Arc;

use glam::{DVec2, DVec3};

use crate::error::{PagerError, Result};
use crate::types::{Mbr, TileAddress};

pub use coordinates::{CoordSystem, PlateCarree, SphericalMercator};

/// Tile geometry for one layer: root bounds, coordinate system and row convention.
///
/// Every query is a pure function of the address, so a `TileGeometry` can be
/// shared freely between the sampling and fetch contexts.
#[derive(Clone)]
pub struct TileGeometry {
    root: Mbr,
    coord_system: Arc<dyn CoordSystem>,
    flip_y: bool,
}

impl std::fmt::Debug for TileGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileGeometry")
            .field("root", &self.root)
            .field("flip_y", &self.flip_y)
            .finish_non_exhaustive()
    }
}

impl TileGeometry {
    /// `flip_y = false` counts rows from the bottom edge, `true` from the top.
    pub fn new(root: Mbr, coord_system: Arc<dyn CoordSystem>, flip_y: bool) -> Result<Self> {
        if root.is_degenerate() {
            return Err(PagerError::Config(format!(
                "degenerate root bounds {:?} -> {:?}",
                root.ll, root.ur
            )));
        }
        Ok(Self {
            root,
            coord_system,
            flip_y,
        })
    }

    /// Full Web Mercator extent.
    pub fn spherical_mercator(flip_y: bool) -> Self {
        let (ll, ur) = SphericalMercator::extent();
        Self {
            root: Mbr::new(ll, ur),
            coord_system: Arc::new(SphericalMercator),
            flip_y,
        }
    }

    pub fn root(&self) -> &Mbr {
        &self.root
    }

    pub fn flip_y(&self) -> bool {
        self.flip_y
    }

    /// Bounds of a tile in local coordinates.
    pub fn bounds_for_tile(&self, tile: TileAddress) -> Mbr {
        let cells = tile.cells_per_side() as f64;
        let row = if self.flip_y { tile.flip_y().y } else { tile.y };
        let size = DVec2::new(self.root.width() / cells, self.root.height() / cells);
        let ll = self.root.ll + size * DVec2::new(f64::from(tile.x), f64::from(row));
        Mbr::new(ll, ll + size)
    }

    /// Bounds of a tile in geographic degrees.
    pub fn geo_bounds_for_tile(&self, tile: TileAddress) -> Mbr {
        let local = self.bounds_for_tile(tile);
        Mbr::new(
            self.coord_system.local_to_geo(local.ll),
            self.coord_system.local_to_geo(local.ur),
        )
    }

    /// Tile center in display space.
    pub fn display_center_for_tile(&self, tile: TileAddress) -> DVec3 {
        self.coord_system
            .local_to_display(self.bounds_for_tile(tile).center())
    }
}
