use std::f64::consts::PI;

use glam::{DVec2, DVec3};

/// WGS84 semi-major axis in metres.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Maps a layer's local coordinates to geographic and display space.
///
/// Implementations are pure and shared across threads.
pub trait CoordSystem: Send + Sync {
    /// Local coordinates to geographic (lon, lat) in degrees.
    fn local_to_geo(&self, local: DVec2) -> DVec2;

    /// Local coordinates to the renderer's display space.
    fn local_to_display(&self, local: DVec2) -> DVec3;
}

/// Local coordinates are already lon/lat degrees; display is a flat plane in radians.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlateCarree;

impl CoordSystem for PlateCarree {
    fn local_to_geo(&self, local: DVec2) -> DVec2 {
        local
    }

    fn local_to_display(&self, local: DVec2) -> DVec3 {
        DVec3::new(local.x.to_radians(), local.y.to_radians(), 0.0)
    }
}

/// Web Mercator: local coordinates in metres, display on the unit sphere.
#[derive(Debug, Clone, Copy, Default)]
pub struct SphericalMercator;

impl SphericalMercator {
    /// Full extent of the projection in local metres.
    pub fn extent() -> (DVec2, DVec2) {
        let half = PI * EARTH_RADIUS;
        (DVec2::new(-half, -half), DVec2::new(half, half))
    }
}

impl CoordSystem for SphericalMercator {
    fn local_to_geo(&self, local: DVec2) -> DVec2 {
        let lon = (local.x / EARTH_RADIUS).to_degrees();
        let lat = (2.0 * (local.y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
        DVec2::new(lon, lat)
    }

    fn local_to_display(&self, local: DVec2) -> DVec3 {
        let geo = self.local_to_geo(local);
        let (lon, lat) = (geo.x.to_radians(), geo.y.to_radians());
        DVec3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn plate_carree_is_identity_in_geo() {
        let p = DVec2::new(12.5, -40.0);
        assert_eq!(PlateCarree.local_to_geo(p), p);
        let d = PlateCarree.local_to_display(DVec2::new(180.0, 90.0));
        assert_abs_diff_eq!(d.x, PI, epsilon = 1e-12);
        assert_abs_diff_eq!(d.y, PI / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn mercator_origin_and_extent() {
        let geo = SphericalMercator.local_to_geo(DVec2::ZERO);
        assert_abs_diff_eq!(geo.x, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(geo.y, 0.0, epsilon = 1e-9);

        let (_, ur) = SphericalMercator::extent();
        let corner = SphericalMercator.local_to_geo(ur);
        assert_abs_diff_eq!(corner.x, 180.0, epsilon = 1e-9);
        assert_abs_diff_eq!(corner.y, 85.051_128_78, epsilon = 1e-6);
    }

    #[test]
    fn mercator_display_is_on_unit_sphere() {
        let d = SphericalMercator.local_to_display(DVec2::new(1.0e6, -2.5e6));
        assert_abs_diff_eq!(d.length(), 1.0, epsilon = 1e-12);
    }
}
