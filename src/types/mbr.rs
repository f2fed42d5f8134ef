use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Axis-aligned 2-D bounding rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mbr {
    pub ll: DVec2,
    pub ur: DVec2,
}

impl Mbr {
    pub fn new(ll: DVec2, ur: DVec2) -> Self {
        Self { ll, ur }
    }

    pub fn from_coords(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self::new(DVec2::new(min_x, min_y), DVec2::new(max_x, max_y))
    }

    /// A zero-area rectangle at a single point.
    pub fn point(p: DVec2) -> Self {
        Self::new(p, p)
    }

    pub fn width(&self) -> f64 {
        self.ur.x - self.ll.x
    }

    pub fn height(&self) -> f64 {
        self.ur.y - self.ll.y
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> DVec2 {
        (self.ll + self.ur) * 0.5
    }

    /// True for zero or negative area, or non-finite corners.
    pub fn is_degenerate(&self) -> bool {
        !(self.ll.is_finite() && self.ur.is_finite()) || self.width() <= 0.0 || self.height() <= 0.0
    }

    /// Whether a point lies inside (or on the boundary of) the rectangle.
    pub fn contains_point(&self, p: DVec2) -> bool {
        p.x >= self.ll.x && p.x <= self.ur.x && p.y >= self.ll.y && p.y <= self.ur.y
    }

    pub fn contains_mbr(&self, other: &Mbr) -> bool {
        self.contains_point(other.ll) && self.contains_point(other.ur)
    }

    /// Overlap test with positive-area intersection; touching edges do not count.
    pub fn intersects(&self, other: &Mbr) -> bool {
        self.ll.x < other.ur.x && other.ll.x < self.ur.x && self.ll.y < other.ur.y && other.ll.y < self.ur.y
    }

    pub fn intersection(&self, other: &Mbr) -> Option<Mbr> {
        self.intersects(other)
            .then(|| Mbr::new(self.ll.max(other.ll), self.ur.min(other.ur)))
    }

    /// Quadrant index (0..3) for a point relative to the center.
    ///
    /// Layout (bit pattern: y_hi | x_hi):
    ///   0 = (lo, lo), 1 = (hi, lo), 2 = (lo, hi), 3 = (hi, hi)
    pub fn quadrant_index(&self, p: DVec2) -> usize {
        let c = self.center();
        let mut idx = 0;
        if p.x >= c.x {
            idx |= 1;
        }
        if p.y >= c.y {
            idx |= 2;
        }
        idx
    }

    /// Quadrant that fully holds `other`, if any.
    pub fn quadrant_of(&self, other: &Mbr) -> Option<usize> {
        let q = self.quadrant_index(other.ll);
        (q == self.quadrant_index(other.ur)).then_some(q)
    }

    /// Child rectangle for a given quadrant index.
    pub fn child(&self, quadrant: usize) -> Mbr {
        let c = self.center();
        let (min_x, max_x) = if quadrant & 1 != 0 { (c.x, self.ur.x) } else { (self.ll.x, c.x) };
        let (min_y, max_y) = if quadrant & 2 != 0 { (c.y, self.ur.y) } else { (self.ll.y, c.y) };
        Mbr::from_coords(min_x, min_y, max_x, max_y)
    }
}
