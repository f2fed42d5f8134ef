//! Spatial cull structure over a layer's bounding region.

pub mod tree;

pub use tree::{CullHit, CullNode, CullStats, CullTree, Drawable, LevelStats};
