use std::cmp::Ordering;

use serde::Serialize;
use tracing::info;

use crate::error::{PagerError, Result};
use crate::types::{MAX_LEVEL, Mbr, TileAddress};

/// Something that occupies space in the tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drawable {
    pub id: u64,
    pub bounds: Mbr,
}

impl Drawable {
    pub fn new(id: u64, bounds: Mbr) -> Self {
        Self { id, bounds }
    }
}

/// A node in the cull tree.
///
/// Node bounds follow the tile subdivision of the root, so every node has a
/// bottom-origin [`TileAddress`].
#[derive(Debug, Clone)]
pub struct CullNode {
    bounds: Mbr,
    address: TileAddress,
    drawables: Vec<Drawable>,
    children: Option<Box<[CullNode; 4]>>,
}

impl CullNode {
    pub fn bounds(&self) -> &Mbr {
        &self.bounds
    }

    pub fn address(&self) -> TileAddress {
        self.address
    }

    pub fn depth(&self) -> u32 {
        self.address.level
    }

    /// Items stored at this node: everything for a leaf, straddlers for an interior node.
    pub fn drawables(&self) -> &[Drawable] {
        &self.drawables
    }

    pub fn children(&self) -> Option<&[CullNode; 4]> {
        self.children.as_deref()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Count total nodes in the subtree (including self).
    pub fn node_count(&self) -> usize {
        1 + self
            .children()
            .map(|c| c.iter().map(CullNode::node_count).sum::<usize>())
            .unwrap_or(0)
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a CullNode)) {
        f(self);
        if let Some(children) = self.children() {
            for child in children {
                child.visit(f);
            }
        }
    }
}

/// Leaf cell overlapping a view, with its importance in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullHit {
    pub address: TileAddress,
    pub bounds: Mbr,
    pub importance: f64,
}

/// Node/leaf/drawable counts for one depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelStats {
    pub depth: u32,
    pub nodes: usize,
    pub leaves: usize,
    pub drawables: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CullStats {
    pub levels: Vec<LevelStats>,
    /// Largest drawable count held by any single leaf.
    pub max_leaf_drawables: usize,
}

impl CullStats {
    pub fn total_nodes(&self) -> usize {
        self.levels.iter().map(|l| l.nodes).sum()
    }

    pub fn total_leaves(&self) -> usize {
        self.levels.iter().map(|l| l.leaves).sum()
    }

}

/// Static quad-tree over a layer's bounding region.
///
/// Built once per dataset and only read afterwards; a changed dataset gets a
/// new tree rather than an in-place update.
#[derive(Debug, Clone)]
pub struct CullTree {
    root: CullNode,
    max_depth: u32,
    max_draw_per_node: usize,
}

impl CullTree {
    /// An empty tree: just the root cell.
    pub fn new(bounds: Mbr, max_depth: u32, max_draw_per_node: usize) -> Result<Self> {
        Self::build(bounds, max_depth, max_draw_per_node, Vec::new())
    }

    /// Build a tree over `bounds`, splitting any node with more than
    /// `max_draw_per_node` drawables while `depth < max_depth`.
    ///
    /// Drawables descend into the child quadrant that fully holds them;
    /// ones straddling a split line stay on the interior node.
    pub fn build(
        bounds: Mbr,
        max_depth: u32,
        max_draw_per_node: usize,
        drawables: impl IntoIterator<Item = Drawable>,
    ) -> Result<Self> {
        if bounds.is_degenerate() {
            return Err(PagerError::Config(format!(
                "cull tree bounds {:?} -> {:?} have zero area",
                bounds.ll, bounds.ur
            )));
        }
        if max_depth == 0 || max_depth > MAX_LEVEL {
            return Err(PagerError::Config(format!(
                "cull tree max depth must be in 1..={MAX_LEVEL}, got {max_depth}"
            )));
        }
        if max_draw_per_node == 0 {
            return Err(PagerError::Config(
                "cull tree max drawables per node must be positive".into(),
            ));
        }

        let root = build_recursive(
            bounds,
            TileAddress::ROOT,
            drawables.into_iter().collect(),
            max_depth,
            max_draw_per_node,
        );
        Ok(Self {
            root,
            max_depth,
            max_draw_per_node,
        })
    }

    /// Root node, for external frustum traversal.
    pub fn top_cullable(&self) -> &CullNode {
        &self.root
    }

    /// Total number of nodes.
    pub fn count(&self) -> usize {
        self.root.node_count()
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn max_draw_per_node(&self) -> usize {
        self.max_draw_per_node
    }

    /// All nodes in depth-first order.
    pub fn nodes(&self) -> Vec<&CullNode> {
        let mut out = Vec::new();
        self.root.visit(&mut |n| out.push(n));
        out
    }

    pub fn leaves(&self) -> impl Iterator<Item = &CullNode> {
        self.nodes().into_iter().filter(|n| n.is_leaf())
    }

    /// Largest drawable count held by any single leaf.
    pub fn max_leaf_drawables(&self) -> usize {
        self.leaves().map(|l| l.drawables.len()).max().unwrap_or(0)
    }

    /// Leaf cells overlapping `view`, most important first, at most `max_tiles`.
    ///
    /// Importance is the fraction of the leaf covered by the view. Ties break
    /// on coarser level, then address, so the result is deterministic.
    pub fn visible_tiles(&self, view: &Mbr, max_tiles: usize) -> Vec<CullHit> {
        let mut hits = Vec::new();
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            let Some(overlap) = node.bounds.intersection(view) else {
                continue;
            };
            match node.children() {
                Some(children) => stack.extend(children.iter()),
                None => hits.push(CullHit {
                    address: node.address,
                    bounds: node.bounds,
                    importance: (overlap.area() / node.bounds.area()).clamp(0.0, 1.0),
                }),
            }
        }

        hits.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.address.cmp(&b.address))
        });
        hits.truncate(max_tiles);
        hits
    }

    /// Depth distribution and per-level occupancy.
    pub fn stats(&self) -> CullStats {
        let mut levels: Vec<LevelStats> = Vec::new();
        self.root.visit(&mut |n| {
            let depth = n.depth() as usize;
            while levels.len() <= depth {
                levels.push(LevelStats {
                    depth: levels.len() as u32,
                    ..Default::default()
                });
            }
            let level = &mut levels[depth];
            level.nodes += 1;
            level.drawables += n.drawables.len();
            if n.is_leaf() {
                level.leaves += 1;
            }
        });
        CullStats {
            levels,
            max_leaf_drawables: self.max_leaf_drawables(),
        }
    }

    /// Log the depth distribution.
    pub fn dump_stats(&self) {
        let stats = self.stats();
        info!(
            nodes = stats.total_nodes(),
            leaves = stats.total_leaves(),
            max_depth = self.max_depth,
            "Cull tree"
        );
        for level in &stats.levels {
            info!(
                depth = level.depth,
                nodes = level.nodes,
                leaves = level.leaves,
                drawables = level.drawables,
                "Cull tree level"
            );
        }
    }
}

fn build_recursive(
    bounds: Mbr,
    address: TileAddress,
    drawables: Vec<Drawable>,
    max_depth: u32,
    max_draw_per_node: usize,
) -> CullNode {
    // Leaf condition: few enough drawables or at max depth
    if drawables.len() <= max_draw_per_node || address.level >= max_depth {
        return CullNode {
            bounds,
            address,
            drawables,
            children: None,
        };
    }

    let mut buckets: [Vec<Drawable>; 4] = Default::default();
    let mut straddlers = Vec::new();
    for d in drawables {
        match bounds.quadrant_of(&d.bounds) {
            Some(q) => buckets[q].push(d),
            None => straddlers.push(d),
        }
    }

    let [b0, b1, b2, b3] = buckets;
    let child = |q: usize, items: Vec<Drawable>| {
        build_recursive(
            bounds.child(q),
            address.child(q),
            items,
            max_depth,
            max_draw_per_node,
        )
    };
    let ((c0, c1), (c2, c3)) = rayon::join(
        || rayon::join(|| child(0, b0), || child(1, b1)),
        || rayon::join(|| child(2, b2), || child(3, b3)),
    );

    CullNode {
        bounds,
        address,
        drawables: straddlers,
        children: Some(Box::new([c0, c1, c2, c3])),
    }
}
