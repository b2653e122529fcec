// geom_tree.rs — flat binary partition of culling-target bounds
//
// Nodes live in a single Vec in depth-first preorder; children are
// referenced by index, -1 meaning "leaf". Preorder numbering gives the
// invariant that a child's index always exceeds its parent's, which
// the cell process relies on for monotonic resume cursors.

use visbake_common::v_shared::{Bounds, LayerMask, Vec3};

/// One candidate visible/occluding object.
#[derive(Debug, Clone, Copy)]
pub struct CullingTarget {
    pub index: i32,
    pub bounds: Bounds,
    pub layers: LayerMask,
}

impl CullingTarget {
    pub fn new(index: i32, bounds: Bounds) -> Self {
        Self {
            index,
            bounds,
            layers: LayerMask::STATIC,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GeomNode {
    pub index: i32,
    pub parent: i32, // -1 at the root
    pub left: i32,   // -1 if leaf
    pub right: i32,  // -1 if leaf
    pub depth: i32,
    pub bounds: Bounds,
    pub is_leaf: bool,
    pub is_empty: bool,
}

pub struct GeomTree {
    pub nodes: Vec<GeomNode>,
    pub targets: Vec<CullingTarget>,
    /// node index → ordered target indices; empty for non-leaves and
    /// empty leaves.
    pub leaf_targets: Vec<Vec<i32>>,
    pub height: i32,
}

/// Leaves stop splitting at this many targets.
pub const DEFAULT_LEAF_CAPACITY: usize = 4;
/// Hard cap on tree depth regardless of target count.
pub const DEFAULT_MAX_DEPTH: i32 = 16;

impl GeomTree {
    /// Builds a tree over the given targets by recursive midpoint
    /// split of the longest axis. Target indices are reassigned to
    /// their slot in the returned `targets` array.
    pub fn build(
        bounds_list: &[(Bounds, LayerMask)],
        leaf_capacity: usize,
        max_depth: i32,
    ) -> Result<GeomTree, String> {
        if bounds_list.is_empty() {
            return Err("geometry tree needs at least one culling target".to_string());
        }
        let leaf_capacity = leaf_capacity.max(1);

        let targets: Vec<CullingTarget> = bounds_list
            .iter()
            .enumerate()
            .map(|(i, &(bounds, layers))| CullingTarget {
                index: i as i32,
                bounds,
                layers,
            })
            .collect();

        let mut tree = GeomTree {
            nodes: Vec::new(),
            targets,
            leaf_targets: Vec::new(),
            height: 0,
        };
        let all: Vec<i32> = (0..tree.targets.len() as i32).collect();
        tree.build_node(&all, -1, 0, leaf_capacity, max_depth);
        tree.leaf_targets.resize(tree.nodes.len(), Vec::new());
        Ok(tree)
    }

    /// Assembles a tree from externally built parts; used when the
    /// partition comes from the authoring side rather than from
    /// `build`. Validates the preorder index invariant.
    pub fn from_parts(
        nodes: Vec<GeomNode>,
        targets: Vec<CullingTarget>,
        mut leaf_targets: Vec<Vec<i32>>,
        height: i32,
    ) -> Result<GeomTree, String> {
        for node in &nodes {
            for child in [node.left, node.right] {
                if child >= 0 && child <= node.index {
                    return Err(format!(
                        "geometry node {}: child index {} does not exceed parent",
                        node.index, child
                    ));
                }
            }
        }
        leaf_targets.resize(nodes.len(), Vec::new());
        Ok(GeomTree {
            nodes,
            targets,
            leaf_targets,
            height,
        })
    }

    /// Diagonal of the root bounds; the distance-ratio normalizer for
    /// ray budgets.
    pub fn max_scene_distance(&self) -> f32 {
        if self.nodes.is_empty() {
            return 1.0;
        }
        self.nodes[0].bounds.diagonal().max(1e-3)
    }

    fn union_bounds(&self, members: &[i32]) -> Bounds {
        let mut bounds = self.targets[members[0] as usize].bounds;
        for &t in &members[1..] {
            bounds = bounds.union(&self.targets[t as usize].bounds);
        }
        bounds
    }

    fn build_node(
        &mut self,
        members: &[i32],
        parent: i32,
        depth: i32,
        leaf_capacity: usize,
        max_depth: i32,
    ) -> i32 {
        let index = self.nodes.len() as i32;
        let bounds = self.union_bounds(members);
        self.nodes.push(GeomNode {
            index,
            parent,
            left: -1,
            right: -1,
            depth,
            bounds,
            is_leaf: true,
            is_empty: false,
        });
        if depth > self.height {
            self.height = depth;
        }
        while self.leaf_targets.len() <= index as usize {
            self.leaf_targets.push(Vec::new());
        }

        if members.len() <= leaf_capacity || depth >= max_depth {
            let mut list = members.to_vec();
            list.sort_unstable();
            self.leaf_targets[index as usize] = list;
            return index;
        }

        // Midpoint split of the longest axis; fall back to a median
        // split when every center lands on one side.
        let axis = bounds.longest_axis();
        let pivot = bounds.center()[axis];
        let (mut left, mut right): (Vec<i32>, Vec<i32>) = members
            .iter()
            .copied()
            .partition(|&t| self.targets[t as usize].bounds.center()[axis] < pivot);
        if left.is_empty() || right.is_empty() {
            let mut sorted = members.to_vec();
            sorted.sort_by(|&a, &b| {
                let ca = self.targets[a as usize].bounds.center()[axis];
                let cb = self.targets[b as usize].bounds.center()[axis];
                ca.partial_cmp(&cb).unwrap_or(std::cmp::Ordering::Equal)
            });
            let mid = sorted.len() / 2;
            right = sorted.split_off(mid);
            left = sorted;
        }

        self.nodes[index as usize].is_leaf = false;
        let l = self.build_node(&left, index, depth + 1, leaf_capacity, max_depth);
        self.nodes[index as usize].left = l;
        let r = self.build_node(&right, index, depth + 1, leaf_capacity, max_depth);
        self.nodes[index as usize].right = r;
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_targets(n: usize) -> Vec<(Bounds, LayerMask)> {
        (0..n)
            .map(|i| {
                let x = (i % 4) as f32 * 10.0;
                let y = ((i / 4) % 4) as f32 * 10.0;
                let z = (i / 16) as f32 * 10.0;
                (
                    Bounds::new([x, y, z], [x + 1.0, y + 1.0, z + 1.0]),
                    LayerMask::STATIC,
                )
            })
            .collect()
    }

    #[test]
    fn test_build_rejects_empty_input() {
        assert!(GeomTree::build(&[], 4, 16).is_err());
    }

    #[test]
    fn test_single_target_is_root_leaf() {
        let tree = GeomTree::build(&grid_targets(1), 4, 16).unwrap();
        assert_eq!(tree.nodes.len(), 1);
        assert!(tree.nodes[0].is_leaf);
        assert_eq!(tree.nodes[0].parent, -1);
        assert_eq!(tree.height, 0);
        assert_eq!(tree.leaf_targets[0], vec![0]);
    }

    #[test]
    fn test_preorder_child_indices_exceed_parent() {
        let tree = GeomTree::build(&grid_targets(32), 2, 16).unwrap();
        for node in &tree.nodes {
            if !node.is_leaf {
                assert!(node.left > node.index);
                assert!(node.right > node.index);
                assert_eq!(tree.nodes[node.left as usize].parent, node.index);
                assert_eq!(tree.nodes[node.right as usize].parent, node.index);
            }
        }
    }

    #[test]
    fn test_leaves_partition_targets() {
        let tree = GeomTree::build(&grid_targets(32), 2, 16).unwrap();
        let mut seen: Vec<i32> = Vec::new();
        for node in &tree.nodes {
            if node.is_leaf && !node.is_empty {
                let list = &tree.leaf_targets[node.index as usize];
                assert!(list.windows(2).all(|w| w[0] < w[1]), "ordered, no dups");
                for &t in list {
                    // every leaf target fits its leaf bounds
                    let tb = tree.targets[t as usize].bounds;
                    assert_eq!(node.bounds.union(&tb), node.bounds);
                }
                seen.extend_from_slice(list);
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..32).collect::<Vec<i32>>());
    }

    #[test]
    fn test_node_bounds_nest_upward() {
        let tree = GeomTree::build(&grid_targets(32), 2, 16).unwrap();
        for node in &tree.nodes {
            if node.parent >= 0 {
                let pb = tree.nodes[node.parent as usize].bounds;
                assert_eq!(pb.union(&node.bounds), pb);
            }
        }
    }

    #[test]
    fn test_depth_cap() {
        // coincident targets cannot be separated; the depth cap stops
        // the median fallback from splitting forever
        let same: Vec<(Bounds, LayerMask)> = (0..16)
            .map(|_| {
                (
                    Bounds::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]),
                    LayerMask::STATIC,
                )
            })
            .collect();
        let tree = GeomTree::build(&same, 1, 3).unwrap();
        assert!(tree.height <= 3);
        assert!(tree.nodes.iter().all(|n| n.depth <= 3));
    }

    #[test]
    fn test_from_parts_rejects_bad_preorder() {
        let node = GeomNode {
            index: 0,
            parent: -1,
            left: 0,
            right: 1,
            depth: 0,
            bounds: Bounds::default(),
            is_leaf: false,
            is_empty: false,
        };
        assert!(GeomTree::from_parts(vec![node], Vec::new(), Vec::new(), 0).is_err());
    }
}
