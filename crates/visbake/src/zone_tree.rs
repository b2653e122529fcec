// zone_tree.rs — binary partition of a camera-movement volume
//
// Leaves are cells, the unit of visibility computation. Bake results
// are staged per cell and only become the committed visible set when
// apply() runs; a failed or cancelled bake discards the stage and
// leaves previously committed data untouched.

use visbake_common::v_shared::{Bounds, Vec3};

/// A leaf region of the zone tree.
#[derive(Debug, Clone, Default)]
pub struct VisCell {
    pub center: Vec3,
    pub size: Vec3,
    staged: Vec<i32>,
    visible_targets: Vec<i32>,
}

impl VisCell {
    pub fn visible_targets(&self) -> &[i32] {
        &self.visible_targets
    }

    pub fn staged_targets(&self) -> &[i32] {
        &self.staged
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZoneNode {
    pub index: i32,
    pub left: i32,  // -1 if leaf
    pub right: i32, // -1 if leaf
    pub bounds: Bounds,
    pub cell: i32, // >= 0 iff leaf
}

pub struct ZoneTree {
    pub nodes: Vec<ZoneNode>,
    cells: Vec<VisCell>,
    target_count: usize,
}

impl ZoneTree {
    /// Splits `bounds` along its longest axis until every leaf fits
    /// within `max_cell_size` on all axes.
    pub fn build(bounds: Bounds, max_cell_size: f32) -> ZoneTree {
        let max_cell_size = max_cell_size.max(1e-3);
        let mut tree = ZoneTree {
            nodes: Vec::new(),
            cells: Vec::new(),
            target_count: 0,
        };
        tree.build_node(bounds, max_cell_size);
        tree
    }

    /// A zone with no cells; bakes against it fail up front.
    pub fn empty() -> ZoneTree {
        ZoneTree {
            nodes: Vec::new(),
            cells: Vec::new(),
            target_count: 0,
        }
    }

    fn build_node(&mut self, bounds: Bounds, max_cell_size: f32) -> i32 {
        let index = self.nodes.len() as i32;
        self.nodes.push(ZoneNode {
            index,
            left: -1,
            right: -1,
            bounds,
            cell: -1,
        });

        let size = bounds.size();
        let axis = bounds.longest_axis();
        if size[axis] <= max_cell_size {
            let cell = self.cells.len() as i32;
            self.cells.push(VisCell {
                center: bounds.center(),
                size,
                staged: Vec::new(),
                visible_targets: Vec::new(),
            });
            self.nodes[index as usize].cell = cell;
            return index;
        }

        let mut lmaxs = bounds.maxs;
        lmaxs[axis] = bounds.center()[axis];
        let mut rmins = bounds.mins;
        rmins[axis] = bounds.center()[axis];

        let l = self.build_node(Bounds::new(bounds.mins, lmaxs), max_cell_size);
        self.nodes[index as usize].left = l;
        let r = self.build_node(Bounds::new(rmins, bounds.maxs), max_cell_size);
        self.nodes[index as usize].right = r;
        index
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, index: usize) -> &VisCell {
        &self.cells[index]
    }

    pub fn cells(&self) -> &[VisCell] {
        &self.cells
    }

    pub fn target_count(&self) -> usize {
        self.target_count
    }

    /// Records the size of the target index space the cell lists
    /// refer to.
    pub fn set_targets(&mut self, count: usize) {
        self.target_count = count;
    }

    /// Stages one visible target for a cell. Append-only during a
    /// bake; nothing is committed until apply().
    pub fn add_visible_target(&mut self, cell: usize, target: i32) {
        self.cells[cell].staged.push(target);
    }

    /// Normalizes staged lists: sorted, deduplicated, shrunk.
    pub fn optimize(&mut self) {
        for cell in &mut self.cells {
            cell.staged.sort_unstable();
            cell.staged.dedup();
            cell.staged.shrink_to_fit();
        }
    }

    /// Commits staged lists, replacing previously committed data.
    pub fn apply(&mut self) {
        for cell in &mut self.cells {
            cell.visible_targets = std::mem::take(&mut cell.staged);
        }
    }

    /// Drops staged state; committed data is untouched.
    pub fn discard(&mut self) {
        for cell in &mut self.cells {
            cell.staged.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> Bounds {
        Bounds::new([0.0, 0.0, 0.0], [40.0, 20.0, 10.0])
    }

    #[test]
    fn test_build_cell_sizes() {
        let tree = ZoneTree::build(volume(), 10.0);
        assert!(tree.cell_count() >= 8);
        for cell in tree.cells() {
            for a in 0..3 {
                assert!(cell.size[a] <= 10.0 + 1e-4);
            }
        }
    }

    #[test]
    fn test_leaves_tile_the_volume() {
        let tree = ZoneTree::build(volume(), 10.0);
        let total: f32 = tree
            .cells()
            .iter()
            .map(|c| c.size[0] * c.size[1] * c.size[2])
            .sum();
        assert!((total - 40.0 * 20.0 * 10.0).abs() < 1.0);
        for cell in tree.cells() {
            assert!(volume().contains_point(&cell.center));
        }
    }

    #[test]
    fn test_stage_optimize_apply() {
        let mut tree = ZoneTree::build(volume(), 40.0);
        assert_eq!(tree.cell_count(), 1);
        tree.add_visible_target(0, 3);
        tree.add_visible_target(0, 1);
        tree.add_visible_target(0, 3);
        assert!(tree.cell(0).visible_targets().is_empty());

        tree.set_targets(4);
        tree.optimize();
        tree.apply();
        assert_eq!(tree.cell(0).visible_targets(), &[1, 3]);
        assert_eq!(tree.target_count(), 4);
        assert!(tree.cell(0).staged_targets().is_empty());
    }

    #[test]
    fn test_discard_keeps_committed_data() {
        let mut tree = ZoneTree::build(volume(), 40.0);
        tree.add_visible_target(0, 7);
        tree.optimize();
        tree.apply();

        // a second bake that gets discarded
        tree.add_visible_target(0, 9);
        tree.discard();
        assert_eq!(tree.cell(0).visible_targets(), &[7]);
        assert!(tree.cell(0).staged_targets().is_empty());
    }

    #[test]
    fn test_empty_zone() {
        let tree = ZoneTree::empty();
        assert_eq!(tree.cell_count(), 0);
    }
}
