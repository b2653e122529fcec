// raycast.rs — batched nearest-hit raycasting against occluder boxes

use rayon::prelude::*;
use visbake_common::v_shared::{vector_ma, Bounds, LayerMask, Vec3};

use crate::geom_tree::CullingTarget;

/// One ray to resolve: unit direction, finite length, layer filter.
#[derive(Debug, Clone, Copy)]
pub struct RayCommand {
    pub origin: Vec3,
    pub dir: Vec3,
    pub max_dist: f32,
    pub mask: LayerMask,
}

/// Nearest hit for one command. A miss carries `dist = INFINITY` and
/// `target = -1`.
#[derive(Debug, Clone, Copy)]
pub struct RayHit {
    pub dist: f32,
    pub point: Vec3,
    pub target: i32,
}

impl RayHit {
    pub fn none() -> Self {
        Self {
            dist: f32::INFINITY,
            point: [0.0, 0.0, 0.0],
            target: -1,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.dist.is_finite()
    }
}

/// Nearest-hit raycast service. Implementations must be safe to share
/// across concurrently running cell processes.
pub trait RaycastBackend: Send + Sync {
    fn raycast(&self, cmd: &RayCommand) -> RayHit;

    /// Resolves a whole command buffer data-parallel.
    fn raycast_batch(&self, cmds: &[RayCommand]) -> Vec<RayHit> {
        cmds.par_iter().map(|cmd| self.raycast(cmd)).collect()
    }
}

/// One blocking box in the occluder world.
#[derive(Debug, Clone, Copy)]
pub struct Occluder {
    pub bounds: Bounds,
    pub layers: LayerMask,
    /// Target index this box belongs to, -1 for pure occluders.
    pub target: i32,
}

/// Brute-force nearest-hit backend over a list of occluder boxes.
/// Rays that start inside a box pass through it, matching the source
/// engine's raycast convention; a cell center sitting inside an
/// occluder would otherwise see nothing at all.
pub struct BoxOccluderWorld {
    occluders: Vec<Occluder>,
}

impl BoxOccluderWorld {
    pub fn new(occluders: Vec<Occluder>) -> Self {
        Self { occluders }
    }

    /// Every culling target doubles as an occluder of its own bounds.
    pub fn from_targets(targets: &[CullingTarget]) -> Self {
        Self {
            occluders: targets
                .iter()
                .map(|t| Occluder {
                    bounds: t.bounds,
                    layers: t.layers,
                    target: t.index,
                })
                .collect(),
        }
    }

    pub fn push(&mut self, occluder: Occluder) {
        self.occluders.push(occluder);
    }
}

impl RaycastBackend for BoxOccluderWorld {
    fn raycast(&self, cmd: &RayCommand) -> RayHit {
        let mut best = RayHit::none();
        for occ in &self.occluders {
            if !occ.layers.intersects(cmd.mask) {
                continue;
            }
            // entry 0 with the origin inside means the ray starts in
            // this box; it does not block then
            let hit = occ
                .bounds
                .ray_intersect(&cmd.origin, &cmd.dir, cmd.max_dist)
                .filter(|&(entry, _)| {
                    entry > 0.0 || !occ.bounds.contains_point(&cmd.origin)
                });
            if let Some((entry, _)) = hit {
                if entry < best.dist {
                    best = RayHit {
                        dist: entry,
                        point: vector_ma(&cmd.origin, entry, &cmd.dir),
                        target: occ.target,
                    };
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(origin: Vec3, dir: Vec3, max_dist: f32) -> RayCommand {
        RayCommand {
            origin,
            dir,
            max_dist,
            mask: LayerMask::all(),
        }
    }

    fn world_two_boxes() -> BoxOccluderWorld {
        BoxOccluderWorld::new(vec![
            Occluder {
                bounds: Bounds::new([5.0, -1.0, -1.0], [6.0, 1.0, 1.0]),
                layers: LayerMask::STATIC,
                target: 0,
            },
            Occluder {
                bounds: Bounds::new([10.0, -1.0, -1.0], [11.0, 1.0, 1.0]),
                layers: LayerMask::DETAIL,
                target: 1,
            },
        ])
    }

    #[test]
    fn test_nearest_hit() {
        let world = world_two_boxes();
        let hit = world.raycast(&cmd([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], 100.0));
        assert!(hit.is_hit());
        assert_eq!(hit.dist, 5.0);
        assert_eq!(hit.target, 0);
        assert_eq!(hit.point, [5.0, 0.0, 0.0]);
    }

    #[test]
    fn test_miss_past_max_dist() {
        let world = world_two_boxes();
        let hit = world.raycast(&cmd([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], 3.0));
        assert!(!hit.is_hit());
        assert_eq!(hit.target, -1);
    }

    #[test]
    fn test_layer_filter() {
        let world = world_two_boxes();
        let mut c = cmd([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], 100.0);
        c.mask = LayerMask::DETAIL;
        let hit = world.raycast(&c);
        assert_eq!(hit.target, 1);
        assert_eq!(hit.dist, 10.0);
    }

    #[test]
    fn test_origin_inside_box_passes_through() {
        let world = world_two_boxes();
        // start inside the first box; only the second may block
        let hit = world.raycast(&cmd([5.5, 0.0, 0.0], [1.0, 0.0, 0.0], 100.0));
        assert_eq!(hit.target, 1);
        assert_eq!(hit.dist, 4.5);
    }

    #[test]
    fn test_batch_matches_single() {
        let world = world_two_boxes();
        let cmds: Vec<RayCommand> = (0..64)
            .map(|i| cmd([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], 1.0 + i as f32))
            .collect();
        let hits = world.raycast_batch(&cmds);
        assert_eq!(hits.len(), cmds.len());
        for (c, h) in cmds.iter().zip(&hits) {
            let single = world.raycast(c);
            assert_eq!(h.dist, single.dist);
            assert_eq!(h.target, single.target);
        }
    }
}
