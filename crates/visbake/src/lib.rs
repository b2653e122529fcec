// visbake — static visibility baking engine.
//
// Offline precomputation that determines, for each cell a camera can
// occupy, which culling targets are visible from anywhere inside the
// cell, by budgeted batched raycasting over two flat binary trees.

pub mod geom_tree;
pub mod zone_tree;
pub mod raycast;
pub mod jobs;
pub mod cell_process;
pub mod baker;

pub use baker::{BakeError, BakeParams, BakeStats, Baker, ProgressSink, SharedProgress};
pub use cell_process::{CellProcess, Phase, SharedBakeData};
pub use geom_tree::{CullingTarget, GeomNode, GeomTree};
pub use raycast::{BoxOccluderWorld, Occluder, RayCommand, RayHit, RaycastBackend};
pub use zone_tree::{VisCell, ZoneTree};
