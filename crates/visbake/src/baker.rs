// baker.rs — drives all cell processes to completion and commits
//
// The baker owns the shared read-only flattened data for one bake,
// admits cell processes up to a fixed concurrency cap, polls each
// active process exactly once per tick, and commits results into the
// zone tree only when every cell finished. One cell's fault aborts
// the whole bake; a zone's visibility data is only useful as a
// consistent unit.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use visbake_common::v_shared::LayerMask;

use crate::cell_process::{CellProcess, Phase, SharedBakeData};
use crate::geom_tree::{CullingTarget, GeomNode, GeomTree};
use crate::raycast::RaycastBackend;
use crate::zone_tree::ZoneTree;

/// Cap on concurrently active cell processes.
pub const DEFAULT_MAX_ACTIVE_PROCESSES: usize = 50;
/// Hard cap on ray commands issued per phase invocation.
pub const DEFAULT_COMMAND_BUDGET: u32 = 4096;

#[derive(Debug, Clone)]
pub struct BakeParams {
    pub rays_per_unit: f32,
    pub max_rays_per_source: u32,
    /// Tree depth where ray testing starts; everything shallower is
    /// assumed covered.
    pub start_depth: i32,
    pub max_commands_per_update: u32,
    pub max_active_processes: usize,
    /// Layers rays collide with; explicit instead of a global.
    pub mask: LayerMask,
}

impl Default for BakeParams {
    fn default() -> Self {
        Self {
            rays_per_unit: 2.0,
            max_rays_per_source: 64,
            start_depth: 2,
            max_commands_per_update: DEFAULT_COMMAND_BUDGET,
            max_active_processes: DEFAULT_MAX_ACTIVE_PROCESSES,
            mask: LayerMask::all(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BakeError {
    /// The progress sink requested an abort. A cancelled bake leaves
    /// no partial state and cannot be resumed.
    Cancelled,
    /// Any fault during traversal, dispatch, or tree access.
    Fault(String),
}

impl fmt::Display for BakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BakeError::Cancelled => write!(f, "bake cancelled"),
            BakeError::Fault(msg) => write!(f, "bake failed: {}", msg),
        }
    }
}

impl std::error::Error for BakeError {}

#[derive(Debug, Clone, Copy, Default)]
pub struct BakeStats {
    pub cells: usize,
    pub commands_issued: u64,
    pub batches_dispatched: u64,
    pub ticks: u64,
}

/// Cancelable progress observer. Returning false from update()
/// requests a hard abort.
pub trait ProgressSink: Sync {
    fn update(&self, finished: usize, total: usize) -> bool;
}

/// Ready-made sink: latest progress behind a mutex plus an atomic
/// cancel request, for driving a UI from another thread.
#[derive(Default)]
pub struct SharedProgress {
    state: Mutex<(usize, usize)>,
    cancel: AtomicBool,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> (usize, usize) {
        *self.state.lock()
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

impl ProgressSink for SharedProgress {
    fn update(&self, finished: usize, total: usize) -> bool {
        *self.state.lock() = (finished, total);
        !self.cancel.load(Ordering::Relaxed)
    }
}

pub struct Baker {
    nodes_len: usize,
    shared_base: SharedBase,
    backend: Arc<dyn RaycastBackend>,
}

// flattened once per Baker; cloned into the per-bake Arc
struct SharedBase {
    nodes: Vec<GeomNode>,
    targets: Vec<CullingTarget>,
    leaf_targets: Vec<Vec<i32>>,
    height: i32,
    max_scene_distance: f32,
}

impl Baker {
    /// Flattens the geometry tree and target list into read-only
    /// index-addressed arrays.
    pub fn new(tree: &GeomTree, backend: Arc<dyn RaycastBackend>) -> Baker {
        Baker {
            nodes_len: tree.nodes.len(),
            shared_base: SharedBase {
                nodes: tree.nodes.clone(),
                targets: tree.targets.clone(),
                leaf_targets: tree.leaf_targets.clone(),
                height: tree.height,
                max_scene_distance: tree.max_scene_distance(),
            },
            backend,
        }
    }

    /// Computes visibility for every leaf cell of `zone` and commits
    /// the result. All-or-nothing: on any fault or cancellation the
    /// zone's previously committed data is left untouched.
    pub fn bake(
        &self,
        zone: &mut ZoneTree,
        params: &BakeParams,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<BakeStats, BakeError> {
        let total = zone.cell_count();
        if total == 0 {
            return Err(BakeError::Fault(
                "camera zone has no leaf cells to bake".to_string(),
            ));
        }
        if self.nodes_len == 0 {
            return Err(BakeError::Fault("geometry tree is empty".to_string()));
        }

        let shared = Arc::new(SharedBakeData {
            nodes: self.shared_base.nodes.clone(),
            targets: self.shared_base.targets.clone(),
            leaf_targets: self.shared_base.leaf_targets.clone(),
            height: self.shared_base.height,
            max_scene_distance: self.shared_base.max_scene_distance,
            rays_per_unit: params.rays_per_unit,
            max_rays_per_source: params.max_rays_per_source.max(1),
            start_depth: params.start_depth.max(0),
            max_commands_per_update: params.max_commands_per_update.max(1),
            mask: params.mask,
            backend: self.backend.clone(),
        });

        let mut stats = BakeStats {
            cells: total,
            ..BakeStats::default()
        };
        let cap = params.max_active_processes.max(1);
        let mut pending: VecDeque<usize> = (0..total).collect();
        let mut active: Vec<CellProcess> = Vec::with_capacity(cap.min(total));
        let mut finished = 0usize;

        let result = loop {
            while active.len() < cap {
                match pending.pop_front() {
                    Some(cell) => {
                        let center = zone.cell(cell).center;
                        active.push(CellProcess::new(cell, center, shared.clone()));
                    }
                    None => break,
                }
            }
            if active.is_empty() {
                break Ok(());
            }
            stats.ticks += 1;

            // poll every active process exactly once
            let mut fault: Option<String> = None;
            for process in active.iter_mut() {
                match process.update() {
                    Ok(_) => {}
                    Err(msg) => {
                        fault = Some(msg);
                        break;
                    }
                }
            }
            if let Some(msg) = fault {
                break Err(BakeError::Fault(msg));
            }

            // harvest finished processes
            let mut i = 0;
            while i < active.len() {
                if active[i].phase() == Phase::Finished {
                    let process = active.swap_remove(i);
                    for target in process.visible_target_indices() {
                        zone.add_visible_target(process.cell_index(), target);
                    }
                    stats.commands_issued += process.commands_issued();
                    stats.batches_dispatched += process.batches_dispatched();
                    finished += 1;
                } else {
                    i += 1;
                }
            }

            if let Some(sink) = progress {
                if !sink.update(finished, total) {
                    break Err(BakeError::Cancelled);
                }
            }
            std::thread::yield_now();
        };

        match result {
            Ok(()) => {
                zone.set_targets(self.shared_base.targets.len());
                zone.optimize();
                zone.apply();
                if let Some(sink) = progress {
                    sink.update(finished, total);
                }
                Ok(stats)
            }
            Err(err) => {
                // in-flight processes drop here; staged results are
                // discarded so committed data stays intact
                drop(active);
                zone.discard();
                Err(err)
            }
        }
    }
}
