// cell_process.rs — per-cell visibility computation
//
// One process determines, for a single zone cell, which geometry-tree
// nodes and which individual targets are visible from the cell
// center, via iterative batched raycasting. A hard per-invocation cap
// on issued ray commands keeps any single phase from blocking the
// baker's tick; a truncated traversal records a cursor and resumes
// exactly where it stopped on the next invocation.
//
// Phase order is fixed:
//   0 TreeCreateRays       — walk the current tree depth, emit batches
//   1 TreeComputeResults   — raycast + mark visible nodes
//   2 TargetsCreateRays    — emit batches for targets in visible leaves
//   3 TargetsComputeResults— raycast + flag visible targets
//   4 Finished             — terminal, results may be collected
//
// Each phase executes as one schedulable unit on the job pool; the
// owning baker polls once per tick and the process state moves into
// the job closure and back out with its result.

use std::sync::Arc;

use visbake_common::sampling;
use visbake_common::v_shared::{
    vector_distance, vector_length, vector_normalize, vector_subtract, Bounds, LayerMask, Vec3,
};

use crate::geom_tree::{CullingTarget, GeomNode};
use crate::jobs::{self, JobHandle};
use crate::raycast::{RayCommand, RayHit, RaycastBackend};

/// Baseline rays per source before the size/distance term.
const BASE_RAYS_PER_SOURCE: f32 = 5.0;
/// Floor for the distance ratio so nearby sources still get rays.
const MIN_DISTANCE_RATIO: f32 = 0.01;
/// Slack when comparing a hit distance against a target's own entry
/// distance; a ray that hits the target itself still counts as
/// unblocked.
const SELF_OCCLUSION_EPSILON: f32 = 0.01;
/// Hit points interpreted for direct target flagging, per batch.
const MAX_HITS_INTERPRETED_PER_BATCH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    TreeCreateRays,
    TreeComputeResults,
    TargetsCreateRays,
    TargetsComputeResults,
    Finished,
}

/// Read-only bake inputs shared by every concurrently running
/// process. Built once per bake() call.
pub struct SharedBakeData {
    pub nodes: Vec<GeomNode>,
    pub targets: Vec<CullingTarget>,
    pub leaf_targets: Vec<Vec<i32>>,
    pub height: i32,
    pub max_scene_distance: f32,
    pub rays_per_unit: f32,
    pub max_rays_per_source: u32,
    pub start_depth: i32,
    pub max_commands_per_update: u32,
    pub mask: LayerMask,
    pub backend: Arc<dyn RaycastBackend>,
}

#[derive(Debug, Clone, Copy)]
enum BatchSource {
    Node(i32),
    Target(i32),
}

/// A contiguous range of ray commands for one node or target. An
/// empty range is the sentinel for the trivial "bounds contain the
/// cell center" case.
#[derive(Debug, Clone, Copy)]
struct RayBatch {
    source: BatchSource,
    start: u32,
    end: u32,
}

/// Everything a process owns privately. Moves into the phase job and
/// back out with its result.
struct CellState {
    phase: Phase,
    depth: i32,
    // resume cursor; (0, 0) means "level fully covered"
    last_node_index: i32,
    last_target_slot: i32,
    node_visible: Vec<bool>,
    target_visible: Vec<bool>,
    target_computed: Vec<bool>,
    commands: Vec<RayCommand>,
    batches: Vec<RayBatch>,
    commands_issued: u64,
    batches_dispatched: u64,
}

impl CellState {
    fn new(shared: &SharedBakeData) -> CellState {
        CellState {
            phase: Phase::TreeCreateRays,
            depth: shared.start_depth.clamp(0, shared.height),
            last_node_index: 0,
            last_target_slot: 0,
            node_visible: vec![false; shared.nodes.len()],
            target_visible: vec![false; shared.targets.len()],
            target_computed: vec![false; shared.targets.len()],
            commands: Vec::new(),
            batches: Vec::new(),
            commands_issued: 0,
            batches_dispatched: 0,
        }
    }

    fn cursor_active(&self) -> bool {
        self.last_node_index != 0 || self.last_target_slot != 0
    }
}

pub struct CellProcess {
    cell_index: usize,
    center: Vec3,
    shared: Arc<SharedBakeData>,
    phase_hint: Phase,
    state: Option<CellState>,
    job: Option<JobHandle<Result<CellState, String>>>,
}

impl CellProcess {
    pub fn new(cell_index: usize, center: Vec3, shared: Arc<SharedBakeData>) -> CellProcess {
        let state = CellState::new(&shared);
        CellProcess {
            cell_index,
            center,
            shared,
            phase_hint: Phase::TreeCreateRays,
            state: Some(state),
            job: None,
        }
    }

    pub fn cell_index(&self) -> usize {
        self.cell_index
    }

    /// Last phase this process was known to be in.
    pub fn phase(&self) -> Phase {
        self.phase_hint
    }

    /// One cooperative tick: poll the in-flight phase job, and if the
    /// process is between phases, schedule the next one. Never blocks
    /// beyond the brief join that consumes a completed job's result.
    pub fn update(&mut self) -> Result<Phase, String> {
        if let Some(mut job) = self.job.take() {
            if !job.poll() {
                self.job = Some(job);
                return Ok(self.phase_hint);
            }
            let state = job.join()??;
            self.phase_hint = state.phase;
            self.state = Some(state);
        }

        let state = match self.state.take() {
            Some(state) => state,
            None => return Ok(self.phase_hint),
        };
        if state.phase == Phase::Finished {
            self.state = Some(state);
            return Ok(Phase::Finished);
        }
        self.phase_hint = state.phase;

        let shared = self.shared.clone();
        let center = self.center;
        self.job = Some(jobs::spawn(move || run_phase(state, &shared, &center)));
        Ok(self.phase_hint)
    }

    /// Accumulated visible-target indices; meaningful once the
    /// process reports Finished.
    pub fn visible_target_indices(&self) -> Vec<i32> {
        match &self.state {
            Some(state) => state
                .target_visible
                .iter()
                .enumerate()
                .filter_map(|(i, &v)| if v { Some(i as i32) } else { None })
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn commands_issued(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.commands_issued)
    }

    pub fn batches_dispatched(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.batches_dispatched)
    }
}

// ============================================================
// Phase execution
// ============================================================

fn run_phase(
    mut st: CellState,
    shared: &SharedBakeData,
    center: &Vec3,
) -> Result<CellState, String> {
    match st.phase {
        Phase::TreeCreateRays => {
            tree_create_rays(&mut st, shared, center);
            st.phase = Phase::TreeComputeResults;
        }
        Phase::TreeComputeResults => tree_compute_results(&mut st, shared)?,
        Phase::TargetsCreateRays => {
            targets_create_rays(&mut st, shared, center);
            st.phase = Phase::TargetsComputeResults;
        }
        Phase::TargetsComputeResults => targets_compute_results(&mut st, shared)?,
        Phase::Finished => {}
    }
    Ok(st)
}

/// Rays for one source: round(5 + |size| * rays_per_unit * ratio),
/// ratio = max(dist / max_scene_distance, 0.01), clamped to the
/// per-source cap.
fn ray_count(bounds: &Bounds, center: &Vec3, shared: &SharedBakeData) -> u32 {
    let size_mag = vector_length(&bounds.size());
    let dist = vector_distance(&bounds.center(), center);
    let ratio = (dist / shared.max_scene_distance).max(MIN_DISTANCE_RATIO);
    let count = (BASE_RAYS_PER_SOURCE + size_mag * shared.rays_per_unit * ratio).round() as u32;
    count.clamp(1, shared.max_rays_per_source.max(1))
}

/// Appends `count` commands aimed at low-discrepancy points inside
/// `bounds`. Ray length is exactly the origin→sample distance, so a
/// miss means the whole segment is unblocked.
fn emit_rays(
    st: &mut CellState,
    bounds: &Bounds,
    count: usize,
    center: &Vec3,
    mask: LayerMask,
) {
    for r in 0..count {
        let sample = sampling::point_in_bounds(bounds, r as u32);
        let mut dir = vector_subtract(&sample, center);
        let dist = vector_normalize(&mut dir);
        st.commands.push(RayCommand {
            origin: *center,
            dir,
            max_dist: dist,
            mask,
        });
    }
}

// ============================================================
// Phase 0 — TreeCreateRays
// ============================================================

fn tree_create_rays(st: &mut CellState, shared: &SharedBakeData, center: &Vec3) {
    st.commands.clear();
    st.batches.clear();
    let budget = shared.max_commands_per_update as usize;
    let resume_from = st.last_node_index;
    let mut truncated = false;

    let mut stack: Vec<i32> = vec![0];
    while let Some(idx) = stack.pop() {
        let node = &shared.nodes[idx as usize];
        if node.is_empty {
            continue;
        }
        if node.depth < st.depth {
            if !node.is_leaf {
                stack.push(node.right);
                stack.push(node.left);
            }
            continue;
        }
        if node.depth > st.depth {
            continue;
        }

        // at the level under examination
        if resume_from != 0 && idx <= resume_from {
            continue; // covered by a previous invocation of this level
        }
        if st.node_visible[idx as usize] {
            continue;
        }
        let start = st.commands.len() as u32;
        if node.bounds.contains_point(center) {
            st.batches.push(RayBatch {
                source: BatchSource::Node(idx),
                start,
                end: start,
            });
            st.last_node_index = idx;
            continue;
        }
        let count = ray_count(&node.bounds, center, shared) as usize;
        if !st.commands.is_empty() && st.commands.len() + count > budget {
            // cursor already names the last emitted node; an oversized
            // first batch is emitted regardless so the level always
            // makes progress
            truncated = true;
            break;
        }
        emit_rays(st, &node.bounds, count, center, shared.mask);
        st.batches.push(RayBatch {
            source: BatchSource::Node(idx),
            start,
            end: start + count as u32,
        });
        st.last_node_index = idx;
    }

    if !truncated {
        st.last_node_index = 0;
    }
    st.commands_issued += st.commands.len() as u64;
}

// ============================================================
// Phase 1 — TreeComputeResults
// ============================================================

fn tree_compute_results(st: &mut CellState, shared: &SharedBakeData) -> Result<(), String> {
    let hits = dispatch(st, shared)?;

    for bi in 0..st.batches.len() {
        let batch = st.batches[bi];
        let node_idx = match batch.source {
            BatchSource::Node(idx) => idx,
            BatchSource::Target(_) => {
                return Err("target batch in tree phase".to_string());
            }
        };
        if batch.start == batch.end {
            // bounds contain the cell center
            mark_node_visible(st, shared, node_idx);
            continue;
        }

        let node_bounds = shared.nodes[node_idx as usize].bounds;
        let mut interpreted = 0usize;
        for r in batch.start..batch.end {
            let cmd = st.commands[r as usize];
            let hit = hits[r as usize];
            let hit_dist = if hit.is_hit() { hit.dist } else { f32::INFINITY };
            if let Some(entry) = node_bounds.ray_entry(&cmd.origin, &cmd.dir, cmd.max_dist) {
                if hit_dist > entry {
                    mark_ray_path(st, shared, &cmd, hit_dist);
                }
            }
            if hit.is_hit() && interpreted < MAX_HITS_INTERPRETED_PER_BATCH {
                flag_targets_at_point(st, shared, &hit.point);
                interpreted += 1;
            }
        }
    }
    st.commands.clear();
    st.batches.clear();

    if st.last_node_index != 0 {
        st.phase = Phase::TreeCreateRays; // finish this level first
    } else if st.depth >= shared.height {
        st.phase = Phase::TargetsCreateRays;
        st.last_node_index = 0;
        st.last_target_slot = 0;
    } else {
        st.depth += 1;
        st.phase = Phase::TreeCreateRays;
    }
    Ok(())
}

// ============================================================
// Phase 2 — TargetsCreateRays
// ============================================================

fn targets_create_rays(st: &mut CellState, shared: &SharedBakeData, center: &Vec3) {
    st.commands.clear();
    st.batches.clear();
    let budget = shared.max_commands_per_update as usize;
    let resume_node = st.last_node_index;
    let resume_slot = st.last_target_slot;
    let resuming = st.cursor_active();
    let mut truncated = false;

    let mut stack: Vec<i32> = vec![0];
    'walk: while let Some(idx) = stack.pop() {
        let node = &shared.nodes[idx as usize];
        if node.is_empty {
            continue;
        }
        if !node.is_leaf {
            stack.push(node.right);
            stack.push(node.left);
            continue;
        }
        if !(st.node_visible[idx as usize] || node.depth < shared.start_depth) {
            continue;
        }
        if resuming && idx < resume_node {
            continue;
        }
        let start_slot = if resuming && idx == resume_node {
            resume_slot as usize
        } else {
            0
        };

        let list = &shared.leaf_targets[idx as usize];
        for slot in start_slot..list.len() {
            let t = list[slot] as usize;
            if st.target_computed[t] {
                continue;
            }
            if st.target_visible[t] {
                st.target_computed[t] = true;
                continue;
            }
            let tb = shared.targets[t].bounds;
            let start = st.commands.len() as u32;
            if tb.contains_point(center) {
                st.batches.push(RayBatch {
                    source: BatchSource::Target(t as i32),
                    start,
                    end: start,
                });
                st.target_computed[t] = true;
                continue;
            }
            let count = ray_count(&tb, center, shared) as usize;
            if !st.commands.is_empty() && st.commands.len() + count > budget {
                // exact resume position: this target has not been emitted
                st.last_node_index = idx;
                st.last_target_slot = slot as i32;
                truncated = true;
                break 'walk;
            }
            emit_rays(st, &tb, count, center, shared.mask);
            st.batches.push(RayBatch {
                source: BatchSource::Target(t as i32),
                start,
                end: start + count as u32,
            });
            st.target_computed[t] = true;
        }
    }

    if !truncated {
        st.last_node_index = 0;
        st.last_target_slot = 0;
    }
    st.commands_issued += st.commands.len() as u64;
}

// ============================================================
// Phase 3 — TargetsComputeResults
// ============================================================

fn targets_compute_results(st: &mut CellState, shared: &SharedBakeData) -> Result<(), String> {
    let hits = dispatch(st, shared)?;

    for bi in 0..st.batches.len() {
        let batch = st.batches[bi];
        let ti = match batch.source {
            BatchSource::Target(t) => t as usize,
            BatchSource::Node(_) => {
                return Err("node batch in targets phase".to_string());
            }
        };
        if batch.start == batch.end {
            st.target_visible[ti] = true;
            continue;
        }

        let tb = shared.targets[ti].bounds;
        let mut interpreted = 0usize;
        for r in batch.start..batch.end {
            let cmd = st.commands[r as usize];
            let hit = hits[r as usize];
            let hit_dist = if hit.is_hit() { hit.dist } else { f32::INFINITY };
            if let Some(entry) = tb.ray_entry(&cmd.origin, &cmd.dir, cmd.max_dist) {
                if hit_dist > entry - SELF_OCCLUSION_EPSILON {
                    st.target_visible[ti] = true;
                }
            }
            if hit.is_hit() && interpreted < MAX_HITS_INTERPRETED_PER_BATCH {
                flag_targets_at_point(st, shared, &hit.point);
                interpreted += 1;
            }
        }
    }
    st.commands.clear();
    st.batches.clear();

    if st.cursor_active() {
        st.phase = Phase::TargetsCreateRays;
    } else {
        st.phase = Phase::Finished;
    }
    Ok(())
}

// ============================================================
// Shared interpretation helpers
// ============================================================

fn dispatch(st: &mut CellState, shared: &SharedBakeData) -> Result<Vec<RayHit>, String> {
    let hits = shared.backend.raycast_batch(&st.commands);
    if hits.len() != st.commands.len() {
        return Err(format!(
            "raycast backend returned {} hits for {} commands",
            hits.len(),
            st.commands.len()
        ));
    }
    st.batches_dispatched += 1;
    Ok(hits)
}

/// Marks a node and its ancestor chain visible. Flags only ever go
/// false→true.
fn mark_node_visible(st: &mut CellState, shared: &SharedBakeData, node_idx: i32) {
    let mut idx = node_idx;
    while idx >= 0 {
        let slot = idx as usize;
        if st.node_visible[slot] {
            break; // ancestors above are already marked
        }
        st.node_visible[slot] = true;
        idx = shared.nodes[slot].parent;
    }
}

/// Root-down walk marking every node the ray's unblocked segment
/// reaches, short-circuiting subtrees entered at or past the hit
/// distance.
fn mark_ray_path(st: &mut CellState, shared: &SharedBakeData, cmd: &RayCommand, hit_dist: f32) {
    let mut stack: Vec<i32> = vec![0];
    while let Some(idx) = stack.pop() {
        let node = &shared.nodes[idx as usize];
        if node.is_empty {
            continue;
        }
        let entry = match node.bounds.ray_entry(&cmd.origin, &cmd.dir, cmd.max_dist) {
            Some(entry) => entry,
            None => continue,
        };
        if entry >= hit_dist {
            continue;
        }
        st.node_visible[idx as usize] = true;
        if !node.is_leaf {
            stack.push(node.right);
            stack.push(node.left);
        }
    }
}

/// Descends to the leaf containing a hit point and flags every target
/// whose bounds contain it.
fn flag_targets_at_point(st: &mut CellState, shared: &SharedBakeData, point: &Vec3) {
    let mut stack: Vec<i32> = vec![0];
    while let Some(idx) = stack.pop() {
        let node = &shared.nodes[idx as usize];
        if node.is_empty || !node.bounds.contains_point(point) {
            continue;
        }
        if node.is_leaf {
            for &t in &shared.leaf_targets[idx as usize] {
                let slot = t as usize;
                if !st.target_visible[slot]
                    && shared.targets[slot].bounds.contains_point(point)
                {
                    st.target_visible[slot] = true;
                    st.target_computed[slot] = true;
                }
            }
        } else {
            stack.push(node.right);
            stack.push(node.left);
        }
    }
}

// ============================================================
// Tests
// ============================================================
