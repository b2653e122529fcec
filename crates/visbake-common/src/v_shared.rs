// v_shared.rs — foundational types and functions shared by all visbake modules

// ============================================================
// Basic types
// ============================================================

pub type Vec3 = [f32; 3];

// ============================================================
// Vector math
// ============================================================

pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn vector_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn vector_scale(v: &Vec3, scale: f32) -> Vec3 {
    [v[0] * scale, v[1] * scale, v[2] * scale]
}

/// veca + scale * vecb
pub fn vector_ma(veca: &Vec3, scale: f32, vecb: &Vec3) -> Vec3 {
    [
        veca[0] + scale * vecb[0],
        veca[1] + scale * vecb[1],
        veca[2] + scale * vecb[2],
    ]
}

pub fn vector_length(v: &Vec3) -> f32 {
    dot_product(v, v).sqrt()
}

pub fn vector_distance(a: &Vec3, b: &Vec3) -> f32 {
    vector_length(&vector_subtract(a, b))
}

/// Normalizes in place, returns the original length.
pub fn vector_normalize(v: &mut Vec3) -> f32 {
    let length = vector_length(v);
    if length > 0.0 {
        let ilength = 1.0 / length;
        v[0] *= ilength;
        v[1] *= ilength;
        v[2] *= ilength;
    }
    length
}

pub fn vector_compare(v1: &Vec3, v2: &Vec3) -> bool {
    v1[0] == v2[0] && v1[1] == v2[1] && v1[2] == v2[2]
}

// ============================================================
// Collision layers
// ============================================================

bitflags::bitflags! {
    /// Layer bits carried by occluders and matched against the mask on
    /// each ray command. A ray only interacts with geometry whose
    /// layers intersect its mask.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct LayerMask: u32 {
        const STATIC      = 0x0001;
        const DETAIL      = 0x0002;
        const TERRAIN     = 0x0004;
        const TRANSPARENT = 0x0008;
    }
}

// ============================================================
// Axis-aligned bounds
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    pub mins: Vec3,
    pub maxs: Vec3,
}

impl Bounds {
    pub fn new(mins: Vec3, maxs: Vec3) -> Self {
        Self { mins, maxs }
    }

    pub fn from_center_size(center: Vec3, size: Vec3) -> Self {
        let half = vector_scale(&size, 0.5);
        Self {
            mins: vector_subtract(&center, &half),
            maxs: vector_add(&center, &half),
        }
    }

    pub fn center(&self) -> Vec3 {
        vector_scale(&vector_add(&self.mins, &self.maxs), 0.5)
    }

    pub fn size(&self) -> Vec3 {
        vector_subtract(&self.maxs, &self.mins)
    }

    /// Length of the mins→maxs diagonal.
    pub fn diagonal(&self) -> f32 {
        vector_length(&self.size())
    }

    pub fn contains_point(&self, p: &Vec3) -> bool {
        p[0] >= self.mins[0]
            && p[0] <= self.maxs[0]
            && p[1] >= self.mins[1]
            && p[1] <= self.maxs[1]
            && p[2] >= self.mins[2]
            && p[2] <= self.maxs[2]
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            mins: [
                self.mins[0].min(other.mins[0]),
                self.mins[1].min(other.mins[1]),
                self.mins[2].min(other.mins[2]),
            ],
            maxs: [
                self.maxs[0].max(other.maxs[0]),
                self.maxs[1].max(other.maxs[1]),
                self.maxs[2].max(other.maxs[2]),
            ],
        }
    }

    pub fn longest_axis(&self) -> usize {
        let size = self.size();
        let mut axis = 0;
        if size[1] > size[axis] {
            axis = 1;
        }
        if size[2] > size[axis] {
            axis = 2;
        }
        axis
    }

    /// Slab test of the segment origin + t*dir, t in [0, max_dist],
    /// against these bounds. Returns (entry, exit) distances, with
    /// entry clamped to 0 when the origin is inside.
    pub fn ray_intersect(&self, origin: &Vec3, dir: &Vec3, max_dist: f32) -> Option<(f32, f32)> {
        let mut tmin = 0.0f32;
        let mut tmax = max_dist;
        for i in 0..3 {
            let inv = 1.0 / dir[i];
            let mut t0 = (self.mins[i] - origin[i]) * inv;
            let mut t1 = (self.maxs[i] - origin[i]) * inv;
            if inv < 0.0 {
                std::mem::swap(&mut t0, &mut t1);
            }
            // NaN from a 0*inf product drops the constraint, which is
            // the conservative outcome for an axis-parallel ray on a
            // slab boundary.
            tmin = tmin.max(t0);
            tmax = tmax.min(t1);
            if tmax < tmin {
                return None;
            }
        }
        Some((tmin, tmax))
    }

    /// Entry distance of the segment into these bounds, if it reaches
    /// them at all.
    pub fn ray_entry(&self, origin: &Vec3, dir: &Vec3, max_dist: f32) -> Option<f32> {
        self.ray_intersect(origin, dir, max_dist).map(|(t, _)| t)
    }
}

pub fn add_point_to_bounds(v: &Vec3, mins: &mut Vec3, maxs: &mut Vec3) {
    for i in 0..3 {
        if v[i] < mins[i] {
            mins[i] = v[i];
        }
        if v[i] > maxs[i] {
            maxs[i] = v[i];
        }
    }
}

// ============================================================
// Tests
// ============================================================
