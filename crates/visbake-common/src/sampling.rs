// sampling.rs — deterministic low-discrepancy sample generation
//
// Golden-ratio additive recurrence in three dimensions: the n-th
// sample is frac(n * alpha) where alpha is built from the generalized
// golden ratio g3 (the positive root of x^4 = x + 1). Consecutive
// samples spread evenly through the unit cube, so a small ray budget
// still covers a bounding box well, and the sequence is a pure
// function of the sample index.

use crate::v_shared::{Bounds, Vec3};

// 1/g3, 1/g3^2, 1/g3^3 for g3 = 1.2207440846057596
const ALPHA: [f64; 3] = [
    0.8191725133961644,
    0.6710436067037893,
    0.5497004779019703,
];

/// n-th point of the recurrence in the unit cube. Index 0 is the
/// first sample.
pub fn unit_point(index: u32) -> Vec3 {
    let n = (index + 1) as f64;
    [
        frac(n * ALPHA[0]) as f32,
        frac(n * ALPHA[1]) as f32,
        frac(n * ALPHA[2]) as f32,
    ]
}

/// n-th sample point inside `bounds`.
pub fn point_in_bounds(bounds: &Bounds, index: u32) -> Vec3 {
    let u = unit_point(index);
    let size = bounds.size();
    [
        bounds.mins[0] + u[0] * size[0],
        bounds.mins[1] + u[1] * size[1],
        bounds.mins[2] + u[2] * size[2],
    ]
}

fn frac(x: f64) -> f64 {
    x - x.floor()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        for i in 0..64 {
            assert_eq!(unit_point(i), unit_point(i));
        }
    }

    #[test]
    fn test_in_unit_cube() {
        for i in 0..1024 {
            let p = unit_point(i);
            for a in 0..3 {
                assert!(p[a] >= 0.0 && p[a] < 1.0, "sample {} axis {} = {}", i, a, p[a]);
            }
        }
    }

    #[test]
    fn test_samples_distinct() {
        let mut pts: Vec<Vec3> = (0..32).map(unit_point).collect();
        pts.sort_by(|a, b| a.partial_cmp(b).unwrap());
        pts.dedup();
        assert_eq!(pts.len(), 32);
    }

    #[test]
    fn test_point_in_bounds() {
        let b = Bounds::new([10.0, -5.0, 0.0], [12.0, 5.0, 1.0]);
        for i in 0..256 {
            let p = point_in_bounds(&b, i);
            assert!(b.contains_point(&p), "sample {} escaped bounds: {:?}", i, p);
        }
    }

    #[test]
    fn test_spread_covers_octants() {
        // 64 samples should land in every octant of the unit cube.
        let mut seen = [false; 8];
        for i in 0..64 {
            let p = unit_point(i);
            let oct = (p[0] >= 0.5) as usize
                | (((p[1] >= 0.5) as usize) << 1)
                | (((p[2] >= 0.5) as usize) << 2);
            seen[oct] = true;
        }
        assert!(seen.iter().all(|&s| s), "octant coverage: {:?}", seen);
    }
}
