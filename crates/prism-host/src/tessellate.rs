//! Integer-partitioned triangle-domain tessellation.
//!
//! A level `L` cuts every patch edge into `L` segments and yields a triangular grid of
//! `(L + 1)(L + 2) / 2` domain points and `L * L` triangles. Points are enumerated by row
//! `i = 0..=L` and column `j = 0..=L - i`, at barycentric location `(i, j, L - i - j) / L`.

use half::f16;
use prism_core::{Error, Result};

/// Bytes of one patch's factors: three edge factors and one inside factor, all `f16`.
pub const PATCH_FACTOR_BYTES: u64 = 8;

pub fn vertex_count(level: u32) -> u32 {
    (level + 1) * (level + 2) / 2
}

fn vertex_index(level: u32, i: u32, j: u32) -> u32 {
    // Row `i` starts after rows of length L + 1, L, ..., L - i + 2.
    i * (2 * level + 3 - i) / 2 + j
}

/// Domain points and triangle-list indices of a patch tessellated at `level`.
///
/// Triangles keep the winding of the patch's control points.
#[derive(Clone, Debug, PartialEq)]
pub struct TriangleGrid {
    pub points: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
}

impl TriangleGrid {
    pub fn new(level: u32) -> Self {
        let level = level.max(1);
        let inv = 1.0 / level as f32;
        let mut points = Vec::with_capacity(vertex_count(level) as usize);
        for i in 0..=level {
            for j in 0..=level - i {
                let k = level - i - j;
                points.push([i as f32 * inv, j as f32 * inv, k as f32 * inv]);
            }
        }
        let mut triangles = Vec::with_capacity((level * level) as usize);
        for i in 0..level {
            for j in 0..level - i {
                triangles.push([
                    vertex_index(level, i, j),
                    vertex_index(level, i + 1, j),
                    vertex_index(level, i, j + 1),
                ]);
                if j + 1 < level - i {
                    triangles.push([
                        vertex_index(level, i + 1, j),
                        vertex_index(level, i + 1, j + 1),
                        vertex_index(level, i, j + 1),
                    ]);
                }
            }
        }
        Self { points, triangles }
    }
}

/// Tessellation level of `patch` from a factor buffer: the largest of its edge and inside
/// factors rounded up, clamped to `1..=max_factor`.
pub fn patch_level(factors: &[u8], patch: u32, max_factor: u32) -> Result<u32> {
    let start = u64::from(patch) * PATCH_FACTOR_BYTES;
    let end = start + PATCH_FACTOR_BYTES;
    if end > factors.len() as u64 {
        return Err(Error::invalid_argument(format!(
            "tessellation factors of patch {patch} lie outside the {}-byte factor buffer",
            factors.len()
        )));
    }
    let raw = &factors[start as usize..end as usize];
    let max = raw
        .chunks_exact(2)
        .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
        .filter(|f| f.is_finite())
        .fold(0.0f32, f32::max);
    Ok((max.ceil() as u32).clamp(1, max_factor.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn signed_area(grid: &TriangleGrid, tri: [u32; 3]) -> f32 {
        // Project onto (u, v); the third coordinate is implied.
        let p = tri.map(|i| grid.points[i as usize]);
        (p[1][0] - p[0][0]) * (p[2][1] - p[0][1]) - (p[1][1] - p[0][1]) * (p[2][0] - p[0][0])
    }

    #[test]
    fn counts_follow_the_level() {
        for level in [1, 2, 3, 7, 64] {
            let grid = TriangleGrid::new(level);
            assert_eq!(grid.points.len() as u32, vertex_count(level), "level {level}");
            assert_eq!(grid.triangles.len() as u32, level * level, "level {level}");
        }
    }

    #[test]
    fn points_are_barycentric() {
        let grid = TriangleGrid::new(5);
        for p in &grid.points {
            assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-5, "{p:?}");
        }
        assert_eq!(grid.points[0], [0.0, 0.0, 1.0]);
        assert_eq!(*grid.points.last().unwrap(), [1.0, 0.0, 0.0]);
    }

    #[test]
    fn triangles_share_one_winding() {
        let grid = TriangleGrid::new(4);
        let first = signed_area(&grid, grid.triangles[0]).signum();
        for tri in &grid.triangles {
            let area = signed_area(&grid, *tri);
            assert_eq!(area.signum(), first, "{tri:?}");
            assert!((area.abs() - 1.0 / 16.0).abs() < 1e-5);
        }
    }

    #[test]
    fn level_is_the_largest_factor() {
        let mut factors = Vec::new();
        for f in [1.0f32, 2.5, 1.0, 2.0, 7.0, 7.0, 7.0, 100.0] {
            factors.extend_from_slice(&f16::from_f32(f).to_le_bytes());
        }
        assert_eq!(patch_level(&factors, 0, 64).unwrap(), 3);
        assert_eq!(patch_level(&factors, 1, 64).unwrap(), 64);
        assert_eq!(patch_level(&factors, 1, 16).unwrap(), 16);
        assert!(patch_level(&factors, 2, 64).is_err());
    }
}
