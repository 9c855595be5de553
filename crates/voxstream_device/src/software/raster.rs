//! # Voxel Rasterizer
//!
//! CPU version of what the voxelization programs do per triangle:
//!
//! 1. Map world positions into grid space with the scalar scene extents,
//!    `g = (p - min) / (max - min) * resolution` on every axis.
//! 2. Pick the axis the triangle normal is most aligned with and project
//!    onto the other two, maximizing the projected area.
//! 3. Rasterize the projected triangle at texel centers `(i + 0.5, j + 0.5)`.
//!    Edges are watertight: a center exactly on an edge shared by two
//!    triangles belongs to exactly one of them (top-left rule).
//! 4. Interpolate depth along the dominant axis and emit one grid cell per
//!    covered texel.
//!
//! With `conservative` set, a texel is covered when its square overlaps the
//! triangle rather than when its center is inside.

use voxstream_core::math::{cross, sub, Vec3};

/// Grid cell `[x, y, z]`.
pub type GridCell = [u32; 3];

/// Per-draw rasterization parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterParams {
    /// Grid edge length.
    pub resolution: u32,
    /// Smallest scene coordinate on any axis.
    pub extent_min: f32,
    /// Largest scene coordinate on any axis.
    pub extent_max: f32,
    /// Cover every touched texel instead of sampling centers.
    pub conservative: bool,
    /// Texels outside `[x0, x1) x [y0, y1)` are never emitted.
    pub clip: ClipRect,
}

/// Half-open texel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipRect {
    /// First column.
    pub x0: u32,
    /// First row.
    pub y0: u32,
    /// One past the last column.
    pub x1: u32,
    /// One past the last row.
    pub y1: u32,
}

impl ClipRect {
    /// Full `size` x `size` area.
    #[must_use]
    pub const fn square(size: u32) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: size,
            y1: size,
        }
    }
}

impl RasterParams {
    /// Parameters for a full-grid pass.
    #[must_use]
    pub const fn new(resolution: u32, extent_min: f32, extent_max: f32, conservative: bool) -> Self {
        Self {
            resolution,
            extent_min,
            extent_max,
            conservative,
            clip: ClipRect::square(resolution),
        }
    }
}

#[derive(Clone, Copy)]
struct Edge {
    origin: [f32; 2],
    dir: [f32; 2],
    owns_ties: bool,
}

impl Edge {
    fn new(from: [f32; 2], to: [f32; 2]) -> Self {
        let dir = [to[0] - from[0], to[1] - from[1]];
        Self {
            origin: from,
            dir,
            // Left edges (heading down) and top edges (heading left)
            owns_ties: dir[1] < 0.0 || (dir[1] == 0.0 && dir[0] < 0.0),
        }
    }

    /// Positive on the interior side of a counter-clockwise triangle.
    #[inline]
    fn eval(&self, p: [f32; 2]) -> f32 {
        self.dir[0] * (p[1] - self.origin[1]) - self.dir[1] * (p[0] - self.origin[0])
    }

    /// Largest amount `eval` changes across a texel from its center.
    #[inline]
    fn half_texel_reach(&self) -> f32 {
        0.5 * (self.dir[0].abs() + self.dir[1].abs())
    }

    #[inline]
    fn covers_center(&self, value: f32) -> bool {
        value > 0.0 || (value == 0.0 && self.owns_ties)
    }
}

/// Rasterizes one triangle given in world space and calls `emit` for every
/// covered grid cell. Degenerate triangles emit nothing.
pub fn voxelize_triangle<F>(triangle: &[Vec3; 3], params: &RasterParams, mut emit: F)
where
    F: FnMut(GridCell),
{
    if params.resolution == 0 {
        return;
    }
    let res = params.resolution as f32;
    let span = params.extent_max - params.extent_min;
    let scale = if span > 0.0 { res / span } else { res };
    let grid = triangle.map(|p| {
        [
            (p[0] - params.extent_min) * scale,
            (p[1] - params.extent_min) * scale,
            (p[2] - params.extent_min) * scale,
        ]
    });

    let normal = cross(sub(grid[1], grid[0]), sub(grid[2], grid[0]));
    let abs = normal.map(f32::abs);
    let axis = if abs[0] >= abs[1] && abs[0] >= abs[2] {
        0
    } else if abs[1] >= abs[2] {
        1
    } else {
        2
    };
    let (u, v) = match axis {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    };

    let mut pts = grid.map(|p| [p[u], p[v]]);
    let mut depth = grid.map(|p| p[axis]);

    let mut area = Edge::new(pts[0], pts[1]).eval(pts[2]);
    if area == 0.0 || !area.is_finite() {
        return;
    }
    if area < 0.0 {
        pts.swap(1, 2);
        depth.swap(1, 2);
        area = -area;
    }

    // Edge i is opposite vertex i
    let edges = [
        Edge::new(pts[1], pts[2]),
        Edge::new(pts[2], pts[0]),
        Edge::new(pts[0], pts[1]),
    ];

    let min_x = pts.iter().map(|p| p[0]).fold(f32::INFINITY, f32::min);
    let max_x = pts.iter().map(|p| p[0]).fold(f32::NEG_INFINITY, f32::max);
    let min_y = pts.iter().map(|p| p[1]).fold(f32::INFINITY, f32::min);
    let max_y = pts.iter().map(|p| p[1]).fold(f32::NEG_INFINITY, f32::max);

    let clip = params.clip;
    let Some((i0, i1)) = texel_span(min_x, max_x, clip.x0, clip.x1.min(params.resolution)) else {
        return;
    };
    let Some((j0, j1)) = texel_span(min_y, max_y, clip.y0, clip.y1.min(params.resolution)) else {
        return;
    };

    let max_cell = params.resolution - 1;
    for j in j0..=j1 {
        for i in i0..=i1 {
            let center = [i as f32 + 0.5, j as f32 + 0.5];
            let values = edges.map(|e| e.eval(center));

            let covered = if params.conservative {
                edges
                    .iter()
                    .zip(values)
                    .all(|(e, value)| value + e.half_texel_reach() >= 0.0)
            } else {
                edges
                    .iter()
                    .zip(values)
                    .all(|(e, value)| e.covers_center(value))
            };
            if !covered {
                continue;
            }

            // Relative to vertex 0 so planes of constant depth stay exact
            let d = depth[0]
                + (values[1] * (depth[1] - depth[0]) + values[2] * (depth[2] - depth[0])) / area;
            let k = (d.floor().max(0.0) as u32).min(max_cell);

            let mut cell = [0u32; 3];
            cell[u] = i;
            cell[v] = j;
            cell[axis] = k;
            emit(cell);
        }
    }
}

/// Inclusive texel range touched by `[lo, hi]`, clamped to `[first, end)`.
fn texel_span(lo: f32, hi: f32, first: u32, end: u32) -> Option<(u32, u32)> {
    if end <= first || !lo.is_finite() || !hi.is_finite() {
        return None;
    }
    let start = lo.floor().max(first as f32);
    let stop = hi.floor().min((end - 1) as f32);
    if stop < start {
        return None;
    }
    Some((start as u32, stop as u32))
}
