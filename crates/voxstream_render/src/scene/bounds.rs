//! Axis-aligned bounding boxes.

use voxstream_core::math::{transform_point, Mat4};
use voxstream_core::Vec3;

/// Axis-aligned bounding box. [`Aabb::EMPTY`] contains nothing and is the
/// identity for [`Aabb::union`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Smallest corner.
    pub min: Vec3,
    /// Largest corner.
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    /// Box containing no points.
    pub const EMPTY: Self = Self {
        min: [f32::INFINITY; 3],
        max: [f32::NEG_INFINITY; 3],
    };

    /// Box from explicit corners.
    #[must_use]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point.
    #[must_use]
    pub fn from_points(points: &[Vec3]) -> Self {
        points.iter().fold(Self::EMPTY, |aabb, p| aabb.including(*p))
    }

    /// True if no point has been added.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        (0..3).any(|axis| self.min[axis] > self.max[axis])
    }

    /// This box grown to contain `p`.
    #[must_use]
    pub fn including(self, p: Vec3) -> Self {
        Self {
            min: [self.min[0].min(p[0]), self.min[1].min(p[1]), self.min[2].min(p[2])],
            max: [self.max[0].max(p[0]), self.max[1].max(p[1]), self.max[2].max(p[2])],
        }
    }

    /// Smallest box containing both.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        if other.is_empty() {
            return self;
        }
        self.including(other.min).including(other.max)
    }

    /// Box around all eight transformed corners.
    #[must_use]
    pub fn transformed(&self, m: &Mat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        let mut out = Self::EMPTY;
        for corner in 0..8u8 {
            let p = [
                if corner & 1 == 0 { self.min[0] } else { self.max[0] },
                if corner & 2 == 0 { self.min[1] } else { self.max[1] },
                if corner & 4 == 0 { self.min[2] } else { self.max[2] },
            ];
            out = out.including(transform_point(m, p));
        }
        out
    }

    /// `[min, max]` over all three axes: the cube the voxel grid spans.
    ///
    /// An empty box maps to `[0, 0]`.
    #[must_use]
    pub fn scalar_extents(&self) -> [f32; 2] {
        if self.is_empty() {
            return [0.0, 0.0];
        }
        [
            self.min[0].min(self.min[1]).min(self.min[2]),
            self.max[0].max(self.max[1]).max(self.max[2]),
        ]
    }
}
