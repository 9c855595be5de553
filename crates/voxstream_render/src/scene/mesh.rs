//! # Mesh Group
//!
//! CPU-side aggregate of every primitive in a scene, in the exact layout the
//! scene resource table uploads:
//!
//! ```text
//! primitive 0         primitive 1
//! ┌──────────────┐    ┌──────────────┐
//! │ vertices ... │    │ vertices ... │   ──> vertices      (GpuVertex[])
//! │ indices  ... │    │ indices  ... │   ──> indices       (u32[], local)
//! └──────────────┘    └──────────────┘
//!   transform 0         transform 1      ──> transforms    (Mat4[])
//!   material 0          material 1       ──> materials     (GpuMaterial[])
//!   draw 0              draw 1           ──> draw commands (indirect args)
//! ```
//!
//! Indices stay local to their primitive; each draw command carries the
//! `base_vertex` and `first_index` that locate it in the shared arrays.

use super::bounds::Aabb;
use crate::error::{SceneError, SceneResult};
use voxstream_core::math::{mul, rotation, scale, translation, Mat4, IDENTITY};
use voxstream_core::Vec3;
use voxstream_device::{DrawIndexedIndirectCommand, GpuMaterial, GpuVertex};

/// Normal used when a primitive has none.
pub const DEFAULT_NORMAL: Vec3 = [0.0, 1.0, 0.0];

/// Node transform `T * R * S`.
///
/// `rotation_xyzw` is a unit quaternion in glTF order.
#[must_use]
pub fn node_transform(translate: Vec3, rotation_xyzw: [f32; 4], scale_xyz: Vec3) -> Mat4 {
    mul(
        &mul(&translation(translate), &rotation(rotation_xyzw)),
        &scale(scale_xyz),
    )
}

/// One primitive as extracted by a scene parser.
#[derive(Debug, Clone)]
pub struct MeshPrimitive {
    /// Material name, kept for debugging.
    pub name: String,
    /// Object-space positions.
    pub positions: Vec<Vec3>,
    /// Per-vertex normals, if the source has them.
    pub normals: Option<Vec<Vec3>>,
    /// Per-vertex texture coordinates with a bottom-left origin.
    pub uvs: Option<Vec<[f32; 2]>>,
    /// Triangle list, local to `positions`.
    pub indices: Vec<u32>,
    /// Object-to-world transform.
    pub transform: Mat4,
    /// Material record.
    pub material: GpuMaterial,
    /// Object-space accessor bounds. Computed from positions when absent.
    pub bounds: Option<Aabb>,
}

impl Default for MeshPrimitive {
    fn default() -> Self {
        Self {
            name: String::new(),
            positions: Vec::new(),
            normals: None,
            uvs: None,
            indices: Vec::new(),
            transform: IDENTITY,
            material: GpuMaterial::default(),
            bounds: None,
        }
    }
}

impl MeshPrimitive {
    fn validate(&self) -> SceneResult<()> {
        let positions = self.positions.len();
        if let Some(normals) = &self.normals {
            if normals.len() != positions {
                return Err(SceneError::AttributeLength {
                    attribute: "normals",
                    positions,
                    len: normals.len(),
                });
            }
        }
        if let Some(uvs) = &self.uvs {
            if uvs.len() != positions {
                return Err(SceneError::AttributeLength {
                    attribute: "uvs",
                    positions,
                    len: uvs.len(),
                });
            }
        }
        if self.indices.len() % 3 != 0 {
            return Err(SceneError::IndexCount(self.indices.len()));
        }
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= positions) {
            return Err(SceneError::IndexOutOfRange {
                index,
                vertex_count: positions,
            });
        }
        Ok(())
    }
}

/// Scene aggregate.
#[derive(Debug, Clone, Default)]
pub struct MeshGroup {
    /// All vertices, primitive after primitive.
    pub vertices: Vec<GpuVertex>,
    /// All indices, each local to its primitive.
    pub indices: Vec<u32>,
    /// One transform per draw.
    pub transforms: Vec<Mat4>,
    /// One material per draw.
    pub materials: Vec<GpuMaterial>,
    /// One indirect draw per primitive.
    pub draw_commands: Vec<DrawIndexedIndirectCommand>,
    /// Material names, per draw.
    pub names: Vec<String>,
    bounds: Aabb,
}

impl MeshGroup {
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a primitive and returns its draw id.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError`] if attribute lengths disagree, the index list
    /// is not a triangle list, an index is out of range or the group would
    /// overflow 32-bit draw arguments. The group is unchanged on error.
    pub fn add_primitive(&mut self, primitive: MeshPrimitive) -> SceneResult<u32> {
        primitive.validate()?;

        let draw_id = u32::try_from(self.draw_commands.len())
            .map_err(|_| SceneError::TooLarge("draw count"))?;
        let base_vertex = i32::try_from(self.vertices.len())
            .map_err(|_| SceneError::TooLarge("vertex count"))?;
        let first_index = u32::try_from(self.indices.len())
            .map_err(|_| SceneError::TooLarge("index count"))?;
        let index_count = u32::try_from(primitive.indices.len())
            .map_err(|_| SceneError::TooLarge("primitive index count"))?;

        let local_bounds = primitive
            .bounds
            .unwrap_or_else(|| Aabb::from_points(&primitive.positions));
        self.bounds = self
            .bounds
            .union(local_bounds.transformed(&primitive.transform));

        self.vertices.reserve(primitive.positions.len());
        for (i, &position) in primitive.positions.iter().enumerate() {
            let normal = primitive
                .normals
                .as_ref()
                .map_or(DEFAULT_NORMAL, |n| n[i]);
            let uv = primitive
                .uvs
                .as_ref()
                .map_or([0.0, 0.0], |uv| [uv[i][0], 1.0 - uv[i][1]]);
            self.vertices.push(GpuVertex {
                position,
                normal,
                uv,
            });
        }
        self.indices.extend_from_slice(&primitive.indices);
        self.transforms.push(primitive.transform);
        self.materials.push(primitive.material);
        self.names.push(primitive.name);
        self.draw_commands.push(DrawIndexedIndirectCommand {
            index_count,
            instance_count: 1,
            first_index,
            base_vertex,
            base_instance: 0,
            draw_id,
        });

        Ok(draw_id)
    }

    /// World-space bounds of every primitive added so far.
    #[inline]
    #[must_use]
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Number of draws.
    #[inline]
    #[must_use]
    pub fn draw_count(&self) -> u32 {
        self.draw_commands.len() as u32
    }

    /// Number of triangles over all draws.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// True if no primitive has been added.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.draw_commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> MeshPrimitive {
        MeshPrimitive {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            indices: vec![0, 1, 2],
            ..MeshPrimitive::default()
        }
    }

    #[test]
    fn test_defaults_for_missing_attributes() {
        let mut group = MeshGroup::new();
        group.add_primitive(triangle()).unwrap();

        assert!(group.vertices.iter().all(|v| v.normal == DEFAULT_NORMAL));
        assert!(group.vertices.iter().all(|v| v.uv == [0.0, 0.0]));
    }

    #[test]
    fn test_uv_v_is_flipped() {
        let mut group = MeshGroup::new();
        group
            .add_primitive(MeshPrimitive {
                uvs: Some(vec![[0.25, 0.0], [0.5, 1.0], [0.75, 0.25]]),
                ..triangle()
            })
            .unwrap();

        let uvs: Vec<[f32; 2]> = group.vertices.iter().map(|v| v.uv).collect();
        assert_eq!(uvs, vec![[0.25, 1.0], [0.5, 0.0], [0.75, 0.75]]);
    }

    #[test]
    fn test_draw_commands_locate_each_primitive() {
        let mut group = MeshGroup::new();
        assert_eq!(group.add_primitive(triangle()).unwrap(), 0);
        assert_eq!(group.add_primitive(triangle()).unwrap(), 1);

        let second = group.draw_commands[1];
        assert_eq!(second.index_count, 3);
        assert_eq!(second.instance_count, 1);
        assert_eq!(second.first_index, 3);
        assert_eq!(second.base_vertex, 3);
        assert_eq!(second.base_instance, 0);
        assert_eq!(second.draw_id, 1);
        assert_eq!(group.transforms.len(), 2);
        assert_eq!(group.materials.len(), 2);
        // Indices stay primitive-local
        assert_eq!(&group.indices[3..], &[0, 1, 2]);
    }

    #[test]
    fn test_rejects_bad_primitives_without_side_effects() {
        let mut group = MeshGroup::new();

        let short_normals = MeshPrimitive {
            normals: Some(vec![[0.0, 0.0, 1.0]]),
            ..triangle()
        };
        assert!(matches!(
            group.add_primitive(short_normals),
            Err(SceneError::AttributeLength { attribute: "normals", .. })
        ));

        let out_of_range = MeshPrimitive {
            indices: vec![0, 1, 3],
            ..triangle()
        };
        assert!(matches!(
            group.add_primitive(out_of_range),
            Err(SceneError::IndexOutOfRange { index: 3, .. })
        ));

        let not_triangles = MeshPrimitive {
            indices: vec![0, 1],
            ..triangle()
        };
        assert!(matches!(
            group.add_primitive(not_triangles),
            Err(SceneError::IndexCount(2))
        ));

        assert!(group.is_empty());
        assert!(group.vertices.is_empty());
        assert!(group.bounds().is_empty());
    }

    #[test]
    fn test_bounds_are_world_space() {
        let mut group = MeshGroup::new();
        group
            .add_primitive(MeshPrimitive {
                transform: node_transform([10.0, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0], [2.0; 3]),
                ..triangle()
            })
            .unwrap();

        let bounds = group.bounds();
        assert_eq!(bounds.min, [10.0, 0.0, 0.0]);
        assert_eq!(bounds.max, [12.0, 2.0, 0.0]);
    }

    #[test]
    fn test_accessor_bounds_take_precedence() {
        let mut group = MeshGroup::new();
        group
            .add_primitive(MeshPrimitive {
                bounds: Some(Aabb::new([-1.0; 3], [1.0; 3])),
                ..triangle()
            })
            .unwrap();
        assert_eq!(group.bounds(), Aabb::new([-1.0; 3], [1.0; 3]));
    }

    #[test]
    fn test_node_transform_order() {
        // Scale first, then rotate 90 degrees about z, then translate
        let half = std::f32::consts::FRAC_1_SQRT_2;
        let m = node_transform([1.0, 0.0, 0.0], [0.0, 0.0, half, half], [2.0, 1.0, 1.0]);
        let p = voxstream_core::math::transform_point(&m, [1.0, 0.0, 0.0]);

        assert!((p[0] - 1.0).abs() < 1e-5);
        assert!((p[1] - 2.0).abs() < 1e-5);
        assert!(p[2].abs() < 1e-5);
    }
}
