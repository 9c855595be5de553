//! # GPU Record Layouts
//!
//! `#[repr(C)]` structs shared between the host and the voxelization
//! programs, plus the binding slots and push constant offsets both sides
//! agree on. Every struct here is uploaded verbatim with `bytemuck`.
//!
//! ```text
//! Count pass (set 1)          Write pass (set 1)
//!   1: vertices                 1: vertices
//!   2: draw commands            2: draw commands
//!   3: transforms               3: transforms
//!   4: counter                  4: materials
//!                               5: counter
//!                               6: fragments
//!
//! Push constants
//!   offset 0, GEOMETRY: [f32; 2] scalar scene extents (min, max)
//!   offset 8, FRAGMENT: u32      voxel grid resolution
//! ```

use crate::handle::TextureId;
use bytemuck::{Pod, Zeroable};

/// Material texture index meaning "no texture".
pub const INVALID_TEXTURE_INDEX: u32 = u32::MAX;

/// Bindless table slot of a texture.
///
/// Slots are keyed by handle, so a material can reference a texture as soon
/// as the handle exists, before its pixels arrive.
#[inline]
#[must_use]
pub const fn bindless_index(texture: TextureId) -> u32 {
    texture.raw()
}

/// Size of one packed voxel fragment record.
pub const VOXEL_FRAGMENT_SIZE: u64 = std::mem::size_of::<u64>() as u64;

/// Counter slots in the voxel counter buffer.
pub mod counter {
    /// Fragments found by the count pass.
    pub const COUNTED: usize = 0;
    /// Fragments written by the write pass (bump allocator).
    pub const WRITTEN: usize = 1;
    /// Number of `u32` slots.
    pub const SLOTS: usize = 2;
    /// Buffer size in bytes.
    pub const BYTE_SIZE: u64 = (SLOTS * std::mem::size_of::<u32>()) as u64;
}

/// Binding slots of the voxelization programs.
pub mod bindings {
    /// Set number the bindless texture table lives in.
    pub const BINDLESS_SET: u32 = 0;
    /// Set number of the voxelization resources.
    pub const SCENE_SET: u32 = 1;

    /// Count pass slots.
    pub mod count_pass {
        /// `GpuVertex[]`.
        pub const VERTICES: u32 = 1;
        /// `DrawIndexedIndirectCommand[]`.
        pub const DRAW_COMMANDS: u32 = 2;
        /// `Mat4[]`, indexed by draw id.
        pub const TRANSFORMS: u32 = 3;
        /// `u32[2]` voxel counter.
        pub const COUNTER: u32 = 4;
    }

    /// Write pass slots.
    pub mod write_pass {
        /// `GpuVertex[]`.
        pub const VERTICES: u32 = 1;
        /// `DrawIndexedIndirectCommand[]`.
        pub const DRAW_COMMANDS: u32 = 2;
        /// `Mat4[]`, indexed by draw id.
        pub const TRANSFORMS: u32 = 3;
        /// `GpuMaterial[]`, indexed by draw id.
        pub const MATERIALS: u32 = 4;
        /// `u32[2]` voxel counter.
        pub const COUNTER: u32 = 5;
        /// `u64[]` packed voxel fragments.
        pub const FRAGMENTS: u32 = 6;
    }
}

/// Push constant offsets of the voxelization programs.
pub mod push_constants {
    /// Scene extents, geometry stage.
    pub const EXTENTS_OFFSET: u32 = 0;
    /// Grid resolution, fragment stage.
    pub const RESOLUTION_OFFSET: u32 = 8;
    /// Total bytes used.
    pub const SIZE: u32 = 12;
}

/// One mesh vertex.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GpuVertex {
    /// Object-space position.
    pub position: [f32; 3],
    /// Object-space normal.
    pub normal: [f32; 3],
    /// Texture coordinate (V already flipped to top-left origin).
    pub uv: [f32; 2],
}

/// Per-primitive material.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuMaterial {
    /// Base color factor.
    pub albedo: [f32; 4],
    /// Emissive factor (w unused).
    pub emissive: [f32; 4],
    /// Metallic factor.
    pub metallic: f32,
    /// Roughness factor.
    pub roughness: f32,
    /// 1 - alpha.
    pub transparency: f32,
    /// Bindless index of the albedo map or [`INVALID_TEXTURE_INDEX`].
    pub albedo_map: u32,
}

impl Default for GpuMaterial {
    fn default() -> Self {
        Self {
            albedo: [1.0; 4],
            emissive: [0.0; 4],
            metallic: 0.0,
            roughness: 1.0,
            transparency: 0.0,
            albedo_map: INVALID_TEXTURE_INDEX,
        }
    }
}

/// Indexed indirect draw arguments, one per primitive.
///
/// The first five fields follow the standard indirect layout; `draw_id`
/// trails them so programs can index per-draw arrays without relying on a
/// built-in draw index.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectCommand {
    /// Indices in this draw.
    pub index_count: u32,
    /// Always 1.
    pub instance_count: u32,
    /// First index in the shared index buffer.
    pub first_index: u32,
    /// Added to every index.
    pub base_vertex: i32,
    /// Always 0.
    pub base_instance: u32,
    /// Index into the transform and material arrays.
    pub draw_id: u32,
}

/// Stride of [`DrawIndexedIndirectCommand`] in the argument buffer.
pub const DRAW_COMMAND_STRIDE: u32 = std::mem::size_of::<DrawIndexedIndirectCommand>() as u32;

/// Decoded voxel fragment.
///
/// Packed into a `u64` as: x bits 0..12, y 12..24, z 24..36, albedo RGB8 in
/// bits 40..64 (R lowest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoxelFragment {
    /// Grid x.
    pub x: u32,
    /// Grid y.
    pub y: u32,
    /// Grid z.
    pub z: u32,
    /// Albedo, 8 bits per channel.
    pub albedo: [u8; 3],
}

impl VoxelFragment {
    const COORD_MASK: u64 = 0xFFF;

    /// Packs into the GPU record.
    #[inline]
    #[must_use]
    pub fn pack(&self) -> u64 {
        (u64::from(self.x) & Self::COORD_MASK)
            | ((u64::from(self.y) & Self::COORD_MASK) << 12)
            | ((u64::from(self.z) & Self::COORD_MASK) << 24)
            | (u64::from(self.albedo[0]) << 40)
            | (u64::from(self.albedo[1]) << 48)
            | (u64::from(self.albedo[2]) << 56)
    }

    /// Unpacks a GPU record.
    #[inline]
    #[must_use]
    pub fn unpack(raw: u64) -> Self {
        Self {
            x: (raw & Self::COORD_MASK) as u32,
            y: ((raw >> 12) & Self::COORD_MASK) as u32,
            z: ((raw >> 24) & Self::COORD_MASK) as u32,
            albedo: [(raw >> 40) as u8, (raw >> 48) as u8, (raw >> 56) as u8],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<GpuVertex>(), 32);
        assert_eq!(std::mem::size_of::<GpuMaterial>(), 48);
        assert_eq!(DRAW_COMMAND_STRIDE, 24);
        assert_eq!(VOXEL_FRAGMENT_SIZE, 8);
        assert_eq!(counter::BYTE_SIZE, 8);
    }

    #[test]
    fn test_fragment_packing_extremes() {
        let fragment = VoxelFragment {
            x: 4095,
            y: 0,
            z: 2048,
            albedo: [0xAB, 0xCD, 0xEF],
        };
        let raw = fragment.pack();

        assert_eq!(raw & 0xFFF, 4095);
        assert_eq!((raw >> 36) & 0xF, 0, "bits 36..40 stay clear");
        assert_eq!(VoxelFragment::unpack(raw), fragment);
    }

    #[test]
    fn test_default_material_has_no_texture() {
        assert_eq!(GpuMaterial::default().albedo_map, INVALID_TEXTURE_INDEX);
    }
}
