//! Scene aggregation and upload.
//!
//! A parser fills a [`MeshGroup`] primitive by primitive, resolving material
//! textures through a [`TextureCache`]; [`SceneResourceTable::upload`] then
//! moves the aggregate onto the device for the voxelizer.

pub mod bounds;
pub mod mesh;
pub mod table;
pub mod texture_cache;

pub use bounds::Aabb;
pub use mesh::{node_transform, MeshGroup, MeshPrimitive, DEFAULT_NORMAL};
pub use table::SceneResourceTable;
pub use texture_cache::{TextureCache, TextureCacheEntry};
