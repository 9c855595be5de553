//! # Texture Cache
//!
//! Deduplicates texture requests by path while a scene is being parsed.
//!
//! A request hashes the resolved path (DJB2). On a hit the existing handle
//! is returned and nothing is queued. On a miss the image header is probed
//! for its extent, an `Rgba8Unorm` texture is created at that extent right
//! away, and the pixel load is queued on the [`AsyncLoader`]. The handle is
//! therefore usable in materials immediately, long before its pixels exist.
//!
//! Two different paths with the same hash are not merged: the later one is
//! logged and kept in a path-keyed side table, so it is still loaded once.
//!
//! The cache belongs to the parsing thread and is not synchronized.

use crate::streaming::AsyncLoader;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use voxstream_core::PathHash;
use voxstream_device::{
    bindless_index, RenderDevice, TextureDescriptor, TextureFormat, TextureId, TextureUsage,
    INVALID_TEXTURE_INDEX,
};

/// One cached texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureCacheEntry {
    /// Resolved image path.
    pub path: PathBuf,
    /// Device texture.
    pub texture: TextureId,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
}

/// Path-keyed texture cache.
#[derive(Debug, Default)]
pub struct TextureCache {
    base_path: PathBuf,
    entries: HashMap<PathHash, TextureCacheEntry>,
    /// Paths whose hash is already taken by a different path.
    collisions: HashMap<PathBuf, TextureCacheEntry>,
}

impl TextureCache {
    /// Cache resolving relative URIs against `base_path` (usually the
    /// directory of the scene file).
    #[must_use]
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            entries: HashMap::new(),
            collisions: HashMap::new(),
        }
    }

    /// Directory URIs are resolved against.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Returns the texture for `uri`, creating it and queueing its load on
    /// first use.
    ///
    /// Returns `None` if the image header cannot be read or the texture
    /// cannot be created; both are logged.
    pub fn request<D: RenderDevice>(
        &mut self,
        device: &D,
        loader: &AsyncLoader<D>,
        uri: &str,
    ) -> Option<TextureId> {
        let path = self.base_path.join(uri);
        let hash = PathHash::of(&path);

        let collides = match self.entries.get(&hash) {
            Some(entry) if entry.path == path => return Some(entry.texture),
            Some(entry) => {
                if let Some(collided) = self.collisions.get(&path) {
                    return Some(collided.texture);
                }
                tracing::warn!(
                    %hash,
                    cached = %entry.path.display(),
                    requested = %path.display(),
                    "texture path hash collision, caching by path"
                );
                true
            }
            None => false,
        };

        let info = match loader.decoder().probe(&path) {
            Ok(info) => info,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read texture header");
                return None;
            }
        };

        let texture = match device.create_texture(&TextureDescriptor {
            width: info.width,
            height: info.height,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
            label: uri.to_string(),
        }) {
            Ok(texture) => texture,
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "failed to create texture");
                return None;
            }
        };

        if let Err(err) = loader.request_texture_load(path.clone(), texture) {
            // The handle stays valid; it just never receives pixels
            tracing::warn!(path = %path.display(), error = %err, "texture load not queued");
        }
        tracing::debug!(
            path = %path.display(),
            texture = texture.raw(),
            width = info.width,
            height = info.height,
            "texture requested"
        );

        let entry = TextureCacheEntry {
            path,
            texture,
            width: info.width,
            height: info.height,
        };
        if collides {
            self.collisions.insert(entry.path.clone(), entry);
        } else {
            self.entries.insert(hash, entry);
        }
        Some(texture)
    }

    /// [`request`](Self::request) mapped to the bindless index a material
    /// stores, [`INVALID_TEXTURE_INDEX`] on failure.
    pub fn request_bindless<D: RenderDevice>(
        &mut self,
        device: &D,
        loader: &AsyncLoader<D>,
        uri: &str,
    ) -> u32 {
        self.request(device, loader, uri)
            .map_or(INVALID_TEXTURE_INDEX, bindless_index)
    }

    /// Cached entry for a resolved path.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&TextureCacheEntry> {
        self.entries
            .get(&PathHash::of(path))
            .filter(|entry| entry.path == path)
            .or_else(|| self.collisions.get(path))
    }

    /// Textures created.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len() + self.collisions.len()
    }

    /// True if no texture has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every texture this cache created.
    pub fn textures(&self) -> impl Iterator<Item = TextureId> + '_ {
        self.entries
            .values()
            .chain(self.collisions.values())
            .map(|entry| entry.texture)
    }

    /// Destroys every texture and empties the cache. The loader must be shut
    /// down first so no copy targets a destroyed texture.
    pub fn destroy<D: RenderDevice>(&mut self, device: &D) {
        for texture in self.textures() {
            if let Err(err) = device.destroy_texture(texture) {
                tracing::warn!(texture = texture.raw(), error = %err, "failed to destroy texture");
            }
        }
        self.entries.clear();
        self.collisions.clear();
    }
}
