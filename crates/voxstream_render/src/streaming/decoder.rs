//! Image decoding for the loader thread.

use crate::error::{LoadError, LoadResult};
use std::path::Path;

/// Decoded or probed image extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl ImageInfo {
    /// Size of the image as tightly packed RGBA8.
    #[inline]
    #[must_use]
    pub fn rgba8_size(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * 4
    }
}

/// Turns image files into RGBA8 pixels.
///
/// `probe` runs on the thread that creates textures and must be cheap;
/// `decode_rgba8` runs on the loader thread.
pub trait TextureDecoder: Send + Sync + 'static {
    /// Reads only the image header.
    ///
    /// # Errors
    ///
    /// [`LoadError::Decode`] if the file is missing or not an image.
    fn probe(&self, path: &Path) -> LoadResult<ImageInfo>;

    /// Decodes the whole image into `out` as RGBA8, replacing its contents.
    ///
    /// # Errors
    ///
    /// [`LoadError::Decode`] if the file is missing or malformed.
    fn decode_rgba8(&self, path: &Path, out: &mut Vec<u8>) -> LoadResult<ImageInfo>;
}

/// Decoder backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateDecoder;

fn decode_error(path: &Path, err: &image::ImageError) -> LoadError {
    LoadError::Decode {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

impl TextureDecoder for ImageCrateDecoder {
    fn probe(&self, path: &Path) -> LoadResult<ImageInfo> {
        let (width, height) = image::image_dimensions(path).map_err(|e| decode_error(path, &e))?;
        Ok(ImageInfo { width, height })
    }

    fn decode_rgba8(&self, path: &Path, out: &mut Vec<u8>) -> LoadResult<ImageInfo> {
        let rgba = image::open(path)
            .map_err(|e| decode_error(path, &e))?
            .into_rgba8();
        let (width, height) = rgba.dimensions();

        out.clear();
        out.extend_from_slice(rgba.as_raw());
        Ok(ImageInfo { width, height })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_png(name: &str, width: u32, height: u32) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "voxstream_decoder_{name}_{}.png",
            std::process::id()
        ));
        let img = image::RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([x as u8, y as u8, 7, 255])
        });
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_probe_and_decode_agree() {
        let path = temp_png("agree", 3, 2);
        let decoder = ImageCrateDecoder;

        let probed = decoder.probe(&path).unwrap();
        let mut pixels = vec![0xFF; 5];
        let decoded = decoder.decode_rgba8(&path, &mut pixels).unwrap();

        assert_eq!(probed, ImageInfo { width: 3, height: 2 });
        assert_eq!(decoded, probed);
        assert_eq!(pixels.len() as u64, probed.rgba8_size());
        // Pixel (2, 1)
        assert_eq!(&pixels[(3 + 2) * 4..(3 + 2) * 4 + 4], &[2, 1, 7, 255]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_file_is_decode_error() {
        let decoder = ImageCrateDecoder;
        let err = decoder
            .probe(Path::new("/definitely/not/here.png"))
            .unwrap_err();
        assert!(matches!(err, LoadError::Decode { .. }));
    }
}
