//! The GPU upload seam.
//!
//! The pipeline produces CPU-side data and hands it to an [`UploadPass`]
//! supplied by the renderer; it never owns the GPU device. Handles returned
//! by a pass are opaque and only meaningful to the pass that minted them.
//! Upload must happen on the thread that owns the GPU device, and never
//! concurrently with a parse result being applied to the same bucket.

use crate::{Result, TileError};

/// A decoded, premultiplied RGBA image shared between buckets.
///
/// One decoded image may back several tiles (an image-source overlay
/// composited into every tile it touches), so images travel as
/// `Arc<RasterImage>` and are replaced, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    /// Premultiplied RGBA8, row-major, `width * height * 4` bytes.
    pub data: Vec<u8>,
}

impl RasterImage {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(TileError::Render(format!(
                "image buffer is {} bytes, expected {expected}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build from straight-alpha RGBA8, premultiplying each pixel.
    pub fn from_rgba8(width: u32, height: u32, mut data: Vec<u8>) -> Result<Self> {
        for px in data.chunks_exact_mut(4) {
            let a = px[3] as u16;
            px[0] = ((px[0] as u16 * a) / 255) as u8;
            px[1] = ((px[1] as u16 * a) / 255) as u8;
            px[2] = ((px[2] as u16 * a) / 255) as u8;
        }
        Self::new(width, height, data)
    }

    /// Decode an encoded raster tile (PNG, JPEG, WebP) into a premultiplied
    /// image.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| TileError::Parse(format!("raster decode failed: {e}")))?
            .to_rgba8();
        let (width, height) = img.dimensions();
        Self::from_rgba8(width, height, img.into_raw())
    }
}

/// Opaque handle to a GPU vertex or index buffer minted by an upload pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(u64);

impl BufferHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Opaque handle to a GPU texture minted by an upload pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(u64);

impl TextureHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Operations a renderer's upload pass exposes to buckets.
///
/// Buckets call these from [`Bucket::upload`](crate::Bucket::upload); the
/// pass implementation owns the actual device objects and their lifetime.
pub trait UploadPass {
    fn create_vertex_buffer(&mut self, data: &[u8]) -> BufferHandle;
    fn update_vertex_buffer(&mut self, handle: BufferHandle, data: &[u8]);
    fn create_index_buffer(&mut self, data: &[u8]) -> BufferHandle;
    fn update_index_buffer(&mut self, handle: BufferHandle, data: &[u8]);
    fn create_texture(&mut self, image: &RasterImage) -> TextureHandle;
    fn update_texture(&mut self, handle: TextureHandle, image: &RasterImage);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_size_validation() {
        assert!(RasterImage::new(2, 2, vec![0; 16]).is_ok());
        assert!(RasterImage::new(2, 2, vec![0; 15]).is_err());
    }

    #[test]
    fn test_premultiply() {
        let img = RasterImage::from_rgba8(1, 1, vec![200, 100, 0, 127]).unwrap();
        assert_eq!(img.data, vec![99, 49, 0, 127]);
    }
}
