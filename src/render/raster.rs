//! Raster tile bucket: one decoded image plus mask-driven quad geometry.

use crate::constants::EXTENT;
use crate::render::bucket::Bucket;
use crate::render::mask::{full_mask, TileMask};
use crate::render::upload::{BufferHandle, RasterImage, TextureHandle, UploadPass};
use crate::{Result, TileError};
use std::any::Any;
use std::sync::Arc;

/// Vertex layout for raster quads: tile-local position and texture position,
/// both in tile extent units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterLayoutVertex {
    pub pos: [i16; 2],
    pub tex: [i16; 2],
}

/// A contiguous draw range within the bucket's vertex/index data, one per
/// mask rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub vertex_offset: usize,
    pub index_offset: usize,
    pub vertex_length: usize,
    pub index_length: usize,
}

/// Renderable data for one raster tile.
///
/// The decoded image may be shared: an image-source overlay hands the same
/// `Arc<RasterImage>` to every tile it covers. A shared image is never freed
/// just because this bucket finished uploading; an exclusively owned one is
/// released after its first upload since it will not be uploaded again.
///
/// Bucket-local vertices exist only when the mask carves the tile into
/// sub-rectangles (image sources). Plain raster tiles keep `vertices` empty
/// and are drawn with the renderer's shared full-tile quad.
pub struct RasterBucket {
    image: Option<Arc<RasterImage>>,
    shared: bool,
    texture: Option<TextureHandle>,
    mask: TileMask,

    vertices: Vec<RasterLayoutVertex>,
    indices: Vec<u16>,
    segments: Vec<Segment>,

    vertex_buffer: Option<BufferHandle>,
    index_buffer: Option<BufferHandle>,

    image_dirty: bool,
    geometry_dirty: bool,
}

impl RasterBucket {
    /// Bucket over an exclusively owned image.
    pub fn new(image: RasterImage) -> Self {
        Self::build(Some(Arc::new(image)), false)
    }

    /// Bucket over an image shared with other tiles.
    pub fn from_shared(image: Arc<RasterImage>) -> Self {
        Self::build(Some(image), true)
    }

    fn build(image: Option<Arc<RasterImage>>, shared: bool) -> Self {
        Self {
            image_dirty: image.is_some(),
            image,
            shared,
            texture: None,
            mask: full_mask(),
            vertices: Vec::new(),
            indices: Vec::new(),
            segments: Vec::new(),
            vertex_buffer: None,
            index_buffer: None,
            geometry_dirty: false,
        }
    }

    /// Replace the image and schedule a texture re-upload.
    pub fn set_image(&mut self, image: Arc<RasterImage>) {
        self.image = Some(image);
        self.shared = true;
        self.image_dirty = true;
    }

    /// Replace the mask and rebuild quad geometry for its rectangles.
    pub fn set_mask(&mut self, mask: TileMask) {
        if mask == self.mask {
            return;
        }
        self.mask = mask;

        self.vertices.clear();
        self.indices.clear();
        self.segments.clear();

        // The whole-tile mask needs no bucket geometry; the shared quad
        // covers it.
        if self.mask.len() == 1 && self.mask.contains(&crate::render::mask::MaskRect::WHOLE_TILE) {
            self.geometry_dirty = true;
            return;
        }

        for rect in &self.mask {
            let size = (EXTENT >> rect.z) as i16;
            let x0 = rect.x as i16 * size;
            let y0 = rect.y as i16 * size;
            let (x1, y1) = (x0 + size, y0 + size);

            let base = self.vertices.len();
            self.vertices.extend_from_slice(&[
                RasterLayoutVertex { pos: [x0, y0], tex: [x0, y0] },
                RasterLayoutVertex { pos: [x1, y0], tex: [x1, y0] },
                RasterLayoutVertex { pos: [x0, y1], tex: [x0, y1] },
                RasterLayoutVertex { pos: [x1, y1], tex: [x1, y1] },
            ]);
            let b = base as u16;
            let index_offset = self.indices.len();
            self.indices
                .extend_from_slice(&[b, b + 1, b + 2, b + 1, b + 3, b + 2]);
            self.segments.push(Segment {
                vertex_offset: base,
                index_offset,
                vertex_length: 4,
                index_length: 6,
            });
        }
        self.geometry_dirty = true;
    }

    /// Drop the image and all GPU handles, returning to the empty state.
    pub fn clear(&mut self) {
        self.image = None;
        self.shared = false;
        self.texture = None;
        self.vertices.clear();
        self.indices.clear();
        self.segments.clear();
        self.vertex_buffer = None;
        self.index_buffer = None;
        self.image_dirty = false;
        self.geometry_dirty = false;
    }

    pub fn image(&self) -> Option<&Arc<RasterImage>> {
        self.image.as_ref()
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    pub fn mask(&self) -> &TileMask {
        &self.mask
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn vertex_buffer(&self) -> Option<BufferHandle> {
        self.vertex_buffer
    }

    pub fn index_buffer(&self) -> Option<BufferHandle> {
        self.index_buffer
    }

    fn vertex_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.vertices.len() * 8);
        for v in &self.vertices {
            for c in v.pos.iter().chain(v.tex.iter()) {
                out.extend_from_slice(&c.to_le_bytes());
            }
        }
        out
    }

    fn index_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.indices.len() * 2);
        for i in &self.indices {
            out.extend_from_slice(&i.to_le_bytes());
        }
        out
    }
}

impl Bucket for RasterBucket {
    fn has_data(&self) -> bool {
        self.image.is_some() || self.texture.is_some()
    }

    fn needs_upload(&self) -> bool {
        // Empty geometry still needs a pass when old buffers must be dropped.
        self.image_dirty
            || (self.geometry_dirty && (!self.vertices.is_empty() || self.vertex_buffer.is_some()))
    }

    fn upload(&mut self, pass: &mut dyn UploadPass) -> Result<()> {
        if self.image_dirty {
            let image = self
                .image
                .as_ref()
                .ok_or_else(|| TileError::Render("raster bucket has no image to upload".into()))?;
            match self.texture {
                Some(handle) => pass.update_texture(handle, image),
                None => self.texture = Some(pass.create_texture(image)),
            }
            self.image_dirty = false;

            // An exclusively owned image will not be uploaded again; let it
            // go to bound CPU memory. Shared images stay with their other
            // holders.
            if !self.shared {
                self.image = None;
            }
        }

        if self.geometry_dirty {
            if self.vertices.is_empty() {
                self.vertex_buffer = None;
                self.index_buffer = None;
            } else {
                let vbytes = self.vertex_bytes();
                let ibytes = self.index_bytes();
                match self.vertex_buffer {
                    Some(handle) => pass.update_vertex_buffer(handle, &vbytes),
                    None => self.vertex_buffer = Some(pass.create_vertex_buffer(&vbytes)),
                }
                match self.index_buffer {
                    Some(handle) => pass.update_index_buffer(handle, &ibytes),
                    None => self.index_buffer = Some(pass.create_index_buffer(&ibytes)),
                }
            }
            self.geometry_dirty = false;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::mask::MaskRect;

    /// Upload pass that counts calls and mints sequential handles.
    #[derive(Default)]
    struct CountingPass {
        next: u64,
        texture_creates: usize,
        texture_updates: usize,
        buffer_creates: usize,
        buffer_updates: usize,
    }

    impl UploadPass for CountingPass {
        fn create_vertex_buffer(&mut self, _data: &[u8]) -> BufferHandle {
            self.buffer_creates += 1;
            self.next += 1;
            BufferHandle::new(self.next)
        }
        fn update_vertex_buffer(&mut self, _handle: BufferHandle, _data: &[u8]) {
            self.buffer_updates += 1;
        }
        fn create_index_buffer(&mut self, _data: &[u8]) -> BufferHandle {
            self.buffer_creates += 1;
            self.next += 1;
            BufferHandle::new(self.next)
        }
        fn update_index_buffer(&mut self, _handle: BufferHandle, _data: &[u8]) {
            self.buffer_updates += 1;
        }
        fn create_texture(&mut self, _image: &RasterImage) -> TextureHandle {
            self.texture_creates += 1;
            self.next += 1;
            TextureHandle::new(self.next)
        }
        fn update_texture(&mut self, _handle: TextureHandle, _image: &RasterImage) {
            self.texture_updates += 1;
        }
    }

    fn test_image() -> RasterImage {
        RasterImage::new(2, 2, vec![255; 16]).unwrap()
    }

    #[test]
    fn test_upload_is_idempotent() {
        let mut bucket = RasterBucket::new(test_image());
        let mut pass = CountingPass::default();

        assert!(bucket.needs_upload());
        bucket.upload(&mut pass).unwrap();
        bucket.upload(&mut pass).unwrap();

        assert_eq!(pass.texture_creates, 1);
        assert_eq!(pass.texture_updates, 0);
        assert!(bucket.has_data());
        assert!(!bucket.needs_upload());
    }

    #[test]
    fn test_exclusive_image_released_after_upload() {
        let mut bucket = RasterBucket::new(test_image());
        let mut pass = CountingPass::default();
        bucket.upload(&mut pass).unwrap();

        assert!(bucket.image().is_none());
        assert!(bucket.texture().is_some());
        assert!(bucket.has_data());
    }

    #[test]
    fn test_shared_image_retained_after_upload() {
        let shared = Arc::new(test_image());
        let mut bucket = RasterBucket::from_shared(Arc::clone(&shared));
        let mut pass = CountingPass::default();
        bucket.upload(&mut pass).unwrap();

        assert!(bucket.image().is_some());
        assert_eq!(Arc::strong_count(&shared), 2);
    }

    #[test]
    fn test_set_image_marks_dirty_again() {
        let mut bucket = RasterBucket::new(test_image());
        let mut pass = CountingPass::default();
        bucket.upload(&mut pass).unwrap();

        bucket.set_image(Arc::new(test_image()));
        bucket.upload(&mut pass).unwrap();
        assert_eq!(pass.texture_creates, 1);
        assert_eq!(pass.texture_updates, 1);
    }

    #[test]
    fn test_clear_empties_bucket() {
        let mut bucket = RasterBucket::new(test_image());
        let mut pass = CountingPass::default();
        bucket.upload(&mut pass).unwrap();

        bucket.clear();
        assert!(!bucket.has_data());
        assert!(bucket.texture().is_none());
        assert!(bucket.vertex_buffer().is_none());
    }

    #[test]
    fn test_mask_builds_quad_geometry() {
        let mut bucket = RasterBucket::new(test_image());
        let mask: TileMask = [
            MaskRect::new(1, 1, 0),
            MaskRect::new(1, 0, 1),
            MaskRect::new(1, 1, 1),
        ]
        .into_iter()
        .collect();
        bucket.set_mask(mask);

        assert_eq!(bucket.segments().len(), 3);
        let mut pass = CountingPass::default();
        bucket.upload(&mut pass).unwrap();
        assert_eq!(pass.buffer_creates, 2);
        assert!(bucket.vertex_buffer().is_some());
        assert!(bucket.index_buffer().is_some());

        // Re-applying the identical mask is a no-op.
        let same: TileMask = bucket.mask().clone();
        bucket.set_mask(same);
        bucket.upload(&mut pass).unwrap();
        assert_eq!(pass.buffer_updates, 0);
    }

    #[test]
    fn test_whole_tile_mask_drops_stale_buffers() {
        let mut bucket = RasterBucket::new(test_image());
        let mask: TileMask = [MaskRect::new(1, 0, 0)].into_iter().collect();
        bucket.set_mask(mask);
        let mut pass = CountingPass::default();
        bucket.upload(&mut pass).unwrap();
        assert!(bucket.vertex_buffer().is_some());

        bucket.set_mask(full_mask());
        assert!(bucket.needs_upload());
        bucket.upload(&mut pass).unwrap();
        assert!(bucket.vertex_buffer().is_none());
        assert!(bucket.index_buffer().is_none());
        assert!(!bucket.needs_upload());
    }

    #[test]
    fn test_quad_positions_cover_extent() {
        let mut bucket = RasterBucket::new(test_image());
        let mask: TileMask = [MaskRect::new(1, 1, 1)].into_iter().collect();
        bucket.set_mask(mask);

        let half = (EXTENT / 2) as i16;
        assert_eq!(bucket.vertices[0].pos, [half, half]);
        assert_eq!(bucket.vertices[3].pos, [2 * half, 2 * half]);
    }
}
