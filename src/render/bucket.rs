//! Polymorphic per-tile renderable data.

use crate::render::upload::UploadPass;
use crate::Result;
use std::any::Any;

/// A container of renderable data for one tile, owned exclusively by that
/// tile and replaced wholesale whenever the tile is re-parsed.
pub trait Bucket: Send {
    /// Whether this bucket currently has anything to draw. Distinct from the
    /// tile-level `renderable` flag: a tile is renderable when any of its
    /// buckets has data.
    fn has_data(&self) -> bool;

    /// Whether the next `upload` call would touch the GPU at all.
    fn needs_upload(&self) -> bool;

    /// Push CPU-side data to the GPU. Safe to call every frame; when nothing
    /// changed since the last upload this is a no-op. An upload-once bucket
    /// may release its CPU-side copy after a successful upload, provided the
    /// data is not shared with other holders.
    fn upload(&mut self, pass: &mut dyn UploadPass) -> Result<()>;

    /// Downcast support for the render pass that knows the concrete variant.
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
