//! Renderable per-tile data: buckets, tile masks, and the GPU upload seam.

pub mod bucket;
pub mod mask;
pub mod raster;
pub mod upload;

#[cfg(feature = "render")]
pub mod wgpu_pass;

pub use bucket::Bucket;
pub use mask::{compute_all_masks, compute_tile_mask, full_mask, MaskRect, TileMask};
pub use raster::{RasterBucket, RasterLayoutVertex, Segment};
pub use upload::{BufferHandle, RasterImage, TextureHandle, UploadPass};
