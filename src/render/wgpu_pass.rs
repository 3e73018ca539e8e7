//! wgpu-backed implementation of the upload seam.

use crate::render::upload::{BufferHandle, RasterImage, TextureHandle, UploadPass};
use fxhash::FxHashMap;

/// Vertex layout for the shared full-tile quad drawn for plain raster tiles.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TileQuadVertex {
    pub pos: [f32; 2],
    pub tex: [f32; 2],
}

const TILE_QUAD: [TileQuadVertex; 4] = [
    TileQuadVertex { pos: [0.0, 0.0], tex: [0.0, 0.0] },
    TileQuadVertex { pos: [1.0, 0.0], tex: [1.0, 0.0] },
    TileQuadVertex { pos: [0.0, 1.0], tex: [0.0, 1.0] },
    TileQuadVertex { pos: [1.0, 1.0], tex: [1.0, 1.0] },
];

/// An upload pass over a wgpu device/queue pair.
///
/// Owns the mapping from opaque handles to wgpu resources. The renderer
/// keeps one of these alive per device and drives every bucket's `upload`
/// through it from the device-owning thread.
pub struct WgpuUploadPass<'a> {
    device: &'a wgpu::Device,
    queue: &'a wgpu::Queue,
    buffers: FxHashMap<BufferHandle, wgpu::Buffer>,
    textures: FxHashMap<TextureHandle, wgpu::Texture>,
    tile_quad: Option<wgpu::Buffer>,
    next_handle: u64,
}

impl<'a> WgpuUploadPass<'a> {
    pub fn new(device: &'a wgpu::Device, queue: &'a wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            buffers: FxHashMap::default(),
            textures: FxHashMap::default(),
            tile_quad: None,
            next_handle: 0,
        }
    }

    fn mint(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// The shared unit quad used for raster tiles whose mask covers the
    /// whole tile. Created on first use.
    pub fn tile_quad_buffer(&mut self) -> &wgpu::Buffer {
        let (device, queue) = (self.device, self.queue);
        self.tile_quad.get_or_insert_with(|| {
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Tile Quad Buffer"),
                size: std::mem::size_of_val(&TILE_QUAD) as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            queue.write_buffer(&buffer, 0, bytemuck::cast_slice(&TILE_QUAD));
            buffer
        })
    }

    /// Resolve a handle minted by this pass.
    pub fn buffer(&self, handle: BufferHandle) -> Option<&wgpu::Buffer> {
        self.buffers.get(&handle)
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&wgpu::Texture> {
        self.textures.get(&handle)
    }

    fn create_buffer(&mut self, data: &[u8], usage: wgpu::BufferUsages, label: &str) -> BufferHandle {
        // write_buffer requires 4-byte aligned sizes.
        let padded = (data.len() as u64 + 3) & !3;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: padded,
            usage: usage | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.write_padded(&buffer, data);
        let handle = BufferHandle::new(self.mint());
        self.buffers.insert(handle, buffer);
        handle
    }

    fn write_padded(&self, buffer: &wgpu::Buffer, data: &[u8]) {
        if data.len() % 4 == 0 {
            self.queue.write_buffer(buffer, 0, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize((data.len() + 3) & !3, 0);
            self.queue.write_buffer(buffer, 0, &padded);
        }
    }

    fn write_texture(&self, texture: &wgpu::Texture, image: &RasterImage) {
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &image.data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * image.width),
                rows_per_image: Some(image.height),
            },
            wgpu::Extent3d {
                width: image.width,
                height: image.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

impl UploadPass for WgpuUploadPass<'_> {
    fn create_vertex_buffer(&mut self, data: &[u8]) -> BufferHandle {
        self.create_buffer(data, wgpu::BufferUsages::VERTEX, "Tile Vertex Buffer")
    }

    fn update_vertex_buffer(&mut self, handle: BufferHandle, data: &[u8]) {
        if let Some(buffer) = self.buffers.get(&handle) {
            self.write_padded(buffer, data);
        }
    }

    fn create_index_buffer(&mut self, data: &[u8]) -> BufferHandle {
        self.create_buffer(data, wgpu::BufferUsages::INDEX, "Tile Index Buffer")
    }

    fn update_index_buffer(&mut self, handle: BufferHandle, data: &[u8]) {
        if let Some(buffer) = self.buffers.get(&handle) {
            self.write_padded(buffer, data);
        }
    }

    fn create_texture(&mut self, image: &RasterImage) -> TextureHandle {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Tile Texture"),
            size: wgpu::Extent3d {
                width: image.width,
                height: image.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.write_texture(&texture, image);
        let handle = TextureHandle::new(self.mint());
        self.textures.insert(handle, texture);
        handle
    }

    fn update_texture(&mut self, handle: TextureHandle, image: &RasterImage) {
        if let Some(texture) = self.textures.get(&handle) {
            self.write_texture(texture, image);
        }
    }
}
