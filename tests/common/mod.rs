//! Shared helpers for integration tests.

use std::sync::Mutex;
use tilepipe::{BufferHandle, RasterImage, TextureHandle, Tile, TileError, TileObserver, UploadPass};

/// Upload pass double that records every GPU call it receives.
#[derive(Default)]
pub struct RecordingUploadPass {
    next_handle: u64,
    pub texture_creates: usize,
    pub texture_updates: usize,
    pub vertex_buffer_creates: usize,
    pub index_buffer_creates: usize,
    pub buffer_updates: usize,
}

impl RecordingUploadPass {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl UploadPass for RecordingUploadPass {
    fn create_vertex_buffer(&mut self, _data: &[u8]) -> BufferHandle {
        self.vertex_buffer_creates += 1;
        BufferHandle::new(self.mint())
    }

    fn update_vertex_buffer(&mut self, _handle: BufferHandle, _data: &[u8]) {
        self.buffer_updates += 1;
    }

    fn create_index_buffer(&mut self, _data: &[u8]) -> BufferHandle {
        self.index_buffer_creates += 1;
        BufferHandle::new(self.mint())
    }

    fn update_index_buffer(&mut self, _handle: BufferHandle, _data: &[u8]) {
        self.buffer_updates += 1;
    }

    fn create_texture(&mut self, _image: &RasterImage) -> TextureHandle {
        self.texture_creates += 1;
        TextureHandle::new(self.mint())
    }

    fn update_texture(&mut self, _handle: TextureHandle, _image: &RasterImage) {
        self.texture_updates += 1;
    }
}

/// Observer recording the order of notifications.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl TileObserver for EventLog {
    fn on_tile_changed(&self, tile: &Tile) {
        self.events.lock().unwrap().push(format!(
            "changed loaded={} renderable={} complete={}",
            tile.is_loaded(),
            tile.is_renderable(),
            tile.is_complete()
        ));
    }

    fn on_tile_error(&self, tile: &Tile, error: &TileError) {
        self.events
            .lock()
            .unwrap()
            .push(format!("error complete={} {error}", tile.is_complete()));
    }
}

/// A tiny valid PNG tile.
pub fn png_tile() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([90, 120, 200, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageOutputFormat::Png)
        .unwrap();
    out.into_inner()
}
