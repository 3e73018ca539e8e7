//! Read-only surface of the style/layer collaborator.
//!
//! The style system supplies, per frame, the set of active render layers and
//! their paint-time parameters. The pipeline only reads these; it never
//! mutates style state.

use crate::constants::{EXTENT, TILE_SIZE};
use crate::tile::id::TileId;
use nalgebra::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};

/// Paint-time parameters of one active render layer, as far as the tile
/// pipeline needs them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderLayerInfo {
    pub id: String,
    /// Source layer this render layer draws from, when the source is a
    /// multi-layer vector source.
    pub source_layer: Option<String>,
    /// Extra pixel radius hit-testing must consider for this layer, e.g.
    /// text halo width plus offset.
    pub query_padding_px: f32,
}

impl RenderLayerInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_layer: None,
            query_padding_px: 0.0,
        }
    }

    pub fn with_query_padding(mut self, padding_px: f32) -> Self {
        self.query_padding_px = padding_px;
        self
    }

    pub fn with_source_layer(mut self, source_layer: impl Into<String>) -> Self {
        self.source_layer = Some(source_layer.into());
        self
    }
}

/// The set of render layers active this frame, as the style collaborator
/// hands it over.
pub type ActiveLayers<'a> = &'a [RenderLayerInfo];

/// Options for a rendered-features query (hit-testing against what is
/// currently drawn).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedQueryOptions {
    /// Restrict results to these render layers; `None` queries all.
    pub layer_ids: Option<Vec<String>>,
}

/// Options for a source-features query (all parsed features, drawn or not).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceQueryOptions {
    pub source_layer: Option<String>,
}

/// The slice of view state queries need: enough to convert pixel padding to
/// tile units and pose a tile in clip space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformState {
    pub zoom: f64,
    pub bearing_deg: f64,
    pub pixel_ratio: f32,
}

impl TransformState {
    pub fn new(zoom: f64) -> Self {
        Self {
            zoom,
            bearing_deg: 0.0,
            pixel_ratio: 1.0,
        }
    }

    /// Convert a screen-pixel distance into tile-extent units for `tile`.
    pub fn pixels_to_tile_units(&self, tile: &TileId, px: f64) -> f64 {
        let units_per_pixel = EXTENT as f64 / TILE_SIZE as f64;
        px * units_per_pixel * 2f64.powf(tile.overscaled_z as f64 - self.zoom)
    }

    /// Pose matrix placing `tile`'s extent square into world space at the
    /// current zoom. Rotation is applied by the renderer's view matrix, not
    /// here.
    pub fn tile_matrix(&self, tile: &TileId) -> Matrix4<f64> {
        let world_tiles = 2f64.powf(self.zoom - tile.overscaled_z as f64);
        let tile_world_size = TILE_SIZE as f64 * world_tiles;
        let scale = tile_world_size / EXTENT as f64;
        Matrix4::new_translation(&Vector3::new(
            tile.x as f64 * tile_world_size,
            tile.y as f64 * tile_world_size,
            0.0,
        )) * Matrix4::new_nonuniform_scaling(&Vector3::new(scale, scale, 1.0))
    }
}

/// The largest query padding any active layer requires, in pixels.
pub fn max_query_padding(layers: ActiveLayers) -> f32 {
    layers
        .iter()
        .map(|l| l.query_padding_px)
        .fold(0.0, f32::max)
}
