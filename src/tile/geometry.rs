//! Decoded geometry tile contents: features, their spatial index, and the
//! fill bucket built from them.
//!
//! Feature coordinates live in tile-extent units (0..EXTENT across the
//! tile). Wire-format decoding proper is a collaborator concern; the parse
//! path here accepts a GeoJSON feature collection, which is what the worker
//! pipeline feeds it.

use crate::constants::EXTENT;
use crate::render::bucket::Bucket;
use crate::render::upload::{BufferHandle, UploadPass};
use crate::style::{RenderedQueryOptions, SourceQueryOptions};
use crate::{Result, TileError};
use geo::{BoundingRect, Intersects};
use geo_types::{Coord, Geometry, LineString, Point, Polygon, Rect};
use rstar::{RTree, RTreeObject, AABB};
use std::any::Any;

/// One decoded feature of a geometry tile.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryTileFeature {
    pub id: Option<u64>,
    /// Source layer the feature came from.
    pub layer: String,
    /// Geometry in tile-extent units.
    pub geometry: Geometry<f64>,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Spatial index entry pointing back into the feature list.
struct IndexedFeature {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedFeature {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// The parsed contents of a geometry tile: features plus an R-tree over
/// their envelopes for hit-testing.
pub struct GeometryTileData {
    features: Vec<GeometryTileFeature>,
    index: RTree<IndexedFeature>,
}

impl GeometryTileData {
    pub fn new(features: Vec<GeometryTileFeature>) -> Self {
        let entries = features
            .iter()
            .enumerate()
            .filter_map(|(index, feature)| {
                feature.geometry.bounding_rect().map(|rect| IndexedFeature {
                    index,
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();
        Self {
            features,
            index: RTree::bulk_load(entries),
        }
    }

    /// Decode a GeoJSON feature collection with tile-unit coordinates.
    ///
    /// A feature's source layer is read from its `layer` property,
    /// defaulting to `"default"`.
    pub fn from_geojson(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| TileError::Parse(format!("invalid geometry tile payload: {e}")))?;
        let features = value
            .get("features")
            .and_then(|f| f.as_array())
            .ok_or_else(|| TileError::Parse("payload has no features array".into()))?;

        let mut decoded = Vec::with_capacity(features.len());
        for feature in features {
            let geometry = feature
                .get("geometry")
                .and_then(geometry_from_geojson)
                .ok_or_else(|| TileError::Parse("feature has unsupported geometry".into()))?;
            let properties = feature
                .get("properties")
                .and_then(|p| p.as_object())
                .cloned()
                .unwrap_or_default();
            let layer = properties
                .get("layer")
                .and_then(|l| l.as_str())
                .unwrap_or("default")
                .to_string();
            decoded.push(GeometryTileFeature {
                id: feature.get("id").and_then(|id| id.as_u64()),
                layer,
                geometry,
                properties,
            });
        }
        Ok(Self::new(decoded))
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn features(&self) -> &[GeometryTileFeature] {
        &self.features
    }

    /// Source layers present in this tile, deduplicated.
    pub fn layers(&self) -> Vec<&str> {
        let mut layers: Vec<&str> = self.features.iter().map(|f| f.layer.as_str()).collect();
        layers.sort_unstable();
        layers.dedup();
        layers
    }

    /// Hit-test against a query polygon in tile units, expanded by
    /// `padding` tile units.
    ///
    /// Candidates come from the R-tree; each is then checked precisely
    /// against the query polygon, or against the padding-expanded query
    /// bounds when a halo padding is in effect.
    pub fn query_rendered(
        &self,
        query_polygon: &[Coord<f64>],
        padding: f64,
        options: &RenderedQueryOptions,
        source_layers: &[(&str, Option<&str>)],
    ) -> Vec<(String, GeometryTileFeature)> {
        if query_polygon.is_empty() {
            return Vec::new();
        }
        let (min, max) = polygon_bounds(query_polygon);
        let envelope = AABB::from_corners(
            [min.x - padding, min.y - padding],
            [max.x + padding, max.y + padding],
        );
        let precise = Polygon::new(LineString::from(query_polygon.to_vec()), vec![]);
        let padded = Rect::new(
            Coord { x: min.x - padding, y: min.y - padding },
            Coord { x: max.x + padding, y: max.y + padding },
        );

        let mut hits = Vec::new();
        for entry in self.index.locate_in_envelope_intersecting(&envelope) {
            let feature = &self.features[entry.index];
            let hit = if padding <= 0.0 {
                feature.geometry.intersects(&precise)
            } else {
                feature.geometry.intersects(&padded)
            };
            if !hit {
                continue;
            }
            for (layer_id, source_layer) in source_layers {
                if let Some(wanted) = &options.layer_ids {
                    if !wanted.iter().any(|w| w == layer_id) {
                        continue;
                    }
                }
                let feature_matches = match source_layer {
                    Some(sl) => feature.layer == *sl,
                    None => true,
                };
                if feature_matches {
                    hits.push(((*layer_id).to_string(), feature.clone()));
                }
            }
        }
        hits
    }

    /// All parsed features matching the source-layer filter, regardless of
    /// whether they are currently drawn.
    pub fn query_source(&self, options: &SourceQueryOptions) -> Vec<GeometryTileFeature> {
        self.features
            .iter()
            .filter(|f| match &options.source_layer {
                Some(layer) => f.layer == *layer,
                None => true,
            })
            .cloned()
            .collect()
    }
}

fn polygon_bounds(coords: &[Coord<f64>]) -> (Coord<f64>, Coord<f64>) {
    let mut min = coords[0];
    let mut max = coords[0];
    for c in coords {
        min.x = min.x.min(c.x);
        min.y = min.y.min(c.y);
        max.x = max.x.max(c.x);
        max.y = max.y.max(c.y);
    }
    (min, max)
}

/// Minimal GeoJSON geometry decoder covering the types the pipeline emits.
fn geometry_from_geojson(value: &serde_json::Value) -> Option<Geometry<f64>> {
    let kind = value.get("type")?.as_str()?;
    let coords = value.get("coordinates")?;
    match kind {
        "Point" => {
            let c = coord_from_json(coords)?;
            Some(Geometry::Point(Point::from(c)))
        }
        "LineString" => Some(Geometry::LineString(LineString::from(
            coords_from_json(coords)?,
        ))),
        "Polygon" => {
            let rings = coords.as_array()?;
            let exterior = LineString::from(coords_from_json(rings.first()?)?);
            let interiors = rings[1..]
                .iter()
                .filter_map(|ring| Some(LineString::from(coords_from_json(ring)?)))
                .collect();
            Some(Geometry::Polygon(Polygon::new(exterior, interiors)))
        }
        _ => None,
    }
}

fn coord_from_json(value: &serde_json::Value) -> Option<Coord<f64>> {
    let pair = value.as_array()?;
    Some(Coord {
        x: pair.first()?.as_f64()?,
        y: pair.get(1)?.as_f64()?,
    })
}

fn coords_from_json(value: &serde_json::Value) -> Option<Vec<Coord<f64>>> {
    value.as_array()?.iter().map(coord_from_json).collect()
}

/// Flat fill vertex: tile-local position only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillVertex {
    pub pos: [i16; 2],
}

/// Fill bucket over a geometry tile's polygon and line features.
///
/// Polygons triangulate as a fan over each exterior ring and linestrings
/// become line-strip vertices in a separate buffer, which is what the
/// pipeline needs to exercise upload; production-grade tessellation with
/// holes is a renderer concern.
pub struct GeometryBucket {
    vertices: Vec<FillVertex>,
    indices: Vec<u16>,
    line_vertices: Vec<FillVertex>,
    vertex_buffer: Option<BufferHandle>,
    index_buffer: Option<BufferHandle>,
    line_vertex_buffer: Option<BufferHandle>,
    dirty: bool,
}

impl GeometryBucket {
    pub fn from_features<'a>(features: impl IntoIterator<Item = &'a GeometryTileFeature>) -> Self {
        let mut bucket = Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            line_vertices: Vec::new(),
            vertex_buffer: None,
            index_buffer: None,
            line_vertex_buffer: None,
            dirty: false,
        };
        for feature in features {
            match &feature.geometry {
                Geometry::Polygon(poly) => bucket.add_polygon(poly),
                Geometry::LineString(line) => bucket.add_line_string(line),
                _ => {}
            }
        }
        bucket.dirty = !bucket.vertices.is_empty() || !bucket.line_vertices.is_empty();
        bucket
    }

    fn add_polygon(&mut self, poly: &Polygon<f64>) {
        let ring = poly.exterior();
        // The ring repeats its first coordinate; drop the closing point.
        let coords: Vec<_> = ring.coords().take(ring.0.len().saturating_sub(1)).collect();
        if coords.len() < 3 {
            return;
        }
        // Indices are u16; a ring the bucket cannot address is dropped.
        if self.vertices.len() + coords.len() > u16::MAX as usize {
            log::warn!("dropping polygon ring with {} vertices", coords.len());
            return;
        }
        let base = self.vertices.len() as u16;
        for c in &coords {
            self.vertices.push(FillVertex {
                pos: [
                    c.x.clamp(0.0, EXTENT as f64) as i16,
                    c.y.clamp(0.0, EXTENT as f64) as i16,
                ],
            });
        }
        for i in 1..coords.len() as u16 - 1 {
            self.indices.extend_from_slice(&[base, base + i, base + i + 1]);
        }
    }

    fn add_line_string(&mut self, line: &LineString<f64>) {
        if line.0.len() < 2 {
            return;
        }
        for c in line.coords() {
            self.line_vertices.push(FillVertex {
                pos: [
                    c.x.clamp(0.0, EXTENT as f64) as i16,
                    c.y.clamp(0.0, EXTENT as f64) as i16,
                ],
            });
        }
    }

    fn vertex_bytes(vertices: &[FillVertex]) -> Vec<u8> {
        let mut out = Vec::with_capacity(vertices.len() * 4);
        for v in vertices {
            out.extend_from_slice(&v.pos[0].to_le_bytes());
            out.extend_from_slice(&v.pos[1].to_le_bytes());
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

impl Bucket for GeometryBucket {
    fn has_data(&self) -> bool {
        !self.vertices.is_empty() || !self.line_vertices.is_empty()
    }

    fn needs_upload(&self) -> bool {
        self.dirty
    }

    fn upload(&mut self, pass: &mut dyn UploadPass) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if !self.vertices.is_empty() {
            let vbytes = Self::vertex_bytes(&self.vertices);
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
        if !self.line_vertices.is_empty() {
            let lbytes = Self::vertex_bytes(&self.line_vertices);
            match self.line_vertex_buffer {
                Some(handle) => pass.update_vertex_buffer(handle, &lbytes),
                None => self.line_vertex_buffer = Some(pass.create_vertex_buffer(&lbytes)),
            }
        }
        self.dirty = false;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
