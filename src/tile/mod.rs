//! Tile identity, lifecycle state machine, and feature queries.

pub mod geometry;
pub mod id;
pub mod observer;

pub use geometry::{GeometryTileData, GeometryTileFeature};
pub use id::TileId;
pub use observer::TileObserver;

use crate::render::bucket::Bucket;
use crate::render::mask::TileMask;
use crate::render::raster::RasterBucket;
use crate::render::upload::{RasterImage, UploadPass};
use crate::source::TileData;
use crate::style::{
    max_query_padding, ActiveLayers, RenderedQueryOptions, SourceQueryOptions, TransformState,
};
use crate::{Result, TileError};
use fxhash::FxHashMap;
use geo_types::Coord;
use std::sync::Arc;

/// What kind of data a tile holds. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileKind {
    Geometry,
    Raster,
    RasterDem,
}

impl TileKind {
    pub fn name(&self) -> &'static str {
        match self {
            TileKind::Geometry => "Geometry",
            TileKind::Raster => "Raster",
            TileKind::RasterDem => "RasterDEM",
        }
    }
}

/// What happens to previously loaded content when a refresh completes empty.
///
/// A refresh that *fails* never blanks a previously good tile regardless of
/// policy; this only governs a refresh that succeeds with no drawable
/// content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// Keep the last good buckets; the tile stays renderable.
    #[default]
    RetainLastGood,
    /// The empty result replaces the buckets; the tile goes non-renderable.
    ReplaceAlways,
}

/// The unit of map data for one grid cell at one zoom level.
///
/// A tile is created by its owning source when the viewport needs it and
/// destroyed when it no longer does. It owns its buckets, tracks the loading
/// lifecycle, and forwards every state change to its observer. All mutation
/// happens on the owning thread; worker results arrive as immutable
/// [`TileData`] values stamped with a load generation, and
/// [`apply_parse_result`](Tile::apply_parse_result) drops any result whose
/// generation is stale.
///
/// Lifecycle flags, informally: Pending (fresh) → Loading (request issued)
/// → one of Loaded-Renderable, Loaded-Empty, Errored. A retry re-enters
/// Loading without resetting identity.
pub struct Tile {
    kind: TileKind,
    id: TileId,
    observer: Arc<dyn TileObserver>,
    buckets: FxHashMap<String, Box<dyn Bucket>>,
    geometry_data: Option<GeometryTileData>,
    refresh_policy: RefreshPolicy,

    /// Bumped by `cancel`; results stamped with an older generation are
    /// ignored when applied.
    generation: u64,

    loading: bool,
    loaded: bool,
    renderable: bool,
    complete: bool,
    errored: bool,
    tried_cache: bool,
}

impl Tile {
    pub fn new(kind: TileKind, id: TileId) -> Self {
        Self {
            kind,
            id,
            observer: observer::noop_observer(),
            buckets: FxHashMap::default(),
            geometry_data: None,
            refresh_policy: RefreshPolicy::default(),
            generation: 0,
            loading: false,
            loaded: false,
            renderable: false,
            complete: false,
            errored: false,
            tried_cache: false,
        }
    }

    pub fn with_refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.refresh_policy = policy;
        self
    }

    pub fn kind(&self) -> TileKind {
        self.kind
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn set_observer(&mut self, observer: Arc<dyn TileObserver>) {
        self.observer = observer;
    }

    // --- lifecycle -----------------------------------------------------------------------------

    /// Start (or restart) a load attempt and return the generation that
    /// in-flight work must carry back. Restarting while a request is in
    /// flight abandons it; the abandoned result is dropped as stale.
    pub fn begin_load(&mut self) -> u64 {
        if self.loading {
            self.generation += 1;
        }
        self.loading = true;
        self.complete = false;
        self.errored = false;
        self.generation
    }

    /// Stop any in-flight work from affecting this tile. Idempotent; calling
    /// it twice, or on a tile with nothing in flight, is a no-op. Cancelled
    /// work produces no observer notification.
    pub fn cancel(&mut self) {
        if self.loading {
            self.generation += 1;
            self.loading = false;
        }
    }

    /// Record that a cache-only attempt has been made, so the owning source
    /// can decide whether to escalate to the network.
    pub fn set_tried_cache(&mut self) {
        self.tried_cache = true;
        let observer = self.observer.clone();
        observer.on_tile_changed(self);
    }

    /// Apply a worker result produced for `generation`. Stale generations
    /// (the tile was cancelled after the work was submitted) are dropped
    /// silently, as are explicitly cancelled results.
    pub fn apply_parse_result(&mut self, generation: u64, result: Result<TileData>) {
        if generation != self.generation {
            log::debug!("dropping stale result for tile {}", self.id);
            return;
        }
        self.loading = false;

        match result {
            Ok(data) => {
                let keep_previous = data.is_empty()
                    && self.loaded
                    && self.refresh_policy == RefreshPolicy::RetainLastGood;
                if !keep_previous {
                    self.buckets = data.buckets.into_iter().collect();
                    self.geometry_data = data.geometry;
                }
                self.loaded = true;
                self.complete = true;
                self.errored = false;
                self.renderable = self.buckets.values().any(|b| b.has_data());
                let observer = self.observer.clone();
                observer.on_tile_changed(self);
            }
            Err(TileError::Cancelled) => {}
            Err(e) => {
                // Last-good buckets survive a failed refresh; only state
                // flags change.
                self.errored = true;
                self.complete = !e.is_transient();
                let observer = self.observer.clone();
                observer.on_tile_error(self, &e);
            }
        }
    }

    /// Install a shared image as this tile's raster content, outside the
    /// fetch/parse path. Used by image sources, where one decoded image
    /// backs every tile it covers.
    pub fn set_shared_image(&mut self, image: Arc<RasterImage>) {
        let mut pending = Some(image);
        if let Some(bucket) = self
            .buckets
            .get_mut("raster")
            .and_then(|b| b.as_any_mut().downcast_mut::<RasterBucket>())
        {
            if let Some(image) = pending.take() {
                bucket.set_image(image);
            }
        }
        if let Some(image) = pending {
            self.buckets
                .insert("raster".to_string(), Box::new(RasterBucket::from_shared(image)));
        }
        self.loaded = true;
        self.complete = true;
        self.renderable = true;
        let observer = self.observer.clone();
        observer.on_tile_changed(self);
    }

    // --- predicates ----------------------------------------------------------------------------

    /// Data has been fetched and parsed at least once.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// At least one bucket has drawable data.
    pub fn is_renderable(&self) -> bool {
        self.renderable
    }

    /// No further network or cache work pending for the current request.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_errored(&self) -> bool {
        self.errored
    }

    pub fn has_tried_cache(&self) -> bool {
        self.tried_cache
    }

    // --- buckets & rendering -------------------------------------------------------------------

    pub fn bucket(&self, key: &str) -> Option<&dyn Bucket> {
        self.buckets.get(key).map(|b| b.as_ref())
    }

    pub fn bucket_mut(&mut self, key: &str) -> Option<&mut (dyn Bucket + 'static)> {
        self.buckets.get_mut(key).map(|b| b.as_mut())
    }

    pub fn buckets(&self) -> impl Iterator<Item = (&str, &dyn Bucket)> {
        self.buckets.iter().map(|(k, b)| (k.as_str(), b.as_ref()))
    }

    /// Push every out-of-date bucket to the GPU. Safe to call each frame;
    /// up-to-date buckets are skipped.
    pub fn upload(&mut self, pass: &mut dyn UploadPass) -> Result<()> {
        for bucket in self.buckets.values_mut() {
            if bucket.needs_upload() {
                bucket.upload(pass)?;
            }
        }
        Ok(())
    }

    /// Constrain the drawn region of this tile's raster buckets.
    pub fn set_mask(&mut self, mask: TileMask) {
        for bucket in self.buckets.values_mut() {
            if let Some(raster) = bucket.as_any_mut().downcast_mut::<RasterBucket>() {
                raster.set_mask(mask.clone());
            }
        }
    }

    // --- queries -------------------------------------------------------------------------------

    /// Hit-test currently drawn features against a query polygon in tile
    /// units. Kinds without feature data answer with an empty result, so
    /// callers never special-case raster tiles.
    pub fn query_rendered_features(
        &self,
        query_polygon: &[Coord<f64>],
        transform: &TransformState,
        layers: ActiveLayers,
        options: &RenderedQueryOptions,
    ) -> FxHashMap<String, Vec<GeometryTileFeature>> {
        let mut results: FxHashMap<String, Vec<GeometryTileFeature>> = FxHashMap::default();
        let Some(data) = &self.geometry_data else {
            return results;
        };
        if !self.renderable {
            return results;
        }

        let padding_px = self.get_query_padding(layers) as f64;
        let padding = transform.pixels_to_tile_units(&self.id, padding_px);
        let source_layers: Vec<(&str, Option<&str>)> = layers
            .iter()
            .map(|l| (l.id.as_str(), l.source_layer.as_deref()))
            .collect();

        for (layer_id, feature) in data.query_rendered(query_polygon, padding, options, &source_layers)
        {
            results.entry(layer_id).or_default().push(feature);
        }
        results
    }

    /// All parsed features matching the filter, drawn or not. Empty for
    /// kinds without feature data.
    pub fn query_source_features(&self, options: &SourceQueryOptions) -> Vec<GeometryTileFeature> {
        match &self.geometry_data {
            Some(data) => data.query_source(options),
            None => Vec::new(),
        }
    }

    /// The extra pixel radius hit-testing must consider for this tile,
    /// derived from the active layers' paint properties.
    pub fn get_query_padding(&self, layers: ActiveLayers) -> f32 {
        max_query_padding(layers)
    }

    // --- diagnostics ---------------------------------------------------------------------------

    pub fn dump_debug_logs(&self) {
        log::info!("Tile::Kind: {}", self.kind.name());
        log::info!("Tile::id: {}", self.id);
        log::info!("Tile::renderable: {}", if self.renderable { "yes" } else { "no" });
        log::info!("Tile::complete: {}", if self.complete { "yes" } else { "no" });
        log::info!("Tile::loaded: {}", if self.loaded { "yes" } else { "no" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parse::parse_tile;
    use crate::style::RenderLayerInfo;
    use std::sync::Mutex;

    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl RecordingObserver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl TileObserver for RecordingObserver {
        fn on_tile_changed(&self, tile: &Tile) {
            self.events
                .lock()
                .unwrap()
                .push(format!("changed {}", tile.id()));
        }

        fn on_tile_error(&self, tile: &Tile, error: &TileError) {
            self.events
                .lock()
                .unwrap()
                .push(format!("error {} {}", tile.id(), error));
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 0, 0, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_fresh_tile_flags() {
        let tile = Tile::new(TileKind::Raster, TileId::new(1, 1, 1));
        assert!(!tile.is_loaded());
        assert!(!tile.is_renderable());
        assert!(!tile.is_complete());
        assert!(!tile.has_tried_cache());
        // The default observer is installed and callable.
        tile.dump_debug_logs();
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut tile = Tile::new(TileKind::Raster, TileId::new(1, 1, 1));
        tile.cancel();
        tile.cancel();

        let generation = tile.begin_load();
        tile.cancel();
        tile.cancel();
        // Cancelled work now carries a stale generation.
        tile.apply_parse_result(generation, parse_tile(TileKind::Raster, &png_bytes()));
        assert!(!tile.is_loaded());
        assert!(!tile.is_renderable());
    }

    #[test]
    fn test_restart_abandons_inflight_attempt() {
        let mut tile = Tile::new(TileKind::Raster, TileId::new(1, 2, 3));
        let first = tile.begin_load();
        let second = tile.begin_load();
        assert_ne!(first, second);

        // The abandoned first attempt must not mark the tile complete while
        // the second request is still outstanding.
        tile.apply_parse_result(first, parse_tile(TileKind::Raster, &png_bytes()));
        assert!(!tile.is_loaded());
        assert!(!tile.is_complete());

        tile.apply_parse_result(second, parse_tile(TileKind::Raster, &png_bytes()));
        assert!(tile.is_loaded());
        assert!(tile.is_complete());
        assert!(tile.is_renderable());
    }

    #[test]
    fn test_successful_load_becomes_renderable() {
        let mut tile = Tile::new(TileKind::Raster, TileId::new(0, 0, 2));
        let observer = RecordingObserver::new();
        tile.set_observer(observer.clone());

        let generation = tile.begin_load();
        tile.apply_parse_result(generation, parse_tile(TileKind::Raster, &png_bytes()));

        assert!(tile.is_loaded());
        assert!(tile.is_renderable());
        assert!(tile.is_complete());
        assert_eq!(observer.events(), vec!["changed 2/0/0".to_string()]);
    }

    #[test]
    fn test_transient_error_is_not_complete() {
        let mut tile = Tile::new(TileKind::Raster, TileId::new(2, 3, 4));
        let generation = tile.begin_load();
        tile.apply_parse_result(generation, Err(TileError::Transient("timeout".into())));

        assert!(tile.is_errored());
        assert!(!tile.is_complete());
        assert!(!tile.is_renderable());
    }

    #[test]
    fn test_parse_error_is_complete() {
        let mut tile = Tile::new(TileKind::Geometry, TileId::new(2, 3, 4));
        let generation = tile.begin_load();
        tile.apply_parse_result(generation, Err(TileError::Parse("bad tile".into())));

        assert!(tile.is_errored());
        assert!(tile.is_complete());
    }

    #[test]
    fn test_failed_refresh_keeps_last_good_content() {
        let mut tile = Tile::new(TileKind::Raster, TileId::new(0, 0, 1));
        let generation = tile.begin_load();
        tile.apply_parse_result(generation, parse_tile(TileKind::Raster, &png_bytes()));
        assert!(tile.is_renderable());

        let generation = tile.begin_load();
        tile.apply_parse_result(generation, Err(TileError::Transient("offline".into())));
        assert!(tile.is_errored());
        assert!(tile.is_renderable(), "refresh failure must not blank the tile");
        assert!(tile.bucket("raster").is_some());
    }

    #[test]
    fn test_empty_refresh_retain_vs_replace() {
        for (policy, renderable_after) in [
            (RefreshPolicy::RetainLastGood, true),
            (RefreshPolicy::ReplaceAlways, false),
        ] {
            let mut tile =
                Tile::new(TileKind::Raster, TileId::new(0, 0, 1)).with_refresh_policy(policy);
            let generation = tile.begin_load();
            tile.apply_parse_result(generation, parse_tile(TileKind::Raster, &png_bytes()));
            assert!(tile.is_renderable());

            let generation = tile.begin_load();
            tile.apply_parse_result(generation, Ok(TileData::empty()));
            assert!(tile.is_complete());
            assert_eq!(tile.is_renderable(), renderable_after, "{policy:?}");
        }
    }

    #[test]
    fn test_set_tried_cache_notifies() {
        let mut tile = Tile::new(TileKind::Raster, TileId::new(0, 0, 0));
        let observer = RecordingObserver::new();
        tile.set_observer(observer.clone());

        tile.set_tried_cache();
        assert!(tile.has_tried_cache());
        assert_eq!(observer.events().len(), 1);
    }

    #[test]
    fn test_cancelled_result_is_silent() {
        let mut tile = Tile::new(TileKind::Raster, TileId::new(0, 0, 0));
        let observer = RecordingObserver::new();
        tile.set_observer(observer.clone());

        let generation = tile.begin_load();
        tile.apply_parse_result(generation, Err(TileError::Cancelled));
        assert!(observer.events().is_empty());
        assert!(!tile.is_errored());
    }

    #[test]
    fn test_raster_tile_queries_are_noops() {
        let mut tile = Tile::new(TileKind::Raster, TileId::new(0, 0, 0));
        let generation = tile.begin_load();
        tile.apply_parse_result(generation, parse_tile(TileKind::Raster, &png_bytes()));

        let transform = TransformState::new(0.0);
        let layers = vec![RenderLayerInfo::new("raster-layer")];
        let hits = tile.query_rendered_features(
            &[Coord { x: 0.0, y: 0.0 }],
            &transform,
            &layers,
            &RenderedQueryOptions::default(),
        );
        assert!(hits.is_empty());
        assert!(tile
            .query_source_features(&SourceQueryOptions::default())
            .is_empty());
        assert_eq!(tile.get_query_padding(&layers), 0.0);
    }

    #[test]
    fn test_query_padding_from_layers() {
        let tile = Tile::new(TileKind::Geometry, TileId::new(0, 0, 0));
        let layers = vec![
            RenderLayerInfo::new("fill"),
            RenderLayerInfo::new("halo").with_query_padding(6.0),
        ];
        assert_eq!(tile.get_query_padding(&layers), 6.0);
    }

    #[test]
    fn test_shared_image_injection() {
        let mut tile = Tile::new(TileKind::Raster, TileId::new(0, 0, 0));
        let image = Arc::new(RasterImage::new(1, 1, vec![0; 4]).unwrap());
        tile.set_shared_image(image.clone());

        assert!(tile.is_renderable());
        assert!(tile.is_complete());
        assert_eq!(Arc::strong_count(&image), 2);
    }
}
