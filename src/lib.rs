//! # tilepipe
//!
//! The asynchronous tile data pipeline of a tiled-map rendering engine.
//!
//! This library covers tile identity and the tile loading state machine,
//! the polymorphic bucket abstraction that carries per-tile renderable data
//! to the GPU, quadtree tile masking, and the fetch/parse worker pipeline.
//! Styling, caching, and the GPU device itself are collaborators supplied
//! by the embedding engine.

pub mod constants;
pub mod render;
pub mod source;
pub mod style;
pub mod tile;

// Re-export public API
pub use render::{
    bucket::Bucket,
    mask::{compute_tile_mask, MaskRect, TileMask},
    raster::RasterBucket,
    upload::{BufferHandle, RasterImage, TextureHandle, UploadPass},
};

pub use tile::{
    geometry::{GeometryTileData, GeometryTileFeature},
    id::TileId,
    observer::TileObserver,
    RefreshPolicy, Tile, TileKind,
};

pub use source::{
    parse::{ParseOutcome, ParsePool, ParsePoolConfig, ParseTask, TilePriority},
    FetchPriority, LoaderConfig, RetryTracker, TileData,
};

pub use style::{
    ActiveLayers, RenderLayerInfo, RenderedQueryOptions, SourceQueryOptions, TransformState,
};

#[cfg(feature = "render")]
pub use render::wgpu_pass::WgpuUploadPass;

#[cfg(feature = "http")]
pub use source::http::HttpTileSource;

#[cfg(feature = "http")]
pub use source::TileDataSource;

/// Route `log` output to stderr, filtered by `RUST_LOG` (default `info`).
/// Safe to call more than once; later calls are no-ops.
#[cfg(feature = "debug")]
pub fn init_debug_logging() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .try_init();
}

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, TileError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum TileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transient fetch failure: {0}")]
    Transient(String),

    #[error("tile not found")]
    NotFound,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("render error: {0}")]
    Render(String),
}

impl TileError {
    /// Whether the loading pipeline may retry this failure automatically.
    pub fn is_transient(&self) -> bool {
        matches!(self, TileError::Transient(_) | TileError::Io(_))
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TileError {
    fn from(e: reqwest::Error) -> Self {
        if e.status() == Some(reqwest::StatusCode::NOT_FOUND) {
            TileError::NotFound
        } else {
            TileError::Transient(e.to_string())
        }
    }
}

/// Error type alias for convenience
pub type Error = TileError;
