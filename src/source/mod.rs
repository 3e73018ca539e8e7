//! The fetch side of the pipeline: the data-source collaborator contract,
//! retry bookkeeping, and the parse worker pool.

pub mod parse;

#[cfg(feature = "http")]
pub mod http;

use crate::constants::{
    CLOCK_SKEW_RETRY_TIMEOUT, DEFAULT_MAXIMUM_CONCURRENT_REQUESTS, DEFAULT_PREFETCH_ZOOM_DELTA,
};
use crate::render::bucket::Bucket;
use crate::tile::geometry::GeometryTileData;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// How urgently a fetch is needed, and whether it may touch the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPriority {
    /// Answer from a local cache only; failure is expected and feeds the
    /// tile's tried-cache flag so the owning source can escalate.
    CacheOnly,
    /// Full fetch, network allowed.
    Network,
}

/// Contract the data-source collaborator fulfills: deliver raw tile bytes or
/// a typed failure, asynchronously, and deliver nothing further once the
/// caller has cancelled (the pipeline additionally drops stale results by
/// generation, so a late completion is harmless).
#[cfg(feature = "http")]
#[async_trait::async_trait]
pub trait TileDataSource: Send + Sync {
    async fn fetch(
        &self,
        id: crate::tile::id::TileId,
        priority: FetchPriority,
    ) -> crate::Result<Vec<u8>>;
}

/// The immutable product of parsing one tile's bytes on a worker.
///
/// Buckets are keyed by an opaque bucket identifier (the style layer or
/// source layer they belong to) and replace a tile's previous buckets
/// wholesale when applied.
pub struct TileData {
    pub buckets: Vec<(String, Box<dyn Bucket>)>,
    /// Decoded features for geometry tiles; `None` for raster kinds.
    pub geometry: Option<GeometryTileData>,
}

impl std::fmt::Debug for TileData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileData")
            .field(
                "buckets",
                &self.buckets.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            )
            .field("geometry", &self.geometry.as_ref().map(|_| ".."))
            .finish()
    }
}

impl TileData {
    pub fn empty() -> Self {
        Self {
            buckets: Vec::new(),
            geometry: None,
        }
    }

    /// True when nothing in this result can be drawn.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|(_, b)| !b.has_data())
    }
}

/// Knobs for the fetch side of a tile source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Cap on simultaneously outstanding tile requests.
    pub max_concurrent_requests: usize,
    /// How many zoom levels past the ideal zoom to prefetch.
    pub prefetch_zoom_delta: u8,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: DEFAULT_MAXIMUM_CONCURRENT_REQUESTS,
            prefetch_zoom_delta: DEFAULT_PREFETCH_ZOOM_DELTA,
        }
    }
}

impl LoaderConfig {
    pub fn low_resource() -> Self {
        Self {
            max_concurrent_requests: 4,
            prefetch_zoom_delta: 0,
        }
    }
}

/// Tracks transient-failure retries for one tile load.
///
/// Retries back off exponentially and stop once the first failure is older
/// than the clock-skew retry timeout, so a client with a skewed clock cannot
/// revalidate in a tight loop forever.
#[derive(Debug, Clone, Default)]
pub struct RetryTracker {
    retry_count: u32,
    first_failure: Option<Instant>,
    last_failure: Option<Instant>,
}

impl RetryTracker {
    const BASE_DELAY: Duration = Duration::from_millis(50);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self) {
        let now = Instant::now();
        self.retry_count += 1;
        self.first_failure.get_or_insert(now);
        self.last_failure = Some(now);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Whether another attempt should be made now.
    pub fn should_retry(&self) -> bool {
        let (Some(first), Some(last)) = (self.first_failure, self.last_failure) else {
            return true;
        };
        if first.elapsed() >= CLOCK_SKEW_RETRY_TIMEOUT {
            return false;
        }
        last.elapsed() >= self.current_delay()
    }

    /// The backoff delay in effect after the recorded failures.
    pub fn current_delay(&self) -> Duration {
        let exp = self.retry_count.saturating_sub(1).min(8);
        Self::BASE_DELAY * 2u32.pow(exp)
    }
}
