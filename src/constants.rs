//! Shared constants for tile geometry and loading behavior.

use std::time::Duration;

/// Logical edge length of a tile in pixels.
pub const TILE_SIZE: u32 = 512;

/// The maximum extent of a feature that can be safely stored in a tile-local
/// vertex buffer. Positions are signed 16-bit integers with three bits
/// reserved, leaving 2^13 = 8192.
pub const EXTENT: i32 = 8192;

/// Deepest zoom level a source will be asked for by default.
pub const DEFAULT_MAX_ZOOM: u8 = 22;

/// Absolute ceiling on zoom, including fractional overscale.
pub const MAX_ZOOM: f64 = 25.5;

/// Upper bound on retrying a transient fetch failure. Revalidation storms
/// caused by client clock skew stop escalating past this window.
pub const CLOCK_SKEW_RETRY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on simultaneously outstanding tile requests.
pub const DEFAULT_MAXIMUM_CONCURRENT_REQUESTS: usize = 20;

/// How many zoom levels above the ideal zoom a source may prefetch.
pub const DEFAULT_PREFETCH_ZOOM_DELTA: u8 = 4;
