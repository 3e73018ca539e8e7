//! Tile state-change notifications.

use crate::tile::Tile;
use crate::TileError;
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Receives notifications when a tile's state changes.
///
/// A tile always has an observer; construction installs a shared no-op
/// instance so call sites never branch on its presence. Notifications arrive
/// on the thread that owns the tile. An observer must not synchronously call
/// back into mutation of the tile it is being notified about; reentrancy is
/// undefined.
pub trait TileObserver: Send + Sync {
    fn on_tile_changed(&self, _tile: &Tile) {}
    fn on_tile_error(&self, _tile: &Tile, _error: &TileError) {}
}

/// The always-installed default observer.
struct NoopTileObserver;

impl TileObserver for NoopTileObserver {}

/// Shared immutable no-op singleton; one allocation for the whole process.
static NOOP_OBSERVER: Lazy<Arc<NoopTileObserver>> = Lazy::new(|| Arc::new(NoopTileObserver));

pub(crate) fn noop_observer() -> Arc<dyn TileObserver> {
    NOOP_OBSERVER.clone()
}
