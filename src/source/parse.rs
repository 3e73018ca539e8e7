//! Parse worker pool.
//!
//! Fetched tile bytes are decoded into buckets off the owning thread.
//! The owning thread submits [`ParseTask`]s, workers post immutable
//! [`ParseOutcome`]s back over a channel, and the owning thread drains them
//! with [`ParsePool::poll`] and applies them to its tiles. Workers never see
//! a `Tile`; cancellation is a generation check at application time, not a
//! worker interrupt.

use crate::render::raster::RasterBucket;
use crate::render::upload::RasterImage;
use crate::source::TileData;
use crate::tile::geometry::{GeometryBucket, GeometryTileData};
use crate::tile::id::TileId;
use crate::tile::TileKind;
use crate::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Priority for tile parsing (higher number = higher priority)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TilePriority {
    /// Background/low priority
    Background = 1,
    /// Prefetch tiles for predicted movement
    Prefetch = 10,
    /// One ring around visible area
    Adjacent = 50,
    /// Currently visible tiles (highest priority)
    Visible = 100,
}

/// One unit of parse work with priority.
#[derive(Debug)]
pub struct ParseTask {
    pub id: TileId,
    pub kind: TileKind,
    /// The tile's load generation at submission; the outcome carries it back
    /// so stale results can be dropped.
    pub generation: u64,
    pub bytes: Vec<u8>,
    pub priority: TilePriority,
    /// Sequence number for tie-breaking (lower = earlier)
    sequence: u64,
}

impl PartialEq for ParseTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ParseTask {}

impl PartialOrd for ParseTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParseTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then earlier sequence number
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ordering => ordering,
        }
    }
}

/// Result of parsing one tile, posted back to the owning thread.
pub struct ParseOutcome {
    pub id: TileId,
    pub generation: u64,
    pub result: Result<TileData>,
}

/// Configuration for the parse pool
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ParsePoolConfig {
    /// Number of worker threads
    pub workers: usize,
}

impl Default for ParsePoolConfig {
    fn default() -> Self {
        Self { workers: 2 }
    }
}

impl ParsePoolConfig {
    pub fn low_resource() -> Self {
        Self { workers: 1 }
    }

    pub fn for_testing() -> Self {
        Self { workers: 1 }
    }
}

/// Worker pool decoding tile bytes into buckets.
pub struct ParsePool {
    queue: Arc<Mutex<BinaryHeap<ParseTask>>>,
    signal_tx: Sender<()>,
    result_rx: Receiver<ParseOutcome>,
    sequence: AtomicU64,
    // Dropping the pool drops `signal_tx`, which ends the worker loops.
    _workers: Vec<thread::JoinHandle<()>>,
}

impl ParsePool {
    pub fn new(config: ParsePoolConfig) -> Self {
        let queue: Arc<Mutex<BinaryHeap<ParseTask>>> = Arc::new(Mutex::new(BinaryHeap::new()));
        let (signal_tx, signal_rx) = unbounded::<()>();
        let (result_tx, result_rx) = unbounded::<ParseOutcome>();

        let mut workers = Vec::with_capacity(config.workers.max(1));
        for i in 0..config.workers.max(1) {
            let queue = Arc::clone(&queue);
            let signal_rx = signal_rx.clone();
            let result_tx = result_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("tile-parse-{i}"))
                .spawn(move || worker_loop(queue, signal_rx, result_tx))
                .expect("failed to spawn parse worker");
            workers.push(handle);
        }

        Self {
            queue,
            signal_tx,
            result_rx,
            sequence: AtomicU64::new(0),
            _workers: workers,
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(ParsePoolConfig::default())
    }

    /// Queue one tile's bytes for decoding.
    pub fn submit(
        &self,
        id: TileId,
        kind: TileKind,
        generation: u64,
        bytes: Vec<u8>,
        priority: TilePriority,
    ) {
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        let task = ParseTask {
            id,
            kind,
            generation,
            bytes,
            priority,
            sequence,
        };
        if let Ok(mut queue) = self.queue.lock() {
            queue.push(task);
        }
        let _ = self.signal_tx.send(());
    }

    /// Drain every completed outcome without blocking. Called from the
    /// owning thread, which then applies the outcomes to its tiles.
    pub fn poll(&self) -> Vec<ParseOutcome> {
        self.result_rx.try_iter().collect()
    }

    /// Block up to `timeout` for one outcome.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ParseOutcome> {
        self.result_rx.recv_timeout(timeout).ok()
    }

    /// Number of tasks still waiting for a worker.
    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

fn worker_loop(
    queue: Arc<Mutex<BinaryHeap<ParseTask>>>,
    signal_rx: Receiver<()>,
    result_tx: Sender<ParseOutcome>,
) {
    while signal_rx.recv().is_ok() {
        let task = match queue.lock() {
            Ok(mut queue) => queue.pop(),
            Err(_) => return,
        };
        let Some(task) = task else { continue };

        log::debug!("parsing tile {} ({} bytes)", task.id, task.bytes.len());
        let result = parse_tile(task.kind, &task.bytes);
        if let Err(e) = &result {
            log::warn!("tile {} parse failed: {}", task.id, e);
        }
        let outcome = ParseOutcome {
            id: task.id,
            generation: task.generation,
            result,
        };
        if result_tx.send(outcome).is_err() {
            return;
        }
    }
}

/// Decode one tile's bytes into renderable buckets.
pub fn parse_tile(kind: TileKind, bytes: &[u8]) -> Result<TileData> {
    match kind {
        TileKind::Raster | TileKind::RasterDem => {
            let image = RasterImage::decode(bytes)?;
            Ok(TileData {
                buckets: vec![(
                    "raster".to_string(),
                    Box::new(RasterBucket::new(image)) as Box<dyn crate::render::bucket::Bucket>,
                )],
                geometry: None,
            })
        }
        TileKind::Geometry => {
            let data = GeometryTileData::from_geojson(bytes)?;
            let mut buckets = Vec::new();
            for layer in data.layers() {
                let bucket = GeometryBucket::from_features(
                    data.features().iter().filter(|f| f.layer == layer),
                );
                buckets.push((
                    layer.to_string(),
                    Box::new(bucket) as Box<dyn crate::render::bucket::Bucket>,
                ));
            }
            Ok(TileData {
                buckets,
                geometry: Some(data),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TileError;

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_task_ordering_prefers_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        let task = |priority, sequence| ParseTask {
            id: TileId::new(0, 0, 0),
            kind: TileKind::Raster,
            generation: 0,
            bytes: Vec::new(),
            priority,
            sequence,
        };
        heap.push(task(TilePriority::Background, 0));
        heap.push(task(TilePriority::Visible, 2));
        heap.push(task(TilePriority::Visible, 1));
        heap.push(task(TilePriority::Adjacent, 3));

        assert_eq!(heap.pop().unwrap().sequence, 1);
        assert_eq!(heap.pop().unwrap().sequence, 2);
        assert_eq!(heap.pop().unwrap().priority, TilePriority::Adjacent);
        assert_eq!(heap.pop().unwrap().priority, TilePriority::Background);
    }

    #[test]
    fn test_parse_raster_produces_bucket() {
        let data = parse_tile(TileKind::Raster, &png_bytes()).unwrap();
        assert_eq!(data.buckets.len(), 1);
        assert_eq!(data.buckets[0].0, "raster");
        assert!(data.buckets[0].1.has_data());
        assert!(!data.is_empty());
    }

    #[test]
    fn test_parse_raster_garbage_is_parse_error() {
        let err = parse_tile(TileKind::Raster, b"not an image").unwrap_err();
        assert!(matches!(err, TileError::Parse(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_pool_roundtrip() {
        let pool = ParsePool::new(ParsePoolConfig::for_testing());
        let id = TileId::new(1, 1, 1);
        pool.submit(id, TileKind::Raster, 3, png_bytes(), TilePriority::Visible);

        let outcome = pool
            .recv_timeout(Duration::from_secs(5))
            .expect("worker did not finish");
        assert_eq!(outcome.id, id);
        assert_eq!(outcome.generation, 3);
        assert!(outcome.result.is_ok());
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn test_pool_reports_parse_failure() {
        let pool = ParsePool::new(ParsePoolConfig::for_testing());
        pool.submit(
            TileId::new(2, 3, 4),
            TileKind::Geometry,
            0,
            b"{}".to_vec(),
            TilePriority::Visible,
        );
        let outcome = pool
            .recv_timeout(Duration::from_secs(5))
            .expect("worker did not finish");
        assert!(matches!(outcome.result, Err(TileError::Parse(_))));
    }
}
