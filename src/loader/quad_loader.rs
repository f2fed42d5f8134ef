use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use glam::DVec3;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::error::{PagerError, Result};
use crate::sampling::{SamplingLayer, WeakSamplingLayer};
use crate::transform::{CoordSystem, TileGeometry};
use crate::types::{FrameKey, Mbr, TileAddress};

use super::batch::BatchOps;
use super::consumer::{TileConsumer, TileDelivery, TileOutcome};
use super::fetcher::TileFetcher;
use super::frame_asset::{FrameAsset, FrameAssetTable};
use super::request::{FetchOutcome, FetchRequest};
use super::tile_info::TileInfo;
use super::{lock, read, write};

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(1);

/// Loader lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoaderState {
    Uninitialized,
    Active,
    ShuttingDown,
    Terminated,
}

/// Per-loader request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoaderStats {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub canceled: u64,
    /// Completions that arrived for an asset no longer tracked.
    pub discarded: u64,
}

/// Everything guarded by the loader's single critical section.
struct Book {
    state: LoaderState,
    assets: FrameAssetTable,
    stats: LoaderStats,
}

impl Book {
    fn ensure_active(&self, loader: u64) -> Result<()> {
        match self.state {
            LoaderState::Active => Ok(()),
            LoaderState::Uninitialized => Err(PagerError::Usage(format!(
                "loader {loader} is not initialized"
            ))),
            LoaderState::ShuttingDown | LoaderState::Terminated => Err(PagerError::Usage(
                format!("loader {loader} has been shut down"),
            )),
        }
    }
}

struct Shared {
    id: u64,
    config: LoaderConfig,
    geometry: TileGeometry,
    tile_infos: Vec<Arc<dyn TileInfo>>,
    book: Mutex<Book>,
    fetcher: RwLock<Option<Arc<dyn TileFetcher>>>,
    consumer: RwLock<Option<Weak<dyn TileConsumer>>>,
    sampling: Mutex<Option<WeakSamplingLayer>>,
    next_request: AtomicU64,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Anything still queued in an executor is skipped rather than fetched.
        for request in lock(&self.book).assets.drain() {
            request.cancel();
        }
    }
}

/// Owns the fetch lifecycle of every (tile, frame) a sampling layer wants.
///
/// Cheap to clone; clones share state. Fetch completions reach the loader
/// through a weak handle, so a dropped or shut-down loader simply ignores
/// them.
#[derive(Clone)]
pub struct QuadLoader {
    shared: Arc<Shared>,
}

impl fmt::Debug for QuadLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuadLoader")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl QuadLoader {
    /// Create an uninitialized loader with one [`TileInfo`] per frame.
    pub fn new(
        config: LoaderConfig,
        root: Mbr,
        coord_system: Arc<dyn CoordSystem>,
        tile_infos: Vec<Arc<dyn TileInfo>>,
    ) -> Result<Self> {
        config.validate()?;
        if tile_infos.len() != config.num_frames {
            return Err(PagerError::Config(format!(
                "loader configured for {} frames but given {} tile infos",
                config.num_frames,
                tile_infos.len()
            )));
        }
        let geometry = TileGeometry::new(root, coord_system, config.flip_y)?;

        let id = NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            loader = id,
            frames = config.num_frames,
            mode = %config.mode,
            flip_y = config.flip_y,
            "Created quad loader"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                config,
                geometry,
                tile_infos,
                book: Mutex::new(Book {
                    state: LoaderState::Uninitialized,
                    assets: FrameAssetTable::new(),
                    stats: LoaderStats::default(),
                }),
                fetcher: RwLock::new(None),
                consumer: RwLock::new(None),
                sampling: Mutex::new(None),
                next_request: AtomicU64::new(1),
            }),
        })
    }

    /// Attach the fetch executor and consumer and become `Active`.
    ///
    /// The consumer is held weakly; its owner keeps it alive.
    pub fn initialize(
        &self,
        fetcher: Arc<dyn TileFetcher>,
        consumer: &Arc<dyn TileConsumer>,
    ) -> Result<()> {
        let mut book = lock(&self.shared.book);
        if book.state != LoaderState::Uninitialized {
            return Err(PagerError::Usage(format!(
                "loader {} initialized twice",
                self.shared.id
            )));
        }
        *write(&self.shared.fetcher) = Some(fetcher);
        *write(&self.shared.consumer) = Some(Arc::downgrade(consumer));
        book.state = LoaderState::Active;
        info!(loader = self.shared.id, "Quad loader active");
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.shared.config
    }

    pub fn geometry(&self) -> &TileGeometry {
        &self.shared.geometry
    }

    pub fn state(&self) -> LoaderState {
        lock(&self.shared.book).state
    }

    pub fn stats(&self) -> LoaderStats {
        lock(&self.shared.book).stats
    }

    /// Number of outstanding (tile, frame) fetches.
    pub fn tracked_count(&self) -> usize {
        lock(&self.shared.book).assets.len()
    }

    pub fn is_tracked(&self, key: &FrameKey) -> bool {
        lock(&self.shared.book).assets.contains(key)
    }

    pub fn bounds_for_tile(&self, tile: TileAddress) -> Mbr {
        self.shared.geometry.bounds_for_tile(tile)
    }

    pub fn geo_bounds_for_tile(&self, tile: TileAddress) -> Mbr {
        self.shared.geometry.geo_bounds_for_tile(tile)
    }

    pub fn display_center_for_tile(&self, tile: TileAddress) -> DVec3 {
        self.shared.geometry.display_center_for_tile(tile)
    }

    /// Use a specific fetcher instead of the one given at initialization.
    pub fn set_tile_fetcher(&self, fetcher: Arc<dyn TileFetcher>) -> Result<()> {
        lock(&self.shared.book).ensure_active(self.shared.id)?;
        *write(&self.shared.fetcher) = Some(fetcher);
        Ok(())
    }

    pub fn set_consumer(&self, consumer: &Arc<dyn TileConsumer>) -> Result<()> {
        lock(&self.shared.book).ensure_active(self.shared.id)?;
        *write(&self.shared.consumer) = Some(Arc::downgrade(consumer));
        Ok(())
    }

    /// Build one request per frame for `tile`, track them, and queue their starts.
    ///
    /// `frame_assets` must hold exactly one slot per configured frame; each
    /// slot receives its request. Nothing is fetched until the batch is
    /// processed.
    pub fn start_tile_fetch(
        &self,
        batch: &mut BatchOps,
        frame_assets: &mut [FrameAsset],
        tile: TileAddress,
        priority: i32,
        importance: f64,
    ) -> Result<()> {
        let shared = &self.shared;
        let num_frames = shared.config.num_frames;
        let mut book = lock(&shared.book);
        book.ensure_active(shared.id)?;

        if frame_assets.len() != num_frames {
            warn!(
                loader = shared.id,
                tile = %tile,
                expected = num_frames,
                got = frame_assets.len(),
                "Frame asset count mismatch, tile not started"
            );
            return Err(PagerError::Config(format!(
                "expected {num_frames} frame assets for {tile}, got {}",
                frame_assets.len()
            )));
        }
        if !tile.is_valid() {
            return Err(PagerError::Config(format!("tile address {tile} out of range")));
        }

        let keys: Vec<FrameKey> = (0..num_frames)
            .map(|slot| FrameKey::new(tile, shared.config.mode.frame_index(slot, num_frames)))
            .collect();
        if let Some(busy) = keys.iter().find(|k| book.assets.contains(k)) {
            return Err(PagerError::Usage(format!(
                "fetch already outstanding for {busy}"
            )));
        }

        for ((key, info), asset) in keys.into_iter().zip(&shared.tile_infos).zip(frame_assets) {
            let request = Arc::new(self.build_request(key, info.as_ref(), priority, importance));
            // Keys were checked free above and are distinct per frame.
            if let Err(dup) = book.assets.insert(Arc::clone(&request)) {
                return Err(PagerError::Usage(format!(
                    "fetch already outstanding for {}",
                    dup.key()
                )));
            }
            asset.set_request(Arc::clone(&request));
            batch.add_to_start(request);
            book.stats.started += 1;
        }

        if shared.config.debug_mode {
            debug!(
                loader = shared.id,
                tile = %tile,
                frames = num_frames,
                priority,
                importance,
                "Queued tile fetch"
            );
        }
        Ok(())
    }

    fn build_request(
        &self,
        key: FrameKey,
        info: &dyn TileInfo,
        priority: i32,
        importance: f64,
    ) -> FetchRequest {
        let id = self.shared.next_request.fetch_add(1, Ordering::Relaxed);
        let loader = Arc::downgrade(&self.shared);
        FetchRequest::new(
            id,
            key,
            info.unique_id(),
            info.fetch_info_for_tile(key.address),
            self.shared.config.mode.payload_kind(),
            priority,
            importance,
            move |outcome| {
                if let Some(shared) = loader.upgrade() {
                    QuadLoader { shared }.fetch_completed(key, id, outcome);
                }
            },
        )
    }

    /// Hand this cycle's starts and cancels to the fetch executor.
    pub fn process_batch_ops(&self, batch: BatchOps) -> Result<()> {
        lock(&self.shared.book).ensure_active(self.shared.id)?;
        let fetcher = read(&self.shared.fetcher)
            .clone()
            .ok_or_else(|| PagerError::Usage(format!("loader {} has no fetcher", self.shared.id)))?;

        if self.shared.config.debug_mode {
            debug!(
                loader = self.shared.id,
                starts = batch.starts().len(),
                cancels = batch.cancels().len(),
                "Processing batch"
            );
        }
        batch.process(fetcher.as_ref());
        Ok(())
    }

    /// Success callback for request `request_id` on `key`.
    pub fn fetch_success(&self, key: FrameKey, request_id: u64, data: Vec<u8>) {
        self.fetch_completed(key, request_id, Ok(data));
    }

    /// Failure callback for request `request_id` on `key`.
    pub fn fetch_failure(&self, key: FrameKey, request_id: u64, reason: impl Into<String>) {
        self.fetch_completed(key, request_id, Err(reason.into()));
    }

    fn fetch_completed(&self, key: FrameKey, request_id: u64, outcome: FetchOutcome) {
        let released = {
            let mut book = lock(&self.shared.book);
            let released = book.assets.release(&key, request_id).is_some();
            match (released, &outcome) {
                (true, Ok(_)) => book.stats.succeeded += 1,
                (true, Err(_)) => book.stats.failed += 1,
                (false, _) => book.stats.discarded += 1,
            }
            released
        };

        if !released {
            if self.shared.config.debug_mode {
                debug!(loader = self.shared.id, key = %key, "Discarding completion for untracked asset");
            }
            return;
        }

        let Some(consumer) = self.consumer() else {
            debug!(loader = self.shared.id, key = %key, "Consumer gone, dropping delivery");
            return;
        };
        if self.shared.config.debug_mode {
            debug!(loader = self.shared.id, key = %key, ok = outcome.is_ok(), "Delivering tile");
        }
        consumer.deliver(TileDelivery {
            address: key.address,
            frame: key.frame,
            kind: self.shared.config.mode.payload_kind(),
            outcome: match outcome {
                Ok(data) => TileOutcome::Loaded(data),
                Err(reason) => TileOutcome::Failed(reason),
            },
        });
    }

    fn consumer(&self) -> Option<Arc<dyn TileConsumer>> {
        read(&self.shared.consumer).as_ref().and_then(Weak::upgrade)
    }

    /// Stop tracking an asset without assuming it resolved.
    ///
    /// Returns whether this call released it; a later completion for it is
    /// swallowed. The slot is emptied either way.
    pub fn clear_frame_asset(&self, frame_asset: &mut FrameAsset) -> Result<bool> {
        let mut book = lock(&self.shared.book);
        if matches!(book.state, LoaderState::Uninitialized | LoaderState::Terminated) {
            book.ensure_active(self.shared.id)?;
        }
        let Some(request) = frame_asset.take_request() else {
            return Ok(false);
        };
        let released = book.assets.release(&request.key(), request.id()).is_some();
        if released {
            book.stats.canceled += 1;
        }
        Ok(released)
    }

    /// Clear every slot of a tile and queue cancels for the ones still outstanding.
    pub fn cancel_tile_fetch(
        &self,
        batch: &mut BatchOps,
        frame_assets: &mut [FrameAsset],
    ) -> Result<usize> {
        let mut canceled = 0;
        for asset in frame_assets.iter_mut() {
            let Some(request) = asset.request().cloned() else {
                continue;
            };
            if self.clear_frame_asset(asset)? {
                batch.add_to_cancel(request);
                canceled += 1;
            }
        }
        Ok(canceled)
    }

    /// Terminal: cancel everything tracked, drop the fetcher and consumer,
    /// and leave the sampling layer.
    ///
    /// Tracking is empty when this returns; executor-side cancellation may
    /// still be finishing, and any completion that slips through is ignored.
    pub fn shutdown(&self) -> Result<()> {
        let id = self.shared.id;
        let drained = {
            let mut book = lock(&self.shared.book);
            if matches!(book.state, LoaderState::ShuttingDown | LoaderState::Terminated) {
                return Err(PagerError::Usage(format!("loader {id} already shut down")));
            }
            book.state = LoaderState::ShuttingDown;
            let drained = book.assets.drain();
            book.stats.canceled += drained.len() as u64;
            drained
        };

        let fetcher = write(&self.shared.fetcher).take();
        write(&self.shared.consumer).take();

        let canceled = drained.len();
        let mut batch = BatchOps::new();
        for request in drained {
            batch.add_to_cancel(request);
        }
        match fetcher {
            Some(fetcher) => batch.process(fetcher.as_ref()),
            None => batch.cancels().iter().for_each(|r| r.cancel()),
        }

        let layer = lock(&self.shared.sampling).take();
        if let Some(layer) = layer.and_then(|w| w.upgrade()) {
            layer.unregister(id);
        }

        lock(&self.shared.book).state = LoaderState::Terminated;
        info!(loader = id, canceled, "Quad loader shut down");
        Ok(())
    }

    /// Register with a sampling layer for visibility updates.
    pub fn sampling_layer_connect(&self, layer: &SamplingLayer) -> Result<()> {
        {
            let book = lock(&self.shared.book);
            if matches!(book.state, LoaderState::ShuttingDown | LoaderState::Terminated) {
                book.ensure_active(self.shared.id)?;
            }
        }

        let mut slot = lock(&self.shared.sampling);
        if let Some(previous) = slot.as_ref() {
            if previous.id() == layer.id() {
                return Ok(());
            }
            if let Some(previous) = previous.upgrade() {
                previous.unregister(self.shared.id);
            }
        }
        layer.register(self.clone());
        *slot = Some(layer.downgrade());
        info!(loader = self.shared.id, layer = layer.id(), "Connected to sampling layer");
        Ok(())
    }

    /// Unregister from a sampling layer. A no-op if not connected.
    pub fn sampling_layer_disconnect(&self, layer: &SamplingLayer) {
        let mut slot = lock(&self.shared.sampling);
        if slot.as_ref().is_some_and(|w| w.id() == layer.id()) {
            *slot = None;
        }
        if layer.unregister(self.shared.id) {
            info!(loader = self.shared.id, layer = layer.id(), "Disconnected from sampling layer");
        }
    }
}
