use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use serde::Serialize;
use tracing::{debug, warn};

use crate::cull::{CullHit, CullTree};
use crate::error::{PagerError, Result};
use crate::loader::{BatchOps, FrameAsset, QuadLoader, lock, read, write};
use crate::types::{Mbr, TileAddress};

static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);

/// What one [`SamplingLayer::update`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SamplingReport {
    /// Leaf cells overlapping the view.
    pub visible: usize,
    /// Tiles started, summed over loaders.
    pub started: usize,
    /// Tiles that left the wanted set.
    pub dropped: usize,
    /// Cancel ops issued for fetches still outstanding.
    pub canceled: usize,
}

/// A connected loader and the frame assets of every tile it currently wants.
struct Client {
    loader: QuadLoader,
    wanted: HashMap<TileAddress, Vec<FrameAsset>>,
}

struct SamplingInner {
    id: u64,
    tree: RwLock<Arc<CullTree>>,
    max_tiles: usize,
    clients: Mutex<Vec<Client>>,
}

/// Visibility-driven source of start/cancel batches for connected loaders.
///
/// Each [`update`](Self::update) runs on the caller's thread: it queries the
/// cull tree for the view and turns the difference against each loader's
/// wanted set into one processed [`BatchOps`].
#[derive(Clone)]
pub struct SamplingLayer {
    inner: Arc<SamplingInner>,
}

/// Non-owning handle held by connected loaders.
#[derive(Clone)]
pub struct WeakSamplingLayer {
    id: u64,
    inner: Weak<SamplingInner>,
}

impl WeakSamplingLayer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn upgrade(&self) -> Option<SamplingLayer> {
        self.inner.upgrade().map(|inner| SamplingLayer { inner })
    }
}

impl SamplingLayer {
    /// `max_tiles` bounds how many tiles each loader wants at once.
    pub fn new(tree: CullTree, max_tiles: usize) -> Result<Self> {
        if max_tiles == 0 {
            return Err(PagerError::Config("sampling layer needs max_tiles > 0".into()));
        }
        Ok(Self {
            inner: Arc::new(SamplingInner {
                id: NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed),
                tree: RwLock::new(Arc::new(tree)),
                max_tiles,
                clients: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn downgrade(&self) -> WeakSamplingLayer {
        WeakSamplingLayer {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn tree(&self) -> Arc<CullTree> {
        Arc::clone(&read(&self.inner.tree))
    }

    /// Swap in a rebuilt tree. Updates already running keep the tree they started with.
    pub fn set_tree(&self, tree: CullTree) {
        *write(&self.inner.tree) = Arc::new(tree);
    }

    pub fn client_count(&self) -> usize {
        lock(&self.inner.clients).len()
    }

    /// Tiles `loader` currently wants, sorted.
    pub fn wanted(&self, loader: &QuadLoader) -> Vec<TileAddress> {
        let clients = lock(&self.inner.clients);
        let mut tiles: Vec<TileAddress> = clients
            .iter()
            .find(|c| c.loader.id() == loader.id())
            .map(|c| c.wanted.keys().copied().collect())
            .unwrap_or_default();
        tiles.sort();
        tiles
    }

    pub(crate) fn register(&self, loader: QuadLoader) -> bool {
        let mut clients = lock(&self.inner.clients);
        if clients.iter().any(|c| c.loader.id() == loader.id()) {
            return false;
        }
        clients.push(Client {
            loader,
            wanted: HashMap::new(),
        });
        true
    }

    pub(crate) fn unregister(&self, loader_id: u64) -> bool {
        let mut clients = lock(&self.inner.clients);
        let before = clients.len();
        clients.retain(|c| c.loader.id() != loader_id);
        clients.len() != before
    }

    /// Re-sample for a new view.
    ///
    /// Tiles that left the view are canceled before new ones start, within a
    /// single batch per loader. Hits are ranked by importance; the rank sets
    /// the request priority.
    ///
    /// A tile whose start fails is left out of the wanted set and the next
    /// update tries it again. Every loader's batch is still processed; the
    /// first error is returned afterwards. Batches are handed to the loaders
    /// after the client registry is released, so consumers may call back
    /// into the layer.
    pub fn update(&self, view: &Mbr) -> Result<SamplingReport> {
        let hits = self.tree().visible_tiles(view, self.inner.max_tiles);
        let mut report = SamplingReport {
            visible: hits.len(),
            ..Default::default()
        };
        let mut first_error = None;

        let pending: Vec<(QuadLoader, BatchOps)> = {
            let mut clients = lock(&self.inner.clients);
            clients
                .iter_mut()
                .map(|client| {
                    let batch = client.resample(&hits, &mut report, &mut first_error);
                    (client.loader.clone(), batch)
                })
                .collect()
        };

        for (loader, batch) in pending {
            if batch.is_empty() {
                continue;
            }
            if let Err(e) = loader.process_batch_ops(batch) {
                warn!(layer = self.inner.id, loader = loader.id(), error = %e, "Batch not processed");
                first_error.get_or_insert(e);
            }
        }

        debug!(
            layer = self.inner.id,
            visible = report.visible,
            started = report.started,
            dropped = report.dropped,
            canceled = report.canceled,
            "Sampling update"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Drop `tile` from `loader`'s wanted set so the next update requests it again.
    ///
    /// This is the retry hook for failed fetches. Returns whether the tile was wanted.
    pub fn forget(&self, loader: &QuadLoader, tile: TileAddress) -> Result<bool> {
        let (owner, mut assets) = {
            let mut clients = lock(&self.inner.clients);
            let Some(client) = clients.iter_mut().find(|c| c.loader.id() == loader.id()) else {
                return Ok(false);
            };
            let Some(assets) = client.wanted.remove(&tile) else {
                return Ok(false);
            };
            (client.loader.clone(), assets)
        };
        let mut batch = BatchOps::new();
        if owner.cancel_tile_fetch(&mut batch, &mut assets)? > 0 {
            owner.process_batch_ops(batch)?;
        }
        Ok(true)
    }
}

impl Client {
    /// Diff the wanted set against `hits` and build this loader's batch.
    fn resample(
        &mut self,
        hits: &[CullHit],
        report: &mut SamplingReport,
        first_error: &mut Option<PagerError>,
    ) -> BatchOps {
        let config = self.loader.config();
        let (flip_y, num_frames) = (config.flip_y, config.num_frames);
        let loader_id = self.loader.id();

        let targets: Vec<(TileAddress, i32, f64)> = hits
            .iter()
            .enumerate()
            .map(|(rank, hit)| {
                let address = if flip_y { hit.address.flip_y() } else { hit.address };
                (address, (hits.len() - rank) as i32, hit.importance)
            })
            .collect();
        let keep: HashSet<TileAddress> = targets.iter().map(|t| t.0).collect();

        let mut batch = BatchOps::new();
        let stale: Vec<TileAddress> = self
            .wanted
            .keys()
            .filter(|a| !keep.contains(a))
            .copied()
            .collect();
        for tile in stale {
            let Some(mut assets) = self.wanted.remove(&tile) else {
                continue;
            };
            report.dropped += 1;
            match self.loader.cancel_tile_fetch(&mut batch, &mut assets) {
                Ok(n) => report.canceled += n,
                Err(e) => {
                    warn!(loader = loader_id, tile = %tile, error = %e, "Cancel failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        for (tile, priority, importance) in targets {
            if self.wanted.contains_key(&tile) {
                continue;
            }
            let mut assets = FrameAsset::slots(num_frames);
            match self
                .loader
                .start_tile_fetch(&mut batch, &mut assets, tile, priority, importance)
            {
                Ok(()) => {
                    self.wanted.insert(tile, assets);
                    report.started += 1;
                }
                Err(e) => {
                    warn!(loader = loader_id, tile = %tile, error = %e, "Start failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoaderConfig, LoaderMode};
    use crate::loader::{
        ChannelConsumer, FetchRequest, LoaderState, TemplateTileInfo, TileConsumer, TileDelivery,
        TileFetcher, TileInfo,
    };
    use crate::transform::PlateCarree;
    use crate::types::FrameKey;

    /// Completes every start inline with the fetch info as payload.
    struct InlineFetcher;

    impl TileFetcher for InlineFetcher {
        fn submit(&self, to_start: Vec<Arc<FetchRequest>>, _to_cancel: Vec<Arc<FetchRequest>>) {
            for r in to_start {
                r.complete(r.fetch_info().to_string().into_bytes());
            }
        }
    }

    /// Holds starts unresolved.
    #[derive(Default)]
    struct HeldFetcher {
        started: Mutex<Vec<Arc<FetchRequest>>>,
    }

    impl TileFetcher for HeldFetcher {
        fn submit(&self, to_start: Vec<Arc<FetchRequest>>, _to_cancel: Vec<Arc<FetchRequest>>) {
            self.started.lock().unwrap().extend(to_start);
        }
    }

    fn bounds() -> Mbr {
        Mbr::from_coords(0.0, 0.0, 100.0, 100.0)
    }

    /// Uniform tree of depth 2: 16 leaves of 25x25.
    fn grid_tree() -> CullTree {
        let drawables = (0..4).flat_map(|i| {
            (0..4).map(move |j| {
                let p = glam::DVec2::new(12.5 + 25.0 * i as f64, 12.5 + 25.0 * j as f64);
                crate::cull::Drawable::new((i * 4 + j) as u64, Mbr::point(p))
            })
        });
        CullTree::build(bounds(), 2, 1, drawables).unwrap()
    }

    fn loader(
        config: LoaderConfig,
        fetcher: Arc<dyn TileFetcher>,
    ) -> (
        QuadLoader,
        Arc<dyn TileConsumer>,
        crossbeam::channel::Receiver<TileDelivery>,
    ) {
        let infos: Vec<Arc<dyn TileInfo>> = (0..config.num_frames)
            .map(|f| Arc::new(TemplateTileInfo::url(format!("f{f}"), "mem://{z}/{x}/{y}")) as Arc<dyn TileInfo>)
            .collect();
        let l = QuadLoader::new(config, bounds(), Arc::new(PlateCarree), infos).unwrap();
        let (consumer, rx) = ChannelConsumer::new();
        let consumer: Arc<dyn TileConsumer> = Arc::new(consumer);
        l.initialize(fetcher, &consumer).unwrap();
        (l, consumer, rx)
    }

    #[test]
    fn rejects_zero_max_tiles() {
        assert!(matches!(SamplingLayer::new(grid_tree(), 0), Err(PagerError::Config(_))));
    }

    #[test]
    fn connect_is_idempotent_and_disconnect_tolerates_strangers() {
        let layer = SamplingLayer::new(grid_tree(), 16).unwrap();
        let (l, _c, _rx) = loader(LoaderConfig::default(), Arc::new(InlineFetcher));

        l.sampling_layer_disconnect(&layer);
        assert_eq!(layer.client_count(), 0);

        l.sampling_layer_connect(&layer).unwrap();
        l.sampling_layer_connect(&layer).unwrap();
        assert_eq!(layer.client_count(), 1);

        l.sampling_layer_disconnect(&layer);
        l.sampling_layer_disconnect(&layer);
        assert_eq!(layer.client_count(), 0);
    }

    #[test]
    fn update_loads_visible_tiles_once() {
        let layer = SamplingLayer::new(grid_tree(), 16).unwrap();
        let (l, _c, rx) = loader(LoaderConfig::default(), Arc::new(InlineFetcher));
        l.sampling_layer_connect(&layer).unwrap();

        let view = Mbr::from_coords(0.0, 0.0, 50.0, 50.0);
        let report = layer.update(&view).unwrap();
        assert_eq!(report.visible, 4);
        assert_eq!(report.started, 4);

        let got: Vec<TileDelivery> = rx.try_iter().collect();
        assert_eq!(got.len(), 4);
        assert!(got.iter().all(TileDelivery::is_loaded));
        assert_eq!(l.tracked_count(), 0);

        let again = layer.update(&view).unwrap();
        assert_eq!(again.started, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(layer.wanted(&l).len(), 4);
    }

    #[test]
    fn moving_view_cancels_outstanding_fetches() {
        let layer = SamplingLayer::new(grid_tree(), 16).unwrap();
        let fetcher = Arc::new(HeldFetcher::default());
        let (l, _c, _rx) = loader(LoaderConfig::default(), fetcher.clone());
        l.sampling_layer_connect(&layer).unwrap();

        layer.update(&Mbr::from_coords(0.0, 0.0, 50.0, 50.0)).unwrap();
        assert_eq!(l.tracked_count(), 4);

        let report = layer.update(&Mbr::from_coords(25.0, 0.0, 75.0, 50.0)).unwrap();
        assert_eq!(report.dropped, 2);
        assert_eq!(report.canceled, 2);
        assert_eq!(report.started, 2);
        assert_eq!(l.tracked_count(), 4);

        let canceled = fetcher
            .started
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.is_canceled())
            .count();
        assert_eq!(canceled, 2);
    }

    #[test]
    fn max_tiles_bounds_wanted_set() {
        let layer = SamplingLayer::new(grid_tree(), 3).unwrap();
        let (l, _c, _rx) = loader(LoaderConfig::default(), Arc::new(HeldFetcher::default()));
        l.sampling_layer_connect(&layer).unwrap();
        layer.update(&bounds()).unwrap();
        assert_eq!(layer.wanted(&l).len(), 3);
        assert_eq!(l.tracked_count(), 3);
    }

    #[test]
    fn flip_y_loader_receives_flipped_rows() {
        let layer = SamplingLayer::new(grid_tree(), 16).unwrap();
        let config = LoaderConfig {
            flip_y: true,
            ..Default::default()
        };
        let (l, _c, _rx) = loader(config, Arc::new(HeldFetcher::default()));
        l.sampling_layer_connect(&layer).unwrap();

        // Bottom-left cell of the tree is row 3 counted from the top.
        layer.update(&Mbr::from_coords(0.0, 0.0, 25.0, 25.0)).unwrap();
        assert_eq!(layer.wanted(&l), vec![TileAddress::new(2, 0, 3)]);
        assert_eq!(
            l.bounds_for_tile(TileAddress::new(2, 0, 3)),
            Mbr::from_coords(0.0, 0.0, 25.0, 25.0)
        );
    }

    #[test]
    fn forget_triggers_rerequest() {
        let layer = SamplingLayer::new(grid_tree(), 16).unwrap();
        let (l, _c, rx) = loader(LoaderConfig::default(), Arc::new(InlineFetcher));
        l.sampling_layer_connect(&layer).unwrap();
        let view = Mbr::from_coords(0.0, 0.0, 25.0, 25.0);
        layer.update(&view).unwrap();
        let first: Vec<TileDelivery> = rx.try_iter().collect();
        assert_eq!(first.len(), 1);

        assert!(layer.forget(&l, first[0].address).unwrap());
        assert!(!layer.forget(&l, first[0].address).unwrap());
        assert_eq!(layer.update(&view).unwrap().started, 1);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn multi_frame_loader_gets_every_frame() {
        let layer = SamplingLayer::new(grid_tree(), 16).unwrap();
        let config = LoaderConfig {
            num_frames: 3,
            mode: LoaderMode::MultiFrame,
            ..Default::default()
        };
        let (l, _c, _rx) = loader(config, Arc::new(HeldFetcher::default()));
        l.sampling_layer_connect(&layer).unwrap();
        layer.update(&Mbr::from_coords(0.0, 0.0, 25.0, 25.0)).unwrap();
        let tile = TileAddress::new(2, 0, 0);
        for f in 0..3 {
            assert!(l.is_tracked(&FrameKey::new(tile, f)));
        }
    }

    #[test]
    fn set_tree_replaces_index() {
        let layer = SamplingLayer::new(grid_tree(), 16).unwrap();
        assert_eq!(layer.tree().count(), 21);
        layer.set_tree(CullTree::new(bounds(), 4, 8).unwrap());
        assert_eq!(layer.tree().count(), 1);
    }

    #[test]
    fn shutdown_leaves_layer() {
        let layer = SamplingLayer::new(grid_tree(), 16).unwrap();
        let (l, _c, _rx) = loader(LoaderConfig::default(), Arc::new(HeldFetcher::default()));
        l.sampling_layer_connect(&layer).unwrap();
        layer.update(&bounds()).unwrap();

        l.shutdown().unwrap();
        assert_eq!(l.state(), LoaderState::Terminated);
        assert_eq!(layer.client_count(), 0);
        assert!(layer.update(&bounds()).is_ok());
        assert!(matches!(l.sampling_layer_connect(&layer), Err(PagerError::Usage(_))));
    }

    #[test]
    fn failed_start_still_submits_the_rest() {
        let layer = SamplingLayer::new(grid_tree(), 16).unwrap();
        let held = Arc::new(HeldFetcher::default());
        let (a, _ca, _rxa) = loader(LoaderConfig::default(), held.clone());
        let (b, _cb, _rxb) = loader(LoaderConfig::default(), Arc::new(HeldFetcher::default()));
        a.sampling_layer_connect(&layer).unwrap();
        b.sampling_layer_connect(&layer).unwrap();

        // A fetch started outside the layer makes that tile busy for `a`.
        let busy = TileAddress::new(2, 0, 0);
        let mut batch = BatchOps::new();
        let mut slots = FrameAsset::slots(1);
        a.start_tile_fetch(&mut batch, &mut slots, busy, 0, 1.0).unwrap();
        a.process_batch_ops(batch).unwrap();

        let view = Mbr::from_coords(0.0, 0.0, 50.0, 50.0);
        assert!(matches!(layer.update(&view), Err(PagerError::Usage(_))));
        assert_eq!(held.started.lock().unwrap().len(), 4);
        assert_eq!(a.tracked_count(), 4);
        assert!(!layer.wanted(&a).contains(&busy));
        assert_eq!(layer.wanted(&a).len(), 3);
        assert_eq!(layer.wanted(&b).len(), 4);
        assert_eq!(b.tracked_count(), 4);

        held.started.lock().unwrap()[0].complete(vec![0]);
        let report = layer.update(&view).unwrap();
        assert_eq!(report.started, 1);
        assert!(layer.wanted(&a).contains(&busy));
    }

    /// Forgets every delivered tile from inside `deliver`.
    #[derive(Default)]
    struct ForgettingConsumer {
        target: Mutex<Option<(SamplingLayer, QuadLoader)>>,
        forgotten: Mutex<Vec<TileAddress>>,
    }

    impl TileConsumer for ForgettingConsumer {
        fn deliver(&self, delivery: TileDelivery) {
            let target = self.target.lock().unwrap().clone();
            if let Some((layer, loader)) = target {
                if layer.forget(&loader, delivery.address).unwrap() {
                    self.forgotten.lock().unwrap().push(delivery.address);
                }
            }
        }
    }

    #[test]
    fn consumer_may_call_back_into_layer() {
        let layer = SamplingLayer::new(grid_tree(), 16).unwrap();
        let infos: Vec<Arc<dyn TileInfo>> =
            vec![Arc::new(TemplateTileInfo::url("f", "mem://{z}/{x}/{y}"))];
        let l = QuadLoader::new(LoaderConfig::default(), bounds(), Arc::new(PlateCarree), infos)
            .unwrap();
        let consumer = Arc::new(ForgettingConsumer::default());
        let as_dyn: Arc<dyn TileConsumer> = consumer.clone();
        l.initialize(Arc::new(InlineFetcher), &as_dyn).unwrap();
        l.sampling_layer_connect(&layer).unwrap();
        *consumer.target.lock().unwrap() = Some((layer.clone(), l.clone()));

        let report = layer.update(&Mbr::from_coords(0.0, 0.0, 50.0, 50.0)).unwrap();
        assert_eq!(report.started, 4);
        assert_eq!(consumer.forgotten.lock().unwrap().len(), 4);
        assert!(layer.wanted(&l).is_empty());
        assert_eq!(l.tracked_count(), 0);

        consumer.target.lock().unwrap().take();
    }
}
