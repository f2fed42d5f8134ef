use std::f64::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use glam::DVec2;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::cull::{CullStats, CullTree, Drawable};
use crate::error::{PagerError, Result};
use crate::loader::{
    ChannelConsumer, FetchInfo, FetchSource, LoaderStats, PoolFetcher, QuadLoader,
    TemplateTileInfo, TileConsumer, TileInfo, TileOutcome,
};
use crate::sampling::SamplingLayer;
use crate::transform::PlateCarree;
use crate::types::Mbr;

/// In-memory source: payload is `source_id:fetch_info`; every n-th fetch fails.
#[derive(Debug, Default)]
pub struct SyntheticSource {
    fail_every: u64,
    fetched: AtomicU64,
}

impl SyntheticSource {
    pub fn new(fail_every: u64) -> Self {
        Self {
            fail_every,
            fetched: AtomicU64::new(0),
        }
    }
}

impl FetchSource for SyntheticSource {
    fn fetch(&self, source_id: &str, info: &FetchInfo) -> Result<Vec<u8>> {
        let n = self.fetched.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_every > 0 && n % self.fail_every == 0 {
            return Err(PagerError::Fetch(format!("synthetic failure for {info}")));
        }
        Ok(format!("{source_id}:{info}").into_bytes())
    }
}

/// Summary of a completed session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub steps: u32,
    pub loaded: u64,
    pub failed: u64,
    /// Failed tiles handed back to the sampling layer for another try.
    pub retried: u64,
    pub loader: LoaderStats,
    pub cull: CullStats,
    pub elapsed_ms: f64,
}

/// Simulated camera session -- drives cull tree, sampling layer and loader.
pub struct Session;

impl Session {
    /// Pan a view around the root bounds, paging tiles at every step.
    pub fn run(config: &SessionConfig) -> Result<SessionReport> {
        let start = Instant::now();
        let sim = &config.simulation;
        info!(
            steps = sim.steps,
            frames = config.loader.num_frames,
            mode = %config.loader.mode,
            "Starting session"
        );

        let drawables = scatter_drawables(&config.bounds, sim.drawables);
        let tree = CullTree::build(
            config.bounds,
            config.cull.max_depth,
            config.cull.max_draw_per_node,
            drawables,
        )?;
        if config.verbose {
            tree.dump_stats();
        }
        let cull = tree.stats();

        let tile_infos: Vec<Arc<dyn TileInfo>> = (0..config.loader.num_frames)
            .map(|f| {
                Arc::new(TemplateTileInfo::url(
                    format!("frame-{f}"),
                    format!("mem://frame{f}/{{z}}/{{x}}/{{y}}"),
                )) as Arc<dyn TileInfo>
            })
            .collect();
        let fetcher = Arc::new(PoolFetcher::new(
            Arc::new(SyntheticSource::new(sim.fail_every)),
            config.threads,
        )?);
        let (consumer, deliveries) = ChannelConsumer::new();
        let consumer: Arc<dyn TileConsumer> = Arc::new(consumer);

        let loader = QuadLoader::new(
            config.loader.clone(),
            config.bounds,
            Arc::new(PlateCarree),
            tile_infos,
        )?;
        loader.initialize(fetcher.clone(), &consumer)?;
        let layer = SamplingLayer::new(tree, config.cull.max_tiles)?;
        loader.sampling_layer_connect(&layer)?;

        let (mut loaded, mut failed, mut retried) = (0, 0, 0);
        for step in 0..sim.steps {
            let view = view_for_step(&config.bounds, sim.view_fraction, step, sim.steps);
            let sample = layer.update(&view)?;
            fetcher.wait_idle();

            for delivery in deliveries.try_iter() {
                match &delivery.outcome {
                    TileOutcome::Loaded(_) => loaded += 1,
                    TileOutcome::Failed(reason) => {
                        failed += 1;
                        debug!(key = %delivery.key(), reason = %reason, "Tile failed");
                        if layer.forget(&loader, delivery.address)? {
                            retried += 1;
                        }
                    }
                }
            }

            info!(
                step,
                visible = sample.visible,
                started = sample.started,
                dropped = sample.dropped,
                canceled = sample.canceled,
                "Viewpoint update"
            );
        }

        loader.shutdown()?;
        let report = SessionReport {
            steps: sim.steps,
            loaded,
            failed,
            retried,
            loader: loader.stats(),
            cull,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        info!(loaded, failed, retried, elapsed_ms = report.elapsed_ms, "Session complete");
        Ok(report)
    }
}

/// Deterministic, evenly spread points (R2 low-discrepancy sequence).
fn scatter_drawables(bounds: &Mbr, count: usize) -> Vec<Drawable> {
    const A1: f64 = 0.754_877_666_246_692_7;
    const A2: f64 = 0.569_840_290_998_053_2;
    let size = DVec2::new(bounds.width(), bounds.height());
    (0..count)
        .map(|i| {
            let t = DVec2::new((0.5 + A1 * i as f64).fract(), (0.5 + A2 * i as f64).fract());
            Drawable::new(i as u64, Mbr::point(bounds.ll + size * t))
        })
        .collect()
}

/// View of `fraction` of the root size, circling the center once over `steps`.
fn view_for_step(bounds: &Mbr, fraction: f64, step: u32, steps: u32) -> Mbr {
    let size = DVec2::new(bounds.width(), bounds.height());
    let angle = TAU * f64::from(step) / f64::from(steps.max(1));
    let offset = DVec2::new(angle.cos(), angle.sin()) * 0.3;
    let center = bounds.center() + size * offset;
    let half = size * fraction.clamp(0.0, 1.0) * 0.5;
    Mbr::new(center - half, center + half)
}
