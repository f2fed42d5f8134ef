//! Fetch lifecycle for quad-tree tiles: requests, tracked frame assets,
//! batched start/cancel and delivery to the consuming side.

pub mod batch;
pub mod consumer;
pub mod fetcher;
pub mod frame_asset;
pub mod quad_loader;
pub mod request;
pub mod tile_info;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use batch::BatchOps;
pub use consumer::{ChannelConsumer, TileConsumer, TileDelivery, TileOutcome};
pub use fetcher::{FetchSource, FileSource, PoolFetcher, TileFetcher};
pub use frame_asset::{FrameAsset, FrameAssetTable};
pub use quad_loader::{LoaderState, LoaderStats, QuadLoader};
pub use request::{FetchInfo, FetchOutcome, FetchRequest, PayloadKind};
pub use tile_info::{TemplateTileInfo, TileInfo};

// Poisoned locks are recovered; no critical section leaves partial state.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}
