use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, warn};

use crate::error::{PagerError, Result};

use super::lock;
use super::request::{FetchInfo, FetchRequest};

/// Executes fetch requests.
///
/// Implementations apply `to_cancel` before `to_start`, run starts without
/// blocking the caller, and resolve every started, non-canceled request
/// exactly once via [`FetchRequest::complete`] or [`FetchRequest::fail`].
pub trait TileFetcher: Send + Sync {
    fn submit(&self, to_start: Vec<Arc<FetchRequest>>, to_cancel: Vec<Arc<FetchRequest>>);
}

/// Byte-level I/O behind a fetcher.
pub trait FetchSource: Send + Sync {
    fn fetch(&self, source_id: &str, info: &FetchInfo) -> Result<Vec<u8>>;
}

/// Reads `FetchInfo::File` paths from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSource;

impl FetchSource for FileSource {
    fn fetch(&self, _source_id: &str, info: &FetchInfo) -> Result<Vec<u8>> {
        match info {
            FetchInfo::File(path) => Ok(std::fs::read(path)?),
            FetchInfo::Url(url) => Err(PagerError::Fetch(format!("no network access for {url}"))),
        }
    }
}

/// Queue entry: higher priority first, then higher importance, then FIFO.
struct Queued {
    request: Arc<FetchRequest>,
    seq: u64,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.request
            .priority()
            .cmp(&other.request.priority())
            .then_with(|| self.request.importance().total_cmp(&other.request.importance()))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Outstanding task counter with a wake-up for [`PoolFetcher::wait_idle`].
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self) {
        *lock(&self.count) += 1;
    }

    fn done(&self) {
        let mut count = lock(&self.count);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Priority-ordered fetch executor on a dedicated rayon pool.
///
/// Every submitted start schedules one pool task; each task pops whatever is
/// most urgent at that moment, so late high-priority requests overtake
/// queued low-priority ones.
pub struct PoolFetcher {
    pool: rayon::ThreadPool,
    source: Arc<dyn FetchSource>,
    queue: Arc<Mutex<BinaryHeap<Queued>>>,
    pending: Arc<Pending>,
    seq: AtomicU64,
}

impl PoolFetcher {
    /// `threads = None` uses one worker per core.
    pub fn new(source: Arc<dyn FetchSource>, threads: Option<usize>) -> Result<Self> {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|i| format!("quad-pager-fetch-{i}"));
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| PagerError::Config(format!("failed to build fetch pool: {e}")))?;

        Ok(Self {
            pool,
            source,
            queue: Arc::new(Mutex::new(BinaryHeap::new())),
            pending: Arc::new(Pending::default()),
            seq: AtomicU64::new(0),
        })
    }

    /// Requests waiting for a worker.
    pub fn queued(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Block until every scheduled task has finished.
    pub fn wait_idle(&self) {
        let mut count = lock(&self.pending.count);
        while *count > 0 {
            count = self
                .pending
                .idle
                .wait(count)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn run_next(queue: &Mutex<BinaryHeap<Queued>>, source: &dyn FetchSource) {
        let Some(Queued { request, .. }) = lock(queue).pop() else {
            return;
        };
        if request.is_canceled() {
            return;
        }
        match source.fetch(request.source_id(), request.fetch_info()) {
            Ok(data) => {
                request.complete(data);
            }
            Err(e) => {
                debug!(key = %request.key(), error = %e, "Fetch failed");
                request.fail(e.to_string());
            }
        }
    }
}

impl TileFetcher for PoolFetcher {
    fn submit(&self, to_start: Vec<Arc<FetchRequest>>, to_cancel: Vec<Arc<FetchRequest>>) {
        if !to_cancel.is_empty() {
            for request in &to_cancel {
                request.cancel();
            }
            lock(&self.queue).retain(|q| !q.request.is_canceled());
        }

        for request in to_start {
            if request.is_canceled() {
                warn!(key = %request.key(), "Skipping start of a canceled request");
                continue;
            }
            let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
            lock(&self.queue).push(Queued { request, seq });
            self.pending.add();

            let queue = Arc::clone(&self.queue);
            let source = Arc::clone(&self.source);
            let pending = Arc::clone(&self.pending);
            self.pool.spawn(move || {
                Self::run_next(&queue, source.as_ref());
                pending.done();
            });
        }
    }
}
