use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::FrameKey;

use super::lock;

/// Where the bytes for one (tile, frame) live.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchInfo {
    Url(String),
    File(PathBuf),
}

impl fmt::Display for FetchInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchInfo::Url(url) => write!(f, "{url}"),
            FetchInfo::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// What the fetched bytes represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Image or elevation data for a tile frame.
    Tile,
    /// Opaque object data interpreted by the consumer.
    Object,
}

/// Raw bytes on success, a reason on failure.
pub type FetchOutcome = std::result::Result<Vec<u8>, String>;

type Completion = Box<dyn FnOnce(FetchOutcome) + Send>;

/// One asynchronous fetch for a (tile, frame) pair.
///
/// The completion is consumed on first resolution, so however many times an
/// executor calls [`complete`](Self::complete) or [`fail`](Self::fail) it
/// fires at most once. Canceling drops it without firing.
pub struct FetchRequest {
    id: u64,
    key: FrameKey,
    source_id: String,
    fetch_info: FetchInfo,
    kind: PayloadKind,
    priority: i32,
    importance: f64,
    canceled: AtomicBool,
    completion: Mutex<Option<Completion>>,
}

impl fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("source_id", &self.source_id)
            .field("fetch_info", &self.fetch_info)
            .field("priority", &self.priority)
            .field("importance", &self.importance)
            .field("canceled", &self.is_canceled())
            .finish_non_exhaustive()
    }
}

impl FetchRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        key: FrameKey,
        source_id: impl Into<String>,
        fetch_info: FetchInfo,
        kind: PayloadKind,
        priority: i32,
        importance: f64,
        completion: impl FnOnce(FetchOutcome) + Send + 'static,
    ) -> Self {
        Self {
            id,
            key,
            source_id: source_id.into(),
            fetch_info,
            kind,
            priority,
            importance,
            canceled: AtomicBool::new(false),
            completion: Mutex::new(Some(Box::new(completion))),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> FrameKey {
        self.key
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn fetch_info(&self) -> &FetchInfo {
        &self.fetch_info
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Higher runs sooner.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn importance(&self) -> f64 {
        self.importance
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Whether the completion has fired or been dropped.
    pub fn is_resolved(&self) -> bool {
        lock(&self.completion).is_none()
    }

    /// Mark canceled and drop the completion unfired.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
        lock(&self.completion).take();
    }

    /// Report success. Returns false if the request was already resolved or canceled.
    pub fn complete(&self, data: Vec<u8>) -> bool {
        self.resolve(Ok(data))
    }

    /// Report failure. Returns false if the request was already resolved or canceled.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.resolve(Err(reason.into()))
    }

    fn resolve(&self, outcome: FetchOutcome) -> bool {
        if self.is_canceled() {
            return false;
        }
        // Take under the lock, run outside it.
        let completion = lock(&self.completion).take();
        match completion {
            Some(f) => {
                f(outcome);
                true
            }
            None => false,
        }
    }
}
