use std::collections::HashMap;
use std::sync::Arc;

use crate::types::FrameKey;

use super::request::FetchRequest;

/// Caller-side slot for one (tile, frame) fetch.
///
/// The sampling layer allocates one per frame and hands them to
/// [`QuadLoader::start_tile_fetch`](super::QuadLoader::start_tile_fetch), which
/// fills in the request. The same slot is later passed back to cancel it.
#[derive(Debug, Clone, Default)]
pub struct FrameAsset {
    request: Option<Arc<FetchRequest>>,
}

impl FrameAsset {
    /// `n` empty slots.
    pub fn slots(n: usize) -> Vec<FrameAsset> {
        vec![FrameAsset::default(); n]
    }

    pub fn request(&self) -> Option<&Arc<FetchRequest>> {
        self.request.as_ref()
    }

    pub fn key(&self) -> Option<FrameKey> {
        self.request.as_ref().map(|r| r.key())
    }

    pub fn is_empty(&self) -> bool {
        self.request.is_none()
    }

    pub(crate) fn set_request(&mut self, request: Arc<FetchRequest>) {
        self.request = Some(request);
    }

    pub(crate) fn take_request(&mut self) -> Option<Arc<FetchRequest>> {
        self.request.take()
    }
}

/// Outstanding fetches keyed by (tile, frame). At most one per key.
#[derive(Debug, Default)]
pub struct FrameAssetTable {
    slots: HashMap<FrameKey, Arc<FetchRequest>>,
}

impl FrameAssetTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, key: &FrameKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Track a request. Hands it back if the key is already occupied.
    pub fn insert(&mut self, request: Arc<FetchRequest>) -> Result<(), Arc<FetchRequest>> {
        let key = request.key();
        if self.slots.contains_key(&key) {
            return Err(request);
        }
        self.slots.insert(key, request);
        Ok(())
    }

    /// Release the slot for `key` only if it is still owned by request `id`.
    pub fn release(&mut self, key: &FrameKey, id: u64) -> Option<Arc<FetchRequest>> {
        match self.slots.get(key) {
            Some(current) if current.id() == id => self.slots.remove(key),
            _ => None,
        }
    }

    /// Remove everything, returning the requests in key order.
    pub fn drain(&mut self) -> Vec<Arc<FetchRequest>> {
        let mut out: Vec<_> = self.slots.drain().map(|(_, r)| r).collect();
        out.sort_by_key(|r| r.key());
        out
    }
}
