use crossbeam::channel::{self, Receiver, Sender};
use tracing::debug;

use crate::types::{FrameKey, TileAddress};

use super::request::PayloadKind;

/// Result of one (tile, frame) fetch as seen by the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileOutcome {
    Loaded(Vec<u8>),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileDelivery {
    pub address: TileAddress,
    pub frame: i32,
    pub kind: PayloadKind,
    pub outcome: TileOutcome,
}

impl TileDelivery {
    pub fn key(&self) -> FrameKey {
        FrameKey::new(self.address, self.frame)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.outcome, TileOutcome::Loaded(_))
    }
}

/// Decode/consumption side of a loader.
///
/// Called on fetch worker threads, or on the thread processing a batch when
/// the fetcher resolves inline. Implementations must not block; heavy work
/// gets handed off. Calling back into the sampling layer is allowed.
pub trait TileConsumer: Send + Sync {
    fn deliver(&self, delivery: TileDelivery);
}

/// Forwards deliveries over a crossbeam channel to whoever drains it.
#[derive(Debug, Clone)]
pub struct ChannelConsumer {
    tx: Sender<TileDelivery>,
}

impl ChannelConsumer {
    pub fn new() -> (Self, Receiver<TileDelivery>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }
}

impl TileConsumer for ChannelConsumer {
    fn deliver(&self, delivery: TileDelivery) {
        if let Err(e) = self.tx.send(delivery) {
            debug!(key = %e.0.key(), "Delivery receiver gone, dropping");
        }
    }
}
