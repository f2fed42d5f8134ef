use std::collections::HashSet;
use std::sync::Arc;

use super::fetcher::TileFetcher;
use super::request::FetchRequest;

/// Start and cancel directives for one update cycle, applied as a unit.
#[derive(Debug, Default)]
pub struct BatchOps {
    to_start: Vec<Arc<FetchRequest>>,
    to_cancel: Vec<Arc<FetchRequest>>,
}

impl BatchOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_to_start(&mut self, request: Arc<FetchRequest>) {
        self.to_start.push(request);
    }

    pub fn add_to_cancel(&mut self, request: Arc<FetchRequest>) {
        self.to_cancel.push(request);
    }

    pub fn starts(&self) -> &[Arc<FetchRequest>] {
        &self.to_start
    }

    pub fn cancels(&self) -> &[Arc<FetchRequest>] {
        &self.to_cancel
    }

    pub fn is_empty(&self) -> bool {
        self.to_start.is_empty() && self.to_cancel.is_empty()
    }

    /// Apply to `fetcher`: every cancel first, then the starts that survive.
    ///
    /// A request started and canceled in the same batch is never handed to
    /// the fetcher as a start.
    pub fn process(self, fetcher: &dyn TileFetcher) {
        if self.is_empty() {
            return;
        }
        let BatchOps {
            mut to_start,
            to_cancel,
        } = self;

        let canceled: HashSet<u64> = to_cancel
            .iter()
            .map(|r| {
                r.cancel();
                r.id()
            })
            .collect();
        to_start.retain(|r| !canceled.contains(&r.id()) && !r.is_canceled());

        fetcher.submit(to_start, to_cancel);
    }
}
