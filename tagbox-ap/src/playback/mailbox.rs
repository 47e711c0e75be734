//! Depth-1 request slot between the control and feeding contexts
//!
//! Single producer (control), single consumer (feeding). Posting replaces any
//! request the consumer has not taken yet, so the latest `play()` wins and a
//! request is never older than one feeding tick when it is picked up.

use arc_swap::ArcSwapOption;
use std::sync::Arc;

/// Generation number of a play request, increasing from 1
pub type RequestId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayRequest {
    pub id: RequestId,
    pub path: String,
}

#[derive(Debug)]
pub struct RequestSlot {
    slot: ArcSwapOption<PlayRequest>,
}

impl Default for RequestSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestSlot {
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::new(None),
        }
    }

    /// Store `request`; returns the untaken request it replaced, if any
    pub fn post(&self, request: PlayRequest) -> Option<Arc<PlayRequest>> {
        self.slot.swap(Some(Arc::new(request)))
    }

    /// Remove and return the pending request
    pub fn take(&self) -> Option<Arc<PlayRequest>> {
        self.slot.swap(None)
    }

    /// The pending request without removing it
    pub fn peek(&self) -> Option<Arc<PlayRequest>> {
        self.slot.load_full()
    }

    pub fn is_pending(&self) -> bool {
        self.slot.load().is_some()
    }
}
