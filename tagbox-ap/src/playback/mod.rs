//! Streaming playback
//!
//! ```text
//!  control context                    feeding context
//!  ───────────────                    ───────────────
//!  PlayerHandle::play ──► RequestSlot ──► PlaybackController::update
//!  PlayerHandle::pause/resume/stop         │  StorageReader::read_chunk
//!        │                                 ▼
//!        └──── SessionShared (atomics) ◄── StreamSink::send_bytes
//! ```
//!
//! The controller, storage reader and sink live on the feeding context. The
//! control context only ever touches [`SessionShared`] through a
//! [`PlayerHandle`].

pub mod controller;
pub mod handle;
pub mod mailbox;
pub mod queue;
pub mod state;

pub use controller::{PlaybackController, Tick};
pub use handle::PlayerHandle;
pub use mailbox::{PlayRequest, RequestId, RequestSlot};
pub use queue::TrackQueue;

use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tagbox_common::{FailureKind, PlaybackState};

use state::AtomicPlaybackState;

/// A play request or session that ended in failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackFailure {
    pub request: RequestId,
    pub path: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Session state visible to both contexts
#[derive(Debug)]
pub(crate) struct SessionShared {
    pub state: AtomicPlaybackState,
    pub slot: RequestSlot,
    /// Set by a control-context stop; the feeding context closes and halts
    pub stop_requested: AtomicBool,
    /// Highest request id issued so far
    pub last_issued: AtomicU64,
    /// Requests with an id at or below this were cancelled by a stop
    pub cancel_through: AtomicU64,
    pub last_error: ArcSwapOption<PlaybackFailure>,
    pub current_track: ArcSwapOption<String>,
    pub bytes_fed: AtomicU64,
}

impl SessionShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicPlaybackState::new(PlaybackState::Idle),
            slot: RequestSlot::new(),
            stop_requested: AtomicBool::new(false),
            last_issued: AtomicU64::new(0),
            cancel_through: AtomicU64::new(0),
            last_error: ArcSwapOption::new(None),
            current_track: ArcSwapOption::new(None),
            bytes_fed: AtomicU64::new(0),
        })
    }

    pub fn is_cancelled(&self, id: RequestId) -> bool {
        id <= self.cancel_through.load(Ordering::Acquire)
    }

    /// A request is waiting that a stop has not cancelled
    pub fn has_pending_request(&self) -> bool {
        self.slot
            .peek()
            .map(|request| !self.is_cancelled(request.id))
            .unwrap_or(false)
    }

    pub fn has_ended(&self) -> bool {
        self.state.load() == PlaybackState::Idle && !self.has_pending_request()
    }
}
