//! Control-context handle to the playback session
//!
//! Every method is a handful of atomic operations; none touches the bus or
//! blocks on the feeding context.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tagbox_common::{PlaybackState, PlayerSnapshot};
use tracing::{debug, info};

use super::{PlayRequest, PlaybackFailure, RequestId, SessionShared};

#[derive(Debug, Clone)]
pub struct PlayerHandle {
    shared: Arc<SessionShared>,
}

impl PlayerHandle {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    /// Request playback of `path`; the feeding context opens it on its next
    /// tick. A request not yet picked up is replaced.
    pub fn play(&self, path: &str) -> RequestId {
        let id = self.shared.last_issued.fetch_add(1, Ordering::AcqRel) + 1;
        let displaced = self.shared.slot.post(PlayRequest {
            id,
            path: path.to_string(),
        });
        if let Some(old) = displaced {
            debug!("Play request {} ({}) replaced by {}", old.id, old.path, id);
        }
        debug!("Play request {} posted: {}", id, path);
        id
    }

    /// `Playing → Paused`; false from any other state
    pub fn pause(&self) -> bool {
        let paused = self
            .shared
            .state
            .transition(PlaybackState::Playing, PlaybackState::Paused);
        if paused {
            info!("Playback paused");
        }
        paused
    }

    /// `Paused → Playing`; false from any other state
    pub fn resume(&self) -> bool {
        let resumed = self
            .shared
            .state
            .transition(PlaybackState::Paused, PlaybackState::Playing);
        if resumed {
            info!("Playback resumed");
        }
        resumed
    }

    /// End the session and cancel every request issued so far.
    ///
    /// The state reads `Idle` on return; the file is closed and the decoder
    /// halted by the feeding context on its next tick.
    pub fn stop(&self) {
        let issued = self.shared.last_issued.load(Ordering::Acquire);
        self.shared
            .cancel_through
            .fetch_max(issued, Ordering::AcqRel);

        let previous = self.shared.state.swap(PlaybackState::Idle);
        if previous != PlaybackState::Idle {
            self.shared.stop_requested.store(true, Ordering::Release);
            info!("Playback stopped (was {})", previous);
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state.load()
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state() == PlaybackState::Paused
    }

    /// Idle with no request waiting
    pub fn has_ended(&self) -> bool {
        self.shared.has_ended()
    }

    pub fn last_error(&self) -> Option<PlaybackFailure> {
        self.shared.last_error.load_full().map(|f| (*f).clone())
    }

    /// Clear the recorded failure, e.g. once it has been shown
    pub fn clear_error(&self) {
        self.shared.last_error.store(None);
    }

    pub fn current_track(&self) -> Option<String> {
        self.shared.current_track.load_full().map(|t| (*t).clone())
    }

    /// Bytes delivered to the decoder in the current session
    pub fn bytes_fed(&self) -> u64 {
        self.shared.bytes_fed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, volume: u8) -> PlayerSnapshot {
        let failure = self.last_error();
        PlayerSnapshot {
            state: self.state(),
            track: self.current_track(),
            bytes_fed: self.bytes_fed(),
            volume,
            last_error: failure
                .as_ref()
                .map(|f| format!("{}: {}", f.path, f.message)),
            last_error_kind: failure.map(|f| f.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> PlayerHandle {
        PlayerHandle::new(SessionShared::new())
    }

    #[test]
    fn test_play_ids_increase() {
        let handle = handle();
        let first = handle.play("/Music/A/01.mp3");
        let second = handle.play("/Music/A/02.mp3");
        assert!(second > first);
        assert!(!handle.has_ended());
    }

    #[test]
    fn test_pause_only_from_playing() {
        let handle = handle();
        assert!(!handle.pause());
        assert!(!handle.resume());
        assert_eq!(handle.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_stop_from_idle_is_noop() {
        let handle = handle();
        handle.stop();
        assert_eq!(handle.state(), PlaybackState::Idle);
        assert!(!handle.shared.stop_requested.load(Ordering::Acquire));
        assert!(handle.has_ended());
    }

    #[test]
    fn test_stop_cancels_pending_request() {
        let handle = handle();
        handle.play("/Music/A/01.mp3");
        handle.stop();
        assert!(handle.has_ended(), "a cancelled request is not pending");

        handle.play("/Music/A/02.mp3");
        assert!(!handle.has_ended(), "requests after the stop are live");
    }

    #[test]
    fn test_stop_from_playing_requests_cleanup() {
        let handle = handle();
        handle
            .shared
            .state
            .transition(PlaybackState::Idle, PlaybackState::Playing);
        handle.stop();
        assert_eq!(handle.state(), PlaybackState::Idle);
        assert!(handle.shared.stop_requested.load(Ordering::Acquire));
    }
}
