//! Lock-free playback state cell
//!
//! Both contexts change the session state: the control context pauses,
//! resumes and stops, the feeding context opens and ends sessions. Every
//! transition is a compare-and-swap from the state the caller observed, so a
//! concurrent change is never overwritten.

use std::sync::atomic::{AtomicU8, Ordering};
use tagbox_common::PlaybackState;

#[derive(Debug)]
pub struct AtomicPlaybackState(AtomicU8);

impl AtomicPlaybackState {
    pub fn new(state: PlaybackState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> PlaybackState {
        PlaybackState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Unconditional store; returns the previous state
    pub fn swap(&self, state: PlaybackState) -> PlaybackState {
        PlaybackState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }

    /// Move `from → to` only if the state is still `from`
    pub fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_requires_expected_state() {
        let state = AtomicPlaybackState::new(PlaybackState::Playing);
        assert!(!state.transition(PlaybackState::Paused, PlaybackState::Playing));
        assert!(state.transition(PlaybackState::Playing, PlaybackState::Paused));
        assert_eq!(state.load(), PlaybackState::Paused);
    }

    #[test]
    fn test_swap_returns_previous() {
        let state = AtomicPlaybackState::new(PlaybackState::Opening);
        assert_eq!(state.swap(PlaybackState::Idle), PlaybackState::Opening);
        assert_eq!(state.load(), PlaybackState::Idle);
    }
}
