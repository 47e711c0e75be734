//! Playback status types shared between the player core and its collaborators

use serde::{Deserialize, Serialize};

/// Playback session state
///
/// `Opening` only ever lasts for a single feeding tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PlaybackState {
    Idle = 0,
    Opening = 1,
    Playing = 2,
    Paused = 3,
}

impl PlaybackState {
    /// Decode the `repr(u8)` discriminant; unknown values read as `Idle`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Opening,
            2 => PlaybackState::Playing,
            3 => PlaybackState::Paused,
            _ => PlaybackState::Idle,
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Opening => write!(f, "opening"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}

/// Why a playback request or session failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Medium missing or not mounted
    MediumUnavailable,
    /// File could not be opened
    OpenFailed,
    /// Read error on a present medium
    ReadFailed,
    /// Decoder never raised its ready line
    DecoderTimeout,
    /// Any other transport/bus failure
    Transport,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::MediumUnavailable => "medium unavailable",
            FailureKind::OpenFailed => "open failed",
            FailureKind::ReadFailed => "read failed",
            FailureKind::DecoderTimeout => "decoder timeout",
            FailureKind::Transport => "transport error",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of the player for status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub state: PlaybackState,
    /// Track of the current session (None when idle)
    pub track: Option<String>,
    /// Bytes delivered to the decoder in the current session
    pub bytes_fed: u64,
    /// Volume level 0-100
    pub volume: u8,
    /// Most recent failure, if any
    pub last_error: Option<String>,
    pub last_error_kind: Option<FailureKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_discriminant_round_trip() {
        for state in [
            PlaybackState::Idle,
            PlaybackState::Opening,
            PlaybackState::Playing,
            PlaybackState::Paused,
        ] {
            assert_eq!(PlaybackState::from_u8(state as u8), state);
        }
        assert_eq!(PlaybackState::from_u8(200), PlaybackState::Idle);
    }

    #[test]
    fn test_snapshot_json_uses_lowercase_state() {
        let snapshot = PlayerSnapshot {
            state: PlaybackState::Playing,
            track: Some("/Music/A/01.mp3".to_string()),
            bytes_fed: 4096,
            volume: 75,
            last_error: None,
            last_error_kind: None,
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"state\":\"playing\""));
        assert!(json.contains("\"bytes_fed\":4096"));
    }
}
