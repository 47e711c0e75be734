//! Streaming playback controller
//!
//! Owns the storage reader, the decoder sink and the chunk buffer, and runs
//! exclusively on the feeding context. Opening a file touches the bus, so it
//! only ever happens inside [`PlaybackController::update`], never in the
//! caller of `play()`.
//!
//! State machine:
//!
//! ```text
//!  Idle ──play──► Opening ──open ok──► Playing ⇄ Paused
//!   ▲               │                    │        │
//!   └── open failed ┘◄── end of stream / stop ────┘
//! ```
//!
//! `Opening` never outlives the `update()` call that entered it.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tagbox_common::{FailureKind, PlaybackState};
use tracing::{debug, error, info, warn};

use super::{PlaybackFailure, PlayerHandle, RequestId, SessionShared};
use crate::audio::StreamSink;
use crate::config::PlaybackConfig;
use crate::error::Error;
use crate::storage::library::encoding_of;
use crate::storage::StorageReader;

/// What one `update()` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing to do (idle or paused)
    Idle,
    /// Closed and halted after a stop from the control context
    Stopped,
    /// Dropped a request cancelled by a stop
    Cancelled(RequestId),
    /// Request opened; the session is now playing
    Opened(RequestId),
    /// Request could not be opened; failure recorded
    OpenFailed(RequestId),
    /// Fed a burst (possibly cut short by a pause)
    Fed { chunks: usize, bytes: usize },
    /// Stream exhausted; the session is over
    Ended { chunks: usize, bytes: usize },
    /// Read or transport failure mid-stream; failure recorded
    Failed(FailureKind),
}

impl Tick {
    /// Whether the feeding loop should run again without yielding
    pub fn did_work(&self) -> bool {
        !matches!(self, Tick::Idle)
    }
}

#[derive(Debug)]
struct Session {
    request: RequestId,
    path: String,
}

pub struct PlaybackController {
    shared: Arc<SessionShared>,
    storage: StorageReader,
    sink: Box<dyn StreamSink>,
    buffer: Vec<u8>,
    burst_chunks: usize,
    session: Option<Session>,
    last_encoding: Option<String>,
}

impl PlaybackController {
    pub fn new(storage: StorageReader, sink: Box<dyn StreamSink>, config: &PlaybackConfig) -> Self {
        Self {
            shared: SessionShared::new(),
            storage,
            sink,
            buffer: vec![0u8; config.chunk_size.max(1)],
            burst_chunks: config.burst_chunks.max(1),
            session: None,
            last_encoding: None,
        }
    }

    /// Handle for the control context
    pub fn handle(&self) -> PlayerHandle {
        PlayerHandle::new(Arc::clone(&self.shared))
    }

    pub fn play(&self, path: &str) -> RequestId {
        self.handle().play(path)
    }

    pub fn pause(&self) -> bool {
        self.handle().pause()
    }

    pub fn resume(&self) -> bool {
        self.handle().resume()
    }

    /// Synchronous stop: close the file, halt the decoder, go `Idle`.
    ///
    /// Pending requests are left alone; a no-op when idle with no file open.
    pub fn stop(&mut self) {
        let previous = self.shared.state.swap(PlaybackState::Idle);
        self.shared.stop_requested.store(false, Ordering::Release);
        if self.end_session() {
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

    pub fn has_ended(&self) -> bool {
        self.shared.has_ended()
    }

    pub fn last_error(&self) -> Option<PlaybackFailure> {
        self.handle().last_error()
    }

    pub fn current_track(&self) -> Option<String> {
        self.handle().current_track()
    }

    pub fn bytes_fed(&self) -> u64 {
        self.shared.bytes_fed.load(Ordering::Relaxed)
    }

    pub fn storage(&self) -> &StorageReader {
        &self.storage
    }

    /// One feeding tick
    pub fn update(&mut self) -> Tick {
        let mut tick = Tick::Idle;

        if self.shared.stop_requested.swap(false, Ordering::AcqRel) {
            if self.end_session() {
                debug!("Session cleaned up after stop");
            }
            tick = Tick::Stopped;
        }

        if self.shared.slot.is_pending() {
            return self.start_pending().unwrap_or(tick);
        }

        if self.state() == PlaybackState::Playing {
            return self.feed_burst();
        }
        tick
    }

    /// Close the file and halt the decoder if a session is active.
    /// Does not change the state. Returns whether there was anything to end.
    fn end_session(&mut self) -> bool {
        let had_file = self.storage.is_file_open();
        let session = self.session.take();
        if !had_file && session.is_none() {
            return false;
        }
        self.storage.close_file();
        if let Err(e) = self.sink.stop_playback() {
            warn!("Decoder halt failed: {}", e);
        }
        self.shared.current_track.store(None);
        if let Some(session) = session {
            debug!("Session {} ({}) ended", session.request, session.path);
        }
        true
    }

    /// Take the pending request and open it. `None` if the state changed
    /// under us; the request stays pending for the next tick.
    fn start_pending(&mut self) -> Option<Tick> {
        let observed = self.state();
        if observed == PlaybackState::Opening {
            return None;
        }
        if !self.shared.state.transition(observed, PlaybackState::Opening) {
            return None;
        }

        // The previous session ends before the new one opens
        self.end_session();

        let Some(request) = self.shared.slot.take() else {
            self.shared
                .state
                .transition(PlaybackState::Opening, PlaybackState::Idle);
            return Some(Tick::Idle);
        };

        if self.shared.is_cancelled(request.id) {
            self.shared
                .state
                .transition(PlaybackState::Opening, PlaybackState::Idle);
            debug!("Dropped cancelled play request {}", request.id);
            return Some(Tick::Cancelled(request.id));
        }

        Some(self.open(request.id, &request.path))
    }

    fn open(&mut self, id: RequestId, path: &str) -> Tick {
        let encoding = encoding_of(path);
        if let Some(previous) = &self.last_encoding {
            if Some(previous) != encoding.as_ref() {
                debug!(
                    "Encoding changes from {} to {:?}, resetting decoder",
                    previous, encoding
                );
                if let Err(e) = self.sink.soft_reset() {
                    self.record_failure(id, path, &e);
                    self.shared
                        .state
                        .transition(PlaybackState::Opening, PlaybackState::Idle);
                    return Tick::OpenFailed(id);
                }
            }
        }

        if let Err(e) = self.storage.open_file(path) {
            self.record_failure(id, path, &e);
            self.shared
                .state
                .transition(PlaybackState::Opening, PlaybackState::Idle);
            return Tick::OpenFailed(id);
        }
        self.last_encoding = encoding;

        // A stop may have landed while the file was opening
        if self.shared.is_cancelled(id)
            || !self
                .shared
                .state
                .transition(PlaybackState::Opening, PlaybackState::Playing)
        {
            self.storage.close_file();
            debug!("Play request {} stopped while opening", id);
            return Tick::Cancelled(id);
        }

        self.session = Some(Session {
            request: id,
            path: path.to_string(),
        });
        self.shared.bytes_fed.store(0, Ordering::Relaxed);
        self.shared
            .current_track
            .store(Some(Arc::new(path.to_string())));
        info!("Playing {}", path);
        Tick::Opened(id)
    }

    fn feed_burst(&mut self) -> Tick {
        let mut chunks = 0;
        let mut bytes = 0;

        for _ in 0..self.burst_chunks {
            if self.state() != PlaybackState::Playing {
                break;
            }

            let read = match self.storage.read_chunk(&mut self.buffer) {
                Ok(0) => {
                    self.finish_stream();
                    return Tick::Ended { chunks, bytes };
                }
                Ok(n) => n,
                Err(e) => return self.fail_stream(e),
            };

            if let Err(e) = self.sink.send_bytes(&self.buffer[..read]) {
                return self.fail_stream(e);
            }
            chunks += 1;
            bytes += read;
            self.shared
                .bytes_fed
                .fetch_add(read as u64, Ordering::Relaxed);
        }

        Tick::Fed { chunks, bytes }
    }

    fn finish_stream(&mut self) {
        if let Some(session) = &self.session {
            info!(
                "Finished {} ({} bytes)",
                session.path,
                self.shared.bytes_fed.load(Ordering::Relaxed)
            );
        }
        self.end_session();
        self.shared.state.swap(PlaybackState::Idle);
    }

    fn fail_stream(&mut self, err: Error) -> Tick {
        let kind = err.failure_kind();
        if let Some(session) = self.session.take() {
            error!("Playback of {} failed: {}", session.path, err);
            self.record_failure(session.request, &session.path, &err);
        }
        self.storage.close_file();
        // After a decoder timeout the sink has already reset itself, and a
        // halt would only wait out the timeout again
        if kind != FailureKind::DecoderTimeout {
            if let Err(e) = self.sink.stop_playback() {
                warn!("Decoder halt after failure failed: {}", e);
            }
        }
        self.shared.current_track.store(None);
        self.shared.state.swap(PlaybackState::Idle);
        Tick::Failed(kind)
    }

    fn record_failure(&self, request: RequestId, path: &str, err: &Error) {
        let failure = PlaybackFailure {
            request,
            path: path.to_string(),
            kind: err.failure_kind(),
            message: err.to_string(),
        };
        warn!("Play request {} failed: {}", request, failure.message);
        self.shared.last_error.store(Some(Arc::new(failure)));
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.stop();
    }
}
