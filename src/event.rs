//! Asynchronous completions delivered to the session
//!
//! Every binding callback, network response, and timer tick is funneled into
//! one unbounded channel owned by the session driver. Completions carry the
//! epoch of the operation that issued them so stale ones can be dropped.

use tokio::sync::mpsc;

use crate::error::{CaptureError, ReplyError, SynthesisError};

/// Monotonic operation counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl Epoch {
    /// The epoch following this one
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback from a recognition engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Interim or final recognition text for the current segment
    Result { is_final: bool, text: String },
    /// Engine failure
    Error(CaptureError),
    /// Engine finished the capture session
    End,
}

/// Callback from a synthesis engine or audio output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Audio became audible
    Started,
    /// Audio finished naturally
    Finished,
    /// Audio could not be produced
    Failed(String),
    /// Preroll chime is done; synthesis may begin
    ChimeFinished,
}

/// An asynchronous completion routed back to the session
#[derive(Debug)]
pub enum Event {
    /// Recognition engine callback
    Recognition {
        epoch: Epoch,
        event: RecognitionEvent,
    },
    /// Local synthesis or audio playback callback
    Playback { epoch: Epoch, event: PlaybackEvent },
    /// Remote synthesis response
    RemoteAudio {
        epoch: Epoch,
        result: std::result::Result<Vec<u8>, SynthesisError>,
    },
    /// Reply producer response
    Reply {
        epoch: Epoch,
        result: std::result::Result<String, ReplyError>,
    },
    /// One-second sequencer tick
    Tick,
}

/// Sending half of the event channel
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Receiving half of the event channel
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Create the session event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
