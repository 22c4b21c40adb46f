//! Voice output
//!
//! One `speak` contract over two synthesis backends: the platform's local
//! speech engine and a remote synthesis service that returns audio. Remote
//! failures fall back to local speech; at most one utterance is in flight.

mod local;
mod output;
mod playback;
mod remote;
mod tts;

pub use local::{LocalSynthesizer, LocalUtterance, SystemSynthesizer, VoiceInfo, select_voice};
pub use output::{
    EndReason, PlaybackEnd, PlaybackNotice, PlaybackRequest, Priority, SpeakOutcome,
    SpeechOrigin, SynthesisBackend, VoiceOutput, VoiceSettings,
};
pub use playback::{AudioPlayback, AudioSink, decode_audio};
pub(crate) use playback::{downmix, resample};
pub use remote::{HttpSynthesizer, RemoteSynthesizer};
pub use tts::{TextToSpeech, TtsProvider};

use crate::event::{Epoch, Event, EventSender, PlaybackEvent};

/// Delivers playback callbacks for one `speak` call
#[derive(Debug, Clone)]
pub struct PlaybackSink {
    epoch: Epoch,
    tx: EventSender,
}

impl PlaybackSink {
    /// Create a sink bound to a playback epoch
    #[must_use]
    pub const fn new(epoch: Epoch, tx: EventSender) -> Self {
        Self { epoch, tx }
    }

    /// Epoch this sink reports under
    #[must_use]
    pub const fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Audio became audible
    pub fn started(&self) {
        self.send(PlaybackEvent::Started);
    }

    /// Audio finished naturally
    pub fn finished(&self) {
        self.send(PlaybackEvent::Finished);
    }

    /// Audio could not be produced
    pub fn failed(&self, reason: impl Into<String>) {
        self.send(PlaybackEvent::Failed(reason.into()));
    }

    /// Preroll chime ended
    pub fn chime_finished(&self) {
        self.send(PlaybackEvent::ChimeFinished);
    }

    fn send(&self, event: PlaybackEvent) {
        let _ = self.tx.send(Event::Playback {
            epoch: self.epoch,
            event,
        });
    }
}
