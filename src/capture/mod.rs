//! Speech capture
//!
//! Wraps a recognition engine binding behind a small state machine:
//! `Idle -> Listening -> Idle`, or permanently unsupported when the platform
//! has no engine. Engine callbacks come back through the session event
//! channel tagged with the capture epoch; anything from an older epoch is
//! dropped.

mod activity;
mod microphone;
mod whisper;

pub use activity::{Endpoint, SpeechEndpointer};
pub use microphone::{Microphone, SAMPLE_RATE, samples_to_wav};
pub use whisper::{Transcriber, WhisperRecognizer};

use crate::error::CaptureError;
use crate::event::{Epoch, Event, EventSender, RecognitionEvent};

/// Delivers recognition callbacks for one capture session
#[derive(Debug, Clone)]
pub struct RecognitionSink {
    epoch: Epoch,
    tx: EventSender,
}

impl RecognitionSink {
    /// Create a sink bound to a capture epoch
    #[must_use]
    pub const fn new(epoch: Epoch, tx: EventSender) -> Self {
        Self { epoch, tx }
    }

    /// Epoch this sink reports under
    #[must_use]
    pub const fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Report an interim or final result for the current segment
    pub fn result(&self, is_final: bool, text: impl Into<String>) {
        self.send(RecognitionEvent::Result {
            is_final,
            text: text.into(),
        });
    }

    /// Report an engine error
    pub fn error(&self, kind: CaptureError) {
        self.send(RecognitionEvent::Error(kind));
    }

    /// Report the end of the capture session
    pub fn end(&self) {
        self.send(RecognitionEvent::End);
    }

    fn send(&self, event: RecognitionEvent) {
        // Receiver gone means the session shut down
        let _ = self.tx.send(Event::Recognition {
            epoch: self.epoch,
            event,
        });
    }
}

/// Platform speech recognition binding
pub trait RecognitionEngine: Send {
    /// Apply a recognition locale (e.g. "en-US")
    fn set_language(&mut self, locale: &str);

    /// Begin a capture session reporting through `sink`
    ///
    /// # Errors
    ///
    /// Returns the capture error kind if the microphone or engine cannot start
    fn start(&mut self, sink: RecognitionSink) -> Result<(), CaptureError>;

    /// Finish gracefully: deliver a final result, then end
    fn stop(&mut self);

    /// Stop immediately without delivering further results
    fn abort(&mut self);
}

/// Observable capture state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureState {
    /// A recognition engine is available
    pub supported: bool,
    /// A capture session is in progress
    pub listening: bool,
    /// Committed final segments plus the current interim segment
    pub transcript: String,
    /// Last capture failure
    pub error: Option<CaptureError>,
}

/// Change produced by an engine callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureUpdate {
    /// Transcript changed while capturing
    Transcript(String),
    /// Capture finished, successfully or not
    Ended {
        transcript: String,
        error: Option<CaptureError>,
    },
}

/// Speech capture controller
pub struct SpeechCapture {
    engine: Option<Box<dyn RecognitionEngine>>,
    events: EventSender,
    state: CaptureState,
    epoch: Epoch,
    language: String,
    pending_language: Option<String>,
    committed: String,
    stopping: bool,
}

impl SpeechCapture {
    /// Create a capture controller
    ///
    /// Passing `None` for the engine yields a permanently unsupported controller.
    #[must_use]
    pub fn new(
        mut engine: Option<Box<dyn RecognitionEngine>>,
        language: &str,
        events: EventSender,
    ) -> Self {
        if let Some(engine) = engine.as_mut() {
            engine.set_language(language);
        }

        let state = CaptureState {
            supported: engine.is_some(),
            ..CaptureState::default()
        };

        Self {
            engine,
            events,
            state,
            epoch: Epoch::default(),
            language: language.to_string(),
            pending_language: None,
            committed: String::new(),
            stopping: false,
        }
    }

    /// Current observable state
    #[must_use]
    pub const fn state(&self) -> &CaptureState {
        &self.state
    }

    /// Whether a recognition engine is available
    #[must_use]
    pub const fn is_supported(&self) -> bool {
        self.state.supported
    }

    /// Whether a capture session is in progress (including a graceful stop)
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.state.listening
    }

    /// Current capture epoch
    #[must_use]
    pub const fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Recognition locale in effect
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Begin capturing
    ///
    /// Returns whether a new capture session started. No-op when unsupported
    /// or already listening.
    pub fn start(&mut self) -> bool {
        if self.state.listening {
            tracing::debug!("capture already listening");
            return false;
        }

        let Some(engine) = self.engine.as_mut() else {
            tracing::debug!("capture unsupported on this platform");
            return false;
        };

        self.epoch = self.epoch.next();
        self.state.transcript.clear();
        self.state.error = None;
        self.committed.clear();
        self.stopping = false;

        match engine.start(RecognitionSink::new(self.epoch, self.events.clone())) {
            Ok(()) => {
                self.state.listening = true;
                tracing::info!(epoch = %self.epoch, language = %self.language, "capture started");
                true
            }
            Err(kind) => {
                self.state.error = Some(kind);
                tracing::warn!(error = %kind, "capture failed to start");
                false
            }
        }
    }

    /// Ask the engine to finish gracefully
    ///
    /// The transcript is kept; the controller returns to idle when the engine
    /// reports the end of the session.
    pub fn stop(&mut self) {
        if !self.state.listening || self.stopping {
            return;
        }

        if let Some(engine) = self.engine.as_mut() {
            self.stopping = true;
            engine.stop();
            tracing::debug!(epoch = %self.epoch, "capture stop requested");
        }
    }

    /// Cancel capture immediately, discarding the transcript
    ///
    /// Returns whether a capture was active.
    pub fn abort(&mut self) -> bool {
        if !self.state.listening {
            return false;
        }

        if let Some(engine) = self.engine.as_mut() {
            engine.abort();
        }

        // Late callbacks from the aborted session no longer match
        self.epoch = self.epoch.next();
        self.state.listening = false;
        self.state.transcript.clear();
        self.committed.clear();
        self.stopping = false;
        self.apply_pending_language();

        tracing::info!("capture aborted");
        true
    }

    /// Change the recognition locale
    ///
    /// An active capture is stopped first; the new locale applies once it ends.
    pub fn set_language(&mut self, locale: &str) {
        if self.state.listening {
            self.pending_language = Some(locale.to_string());
            self.stop();
            return;
        }

        self.apply_language(locale);
    }

    /// Apply an engine callback
    ///
    /// Returns `None` for stale callbacks and callbacks after the session ended.
    pub fn handle(&mut self, epoch: Epoch, event: RecognitionEvent) -> Option<CaptureUpdate> {
        if epoch != self.epoch || !self.state.listening {
            tracing::debug!(%epoch, current = %self.epoch, "dropping stale recognition event");
            return None;
        }

        match event {
            RecognitionEvent::Result { is_final, text } => {
                let text = text.trim();
                if is_final {
                    self.committed = join(&self.committed, text);
                    self.state.transcript.clone_from(&self.committed);
                } else {
                    self.state.transcript = join(&self.committed, text);
                }
                tracing::trace!(is_final, transcript = %self.state.transcript, "recognition result");
                Some(CaptureUpdate::Transcript(self.state.transcript.clone()))
            }
            RecognitionEvent::Error(kind) => {
                tracing::warn!(error = %kind, "capture error");
                self.state.error = Some(kind);
                self.finish();
                Some(CaptureUpdate::Ended {
                    transcript: self.state.transcript.clone(),
                    error: Some(kind),
                })
            }
            RecognitionEvent::End => {
                self.finish();
                tracing::info!(transcript = %self.state.transcript, "capture ended");
                Some(CaptureUpdate::Ended {
                    transcript: self.state.transcript.clone(),
                    error: None,
                })
            }
        }
    }

    fn finish(&mut self) {
        self.state.listening = false;
        self.stopping = false;
        self.apply_pending_language();
    }

    fn apply_pending_language(&mut self) {
        if let Some(locale) = self.pending_language.take() {
            self.apply_language(&locale);
        }
    }

    fn apply_language(&mut self, locale: &str) {
        if let Some(engine) = self.engine.as_mut() {
            engine.set_language(locale);
        }
        self.language = locale.to_string();
        tracing::debug!(language = locale, "capture language set");
    }
}

/// Join two transcript fragments with a single space
fn join(head: &str, tail: &str) -> String {
    if head.is_empty() {
        return tail.to_string();
    }
    if tail.is_empty() {
        return head.to_string();
    }
    format!("{head} {tail}")
}
