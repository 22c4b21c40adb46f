//! Shared test utilities
//!
//! Scripted stand-ins for the microphone, speech engines and reply producer
//! so sessions can be driven without audio hardware or network access.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use vera_voice::capture::{RecognitionEngine, RecognitionSink, SpeechCapture};
use vera_voice::event::{self, EventReceiver, EventSender};
use vera_voice::reply::ReplyProducer;
use vera_voice::session::{Session, SessionConfig};
use vera_voice::voice::{
    AudioSink, LocalSynthesizer, LocalUtterance, PlaybackSink, RemoteSynthesizer, VoiceInfo,
    VoiceOutput, VoiceSettings,
};
use vera_voice::{CaptureError, ReplyError, SynthesisError};

/// Ordered record of binding calls, shared across fakes
pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

/// Recognition engine whose results are pushed by the test
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    pub sink: Arc<Mutex<Option<RecognitionSink>>>,
    pub stops: Arc<Mutex<usize>>,
    pub calls: CallLog,
}

impl ScriptedEngine {
    /// Sink of the most recent capture
    pub fn sink(&self) -> RecognitionSink {
        self.sink.lock().unwrap().clone().expect("capture not started")
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn set_language(&mut self, _locale: &str) {}

    fn start(&mut self, sink: RecognitionSink) -> Result<(), CaptureError> {
        self.calls.lock().unwrap().push("capture.start");
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.calls.lock().unwrap().push("capture.stop");
        *self.stops.lock().unwrap() += 1;
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.end();
        }
    }

    fn abort(&mut self) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.end();
        }
    }
}

/// Local engine that records utterances and leaves completion to the test
#[derive(Clone, Default)]
pub struct RecordingLocal {
    pub spoken: Arc<Mutex<Vec<(LocalUtterance, PlaybackSink)>>>,
    pub cancels: Arc<Mutex<usize>>,
    pub calls: CallLog,
}

impl RecordingLocal {
    /// Text of every utterance handed to the engine
    pub fn texts(&self) -> Vec<String> {
        self.spoken.lock().unwrap().iter().map(|(u, _)| u.text.clone()).collect()
    }

    /// Report the latest utterance as audible then finished
    pub fn finish_last(&self) {
        let spoken = self.spoken.lock().unwrap();
        let (_, sink) = spoken.last().expect("nothing spoken");
        sink.started();
        sink.finished();
    }
}

impl LocalSynthesizer for RecordingLocal {
    fn voices(&self) -> Vec<VoiceInfo> {
        vec![
            VoiceInfo {
                name: "Samantha".to_string(),
                locale: "en_US".to_string(),
            },
            VoiceInfo {
                name: "Amelie".to_string(),
                locale: "fr_CA".to_string(),
            },
        ]
    }

    fn speak(&mut self, utterance: LocalUtterance, sink: PlaybackSink) -> vera_voice::Result<()> {
        self.calls.lock().unwrap().push("local.speak");
        self.spoken.lock().unwrap().push((utterance, sink));
        Ok(())
    }

    fn cancel(&mut self) {
        self.calls.lock().unwrap().push("local.cancel");
        *self.cancels.lock().unwrap() += 1;
    }
}

/// Speaker that accepts any audio and records it
///
/// The chime "finishes" at once: its completion is queued on the event
/// channel for the test to pump.
#[derive(Clone, Default)]
pub struct RecordingAudio {
    pub chimes: Arc<Mutex<usize>>,
    pub played: Arc<Mutex<Vec<(Vec<u8>, PlaybackSink)>>>,
    pub stops: Arc<Mutex<usize>>,
}

impl AudioSink for RecordingAudio {
    fn play_chime(&mut self, sink: PlaybackSink) -> vera_voice::Result<()> {
        *self.chimes.lock().unwrap() += 1;
        sink.chime_finished();
        Ok(())
    }

    fn play(&mut self, audio: Vec<u8>, sink: PlaybackSink) -> vera_voice::Result<()> {
        self.played.lock().unwrap().push((audio, sink));
        Ok(())
    }

    fn stop(&mut self) {
        *self.stops.lock().unwrap() += 1;
    }
}

/// Remote synthesis answering a fixed result
pub struct FixedRemote(pub Result<Vec<u8>, SynthesisError>);

impl FixedRemote {
    /// A server answering HTTP 500
    pub fn server_error() -> Self {
        Self(Err(SynthesisError::RequestFailed("status 500".to_string())))
    }
}

#[async_trait]
impl RemoteSynthesizer for FixedRemote {
    async fn synthesize(&self, _text: &str, _voice: Option<&str>) -> Result<Vec<u8>, SynthesisError> {
        self.0.clone()
    }
}

/// Reply producer that echoes the prompt, or fails
pub struct EchoReplies {
    pub fail: bool,
    pub delay: Duration,
}

#[async_trait]
impl ReplyProducer for EchoReplies {
    async fn produce_reply(&self, prompt: &str) -> Result<String, ReplyError> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(ReplyError::ProducerFailed("offline".to_string()));
        }
        Ok(format!("You said: {prompt}"))
    }
}

/// Session wired to scripted bindings
///
/// There is no speaker, so local speech starts without a chime.
pub struct Harness {
    pub session: Session,
    pub events: EventReceiver,
    pub tx: EventSender,
    pub engine: ScriptedEngine,
    pub local: RecordingLocal,
    pub calls: CallLog,
}

impl Harness {
    /// Local backend, no greeting, echoing replies
    pub fn new() -> Self {
        let config = SessionConfig {
            greeting: None,
            reset_greeting: None,
            ..SessionConfig::default()
        };
        Self::build(config, VoiceSettings::default(), None, false)
    }

    pub fn build(
        config: SessionConfig,
        settings: VoiceSettings,
        remote: Option<Arc<dyn RemoteSynthesizer>>,
        failing_replies: bool,
    ) -> Self {
        let (tx, events) = event::channel();
        let calls = CallLog::default();
        let engine = ScriptedEngine {
            calls: Arc::clone(&calls),
            ..ScriptedEngine::default()
        };
        let local = RecordingLocal {
            calls: Arc::clone(&calls),
            ..RecordingLocal::default()
        };

        let capture = SpeechCapture::new(Some(Box::new(engine.clone())), "en-US", tx.clone());
        let mut voice = VoiceOutput::new(settings, tx.clone()).with_local(Box::new(local.clone()));
        if let Some(remote) = remote {
            voice = voice.with_remote(remote);
        }
        let replies = Arc::new(EchoReplies {
            fail: failing_replies,
            delay: Duration::ZERO,
        });

        let session = Session::new(config, capture, voice, replies, tx.clone());
        Self {
            session,
            events,
            tx,
            engine,
            local,
            calls,
        }
    }

    /// Feed every queued completion to the session
    pub fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.session.handle(event);
        }
    }

    /// Wait for the next completion and feed it to the session
    pub async fn step(&mut self) {
        let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        self.session.handle(event);
    }
}
