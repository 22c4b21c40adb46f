//! Session driver
//!
//! One task owns the [`Session`] and serializes everything that touches it:
//! commands from the front end, completions on the event channel, and the
//! one-second practice clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::capture::{RecognitionEngine, SpeechCapture, Transcriber, WhisperRecognizer};
use crate::config::Config;
use crate::event::{self, EventReceiver, EventSender};
use crate::reply::{HttpReplyProducer, KeywordReplies, ReplyProducer};
use crate::sequence::Sequence;
use crate::session::{PracticeProgress, Session, SessionEvent, SessionState, Utterance};
use crate::voice::{AudioPlayback, HttpSynthesizer, SystemSynthesizer, VoiceOutput};
use crate::{Error, Result};

/// Practice clock period
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Request from the front end
#[derive(Debug)]
pub enum Command {
    StartListening,
    StopListening,
    ToggleListening,
    CancelListening,
    SetDraft(String),
    Submit,
    SubmitText(String),
    Say(String),
    Reset,
    SetSpeaker(bool),
    SetLanguage(String),
    SetVoiceHint(String),
    StartPractice(Sequence),
    StopPractice,
    NextPhase,
    PreviousPhase,
    PausePractice,
    ResumePractice,
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown,
}

/// Point-in-time view of the session
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub state: SessionState,
    pub draft: String,
    pub utterances: Vec<Utterance>,
    pub listening: bool,
    pub speaker_enabled: bool,
    pub practice: Option<PracticeProgress>,
}

/// Cloneable front-end handle to a running driver
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    observers: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Send a command to the session
    ///
    /// # Errors
    ///
    /// Returns error if the driver has stopped
    pub fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::SessionClosed)
    }

    /// Subscribe to session events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.observers.subscribe()
    }

    /// Fetch a snapshot of the session
    ///
    /// # Errors
    ///
    /// Returns error if the driver has stopped
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Ask the driver to stop
    ///
    /// # Errors
    ///
    /// Returns error if the driver has already stopped
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }
}

/// Owns a session and runs its event loop
pub struct SessionDriver {
    session: Session,
    events: EventReceiver,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl SessionDriver {
    /// Wrap a session whose bindings report on `events`
    #[must_use]
    pub fn new(session: Session, events: EventReceiver) -> (Self, SessionHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            commands: commands_tx,
            observers: session.observers(),
        };
        (
            Self {
                session,
                events,
                commands,
            },
            handle,
        )
    }

    /// Build a session with the platform bindings described by `config`
    ///
    /// # Errors
    ///
    /// Returns error if a configured binding cannot be created
    pub fn from_config(config: &Config) -> Result<(Self, SessionHandle)> {
        let (tx, rx) = event::channel();
        let session = build_session(config, tx)?;
        Ok(Self::new(session, rx))
    }

    /// Run until shut down or every handle is dropped
    ///
    /// Returns the session so callers can inspect its final state.
    pub async fn run(mut self) -> Session {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset();

        tracing::debug!("session driver started");
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("all session handles dropped");
                        break;
                    };
                    if matches!(command, Command::Shutdown) {
                        tracing::info!("shutdown requested");
                        break;
                    }
                    // A phase that just began counts full seconds from now
                    let restart_clock = matches!(
                        command,
                        Command::StartPractice(_)
                            | Command::ResumePractice
                            | Command::NextPhase
                            | Command::PreviousPhase
                    );
                    self.apply(command);
                    if restart_clock {
                        ticker.reset();
                    }
                }
                Some(event) = self.events.recv() => self.session.handle(event),
                _ = ticker.tick() => self.session.tick(),
            }
        }

        self.session.halt();
        self.session
    }

    fn apply(&mut self, command: Command) {
        let session = &mut self.session;
        match command {
            Command::StartListening => {
                session.start_listening();
            }
            Command::StopListening => session.stop_listening(),
            Command::ToggleListening => {
                session.toggle_listening();
            }
            Command::CancelListening => session.cancel_listening(),
            Command::SetDraft(text) => session.set_draft(text),
            Command::Submit => {
                session.submit();
            }
            Command::SubmitText(text) => {
                session.submit_text(text);
            }
            Command::Say(text) => {
                session.say(text);
            }
            Command::Reset => session.reset(),
            Command::SetSpeaker(enabled) => session.set_speaker_enabled(enabled),
            Command::SetLanguage(locale) => session.set_language(&locale),
            Command::SetVoiceHint(hint) => session.set_voice_hint(&hint),
            Command::StartPractice(sequence) => session.start_practice(sequence),
            Command::StopPractice => session.stop_practice(),
            Command::NextPhase => session.next_phase(),
            Command::PreviousPhase => session.previous_phase(),
            Command::PausePractice => session.pause_practice(),
            Command::ResumePractice => session.resume_practice(),
            Command::Snapshot(reply) => {
                let _ = reply.send(snapshot(session));
            }
            Command::Shutdown => {}
        }
    }
}

fn snapshot(session: &Session) -> Snapshot {
    Snapshot {
        state: session.state(),
        draft: session.draft().to_string(),
        utterances: session.utterances().to_vec(),
        listening: session.capture_state().listening,
        speaker_enabled: session.voice().settings().speaker_enabled,
        practice: session.practice_progress(),
    }
}

/// Assemble a session from platform bindings
///
/// Missing platform pieces (no speech command, no audio device, no
/// transcription key) degrade to an unsupported capture or silent output
/// rather than failing.
///
/// # Errors
///
/// Returns error if the transcription URL is invalid
pub fn build_session(config: &Config, events: EventSender) -> Result<Session> {
    let engine: Option<Box<dyn RecognitionEngine>> = if config.capture_available() {
        let transcriber = Transcriber::new(
            &config.speech.stt_url,
            config.api_keys.openai.clone(),
            config.speech.stt_model.clone(),
        )?;
        Some(Box::new(WhisperRecognizer::new(transcriber)))
    } else {
        tracing::info!("no transcription service configured, speech capture disabled");
        None
    };
    let capture = SpeechCapture::new(engine, &config.voice.locale, events.clone());

    let remote = HttpSynthesizer::new(config.remote_tts_url.clone());
    tracing::debug!(url = remote.url(), backend = %config.voice.backend, "remote synthesis endpoint");
    let mut voice = VoiceOutput::new(config.voice.clone(), events.clone()).with_remote(Arc::new(remote));

    match SystemSynthesizer::detect() {
        Some(local) => voice = voice.with_local(Box::new(local)),
        None => tracing::warn!("no local speech engine found (say, espeak-ng, espeak)"),
    }

    match AudioPlayback::new() {
        Ok(mut playback) => {
            if let Some(path) = &config.chime_path {
                if let Err(e) = playback.load_chime(path) {
                    tracing::warn!(path = %path.display(), error = %e, "custom chime unusable, using built-in tone");
                }
            }
            voice = voice.with_audio(Box::new(playback));
        }
        Err(e) => tracing::warn!(error = %e, "audio output unavailable"),
    }

    let replies: Arc<dyn ReplyProducer> = match &config.reply_url {
        Some(url) => Arc::new(HttpReplyProducer::new(url.clone())),
        None => Arc::new(KeywordReplies::default()),
    };

    Ok(Session::new(config.session(), capture, voice, replies, events))
}
