//! Conversation session
//!
//! The session owns the capture and voice controllers, the utterance log,
//! and the active practice. It is mutated only through its methods and
//! [`Session::handle`], from a single task; asynchronous work reports back
//! as [`Event`]s tagged with the epoch it was issued under.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::capture::{CaptureState, CaptureUpdate, SpeechCapture};
use crate::error::{CaptureError, ReplyError};
use crate::event::{Epoch, Event, EventSender};
use crate::reply::ReplyProducer;
use crate::sequence::{PhaseSequencer, Sequence, SequenceCommand, SequenceEffect};
use crate::transcript;
use crate::voice::{
    PlaybackEnd, PlaybackNotice, PlaybackRequest, Priority, SpeakOutcome, SpeechOrigin,
    VoiceOutput,
};

/// Channel capacity for session observers
const CHANNEL_CAPACITY: usize = 64;

/// Shown when the reply producer fails
const REPLY_FAILED_MESSAGE: &str = "Hmm, I hit a snag. Try again?";

/// Opening line of a new conversation
pub const DEFAULT_GREETING: &str = "I'm VERA. Your AI Companion. What would you like to explore together?";

/// Opening line after a reset
pub const DEFAULT_RESET_GREETING: &str = "Reset complete. I'm here. What's on your mind?";

/// What the session is doing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Thinking => write!(f, "thinking"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// Author of an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Utterance {
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Session behavior switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Submit the draft when a capture ends on its own
    pub auto_submit: bool,
    /// Speak phase narration during practices
    pub narration: bool,
    /// Assistant line seeded into a new conversation
    pub greeting: Option<String>,
    /// Assistant line seeded after a reset
    pub reset_greeting: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_submit: true,
            narration: true,
            greeting: Some(DEFAULT_GREETING.to_string()),
            reset_greeting: Some(DEFAULT_RESET_GREETING.to_string()),
        }
    }
}

/// Practice position published to observers
#[derive(Debug, Clone, PartialEq)]
pub struct PracticeProgress {
    pub sequence_id: String,
    pub phase_index: usize,
    pub phase_label: String,
    pub elapsed_in_phase: u32,
    pub remaining_in_phase: u32,
    pub running: bool,
    pub progress: f64,
}

/// Observable change in the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    Utterance(Utterance),
    DraftChanged(String),
    CaptureChanged {
        listening: bool,
        error: Option<CaptureError>,
    },
    SpeechStarted {
        origin: SpeechOrigin,
    },
    SpeechEnded(PlaybackEnd),
    Practice(PracticeProgress),
    PracticeCompleted {
        sequence_id: String,
    },
    /// Utterances were cleared by a reset
    Cleared,
}

/// Voice conversation and practice session
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    utterances: Vec<Utterance>,
    draft: String,
    draft_base: String,
    capture: SpeechCapture,
    voice: VoiceOutput,
    replies: Arc<dyn ReplyProducer>,
    events: EventSender,
    reply_epoch: Epoch,
    reply_speech: Option<Epoch>,
    /// Capture was stopped to make way for playback
    capture_yielded: bool,
    practice: Option<PhaseSequencer>,
    observers: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Create a session, seeding the greeting if configured
    #[must_use]
    pub fn new(
        config: SessionConfig,
        capture: SpeechCapture,
        voice: VoiceOutput,
        replies: Arc<dyn ReplyProducer>,
        events: EventSender,
    ) -> Self {
        let (observers, _) = broadcast::channel(CHANNEL_CAPACITY);
        let utterances = config
            .greeting
            .as_ref()
            .map(|g| vec![Utterance::new(Role::Assistant, g.clone())])
            .unwrap_or_default();

        Self {
            config,
            state: SessionState::Idle,
            utterances,
            draft: String::new(),
            draft_base: String::new(),
            capture,
            voice,
            replies,
            events,
            reply_epoch: Epoch::default(),
            reply_speech: None,
            capture_yielded: false,
            practice: None,
            observers,
        }
    }

    /// Subscribe to session events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.observers.subscribe()
    }

    /// Sender half of the observer channel, for handing out subscriptions elsewhere
    #[must_use]
    pub fn observers(&self) -> broadcast::Sender<SessionEvent> {
        self.observers.clone()
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn utterances(&self) -> &[Utterance] {
        &self.utterances
    }

    /// Text that the next submission will send
    #[must_use]
    pub fn draft(&self) -> &str {
        &self.draft
    }

    #[must_use]
    pub const fn capture_state(&self) -> &CaptureState {
        self.capture.state()
    }

    #[must_use]
    pub const fn voice(&self) -> &VoiceOutput {
        &self.voice
    }

    #[must_use]
    pub const fn practice(&self) -> Option<&PhaseSequencer> {
        self.practice.as_ref()
    }

    /// Position of the current practice
    #[must_use]
    pub fn practice_progress(&self) -> Option<PracticeProgress> {
        self.practice.as_ref().map(practice_progress)
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Replace the draft with typed text
    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
        self.draft_base.clone_from(&self.draft);
        self.publish(SessionEvent::DraftChanged(self.draft.clone()));
    }

    /// Start capturing speech
    ///
    /// Ignored while thinking. Playback in progress is cancelled first.
    /// Returns whether capture started.
    pub fn start_listening(&mut self) -> bool {
        match self.state {
            SessionState::Thinking => {
                tracing::debug!("ignoring capture request while thinking");
                return false;
            }
            SessionState::Listening => return false,
            SessionState::Idle | SessionState::Speaking => {}
        }
        if !self.capture.is_supported() {
            tracing::debug!("speech capture unsupported");
            return false;
        }

        self.cancel_playback();

        self.draft_base.clone_from(&self.draft);
        self.capture_yielded = false;
        let started = self.capture.start();
        self.publish_capture();
        if started {
            self.set_state(SessionState::Listening);
        }
        started
    }

    /// Ask the capture to finish; the draft is kept
    pub fn stop_listening(&mut self) {
        self.capture.stop();
    }

    /// Start listening when idle, otherwise stop
    pub fn toggle_listening(&mut self) -> bool {
        if self.capture.is_listening() {
            self.stop_listening();
            false
        } else {
            self.start_listening()
        }
    }

    /// Abandon the capture, discarding what it heard
    pub fn cancel_listening(&mut self) {
        if self.capture.abort() {
            self.draft.clone_from(&self.draft_base);
            self.publish(SessionEvent::DraftChanged(self.draft.clone()));
            self.publish_capture();
        }
        if self.state == SessionState::Listening {
            self.set_state(SessionState::Idle);
        }
    }

    /// Submit the draft as a user utterance and request a reply
    ///
    /// Ignored while thinking or when the draft is blank. Returns whether a
    /// reply was requested.
    pub fn submit(&mut self) -> bool {
        if self.state == SessionState::Thinking {
            tracing::debug!("ignoring submission while thinking");
            return false;
        }
        let text = self.draft.trim().to_string();
        if text.is_empty() {
            return false;
        }

        if self.capture.abort() {
            self.publish_capture();
        }
        self.cancel_playback();

        self.draft.clear();
        self.draft_base.clear();
        self.publish(SessionEvent::DraftChanged(String::new()));
        self.push_utterance(Utterance::new(Role::User, text.clone()));

        self.reply_epoch = self.reply_epoch.next();
        let epoch = self.reply_epoch;
        let replies = Arc::clone(&self.replies);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = replies.produce_reply(&text).await;
            let _ = events.send(Event::Reply { epoch, result });
        });

        self.set_state(SessionState::Thinking);
        true
    }

    /// Replace the draft with `text` and submit it
    pub fn submit_text(&mut self, text: impl Into<String>) -> bool {
        if self.state == SessionState::Thinking {
            return false;
        }
        self.set_draft(text);
        self.submit()
    }

    /// Return to a fresh, idle conversation
    pub fn reset(&mut self) {
        if self.capture.abort() {
            self.publish_capture();
        }
        self.cancel_playback();
        self.reply_epoch = self.reply_epoch.next();
        self.reply_speech = None;

        if let Some(mut practice) = self.practice.take() {
            practice.apply(SequenceCommand::Stop);
        }

        self.utterances.clear();
        self.draft.clear();
        self.draft_base.clear();
        self.publish(SessionEvent::Cleared);
        self.publish(SessionEvent::DraftChanged(String::new()));
        if let Some(greeting) = self.config.reset_greeting.clone() {
            self.push_utterance(Utterance::new(Role::Assistant, greeting));
        }

        self.set_state(SessionState::Idle);
        tracing::info!("session reset");
    }

    /// Speak a line outside the conversation flow
    pub fn say(&mut self, text: impl Into<String>) -> SpeakOutcome {
        self.speak(PlaybackRequest::new(text, SpeechOrigin::Direct))
    }

    /// Release the microphone and speaker and stop any practice
    pub fn halt(&mut self) {
        if self.capture.abort() {
            self.publish_capture();
        }
        if self.practice.is_some() {
            self.stop_practice();
        }
        self.cancel_playback();
        if self.state == SessionState::Listening {
            self.set_state(SessionState::Idle);
        }
    }

    /// Turn the speaker on or off; off silences playback
    pub fn set_speaker_enabled(&mut self, enabled: bool) {
        if let Some(end) = self.voice.set_speaker_enabled(enabled) {
            self.on_playback_end(end);
        }
        tracing::info!(enabled, "speaker toggled");
    }

    /// Change capture and voice locale
    pub fn set_language(&mut self, locale: &str) {
        self.capture.set_language(locale);
        self.voice.set_locale(locale);
    }

    pub fn set_voice_hint(&mut self, hint: &str) {
        self.voice.set_voice_hint(hint);
    }

    /// Begin a guided practice, replacing any current one
    pub fn start_practice(&mut self, sequence: Sequence) {
        if let Some(mut previous) = self.practice.take() {
            previous.apply(SequenceCommand::Stop);
            self.cancel_narration();
        }
        tracing::info!(sequence = sequence.id(), phases = sequence.len(), "practice started");
        self.practice = Some(PhaseSequencer::new(sequence));
        self.practice_command(SequenceCommand::Start);
    }

    pub fn stop_practice(&mut self) {
        self.practice_command(SequenceCommand::Stop);
    }

    pub fn next_phase(&mut self) {
        self.practice_command(SequenceCommand::Next);
    }

    pub fn previous_phase(&mut self) {
        self.practice_command(SequenceCommand::Previous);
    }

    pub fn pause_practice(&mut self) {
        self.practice_command(SequenceCommand::Pause);
    }

    pub fn resume_practice(&mut self) {
        self.practice_command(SequenceCommand::Resume);
    }

    /// Advance the practice clock by one second
    pub fn tick(&mut self) {
        if self.practice.as_ref().is_some_and(PhaseSequencer::is_running) {
            self.practice_command(SequenceCommand::Tick);
        }
    }

    /// Whether a practice is currently counting
    #[must_use]
    pub fn is_practice_running(&self) -> bool {
        self.practice.as_ref().is_some_and(PhaseSequencer::is_running)
    }

    /// Apply an asynchronous completion
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Recognition { epoch, event } => {
                if let Some(update) = self.capture.handle(epoch, event) {
                    self.on_capture_update(update);
                }
            }
            Event::Playback { epoch, event } => {
                if let Some(notice) = self.voice.handle_playback(epoch, event) {
                    self.on_notice(notice);
                }
            }
            Event::RemoteAudio { epoch, result } => {
                if let Some(notice) = self.voice.handle_remote(epoch, result) {
                    self.on_notice(notice);
                }
            }
            Event::Reply { epoch, result } => self.on_reply(epoch, result),
            Event::Tick => self.tick(),
        }
    }

    fn on_capture_update(&mut self, update: CaptureUpdate) {
        match update {
            CaptureUpdate::Transcript(heard) => {
                self.draft = transcript::merge(&self.draft_base, &heard);
                self.publish(SessionEvent::DraftChanged(self.draft.clone()));
            }
            CaptureUpdate::Ended { transcript, error } => {
                tracing::debug!(%transcript, ?error, "capture session ended");
                self.publish_capture();
                let yielded = std::mem::take(&mut self.capture_yielded);
                if self.state != SessionState::Listening {
                    return;
                }
                // a capture cut short by playback keeps its draft for the user
                if !yielded && error.is_none() && self.config.auto_submit && !self.draft.trim().is_empty() {
                    self.submit();
                } else {
                    self.set_state(SessionState::Idle);
                }
            }
        }
    }

    fn on_reply(&mut self, epoch: Epoch, result: Result<String, ReplyError>) {
        if epoch != self.reply_epoch || self.state != SessionState::Thinking {
            tracing::debug!(%epoch, current = %self.reply_epoch, "dropping stale reply");
            return;
        }

        let text = match result {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "reply producer failed");
                self.push_utterance(Utterance::new(Role::System, REPLY_FAILED_MESSAGE));
                self.set_state(SessionState::Idle);
                return;
            }
        };

        self.push_utterance(Utterance::new(Role::Assistant, text.clone()));

        match self.speak(PlaybackRequest::new(text, SpeechOrigin::Reply)) {
            SpeakOutcome::Accepted { id, .. } => {
                self.reply_speech = Some(id);
                self.set_state(SessionState::Speaking);
            }
            SpeakOutcome::Muted | SpeakOutcome::Rejected => self.set_state(SessionState::Idle),
        }
    }

    fn on_notice(&mut self, notice: PlaybackNotice) {
        match notice {
            PlaybackNotice::Started { origin, .. } => self.publish(SessionEvent::SpeechStarted { origin }),
            PlaybackNotice::Ended(end) => self.on_playback_end(end),
        }
    }

    fn on_playback_end(&mut self, end: PlaybackEnd) {
        self.publish(SessionEvent::SpeechEnded(end));
        if self.reply_speech == Some(end.id) {
            self.reply_speech = None;
            if self.state == SessionState::Speaking {
                self.set_state(SessionState::Idle);
            }
        }
    }

    /// Speak through the voice controller, releasing the microphone first
    fn speak(&mut self, request: PlaybackRequest) -> SpeakOutcome {
        if self.capture.is_listening() && self.voice.settings().speaker_enabled {
            self.capture.stop();
            self.capture_yielded = true;
        }
        let outcome = self.voice.speak(request);
        if let SpeakOutcome::Accepted {
            preempted: Some(end),
            ..
        } = outcome
        {
            self.on_playback_end(end);
        }
        outcome
    }

    fn cancel_playback(&mut self) {
        if let Some(end) = self.voice.cancel() {
            self.on_playback_end(end);
        }
    }

    fn cancel_narration(&mut self) {
        if matches!(self.voice.active_origin(), Some(SpeechOrigin::Narration { .. })) {
            self.cancel_playback();
        }
    }

    fn practice_command(&mut self, command: SequenceCommand) {
        let Some(practice) = self.practice.as_mut() else {
            tracing::debug!(?command, "no practice in progress");
            return;
        };
        let effect = practice.apply(command);
        let progress = practice_progress(practice);
        let narrator = practice.sequence().voice().map(str::to_string);
        let narration = match effect {
            Some(SequenceEffect::Narrate(index)) => {
                practice.sequence().phase(index).map(|p| (index, p.narration.clone()))
            }
            _ => None,
        };

        match effect {
            Some(SequenceEffect::Narrate(_)) => {
                if let Some((phase_index, text)) = narration.filter(|_| self.config.narration) {
                    let mut request = PlaybackRequest::new(text, SpeechOrigin::Narration { phase_index })
                        .with_priority(Priority::Low);
                    if let Some(voice) = narrator {
                        request = request.with_voice_hint(voice);
                    }
                    if self.speak(request) == SpeakOutcome::Rejected {
                        tracing::debug!(phase_index, "narration skipped, speech in progress");
                    }
                }
            }
            Some(SequenceEffect::CancelNarration) => self.cancel_narration(),
            Some(SequenceEffect::Completed) => {
                tracing::info!(sequence = %progress.sequence_id, "practice completed");
                self.publish(SessionEvent::PracticeCompleted {
                    sequence_id: progress.sequence_id.clone(),
                });
            }
            None => {}
        }

        self.publish(SessionEvent::Practice(progress));
    }

    fn push_utterance(&mut self, utterance: Utterance) {
        self.utterances.push(utterance.clone());
        self.publish(SessionEvent::Utterance(utterance));
    }

    fn publish_capture(&self) {
        let state = self.capture.state();
        self.publish(SessionEvent::CaptureChanged {
            listening: state.listening,
            error: state.error,
        });
    }

    fn set_state(&mut self, to: SessionState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        tracing::info!(%from, %to, "session state changed");
        self.publish(SessionEvent::StateChanged { from, to });
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.observers.send(event);
    }
}

fn practice_progress(practice: &PhaseSequencer) -> PracticeProgress {
    let state = practice.state();
    PracticeProgress {
        sequence_id: practice.sequence().id().to_string(),
        phase_index: state.current_phase_index,
        phase_label: practice.current_phase().map(|p| p.label.clone()).unwrap_or_default(),
        elapsed_in_phase: state.elapsed_in_phase,
        remaining_in_phase: practice.remaining_in_phase(),
        running: state.running,
        progress: practice.progress(),
    }
}
