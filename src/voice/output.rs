//! Voice output controller

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{AudioSink, LocalSynthesizer, LocalUtterance, PlaybackSink, RemoteSynthesizer, select_voice};
use crate::error::SynthesisError;
use crate::event::{Epoch, Event, EventSender, PlaybackEvent};

/// Which synthesis path `speak` takes first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisBackend {
    /// Platform speech engine
    #[default]
    Local,
    /// Remote speech endpoint, falling back to local
    Remote,
}

impl std::str::FromStr for SynthesisBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" | "server" => Ok(Self::Remote),
            other => Err(format!("unknown synthesis backend '{other}'")),
        }
    }
}

impl std::fmt::Display for SynthesisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Voice output configuration
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSettings {
    /// Whether anything is spoken at all
    pub speaker_enabled: bool,
    /// Preferred voice name fragment
    pub voice_hint: String,
    /// Locale for voice fallback
    pub locale: String,
    /// Primary backend
    pub backend: SynthesisBackend,
    /// Local speaking rate multiplier
    pub rate: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            speaker_enabled: true,
            voice_hint: "Samantha".to_string(),
            locale: "en-US".to_string(),
            backend: SynthesisBackend::Local,
            rate: 1.0,
        }
    }
}

/// Playback priority; equal or higher preempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Who asked for a playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpeechOrigin {
    /// Assistant reply in the conversation
    Reply,
    /// Phase narration during a practice
    Narration { phase_index: usize },
    /// One-off speech outside the session flow
    Direct,
}

/// A request to speak
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    pub text: String,
    /// Overrides the configured voice hint
    pub voice_hint: Option<String>,
    pub priority: Priority,
    pub origin: SpeechOrigin,
}

impl PlaybackRequest {
    /// Normal-priority request
    #[must_use]
    pub fn new(text: impl Into<String>, origin: SpeechOrigin) -> Self {
        Self {
            text: text.into(),
            voice_hint: None,
            priority: Priority::Normal,
            origin,
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_voice_hint(mut self, hint: impl Into<String>) -> Self {
        self.voice_hint = Some(hint.into());
        self
    }
}

/// Why a playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Completed,
    Cancelled,
    Failed,
}

/// End of one accepted playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackEnd {
    pub id: Epoch,
    pub origin: SpeechOrigin,
    pub reason: EndReason,
}

/// Start and end notifications for the controller's owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackNotice {
    Started { id: Epoch, origin: SpeechOrigin },
    Ended(PlaybackEnd),
}

/// Result of a `speak` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// Playback began; `preempted` is the end of the playback it replaced
    Accepted {
        id: Epoch,
        preempted: Option<PlaybackEnd>,
    },
    /// Speaker is off
    Muted,
    /// Empty text, or an equal-or-higher priority playback is active
    Rejected,
}

impl SpeakOutcome {
    /// Id of the accepted playback
    #[must_use]
    pub const fn id(&self) -> Option<Epoch> {
        match self {
            Self::Accepted { id, .. } => Some(*id),
            Self::Muted | Self::Rejected => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Preroll chime is playing
    Chime,
    /// Waiting on the remote endpoint
    Requesting,
    /// Remote audio is playing
    RemotePlaying,
    /// Local engine is speaking
    Local,
}

#[derive(Debug)]
struct Active {
    id: Epoch,
    request: PlaybackRequest,
    stage: Stage,
    started: bool,
}

/// Speaks text through the local or remote backend with fallback
///
/// Completions from bindings arrive as [`Event`]s and are fed back through
/// [`VoiceOutput::handle_remote`] and [`VoiceOutput::handle_playback`].
pub struct VoiceOutput {
    settings: VoiceSettings,
    local: Option<Box<dyn LocalSynthesizer>>,
    remote: Option<Arc<dyn RemoteSynthesizer>>,
    audio: Option<Box<dyn AudioSink>>,
    tx: EventSender,
    epoch: Epoch,
    active: Option<Active>,
}

impl VoiceOutput {
    /// Create a controller with no bindings attached
    #[must_use]
    pub fn new(settings: VoiceSettings, tx: EventSender) -> Self {
        Self {
            settings,
            local: None,
            remote: None,
            audio: None,
            tx,
            epoch: Epoch::default(),
            active: None,
        }
    }

    #[must_use]
    pub fn with_local(mut self, local: Box<dyn LocalSynthesizer>) -> Self {
        self.local = Some(local);
        self
    }

    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn RemoteSynthesizer>) -> Self {
        self.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn with_audio(mut self, audio: Box<dyn AudioSink>) -> Self {
        self.audio = Some(audio);
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &VoiceSettings {
        &self.settings
    }

    /// Whether a playback is in flight
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Origin of the playback in flight
    #[must_use]
    pub fn active_origin(&self) -> Option<SpeechOrigin> {
        self.active.as_ref().map(|a| a.request.origin)
    }

    /// Id of the playback in flight
    #[must_use]
    pub fn active_id(&self) -> Option<Epoch> {
        self.active.as_ref().map(|a| a.id)
    }

    /// Voices the local engine offers
    #[must_use]
    pub fn voices(&self) -> Vec<super::VoiceInfo> {
        self.local.as_ref().map(|l| l.voices()).unwrap_or_default()
    }

    /// Speak a request, preempting any playback of equal or lower priority
    pub fn speak(&mut self, request: PlaybackRequest) -> SpeakOutcome {
        if !self.settings.speaker_enabled {
            tracing::debug!("speaker off, not speaking");
            return SpeakOutcome::Muted;
        }
        if request.text.trim().is_empty() {
            return SpeakOutcome::Rejected;
        }
        if let Some(active) = &self.active {
            if request.priority < active.request.priority {
                tracing::debug!(
                    active = ?active.request.priority,
                    requested = ?request.priority,
                    "lower priority speech rejected"
                );
                return SpeakOutcome::Rejected;
            }
        }

        let preempted = self.cancel();
        self.epoch = self.epoch.next();
        let id = self.epoch;

        tracing::info!(id = %id, origin = ?request.origin, "speaking");
        self.active = Some(Active {
            id,
            request,
            stage: Stage::Chime,
            started: false,
        });

        let chiming = match self.audio.as_mut() {
            Some(audio) => match audio.play_chime(PlaybackSink::new(id, self.tx.clone())) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "preroll chime failed");
                    false
                }
            },
            None => false,
        };
        if !chiming {
            self.begin_synthesis();
        }

        SpeakOutcome::Accepted { id, preempted }
    }

    /// Silence whatever is playing
    ///
    /// Returns the end of the cancelled playback, if any. An in-flight remote
    /// request keeps running but its result is ignored.
    pub fn cancel(&mut self) -> Option<PlaybackEnd> {
        let active = self.active.take()?;
        match active.stage {
            Stage::Local => {
                if let Some(local) = self.local.as_mut() {
                    local.cancel();
                }
            }
            Stage::Chime | Stage::RemotePlaying => {
                if let Some(audio) = self.audio.as_mut() {
                    audio.stop();
                }
            }
            Stage::Requesting => {}
        }
        tracing::debug!(id = %active.id, "playback cancelled");
        Some(PlaybackEnd {
            id: active.id,
            origin: active.request.origin,
            reason: EndReason::Cancelled,
        })
    }

    /// Feed a remote synthesis response
    pub fn handle_remote(
        &mut self,
        epoch: Epoch,
        result: Result<Vec<u8>, SynthesisError>,
    ) -> Option<PlaybackNotice> {
        let Some(active) = self.active.as_mut() else {
            tracing::debug!(epoch = %epoch, "stale remote audio dropped");
            return None;
        };
        if active.id != epoch || active.stage != Stage::Requesting {
            tracing::debug!(epoch = %epoch, "stale remote audio dropped");
            return None;
        }

        let failure = match result {
            Ok(audio_bytes) => match self.audio.as_mut() {
                Some(audio) => match audio.play(audio_bytes, PlaybackSink::new(epoch, self.tx.clone())) {
                    Ok(()) => {
                        active.stage = Stage::RemotePlaying;
                        return None;
                    }
                    Err(e) => SynthesisError::PlaybackFailed(e.to_string()),
                },
                None => SynthesisError::PlaybackFailed("no audio output".to_string()),
            },
            Err(e) => e,
        };

        tracing::warn!(error = %failure, "remote synthesis failed, falling back to local");
        self.fall_back_to_local();
        None
    }

    /// Feed a playback callback from the local engine or audio output
    pub fn handle_playback(&mut self, epoch: Epoch, event: PlaybackEvent) -> Option<PlaybackNotice> {
        let active = self.active.as_mut().filter(|a| a.id == epoch)?;

        match event {
            PlaybackEvent::Started => {
                if active.started {
                    return None;
                }
                active.started = true;
                Some(PlaybackNotice::Started {
                    id: active.id,
                    origin: active.request.origin,
                })
            }
            PlaybackEvent::ChimeFinished => {
                if active.stage == Stage::Chime {
                    self.begin_synthesis();
                }
                None
            }
            PlaybackEvent::Finished => self.finish(EndReason::Completed).map(PlaybackNotice::Ended),
            PlaybackEvent::Failed(reason) => {
                if active.stage == Stage::RemotePlaying {
                    tracing::warn!(%reason, "remote audio playback failed, falling back to local");
                    self.fall_back_to_local();
                    return None;
                }
                tracing::warn!(%reason, "local synthesis failed");
                self.finish(EndReason::Failed).map(PlaybackNotice::Ended)
            }
        }
    }

    /// Turn the speaker on or off; turning it off cancels playback
    pub fn set_speaker_enabled(&mut self, enabled: bool) -> Option<PlaybackEnd> {
        self.settings.speaker_enabled = enabled;
        if enabled { None } else { self.cancel() }
    }

    pub fn set_voice_hint(&mut self, hint: impl Into<String>) {
        self.settings.voice_hint = hint.into();
    }

    pub fn set_locale(&mut self, locale: impl Into<String>) {
        self.settings.locale = locale.into();
    }

    /// Hand the active request to its backend once the chime is out of the way
    fn begin_synthesis(&mut self) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let id = active.id;
        let request = active.request.clone();

        let stage = match (self.settings.backend, self.remote.clone()) {
            (SynthesisBackend::Remote, Some(remote)) => {
                let voice = Some(
                    request
                        .voice_hint
                        .clone()
                        .unwrap_or_else(|| self.settings.voice_hint.clone()),
                )
                .filter(|v| !v.is_empty());
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = remote.synthesize(&request.text, voice.as_deref()).await;
                    let _ = tx.send(Event::RemoteAudio { epoch: id, result });
                });
                Stage::Requesting
            }
            _ => {
                self.start_local(id, &request);
                Stage::Local
            }
        };

        tracing::debug!(id = %id, ?stage, "synthesis started");
        if let Some(active) = self.active.as_mut() {
            active.stage = stage;
        }
    }

    fn fall_back_to_local(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.stage = Stage::Local;
        let id = active.id;
        let request = active.request.clone();
        self.start_local(id, &request);
    }

    fn start_local(&mut self, id: Epoch, request: &PlaybackRequest) {
        let sink = PlaybackSink::new(id, self.tx.clone());
        let Some(local) = self.local.as_mut() else {
            sink.failed("no local speech engine");
            return;
        };

        let hint = request.voice_hint.as_deref().unwrap_or(&self.settings.voice_hint);
        let voices = local.voices();
        let voice = select_voice(&voices, hint, &self.settings.locale).map(|v| v.name.clone());

        local.cancel();
        let utterance = LocalUtterance {
            text: request.text.clone(),
            voice,
            locale: self.settings.locale.clone(),
            rate: self.settings.rate,
        };
        if let Err(e) = local.speak(utterance, sink.clone()) {
            sink.failed(e.to_string());
        }
    }

    fn finish(&mut self, reason: EndReason) -> Option<PlaybackEnd> {
        let active = self.active.take()?;
        tracing::debug!(id = %active.id, ?reason, "playback ended");
        Some(PlaybackEnd {
            id: active.id,
            origin: active.request.origin,
            reason,
        })
    }
}
