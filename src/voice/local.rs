//! Local speech synthesis through the platform's speech command

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::sync::oneshot;

use super::PlaybackSink;
use crate::{Error, Result};

/// Speaking rate of the platform engines at 1.0x, in words per minute
const BASE_WORDS_PER_MINUTE: f32 = 175.0;

/// A voice offered by the local engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    /// Voice name (e.g. "Samantha")
    pub name: String,
    /// Voice locale (e.g. "en-US")
    pub locale: String,
}

/// One utterance for the local engine
#[derive(Debug, Clone, PartialEq)]
pub struct LocalUtterance {
    /// Text to speak
    pub text: String,
    /// Voice name, or `None` for the platform default
    pub voice: Option<String>,
    /// Utterance locale
    pub locale: String,
    /// Rate multiplier (1.0 is normal speed)
    pub rate: f32,
}

/// Platform speech synthesis binding
pub trait LocalSynthesizer: Send {
    /// Voices the engine offers
    fn voices(&self) -> Vec<VoiceInfo>;

    /// Speak an utterance, reporting progress through `sink`
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot start speaking
    fn speak(&mut self, utterance: LocalUtterance, sink: PlaybackSink) -> Result<()>;

    /// Silence whatever is being spoken
    fn cancel(&mut self);
}

/// Pick a voice for a hint and locale
///
/// Prefers a voice whose name contains `hint` (case-insensitive), then the
/// first voice for `locale`; `None` means the platform default.
#[must_use]
pub fn select_voice<'a>(voices: &'a [VoiceInfo], hint: &str, locale: &str) -> Option<&'a VoiceInfo> {
    let hint = hint.trim().to_lowercase();
    if !hint.is_empty() {
        if let Some(voice) = voices.iter().find(|v| v.name.to_lowercase().contains(&hint)) {
            return Some(voice);
        }
    }

    let locale = normalize_locale(locale);
    if locale.is_empty() {
        return None;
    }
    voices.iter().find(|v| normalize_locale(&v.locale) == locale)
}

/// Lowercase a locale and use `-` as separator
fn normalize_locale(locale: &str) -> String {
    locale.trim().replace('_', "-").to_lowercase()
}

/// Which command-line engine is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Engine {
    /// macOS `say`
    Say,
    /// `espeak-ng` or `espeak`
    Espeak,
}

/// Local synthesizer driving the platform speech command
pub struct SystemSynthesizer {
    program: PathBuf,
    engine: Engine,
    voices: Vec<VoiceInfo>,
    cancel: Option<oneshot::Sender<()>>,
}

impl SystemSynthesizer {
    /// Find a speech command on this machine
    ///
    /// Looks for `say`, then `espeak-ng`, then `espeak`.
    #[must_use]
    pub fn detect() -> Option<Self> {
        let (program, engine) = [("say", Engine::Say), ("espeak-ng", Engine::Espeak), ("espeak", Engine::Espeak)]
            .into_iter()
            .find_map(|(name, engine)| which::which(name).ok().map(|path| (path, engine)))?;

        let voices = list_voices(&program, engine);
        tracing::info!(
            program = %program.display(),
            voices = voices.len(),
            "local speech engine found"
        );

        Some(Self {
            program,
            engine,
            voices,
            cancel: None,
        })
    }

    fn command(&self, utterance: &LocalUtterance) -> tokio::process::Command {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let words_per_minute = (BASE_WORDS_PER_MINUTE * utterance.rate.clamp(0.25, 4.0)).round() as u32;

        let mut command = tokio::process::Command::new(&self.program);
        match self.engine {
            Engine::Say => {
                command.arg("-r").arg(words_per_minute.to_string());
                if let Some(voice) = &utterance.voice {
                    command.arg("-v").arg(voice);
                }
            }
            Engine::Espeak => {
                command.arg("-s").arg(words_per_minute.to_string());
                let voice = utterance
                    .voice
                    .clone()
                    .unwrap_or_else(|| normalize_locale(&utterance.locale));
                if !voice.is_empty() {
                    command.arg("-v").arg(voice);
                }
            }
        }
        // Leading dashes would be read as flags
        let text = if utterance.text.starts_with('-') {
            format!(" {}", utterance.text)
        } else {
            utterance.text.clone()
        };
        command
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

impl LocalSynthesizer for SystemSynthesizer {
    fn voices(&self) -> Vec<VoiceInfo> {
        self.voices.clone()
    }

    fn speak(&mut self, utterance: LocalUtterance, sink: PlaybackSink) -> Result<()> {
        self.cancel();

        let mut child = self
            .command(&utterance)
            .spawn()
            .map_err(|e| Error::Tts(format!("failed to start {}: {e}", self.program.display())))?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancel = Some(cancel_tx);

        tokio::spawn(async move {
            sink.started();
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => sink.finished(),
                    Ok(status) => sink.failed(format!("speech command exited with {status}")),
                    Err(e) => sink.failed(e.to_string()),
                },
                _ = cancel_rx => {
                    if let Err(e) = child.kill().await {
                        tracing::debug!(error = %e, "speech command already gone");
                    }
                }
            }
        });

        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

/// Ask the engine for its voices
fn list_voices(program: &Path, engine: Engine) -> Vec<VoiceInfo> {
    let args: &[&str] = match engine {
        Engine::Say => &["-v", "?"],
        Engine::Espeak => &["--voices"],
    };

    match std::process::Command::new(program).args(args).output() {
        Ok(output) => {
            let listing = String::from_utf8_lossy(&output.stdout);
            match engine {
                Engine::Say => parse_say_voices(&listing),
                Engine::Espeak => parse_espeak_voices(&listing),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to list local voices");
            Vec::new()
        }
    }
}

/// Parse `say -v ?` output: `Name   en_US    # sample sentence`
fn parse_say_voices(listing: &str) -> Vec<VoiceInfo> {
    listing
        .lines()
        .filter_map(|line| {
            let head = line.split('#').next()?.trim_end();
            let (name, locale) = head.rsplit_once(char::is_whitespace)?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(VoiceInfo {
                name: name.to_string(),
                locale: locale.replace('_', "-"),
            })
        })
        .collect()
}

/// Parse `espeak --voices` output, skipping the header row
fn parse_espeak_voices(listing: &str) -> Vec<VoiceInfo> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            match columns.as_slice() {
                [_, locale, _, name, ..] => Some(VoiceInfo {
                    name: (*name).to_string(),
                    locale: (*locale).to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}
