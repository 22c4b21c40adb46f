//! Configuration management for Vera
//!
//! Values come from defaults, then `~/.config/vera/config.toml`, then
//! environment variables. The binary applies command-line flags last.

pub mod file;

use std::path::PathBuf;

use crate::session::SessionConfig;
use crate::voice::{SynthesisBackend, VoiceSettings};
use crate::{Error, Result};

/// Default remote speech endpoint (the bundled `vera serve`)
pub const DEFAULT_TTS_URL: &str = "http://localhost:8787/api/speak";

/// Default Whisper-compatible transcription endpoint
pub const DEFAULT_STT_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Default speech endpoint port
pub const DEFAULT_PORT: u16 = 8787;

/// Vera configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Voice output settings
    pub voice: VoiceSettings,

    /// Remote speech endpoint URL
    pub remote_tts_url: String,

    /// Custom preroll chime
    pub chime_path: Option<PathBuf>,

    /// Speech capture configuration
    pub speech: SpeechConfig,

    /// Submit automatically when a capture ends
    pub auto_submit: bool,

    /// Speak phase narration during practices
    pub narration: bool,

    /// Reply service URL; keyword replies when unset
    pub reply_url: Option<String>,

    /// Speech endpoint server configuration
    pub server: ServerConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Directory of additional sequence files
    pub sequences_dir: PathBuf,
}

/// Speech capture configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Transcription endpoint URL
    pub stt_url: String,

    /// Transcription model
    pub stt_model: String,
}

/// Speech endpoint server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// ElevenLabs voice id
    pub elevenlabs_voice_id: Option<String>,

    /// `OpenAI` voice used when ElevenLabs is not configured
    pub openai_voice: String,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
}

impl Config {
    /// Load configuration from the config file and the process environment
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// Precedence is env > file > default.
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed
    pub fn from_sources(fc: file::VeraConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_bool = |key: &str| -> Result<Option<bool>> {
            env(key).map(|v| parse_bool(key, &v)).transpose()
        };

        // Voice output (env > toml > default)
        let defaults = VoiceSettings::default();
        let backend = match env("VERA_TTS_BACKEND").or(fc.voice.backend) {
            Some(raw) => raw
                .parse::<SynthesisBackend>()
                .map_err(Error::Config)?,
            None => defaults.backend,
        };
        let voice = VoiceSettings {
            speaker_enabled: env_bool("VERA_SPEAKER")?
                .or(fc.voice.speaker)
                .unwrap_or(defaults.speaker_enabled),
            voice_hint: env("VERA_VOICE")
                .or(fc.voice.voice)
                .unwrap_or(defaults.voice_hint),
            locale: env("VERA_LOCALE")
                .or(fc.voice.locale)
                .unwrap_or(defaults.locale),
            backend,
            rate: fc.voice.rate.unwrap_or(defaults.rate),
        };

        let remote_tts_url = env("VERA_TTS_URL")
            .or(fc.voice.tts_url)
            .unwrap_or_else(|| DEFAULT_TTS_URL.to_string());
        let chime_path = env("VERA_CHIME").or(fc.voice.chime).map(PathBuf::from);

        let speech = SpeechConfig {
            stt_url: env("VERA_STT_URL")
                .or(fc.speech.stt_url)
                .unwrap_or_else(|| DEFAULT_STT_URL.to_string()),
            stt_model: env("VERA_STT_MODEL")
                .or(fc.speech.stt_model)
                .unwrap_or_else(|| "whisper-1".to_string()),
        };

        let auto_submit = env_bool("VERA_AUTO_SUBMIT")?
            .or(fc.speech.auto_submit)
            .unwrap_or(true);
        let narration = env_bool("VERA_NARRATION")?
            .or(fc.practice.narration)
            .unwrap_or(true);

        let reply_url = env("VERA_REPLY_URL").or(fc.reply.url);

        let port = match env("VERA_PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("VERA_PORT: invalid port '{raw}'")))?,
            None => fc.server.port.unwrap_or(DEFAULT_PORT),
        };
        let server = ServerConfig {
            port,
            elevenlabs_voice_id: env("ELEVENLABS_VOICE_ID").or(fc.server.elevenlabs_voice_id),
            openai_voice: fc.server.openai_voice.unwrap_or_else(|| "alloy".to_string()),
        };

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
        };

        // Sequences directory (~/.local/share/vera/sequences on Linux)
        let sequences_dir = env("VERA_SEQUENCES_DIR")
            .or(fc.practice.sequences_dir)
            .map_or_else(default_sequences_dir, PathBuf::from);

        Ok(Self {
            voice,
            remote_tts_url,
            chime_path,
            speech,
            auto_submit,
            narration,
            reply_url,
            server,
            api_keys,
            sequences_dir,
        })
    }

    /// Session switches derived from this configuration
    #[must_use]
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            auto_submit: self.auto_submit,
            narration: self.narration,
            ..SessionConfig::default()
        }
    }

    /// Whether speech capture has a transcription service to talk to
    #[must_use]
    pub fn capture_available(&self) -> bool {
        self.api_keys.openai.is_some() || self.speech.stt_url != DEFAULT_STT_URL
    }
}

fn default_sequences_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/vera/sequences"),
        |d| d.data_dir().join("vera").join("sequences"),
    )
}

/// Parse a boolean environment value
fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{key}: expected a boolean, got '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(file: &str, env: &[(&str, &str)]) -> Result<Config> {
        let fc = file::parse_config_file(file).unwrap();
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_sources(fc, |key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load("", &[]).unwrap();
        assert!(config.voice.speaker_enabled);
        assert_eq!(config.voice.voice_hint, "Samantha");
        assert_eq!(config.voice.locale, "en-US");
        assert_eq!(config.voice.backend, SynthesisBackend::Local);
        assert_eq!(config.remote_tts_url, DEFAULT_TTS_URL);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.speech.stt_model, "whisper-1");
        assert!(config.auto_submit);
        assert!(config.narration);
        assert!(config.reply_url.is_none());
        assert!(!config.capture_available());
    }

    #[test]
    fn test_env_overrides_file() {
        let file = "[voice]\nvoice = \"Daniel\"\nbackend = \"local\"\n[server]\nport = 9000\n";
        let config = load(
            file,
            &[("VERA_TTS_BACKEND", "remote"), ("VERA_SPEAKER", "off"), ("OPENAI_API_KEY", "sk-test")],
        )
        .unwrap();

        assert_eq!(config.voice.voice_hint, "Daniel");
        assert_eq!(config.voice.backend, SynthesisBackend::Remote);
        assert!(!config.voice.speaker_enabled);
        assert_eq!(config.server.port, 9000);
        assert!(config.capture_available());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(load("", &[("VERA_TTS_BACKEND", "cloud")]), Err(Error::Config(_))));
        assert!(matches!(load("", &[("VERA_AUTO_SUBMIT", "maybe")]), Err(Error::Config(_))));
        assert!(matches!(load("", &[("VERA_PORT", "eighty")]), Err(Error::Config(_))));
    }

    #[test]
    fn test_session_config_follows_switches() {
        let config = load("[practice]\nnarration = false\n", &[("VERA_AUTO_SUBMIT", "0")]).unwrap();
        let session = config.session();
        assert!(!session.auto_submit);
        assert!(!session.narration);
        assert!(session.greeting.is_some());
    }
}
