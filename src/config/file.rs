//! TOML configuration file loading
//!
//! Supports `~/.config/vera/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VeraConfigFile {
    /// Speaker and synthesis settings
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Speech capture settings
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Guided practice settings
    #[serde(default)]
    pub practice: PracticeFileConfig,

    /// Reply service settings
    #[serde(default)]
    pub reply: ReplyFileConfig,

    /// Speech endpoint server settings
    #[serde(default)]
    pub server: ServerFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Voice output configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Speak replies and narration
    pub speaker: Option<bool>,

    /// Voice name fragment (e.g. "Samantha")
    pub voice: Option<String>,

    /// Locale for capture and voice fallback (e.g. "en-US")
    pub locale: Option<String>,

    /// "local" or "remote"
    pub backend: Option<String>,

    /// Local speaking rate multiplier
    pub rate: Option<f32>,

    /// Remote speech endpoint URL
    pub tts_url: Option<String>,

    /// WAV or MP3 file used as the preroll chime
    pub chime: Option<String>,
}

/// Speech capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Whisper-compatible transcription URL
    pub stt_url: Option<String>,

    /// Transcription model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// Submit automatically when a capture ends
    pub auto_submit: Option<bool>,
}

/// Guided practice configuration
#[derive(Debug, Default, Deserialize)]
pub struct PracticeFileConfig {
    /// Speak phase narration
    pub narration: Option<bool>,

    /// Directory of additional sequence files
    pub sequences_dir: Option<String>,
}

/// Reply service configuration
#[derive(Debug, Default, Deserialize)]
pub struct ReplyFileConfig {
    /// Reply service URL; keyword replies when unset
    pub url: Option<String>,
}

/// Speech endpoint server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Port to listen on
    pub port: Option<u16>,

    /// ElevenLabs voice id
    pub elevenlabs_voice_id: Option<String>,

    /// `OpenAI` voice used when ElevenLabs is not configured
    pub openai_voice: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VeraConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VeraConfigFile {
    let Some(path) = config_file_path() else {
        return VeraConfigFile::default();
    };

    if !path.exists() {
        return VeraConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => parse_config_file(&content).unwrap_or_else(|e| {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config file, using defaults"
            );
            VeraConfigFile::default()
        }),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VeraConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed
pub fn parse_config_file(content: &str) -> Result<VeraConfigFile, toml::de::Error> {
    let config = toml::from_str(content)?;
    tracing::info!("loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/vera/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("vera").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let config = parse_config_file(
            r#"
            [voice]
            voice = "Daniel"
            backend = "remote"

            [practice]
            narration = false
            "#,
        )
        .unwrap();

        assert_eq!(config.voice.voice.as_deref(), Some("Daniel"));
        assert_eq!(config.voice.backend.as_deref(), Some("remote"));
        assert_eq!(config.practice.narration, Some(false));
        assert!(config.speech.stt_url.is_none());
        assert!(config.server.port.is_none());
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = parse_config_file("").unwrap();
        assert!(config.voice.speaker.is_none());
    }

    #[test]
    fn test_malformed_file_errors() {
        assert!(parse_config_file("[voice\nspeaker = ").is_err());
    }
}
