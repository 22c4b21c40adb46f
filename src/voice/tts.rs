//! Upstream text-to-speech providers behind the speech endpoint

use crate::{Error, Result};

/// Upstream synthesis provider
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAI,
    ElevenLabs,
}

impl std::fmt::Display for TtsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAI => write!(f, "openai"),
            Self::ElevenLabs => write!(f, "elevenlabs"),
        }
    }
}

/// ElevenLabs voice tuning used for every request
#[derive(Debug, serde::Serialize)]
struct VoiceTuning {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
}

const ELEVENLABS_TUNING: VoiceTuning = VoiceTuning {
    stability: 0.5,
    similarity_boost: 0.75,
    style: 0.7,
    use_speaker_boost: true,
};

/// Synthesizes MP3 speech through an upstream provider
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Synthesize with `OpenAI` speech
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn openai(api_key: String, voice: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            model: "tts-1".to_string(),
            provider: TtsProvider::OpenAI,
        })
    }

    /// Synthesize with ElevenLabs
    ///
    /// # Errors
    ///
    /// Returns error if API key or voice id is missing
    pub fn elevenlabs(api_key: String, voice_id: String) -> Result<Self> {
        if api_key.is_empty() || voice_id.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key and voice id required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice_id,
            model: "eleven_multilingual_v2".to_string(),
            provider: TtsProvider::ElevenLabs,
        })
    }

    /// Override the upstream model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Provider in use
    #[must_use]
    pub const fn provider(&self) -> TtsProvider {
        self.provider
    }

    /// Synthesize text to MP3 bytes with the configured voice
    ///
    /// # Errors
    ///
    /// Returns error if the upstream request fails
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text).await,
        }
    }

    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
        }

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&TtsRequest {
                model: &self.model,
                input: text,
                voice: &self.voice,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            voice_settings: &'a VoiceTuning,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{}", self.voice);

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&ElevenLabsRequest {
                text,
                model_id: &self.model,
                voice_settings: &ELEVENLABS_TUNING,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_rejected() {
        assert!(TextToSpeech::openai(String::new(), "alloy".to_string()).is_err());
        assert!(TextToSpeech::elevenlabs("key".to_string(), String::new()).is_err());
    }

    #[test]
    fn test_elevenlabs_tuning_serializes() {
        let json = serde_json::to_value(&ELEVENLABS_TUNING).unwrap();
        assert_eq!(json["similarity_boost"], 0.75);
        assert_eq!(json["use_speaker_boost"], true);
    }
}
