//! Remote synthesis client

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SynthesisError;

/// Default request timeout for the remote synthesis endpoint
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// A synthesis service that turns text into audio bytes
#[async_trait]
pub trait RemoteSynthesizer: Send + Sync {
    /// Synthesize `text` with an optional voice identifier
    ///
    /// # Errors
    ///
    /// Returns error if the service is unreachable or does not answer with audio
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, SynthesisError>;
}

/// Client for the `POST { text, voice }` speech endpoint
pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: String,
}

impl HttpSynthesizer {
    /// Create a client for the endpoint at `url`
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            url: url.into(),
        }
    }

    /// Endpoint URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RemoteSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, SynthesisError> {
        #[derive(serde::Serialize)]
        struct SpeakRequest<'a> {
            text: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            voice: Option<&'a str>,
        }

        let response = self
            .client
            .post(&self.url)
            .json(&SpeakRequest { text, voice })
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    SynthesisError::BackendUnavailable(e.to_string())
                } else {
                    SynthesisError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::RequestFailed(format!("status {status}: {body}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("audio/") {
            return Err(SynthesisError::RequestFailed(format!(
                "expected audio, got '{content_type}'"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::RequestFailed(e.to_string()))?;
        if audio.is_empty() {
            return Err(SynthesisError::RequestFailed("empty audio body".to_string()));
        }

        tracing::debug!(bytes = audio.len(), "remote synthesis complete");
        Ok(audio.to_vec())
    }
}
