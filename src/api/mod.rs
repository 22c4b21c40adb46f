//! HTTP server for the remote speech endpoint
//!
//! `vera serve` runs this router so a session configured with the remote
//! backend has somewhere to send `{ text, voice }` and get audio back.

mod health;
pub mod speak;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::voice::TextToSpeech;
use crate::Result;

/// Upstream synthesis used by the speech endpoint
#[async_trait]
pub trait SpeechUpstream: Send + Sync {
    /// Provider name for diagnostics
    fn name(&self) -> String;

    /// Synthesize text to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if the upstream request fails
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

#[async_trait]
impl SpeechUpstream for TextToSpeech {
    fn name(&self) -> String {
        self.provider().to_string()
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        Self::synthesize(self, text).await
    }
}

/// Shared state for handlers
pub struct ApiState {
    /// `None` when no provider credentials are configured
    pub upstream: Option<Arc<dyn SpeechUpstream>>,
}

impl ApiState {
    /// Pick the upstream from configured credentials
    ///
    /// ElevenLabs is preferred when both its key and voice id are set,
    /// otherwise `OpenAI` speech when its key is set.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let elevenlabs = config
            .api_keys
            .elevenlabs
            .clone()
            .zip(config.server.elevenlabs_voice_id.clone())
            .and_then(|(key, voice)| TextToSpeech::elevenlabs(key, voice).ok());
        let openai = || {
            config
                .api_keys
                .openai
                .clone()
                .and_then(|key| TextToSpeech::openai(key, config.server.openai_voice.clone()).ok())
        };

        let upstream = elevenlabs.or_else(openai).map(|tts| {
            tracing::info!(provider = %tts.provider(), "speech upstream configured");
            Arc::new(tts) as Arc<dyn SpeechUpstream>
        });
        if upstream.is_none() {
            tracing::warn!("no speech upstream credentials, /api/speak will answer 400");
        }

        Self { upstream }
    }
}

/// Build the full router
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", speak::router(state.clone()))
        .merge(health::router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Speech endpoint server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(state: ApiState, port: u16) -> Self {
        Self {
            state: Arc::new(state),
            port,
        }
    }

    /// Run the server until the shutdown future resolves
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind speech server: {e}")))?;

        tracing::info!(port = self.port, "speech server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| crate::Error::Config(format!("speech server error: {e}")))?;

        Ok(())
    }
}
