//! Speech endpoint: `POST /api/speak` with `{ text, voice }`, answering MP3

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::ApiState;

/// Build the speak router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/speak", post(speak)).with_state(state)
}

/// Speak request
#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    #[serde(default)]
    pub text: String,
    /// Client's voice preference; the upstream voice is fixed by server config
    #[serde(default)]
    pub voice: Option<String>,
}

/// Synthesize text through the upstream provider
async fn speak(
    State(state): State<Arc<ApiState>>,
    request: Result<Json<SpeakRequest>, JsonRejection>,
) -> Result<Response, SpeakError> {
    let Json(request) = request.map_err(|_| SpeakError::MissingData)?;
    let text = request.text.trim();
    if text.is_empty() {
        return Err(SpeakError::MissingData);
    }

    let upstream = state.upstream.as_ref().ok_or(SpeakError::MissingData)?;

    tracing::debug!(chars = text.len(), voice = ?request.voice, "synthesizing");
    let audio = upstream.synthesize(text).await.map_err(|e| {
        tracing::warn!(error = %e, "upstream synthesis failed");
        SpeakError::SynthesisFailed(e.to_string())
    })?;

    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response())
}

/// Speak endpoint errors
#[derive(Debug)]
pub enum SpeakError {
    /// No text, or the server has no upstream credentials
    MissingData,
    SynthesisFailed(String),
}

impl IntoResponse for SpeakError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::MissingData => (StatusCode::BAD_REQUEST, "missing_data", "Missing data".to_string()),
            Self::SynthesisFailed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "synthesis_failed", msg),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}
